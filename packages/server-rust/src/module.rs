//! Operation modules and the catalog they are resolved from.
//!
//! A module is a named provider of operation definitions. Modules are
//! registered in a [`ModuleCatalog`] at compile time; configuration only
//! chooses which of them a host mounts, via its `modules` table
//! (`key -> module name`).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::HostConfig;
use crate::operation::OperationDefinition;

/// What a module sees of the host it is being mounted into.
#[derive(Debug, Clone, Copy)]
pub struct ModuleContext<'a> {
    pub service_name: &'a str,
    pub service_version: &'a str,
    pub config: &'a HostConfig,
}

/// A named provider of operations.
pub trait OperationModule: Send + Sync {
    fn name(&self) -> &str;

    fn operations(&self, ctx: &ModuleContext<'_>) -> Vec<OperationDefinition>;
}

/// Module backed by a plain function.
pub struct FnModule<F> {
    name: String,
    build: F,
}

impl<F> FnModule<F>
where
    F: Fn(&ModuleContext<'_>) -> Vec<OperationDefinition> + Send + Sync,
{
    pub fn new(name: impl Into<String>, build: F) -> Self {
        Self {
            name: name.into(),
            build,
        }
    }
}

impl<F> OperationModule for FnModule<F>
where
    F: Fn(&ModuleContext<'_>) -> Vec<OperationDefinition> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn operations(&self, ctx: &ModuleContext<'_>) -> Vec<OperationDefinition> {
        (self.build)(ctx)
    }
}

/// Why a module could not be loaded. Logged by the host, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModuleLoadError {
    #[error("no module configured under key `{0}`")]
    UnknownKey(String),
    #[error("module `{name}` (key `{key}`) is not in the catalog")]
    UnknownModule { key: String, name: String },
}

/// Explicit table of the modules a binary ships with.
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    modules: HashMap<String, Arc<dyn OperationModule>>,
}

impl ModuleCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module under its own name, replacing any previous one.
    pub fn register(&mut self, module: impl OperationModule + 'static) -> &mut Self {
        self.modules
            .insert(module.name().to_string(), Arc::new(module));
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn OperationModule>> {
        self.modules.get(name).cloned()
    }

    /// Resolves a configuration key to a module through the config's
    /// `modules` table.
    ///
    /// # Errors
    ///
    /// [`ModuleLoadError::UnknownKey`] when the key is not configured,
    /// [`ModuleLoadError::UnknownModule`] when its module is not registered.
    pub fn resolve(
        &self,
        config: &HostConfig,
        key: &str,
    ) -> Result<Arc<dyn OperationModule>, ModuleLoadError> {
        let name = config
            .modules
            .get(key)
            .ok_or_else(|| ModuleLoadError::UnknownKey(key.to_string()))?;

        self.get(name).ok_or_else(|| ModuleLoadError::UnknownModule {
            key: key.to_string(),
            name: name.clone(),
        })
    }
}

impl fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ModuleCatalog").field("modules", &names).finish()
    }
}
