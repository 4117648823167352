use std::collections::HashSet;

use tracing::debug;

use crate::reference::OperationReference;

/// Set of operation full names hosted by this process.
///
/// Populated while the host is being configured (which requires `&mut`),
/// then frozen behind an `Arc` and only read by the dispatcher. There is no
/// removal operation.
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    operations: HashSet<String>,
}

impl OperationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a full name. Returns `false` if it was already present.
    pub fn register(&mut self, full_name: impl Into<String>) -> bool {
        let full_name = full_name.into();
        debug!(operation = %full_name, "registering local operation");
        self.operations.insert(full_name)
    }

    /// Whether the given full name is hosted locally.
    #[must_use]
    pub fn contains(&self, full_name: &str) -> bool {
        self.operations.contains(full_name)
    }

    #[must_use]
    pub fn contains_reference(&self, reference: &OperationReference) -> bool {
        self.contains(&reference.full_name())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.operations.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_contains_nothing() {
        let registry = OperationRegistry::new();
        assert!(registry.is_empty());
        assert!(!registry.contains("orders:v1:create"));
    }

    #[test]
    fn register_then_contains() {
        let mut registry = OperationRegistry::new();
        assert!(registry.register("orders:v1:create"));
        assert!(registry.contains("orders:v1:create"));
        assert!(!registry.contains("orders:v2:create"));
    }

    #[test]
    fn registering_twice_is_idempotent() {
        let mut registry = OperationRegistry::new();
        assert!(registry.register("orders:v1:create"));
        assert!(!registry.register("orders:v1:create"));
        assert!(registry.contains("orders:v1:create"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn contains_reference_uses_full_name() {
        let mut registry = OperationRegistry::new();
        registry.register("orders:v1:create");

        let short = OperationReference::parse("orders:create").unwrap();
        let other = OperationReference::parse("orders:v2:create").unwrap();
        assert!(registry.contains_reference(&short));
        assert!(!registry.contains_reference(&other));
    }

    #[test]
    fn iter_lists_registered_names() {
        let mut registry = OperationRegistry::new();
        registry.register("a:v1:x");
        registry.register("b:v1:y");

        let mut names: Vec<&str> = registry.iter().collect();
        names.sort_unstable();
        assert_eq!(names, vec!["a:v1:x", "b:v1:y"]);
    }
}
