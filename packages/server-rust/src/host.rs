//! The service host: collects operations, builds the router, and serves it.
//!
//! Startup is split in the same three steps for every host:
//! [`ServiceHostBuilder::build`] validates routes and assembles the router,
//! [`ServiceHost::start`] binds the listener, [`ServiceHost::serve`] runs until
//! the shutdown future resolves.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use axum::http::Method;
use axum::routing::MethodFilter;
use axum::Router;
use microbase_core::OperationRegistry;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::auth::{JwtVerifier, RouteGuard, TokenVerifier};
use crate::client::{ClientSettings, ServiceClient};
use crate::config::{HostConfig, RouteStyle};
use crate::gateway::{GatewayClient, RemoteTransport};
use crate::middleware::build_http_layers;
use crate::module::{ModuleCatalog, ModuleContext};
use crate::operation::{ping_operation, OperationDefinition};
use crate::registrar::{mount_route, PreparedRoute, RouteDescriptor};

/// Fatal host configuration and lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("route conflict on {method} {path}: `{first}` and `{second}`")]
    RouteConflict {
        method: Method,
        path: String,
        first: String,
        second: String,
    },
    #[error("invalid route path `{path}` for `{operation}`: {reason}")]
    InvalidPath {
        operation: String,
        path: String,
        reason: &'static str,
    },
    #[error("method {method} of `{operation}` cannot be routed")]
    UnsupportedMethod { operation: String, method: Method },
    #[error("`{0}` requires a token but no signing key or verifier is configured")]
    MissingSigningKey(String),
    #[error("failed to build gateway client: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("host must be started before it can serve")]
    NotStarted,
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects operation definitions for one service.
///
/// The built-in `ping` operation is always present.
pub struct ServiceHostBuilder {
    config: HostConfig,
    catalog: ModuleCatalog,
    registry: OperationRegistry,
    routes: Vec<RouteDescriptor>,
    remote: Option<Arc<dyn RemoteTransport>>,
    verifier: Option<Arc<dyn TokenVerifier>>,
}

impl ServiceHostBuilder {
    #[must_use]
    pub fn new(config: HostConfig) -> Self {
        let mut builder = Self {
            config,
            catalog: ModuleCatalog::new(),
            registry: OperationRegistry::new(),
            routes: Vec::new(),
            remote: None,
            verifier: None,
        };
        // Health checks stay GET regardless of the routing style.
        let ping = RouteDescriptor::describe(
            ping_operation(),
            &builder.config.service,
            RouteStyle::Rest,
            &builder.config.auth.default_scope,
        );
        builder.insert_route(ping);
        builder
    }

    #[must_use]
    pub fn with_catalog(mut self, catalog: ModuleCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Replaces the gateway transport used for remote calls.
    #[must_use]
    pub fn with_remote_transport(mut self, transport: impl RemoteTransport + 'static) -> Self {
        self.remote = Some(Arc::new(transport));
        self
    }

    /// Replaces the JWT verifier built from `auth.signing_key`.
    #[must_use]
    pub fn with_token_verifier(mut self, verifier: impl TokenVerifier + 'static) -> Self {
        self.verifier = Some(Arc::new(verifier));
        self
    }

    #[must_use]
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Operations registered so far, by full name.
    #[must_use]
    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    /// Registers one operation under this host's service name and version.
    /// A later operation with the same full name replaces the earlier one.
    pub fn add_operation(&mut self, def: OperationDefinition) -> &mut Self {
        let descriptor = RouteDescriptor::describe(
            def,
            &self.config.service,
            self.config.service.style,
            &self.config.auth.default_scope,
        );
        self.insert_route(descriptor);
        self
    }

    pub fn add_module(&mut self, operations: impl IntoIterator<Item = OperationDefinition>) -> &mut Self {
        for def in operations {
            self.add_operation(def);
        }
        self
    }

    /// Resolves a configured module key through the catalog.
    ///
    /// Failures are logged and yield `None`; they never stop the host.
    #[must_use]
    pub fn load_module(&self, key: &str) -> Option<Vec<OperationDefinition>> {
        let module = match self.catalog.resolve(&self.config, key) {
            Ok(module) => module,
            Err(e) => {
                error!(key, error = %e, "failed to load module");
                return None;
            }
        };

        let ctx = ModuleContext {
            service_name: &self.config.service.name,
            service_version: &self.config.service.version,
            config: &self.config,
        };
        let operations = module.operations(&ctx);
        info!(key, module = module.name(), count = operations.len(), "loaded module");
        Some(operations)
    }

    /// Loads a module and adds its operations. Returns whether it loaded.
    pub fn mount_module(&mut self, key: &str) -> bool {
        match self.load_module(key) {
            Some(operations) => {
                self.add_module(operations);
                true
            }
            None => false,
        }
    }

    /// Loads every module listed in the configuration, in key order.
    pub fn mount_configured_modules(&mut self) -> &mut Self {
        let keys: Vec<String> = self.config.modules.keys().cloned().collect();
        for key in keys {
            self.mount_module(&key);
        }
        self
    }

    fn insert_route(&mut self, descriptor: RouteDescriptor) {
        info!(
            "added operation [{}] in [{}][{}]",
            descriptor.full_name, descriptor.method, descriptor.path
        );
        self.registry.register(descriptor.full_name.clone());

        if let Some(existing) = self
            .routes
            .iter_mut()
            .find(|r| r.full_name == descriptor.full_name)
        {
            warn!(operation = %descriptor.full_name, "replacing previously added operation");
            *existing = descriptor;
        } else {
            self.routes.push(descriptor);
        }
    }

    /// Validates every route and assembles the host.
    ///
    /// # Errors
    ///
    /// - [`HostError::RouteConflict`] when two operations claim one method and path
    /// - [`HostError::InvalidPath`] / [`HostError::UnsupportedMethod`] for routes axum cannot mount
    /// - [`HostError::MissingSigningKey`] for a protected operation without a verifier
    /// - [`HostError::Transport`] when the default gateway client cannot be built
    pub fn build(self) -> Result<ServiceHost, HostError> {
        let Self {
            config,
            registry,
            routes,
            remote,
            verifier,
            ..
        } = self;

        let verifier = verifier.or_else(|| {
            config
                .auth
                .signing_key
                .as_deref()
                .map(|key| Arc::new(JwtVerifier::new(key)) as Arc<dyn TokenVerifier>)
        });
        let prepared = prepare_routes(routes, verifier.as_ref())?;

        let remote: Arc<dyn RemoteTransport> = match remote {
            Some(remote) => remote,
            None => Arc::new(GatewayClient::new().map_err(HostError::Transport)?),
        };

        let registry = Arc::new(registry);
        let settings = ClientSettings {
            service_base_path: config.service.path.clone(),
            gateway_base_url: config.gateway.base_url(),
            gateway_base_path: config.gateway.path.clone(),
        };
        let client_for = |local: Weak<Router>| {
            ServiceClient::new(
                Arc::clone(&registry),
                settings.clone(),
                Arc::clone(&remote),
                local,
            )
        };

        // Handlers reach the router through a weak handle, so the router
        // owns its routes without owning itself.
        let router = Arc::new_cyclic(|local: &Weak<Router>| {
            let client = client_for(local.clone());
            prepared
                .into_iter()
                .fold(Router::new(), |app, route| mount_route(app, route, &client))
                .layer(build_http_layers(&config.network))
        });
        let client = client_for(Arc::downgrade(&router));

        Ok(ServiceHost {
            config,
            router,
            client,
            listener: None,
        })
    }
}

fn prepare_routes(
    routes: Vec<RouteDescriptor>,
    verifier: Option<&Arc<dyn TokenVerifier>>,
) -> Result<Vec<PreparedRoute>, HostError> {
    let mut claimed: HashMap<(Method, String), String> = HashMap::new();
    // matchit rejects one segment captured under two different names.
    let mut shapes: HashMap<String, String> = HashMap::new();
    let mut prepared = Vec::with_capacity(routes.len());

    for descriptor in routes {
        validate_path(&descriptor)?;

        let filter = MethodFilter::try_from(descriptor.method.clone()).map_err(|_| {
            HostError::UnsupportedMethod {
                operation: descriptor.full_name.clone(),
                method: descriptor.method.clone(),
            }
        })?;

        let key = (descriptor.method.clone(), descriptor.path.clone());
        if let Some(first) = claimed.insert(key, descriptor.full_name.clone()) {
            return Err(HostError::RouteConflict {
                method: descriptor.method,
                path: descriptor.path,
                first,
                second: descriptor.full_name,
            });
        }

        let shape = route_shape(&descriptor.path);
        match shapes.get(&shape) {
            Some(path) if *path != descriptor.path => {
                return Err(HostError::RouteConflict {
                    method: descriptor.method,
                    path: descriptor.path,
                    first: path.clone(),
                    second: descriptor.full_name,
                });
            }
            Some(_) => {}
            None => {
                shapes.insert(shape, descriptor.path.clone());
            }
        }

        let guard = match &descriptor.auth {
            None => None,
            Some(requirement) => Some(RouteGuard {
                verifier: verifier
                    .cloned()
                    .ok_or_else(|| HostError::MissingSigningKey(descriptor.full_name.clone()))?,
                requirement: requirement.clone(),
            }),
        };

        prepared.push(PreparedRoute {
            descriptor,
            filter,
            guard,
        });
    }

    Ok(prepared)
}

fn validate_path(descriptor: &RouteDescriptor) -> Result<(), HostError> {
    let invalid = |reason| HostError::InvalidPath {
        operation: descriptor.full_name.clone(),
        path: descriptor.path.clone(),
        reason,
    };

    if !descriptor.path.starts_with('/') {
        return Err(invalid("path must start with `/`"));
    }
    if descriptor
        .path
        .split('/')
        .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
    {
        return Err(invalid("use `{name}` for path parameters"));
    }
    Ok(())
}

/// The path with every `{param}` segment name erased.
fn route_shape(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.starts_with('{') && segment.ends_with('}') {
                "{}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

// ---------------------------------------------------------------------------
// ServiceHost
// ---------------------------------------------------------------------------

/// A built host. Call [`start`](Self::start) and then [`serve`](Self::serve).
pub struct ServiceHost {
    config: HostConfig,
    router: Arc<Router>,
    client: ServiceClient,
    listener: Option<TcpListener>,
}

impl ServiceHost {
    /// Client bound to this host's registry and router.
    #[must_use]
    pub fn client(&self) -> ServiceClient {
        self.client.clone()
    }

    /// The fully layered router.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::clone(&self.router)
    }

    #[must_use]
    pub fn registry(&self) -> &OperationRegistry {
        self.client.registry()
    }

    #[must_use]
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Binds the listener and returns the actual port (relevant for port 0).
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Bind`] if the address cannot be bound.
    pub async fn start(&mut self) -> Result<u16, HostError> {
        let addr = format!("{}:{}", self.config.network.host, self.config.network.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| HostError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener.local_addr().map_err(|source| HostError::Bind { addr, source })?;

        info!(
            service = %self.config.service.name,
            version = %self.config.service.version,
            operations = self.registry().len(),
            "server started at http://{local}"
        );
        self.listener = Some(listener);
        Ok(local.port())
    }

    /// Serves requests until `shutdown` resolves, then drains in-flight ones.
    ///
    /// # Errors
    ///
    /// [`HostError::NotStarted`] without a prior [`start`](Self::start),
    /// [`HostError::Serve`] if the server fails.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), HostError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = self.listener.ok_or(HostError::NotStarted)?;

        axum::serve(listener, Router::clone(&self.router))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(HostError::Serve)?;

        info!(service = %self.config.service.name, "server stopped");
        Ok(())
    }
}
