//! `microbase` server -- hosts a service's operations over HTTP and
//! dispatches calls to local or remote operations.

pub mod auth;
pub mod client;
pub mod config;
pub mod gateway;
pub mod host;
pub mod middleware;
pub mod module;
pub mod operation;
pub mod registrar;

pub use auth::{AuthError, AuthRequirement, AuthStrategy, JwtVerifier, Principal, TokenVerifier};
pub use client::{propagation_headers, CallError, CallTarget, ClientSettings, Locality, ServiceClient};
pub use config::{HostArgs, HostConfig, RouteStyle};
pub use gateway::{GatewayClient, RemoteTransport};
pub use host::{HostError, ServiceHost, ServiceHostBuilder};
pub use module::{FnModule, ModuleCatalog, ModuleContext, ModuleLoadError, OperationModule};
pub use operation::{
    handler_fn, ping_operation, OperationContext, OperationDefinition, OperationError,
    OperationHandler, Scope, PING_OPERATION,
};
pub use registrar::RouteDescriptor;

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
