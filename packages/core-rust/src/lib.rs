//! `microbase` core -- operation naming, URL rules, the local operation
//! registry, and the per-request context propagated across calls.

pub mod context;
pub mod reference;
pub mod registry;
pub mod schema;
pub mod url;

pub use context::{
    generate_correlation_id, RequestContext, AUTHORIZATION_HEADER, REQUEST_ID_HEADER,
};
pub use reference::{full_name, OperationReference, ReferenceError, DEFAULT_VERSION};
pub use registry::OperationRegistry;
pub use schema::{FieldDef, Payload, PayloadSchema, PayloadValidator, ValidationResult};
pub use url::build_url;

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
