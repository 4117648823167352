//! Operation dispatch: one call surface for local and remote operations.
//!
//! [`ServiceClient::call`] resolves an operation reference against the local
//! registry. Registered operations are injected into the host's own router
//! (same middleware and handler pipeline, no socket). Everything else is
//! POSTed to the gateway. Either way the caller's [`RequestContext`] travels
//! as `x-request-id` and `authorization` headers.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request};
use axum::Router;
use microbase_core::{
    build_url, OperationReference, OperationRegistry, ReferenceError, RequestContext,
    AUTHORIZATION_HEADER, REQUEST_ID_HEADER,
};
use serde_json::Value;
use tower::ServiceExt;
use tracing::{debug_span, warn, Instrument};

use crate::gateway::{decode_payload, RemoteTransport};

/// Errors from calling an operation.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    InvalidReference(#[from] ReferenceError),
    /// Transport-level failure reaching the gateway. Not retried.
    #[error("remote call to {url} failed: {source}")]
    Remote {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// The target operation answered with a non-success status.
    #[error("operation rejected the call with status {status}")]
    Rejected { status: u16, payload: Value },
    #[error("failed to encode call message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to build local request: {0}")]
    Request(#[from] axum::http::Error),
    #[error("failed to read local response: {0}")]
    LocalBody(#[from] axum::Error),
    /// The host owning the local router has been dropped.
    #[error("local host is no longer running")]
    HostStopped,
}

/// Where a resolved operation will be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locality {
    Local,
    Remote,
}

impl Locality {
    fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// Outcome of resolving a reference: the parsed name, where it runs, and
/// the URL the call will use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTarget {
    pub reference: OperationReference,
    pub locality: Locality,
    /// Router path for local calls, absolute gateway URL for remote ones.
    pub url: String,
}

/// Addressing settings the client needs.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Base path of the local service routes.
    pub service_base_path: String,
    /// `http://host:port` of the gateway.
    pub gateway_base_url: String,
    /// Base path the gateway expects.
    pub gateway_base_path: String,
}

/// Handle used by handlers (and embedders) to call operations.
///
/// Cheap to clone. Holds a weak reference to the host's router so handlers
/// calling back into their own host do not keep it alive.
#[derive(Clone)]
pub struct ServiceClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    registry: Arc<OperationRegistry>,
    settings: ClientSettings,
    remote: Arc<dyn RemoteTransport>,
    local: Weak<Router>,
}

impl ServiceClient {
    #[must_use]
    pub fn new(
        registry: Arc<OperationRegistry>,
        settings: ClientSettings,
        remote: Arc<dyn RemoteTransport>,
        local: Weak<Router>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                registry,
                settings,
                remote,
                local,
            }),
        }
    }

    /// Resolves a reference to its locality and URL without performing I/O.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::InvalidReference`] for a malformed reference.
    pub fn resolve(&self, reference: &str) -> Result<CallTarget, CallError> {
        let reference = OperationReference::parse(reference)?;
        let settings = &self.inner.settings;

        let (locality, url) = if self.inner.registry.contains_reference(&reference) {
            let url = build_url(
                &settings.service_base_path,
                &reference.service_name,
                &reference.service_version,
                &reference.operation_name,
                None,
            );
            (Locality::Local, url)
        } else {
            let path = build_url(
                &settings.gateway_base_path,
                &reference.service_name,
                &reference.service_version,
                &reference.operation_name,
                None,
            );
            (Locality::Remote, format!("{}{path}", settings.gateway_base_url))
        };

        Ok(CallTarget {
            reference,
            locality,
            url,
        })
    }

    /// Calls an operation on behalf of the request described by `ctx`.
    ///
    /// # Errors
    ///
    /// - [`CallError::InvalidReference`] for a malformed reference
    /// - [`CallError::Rejected`] when the operation answers with an error status
    /// - [`CallError::Remote`] when the gateway cannot be reached
    /// - [`CallError::HostStopped`] for a local call after the host was dropped
    pub async fn call(
        &self,
        ctx: &RequestContext,
        reference: &str,
        message: Value,
    ) -> Result<Value, CallError> {
        let headers = propagation_headers(ctx);
        let target = self.resolve(reference)?;

        let span = debug_span!(
            "call",
            operation = %target.reference,
            locality = target.locality.as_str(),
            request_id = %ctx.correlation_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async move {
            let start = Instant::now();
            let result = match target.locality {
                Locality::Local => self.inject(&target.url, headers, &message).await,
                Locality::Remote => self.inner.remote.post(&target.url, headers, &message).await,
            };

            #[allow(clippy::cast_possible_truncation)]
            let duration_ms = start.elapsed().as_millis() as u64;
            let outcome = if result.is_ok() { "ok" } else { "error" };
            tracing::Span::current().record("duration_ms", duration_ms);
            tracing::Span::current().record("outcome", outcome);
            tracing::debug!(duration_ms, outcome, "call complete");

            result
        }
        .instrument(span)
        .await
    }

    /// Runs a POST through the local router without touching the network.
    async fn inject(&self, url: &str, headers: HeaderMap, message: &Value) -> Result<Value, CallError> {
        let router = self.inner.local.upgrade().ok_or(CallError::HostStopped)?;

        let mut request = Request::builder()
            .method(Method::POST)
            .uri(url)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(message)?))?;
        request.headers_mut().extend(headers);

        let response = Router::clone(&router)
            .oneshot(request)
            .await
            .unwrap_or_else(|never| match never {});

        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let payload = decode_payload(&body);

        if status.is_success() {
            Ok(payload)
        } else {
            Err(CallError::Rejected {
                status: status.as_u16(),
                payload,
            })
        }
    }

    #[must_use]
    pub fn registry(&self) -> &OperationRegistry {
        &self.inner.registry
    }
}

impl fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceClient")
            .field("settings", &self.inner.settings)
            .field("local_operations", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

/// Headers carrying a request's context to the operations it calls.
///
/// Values that are not valid header values are dropped with a warning.
#[must_use]
pub fn propagation_headers(ctx: &RequestContext) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let entries = [
        (REQUEST_ID_HEADER, Some(ctx.correlation_id.as_str())),
        (AUTHORIZATION_HEADER, ctx.authorization.as_deref()),
    ];

    for (name, value) in entries {
        let Some(value) = value.filter(|v| !v.is_empty()) else {
            continue;
        };
        match HeaderValue::from_str(value) {
            Ok(value) => {
                headers.insert(HeaderName::from_static(name), value);
            }
            Err(_) => warn!(header = name, "dropping unrepresentable context header"),
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::routing::post;
    use axum::Json;
    use serde_json::json;

    use super::*;

    /// Transport that fails the test if the dispatcher ever goes remote.
    struct NoNetwork;

    #[async_trait]
    impl RemoteTransport for NoNetwork {
        async fn post(&self, url: &str, _: HeaderMap, _: &Value) -> Result<Value, CallError> {
            panic!("unexpected network call to {url}");
        }
    }

    fn settings() -> ClientSettings {
        ClientSettings {
            service_base_path: "/svc".to_string(),
            gateway_base_url: "http://gateway:8000".to_string(),
            gateway_base_path: "/gw".to_string(),
        }
    }

    fn client_with(registry: OperationRegistry, local: Weak<Router>) -> ServiceClient {
        ServiceClient::new(Arc::new(registry), settings(), Arc::new(NoNetwork), local)
    }

    #[test]
    fn resolves_registered_operation_locally() {
        let mut registry = OperationRegistry::new();
        registry.register("orders:v1:create");
        let client = client_with(registry, Weak::new());

        let target = client.resolve("orders:create").unwrap();
        assert_eq!(target.locality, Locality::Local);
        assert_eq!(target.url, "/svc/orders/v1/create");
    }

    #[test]
    fn resolves_unknown_operation_through_gateway() {
        let client = client_with(OperationRegistry::new(), Weak::new());

        let target = client.resolve("billing:v3:charge").unwrap();
        assert_eq!(target.locality, Locality::Remote);
        assert_eq!(target.url, "http://gateway:8000/gw/billing/v3/charge");
    }

    #[test]
    fn malformed_reference_is_rejected() {
        let client = client_with(OperationRegistry::new(), Weak::new());
        assert!(matches!(
            client.resolve("a:b:c:d"),
            Err(CallError::InvalidReference(_))
        ));
    }

    #[test]
    fn propagation_headers_skip_missing_authorization() {
        let headers = propagation_headers(&RequestContext::new("abc", None));
        assert_eq!(headers["x-request-id"], "abc");
        assert!(headers.get("authorization").is_none());

        let headers =
            propagation_headers(&RequestContext::new("abc", Some("Bearer t".to_string())));
        assert_eq!(headers["authorization"], "Bearer t");
    }

    #[test]
    fn propagation_headers_drop_invalid_values() {
        let headers = propagation_headers(&RequestContext::new("bad\nid", None));
        assert!(headers.get("x-request-id").is_none());
    }

    #[tokio::test]
    async fn local_call_injects_into_router() {
        let router = Arc::new(Router::new().route(
            "/svc/orders/v1/create",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                Json(json!({
                    "body": body,
                    "request_id": headers["x-request-id"].to_str().unwrap(),
                }))
            }),
        ));
        let mut registry = OperationRegistry::new();
        registry.register("orders:v1:create");
        let client = client_with(registry, Arc::downgrade(&router));

        let ctx = RequestContext::new("abc", None);
        let result = client
            .call(&ctx, "orders:create", json!({"item": 1}))
            .await
            .unwrap();
        assert_eq!(result, json!({"body": {"item": 1}, "request_id": "abc"}));
    }

    #[tokio::test]
    async fn local_error_status_is_rejection() {
        let router = Arc::new(Router::new().route(
            "/svc/orders/v1/create",
            post(|| async { (axum::http::StatusCode::CONFLICT, Json(json!({"message": "dup"}))) }),
        ));
        let mut registry = OperationRegistry::new();
        registry.register("orders:v1:create");
        let client = client_with(registry, Arc::downgrade(&router));

        let err = client
            .call(&RequestContext::generate(), "orders:create", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Rejected { status: 409, .. }));
    }

    #[tokio::test]
    async fn local_call_after_host_dropped_fails() {
        let router = Arc::new(Router::new());
        let mut registry = OperationRegistry::new();
        registry.register("orders:v1:create");
        let client = client_with(registry, Arc::downgrade(&router));
        drop(router);

        let err = client
            .call(&RequestContext::generate(), "orders:create", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::HostStopped));
    }
}
