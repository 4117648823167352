//! Transport-level middleware wrapped around every operation route.
//!
//! Layers are listed outermost first:
//! 1. `SetRequestId` assigns a UUID v4 `x-request-id` when the caller sent none
//! 2. `Trace` opens a span per HTTP request
//! 3. `Compression` gzips responses for clients that accept it
//! 4. `CORS` from the configured origins
//! 5. `Timeout` answers 408 once the configured duration elapses
//! 6. `PropagateRequestId` echoes `x-request-id` on the response
//! 7. `DefaultBodyLimit` caps buffered request bodies at `max_body_size`
//!
//! Because the id is assigned before the router runs, the request adapter
//! normally finds one already present and carries it into the request's
//! context. The body cap is enforced when the adapter buffers the body, so
//! oversized requests get 413 before any handler runs. Auth and payload
//! validation are per-route and live elsewhere.

use axum::extract::DefaultBodyLimit;
use axum::http::header::HeaderName;
use axum::http::{Method, StatusCode};
use microbase_core::REQUEST_ID_HEADER;
use tower::layer::util::{Identity, Stack};
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::NetworkConfig;

type HttpLayers = Stack<
    DefaultBodyLimit,
    Stack<
        PropagateRequestIdLayer,
        Stack<
            TimeoutLayer,
            Stack<
                CorsLayer,
                Stack<
                    CompressionLayer,
                    Stack<
                        TraceLayer<SharedClassifier<ServerErrorsAsFailures>>,
                        Stack<SetRequestIdLayer<MakeRequestUuid>, Identity>,
                    >,
                >,
            >,
        >,
    >,
>;

#[must_use]
pub fn build_http_layers(config: &NetworkConfig) -> HttpLayers {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(build_cors_layer(&config.cors_origins))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(request_id))
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .into_inner()
}

/// `"*"` anywhere in the list allows any origin; otherwise unparseable
/// entries are skipped.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|o| o.parse().ok()))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(Any)
}
