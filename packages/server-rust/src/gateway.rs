//! Outbound transport for operations hosted elsewhere.

use async_trait::async_trait;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue};
use bytes::Bytes;
use serde_json::Value;
use tracing::debug;

use crate::client::CallError;

/// Sends a JSON message to a remote operation URL.
///
/// The production implementation is [`GatewayClient`]; tests substitute
/// recording or failing transports.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// POSTs `message` to `url` with the given headers and returns the
    /// decoded response payload.
    ///
    /// # Errors
    ///
    /// [`CallError::Remote`] on transport failure, [`CallError::Rejected`]
    /// when the remote side answers with a non-success status.
    async fn post(&self, url: &str, headers: HeaderMap, message: &Value) -> Result<Value, CallError>;
}

/// `reqwest`-backed transport talking to the shared gateway.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
}

impl GatewayClient {
    /// # Errors
    ///
    /// Returns the underlying `reqwest` error if the HTTP client cannot be built.
    pub fn new() -> Result<Self, reqwest::Error> {
        let mut defaults = HeaderMap::new();
        defaults.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        defaults.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder().default_headers(defaults).build()?;
        Ok(Self { http })
    }

    #[must_use]
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl RemoteTransport for GatewayClient {
    async fn post(&self, url: &str, headers: HeaderMap, message: &Value) -> Result<Value, CallError> {
        debug!(url, message = %message, "calling remote operation");

        let remote = |source| CallError::Remote {
            url: url.to_string(),
            source,
        };

        let response = self
            .http
            .post(url)
            .headers(headers)
            .json(message)
            .send()
            .await
            .map_err(remote)?;

        let status = response.status();
        let body = response.bytes().await.map_err(remote)?;
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
}

/// Decodes a response body: JSON when it parses, a string otherwise, and
/// `null` when empty.
pub(crate) fn decode_payload(body: &Bytes) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;

    type Seen = Arc<Mutex<Vec<(String, HeaderMap, Value)>>>;

    async fn echo(
        State(seen): State<Seen>,
        uri: axum::http::Uri,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        seen.lock().push((uri.path().to_string(), headers, body.clone()));
        Json(json!({ "echo": body }))
    }

    async fn spawn_gateway() -> (String, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/api/orders/v1/create", post(echo))
            .route(
                "/api/orders/v1/fail",
                post(|| async { (axum::http::StatusCode::NOT_FOUND, Json(json!({"message": "gone"}))) }),
            )
            .with_state(seen.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), seen)
    }

    #[test]
    fn decode_payload_variants() {
        assert_eq!(decode_payload(&Bytes::new()), Value::Null);
        assert_eq!(decode_payload(&Bytes::from_static(b"{\"a\":1}")), json!({"a": 1}));
        assert_eq!(decode_payload(&Bytes::from_static(b"plain")), json!("plain"));
    }

    #[tokio::test]
    async fn posts_json_with_headers() {
        let (base, seen) = spawn_gateway().await;
        let client = GatewayClient::new().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("abc"));
        headers.insert("authorization", HeaderValue::from_static("Bearer t"));

        let result = client
            .post(&format!("{base}/api/orders/v1/create"), headers, &json!({"item": 1}))
            .await
            .unwrap();
        assert_eq!(result, json!({"echo": {"item": 1}}));

        let calls = seen.lock();
        assert_eq!(calls.len(), 1);
        let (path, headers, body) = &calls[0];
        assert_eq!(path, "/api/orders/v1/create");
        assert_eq!(headers["x-request-id"], "abc");
        assert_eq!(headers["authorization"], "Bearer t");
        assert_eq!(body, &json!({"item": 1}));
    }

    #[tokio::test]
    async fn non_success_status_is_rejected() {
        let (base, _seen) = spawn_gateway().await;
        let client = GatewayClient::new().unwrap();

        let err = client
            .post(&format!("{base}/api/orders/v1/fail"), HeaderMap::new(), &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CallError::Rejected { status: 404, ref payload } if payload["message"] == "gone"
        ));
    }

    #[tokio::test]
    async fn connection_failure_is_remote_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = GatewayClient::new().unwrap();
        let err = client
            .post(&format!("http://{addr}/api/x/v1/y"), HeaderMap::new(), &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Remote { .. }));
    }
}
