//! Operation definitions, handler signatures, and handler errors.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::future::BoxFuture;
use microbase_core::{Payload, PayloadValidator, RequestContext};
use serde_json::{json, Value};
use tracing::error;

use crate::auth::{AuthError, Principal};
use crate::client::{CallError, ServiceClient};

/// Name of the built-in health-check operation.
pub const PING_OPERATION: &str = "ping";

/// Future returned by every operation handler.
pub type HandlerFuture = BoxFuture<'static, Result<Value, OperationError>>;

/// Type-erased operation handler: merged payload in, JSON result out.
pub type OperationHandler = Arc<dyn Fn(Payload, OperationContext) -> HandlerFuture + Send + Sync>;

/// Wraps an async function or closure as an [`OperationHandler`].
pub fn handler_fn<F, Fut>(f: F) -> OperationHandler
where
    F: Fn(Payload, OperationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, OperationError>> + Send + 'static,
{
    Arc::new(move |payload, ctx| Box::pin(f(payload, ctx)))
}

// ---------------------------------------------------------------------------
// OperationDefinition
// ---------------------------------------------------------------------------

/// Authorization scope of an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Scope {
    /// Use the host's configured default scope.
    #[default]
    Default,
    /// No token required.
    Public,
    /// A valid token carrying at least one of these scopes is required.
    Required(Vec<String>),
}

/// One operation a module contributes to the host.
#[derive(Clone)]
pub struct OperationDefinition {
    /// Operation name; combined with the host's service name and version.
    pub name: String,
    /// HTTP method in REST style. Defaults to `POST`.
    pub method: Option<Method>,
    /// Custom path appended to `base/service/version` in REST style.
    pub path: Option<String>,
    pub handler: OperationHandler,
    /// Validation hook run on the merged payload.
    pub schema: Option<Arc<dyn PayloadValidator>>,
    pub scope: Scope,
}

impl OperationDefinition {
    pub fn new(name: impl Into<String>, handler: OperationHandler) -> Self {
        Self {
            name: name.into(),
            method: None,
            path: None,
            handler,
            schema: None,
            scope: Scope::Default,
        }
    }

    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn schema(mut self, schema: impl PayloadValidator + 'static) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    #[must_use]
    pub fn scope<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = Scope::Required(scopes.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn public(mut self) -> Self {
        self.scope = Scope::Public;
        self
    }
}

impl fmt::Debug for OperationDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationDefinition")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("schema", &self.schema.is_some())
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// The built-in `ping` operation used for health checks.
#[must_use]
pub fn ping_operation() -> OperationDefinition {
    OperationDefinition::new(
        PING_OPERATION,
        handler_fn(|_payload, _ctx| async { Ok(json!({ "answer": "pong" })) }),
    )
    .method(Method::GET)
    .public()
}

// ---------------------------------------------------------------------------
// OperationContext
// ---------------------------------------------------------------------------

/// Everything a handler knows about the request it is serving.
///
/// Carries the request's own [`RequestContext`]; calls made through
/// [`OperationContext::call`] propagate it to the target operation.
#[derive(Clone)]
pub struct OperationContext {
    pub request: RequestContext,
    /// Verified token identity, absent on public operations.
    pub principal: Option<Principal>,
    client: ServiceClient,
}

impl OperationContext {
    #[must_use]
    pub fn new(request: RequestContext, principal: Option<Principal>, client: ServiceClient) -> Self {
        Self {
            request,
            principal,
            client,
        }
    }

    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.request.correlation_id
    }

    #[must_use]
    pub fn client(&self) -> &ServiceClient {
        &self.client
    }

    /// Calls another operation on behalf of this request.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::call`].
    pub async fn call(&self, reference: &str, message: Value) -> Result<Value, CallError> {
        self.client.call(&self.request, reference, message).await
    }
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("request", &self.request)
            .field("principal", &self.principal)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// OperationError
// ---------------------------------------------------------------------------

/// Errors returned by operation handlers and the request adapter.
///
/// Rendered as `{statusCode, error, message}` merged with any extra `data`.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("{message}")]
    Status {
        status: StatusCode,
        message: String,
        data: Option<Payload>,
    },
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Call(#[from] CallError),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OperationError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
            data: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Attaches extra fields merged into the error payload.
    #[must_use]
    pub fn with_data(self, data: Payload) -> Self {
        match self {
            Self::Status {
                status, message, ..
            } => Self::Status {
                status,
                message,
                data: Some(data),
            },
            other => other,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Status { status, .. } => *status,
            Self::Auth(e) => e.status(),
            Self::Call(CallError::Rejected { status, .. }) => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Call(CallError::Remote { .. }) => StatusCode::BAD_GATEWAY,
            Self::Call(CallError::HostStopped) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Call(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for OperationError {
    fn into_response(self) -> Response {
        let status = self.status();

        // A rejection from a downstream operation is passed through untouched.
        if let Self::Call(CallError::Rejected {
            payload: Value::Object(payload),
            ..
        }) = self
        {
            return (status, Json(Value::Object(payload))).into_response();
        }

        let message = match &self {
            Self::Call(CallError::Remote { .. }) => {
                error!(error = %self, "remote operation failed");
                "Remote operation unavailable".to_string()
            }
            Self::Call(_) => self.to_string(),
            _ if status.is_server_error() => {
                error!(error = %self, "operation failed");
                "An internal server error occurred".to_string()
            }
            _ => self.to_string(),
        };

        let mut body = Payload::new();
        body.insert("statusCode".to_string(), json!(status.as_u16()));
        body.insert(
            "error".to_string(),
            json!(status.canonical_reason().unwrap_or("Unknown")),
        );
        body.insert("message".to_string(), json!(message));
        if let Self::Status {
            data: Some(data), ..
        } = self
        {
            body.extend(data);
        }

        (status, Json(Value::Object(body))).into_response()
    }
}
