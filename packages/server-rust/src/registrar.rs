//! Turns operation definitions into axum routes.
//!
//! [`RouteDescriptor::describe`] applies the routing style to a definition.
//! [`mount_route`] exposes a prepared descriptor on the router, wrapping the
//! handler in the request adapter: merge body, path and query input, capture
//! or generate the correlation id, build the request's [`RequestContext`],
//! run the schema hook, then invoke the handler.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::extract::rejection::PathRejection;
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request};
use axum::http::{HeaderMap, Method};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{on, MethodFilter};
use axum::{Json, Router};
use bytes::Bytes;
use microbase_core::{
    build_url, full_name, Payload, PayloadValidator, RequestContext, ValidationResult,
    AUTHORIZATION_HEADER, REQUEST_ID_HEADER,
};
use serde_json::{json, Value};
use tracing::{info_span, Instrument};

use crate::auth::{require_token, AuthRequirement, AuthStrategy, Principal, RouteGuard};
use crate::client::ServiceClient;
use crate::config::{RouteStyle, ServiceConfig};
use crate::operation::{OperationContext, OperationDefinition, OperationError, OperationHandler, Scope};

/// A fully resolved route: what the HTTP layer needs to expose an operation.
#[derive(Clone)]
pub struct RouteDescriptor {
    pub full_name: String,
    pub method: Method,
    pub path: String,
    pub handler: OperationHandler,
    pub schema: Option<Arc<dyn PayloadValidator>>,
    /// `None` for public operations.
    pub auth: Option<AuthRequirement>,
}

impl RouteDescriptor {
    /// Applies the routing style to a definition hosted by `service`.
    ///
    /// REST: method defaults to `POST`, an explicit path replaces the
    /// operation segment. RPC: always `POST` on the default path.
    #[must_use]
    pub fn describe(
        def: OperationDefinition,
        service: &ServiceConfig,
        style: RouteStyle,
        default_scope: &[String],
    ) -> Self {
        let (method, explicit_path) = match style {
            RouteStyle::Rest => (def.method.unwrap_or(Method::POST), def.path.as_deref()),
            RouteStyle::Rpc => (Method::POST, None),
        };

        let path = build_url(
            &service.path,
            &service.name,
            &service.version,
            &def.name,
            explicit_path,
        );

        let auth = match def.scope {
            Scope::Public => None,
            Scope::Required(scope) => Some(AuthRequirement {
                strategy: AuthStrategy::Token,
                scope,
            }),
            Scope::Default => Some(AuthRequirement {
                strategy: AuthStrategy::Token,
                scope: default_scope.to_vec(),
            }),
        };

        Self {
            full_name: full_name(&service.name, &service.version, &def.name),
            method,
            path,
            handler: def.handler,
            schema: def.schema,
            auth,
        }
    }
}

impl fmt::Debug for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDescriptor")
            .field("full_name", &self.full_name)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

/// A descriptor that passed validation and is ready to mount.
pub(crate) struct PreparedRoute {
    pub descriptor: RouteDescriptor,
    pub filter: MethodFilter,
    pub guard: Option<RouteGuard>,
}

/// State shared by every request to one operation route.
struct RouteBinding {
    full_name: String,
    handler: OperationHandler,
    schema: Option<Arc<dyn PayloadValidator>>,
    client: ServiceClient,
}

/// Adds one prepared route to the router.
pub(crate) fn mount_route(router: Router, route: PreparedRoute, client: &ServiceClient) -> Router {
    let PreparedRoute {
        descriptor,
        filter,
        guard,
    } = route;

    let binding = Arc::new(RouteBinding {
        full_name: descriptor.full_name,
        handler: descriptor.handler,
        schema: descriptor.schema,
        client: client.clone(),
    });

    let mut method_router = on(filter, move |request: Request| {
        let binding = Arc::clone(&binding);
        async move { adapt_request(&binding, request).await }
    });

    if let Some(guard) = guard {
        method_router = method_router.route_layer(from_fn_with_state(guard, require_token));
    }

    router.route(&descriptor.path, method_router)
}

async fn adapt_request(binding: &RouteBinding, request: Request) -> Response {
    match run_operation(binding, request).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn run_operation(binding: &RouteBinding, request: Request) -> Result<Value, OperationError> {
    let (mut parts, body) = request.into_parts();

    let path_params = match Path::<HashMap<String, String>>::from_request_parts(&mut parts, &()).await {
        Ok(Path(params)) => params,
        Err(PathRejection::MissingPathParams(_)) => HashMap::new(),
        Err(rejection) => return Err(OperationError::bad_request(rejection.body_text())),
    };
    let Query(query) = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .map_err(|rejection| OperationError::bad_request(rejection.body_text()))?;
    let ctx = RequestContext::from_inbound(
        header_str(&parts.headers, REQUEST_ID_HEADER),
        header_str(&parts.headers, AUTHORIZATION_HEADER),
    );
    let principal = parts.extensions.remove::<Principal>();

    // Buffered through the extractor so `DefaultBodyLimit` applies (413 when exceeded).
    let body = Bytes::from_request(Request::from_parts(parts, body), &())
        .await
        .map_err(|rejection| OperationError::new(rejection.status(), rejection.body_text()))?;
    let payload = merge_payload(parse_body(&body)?, path_params, query);

    if let Some(schema) = &binding.schema {
        if let ValidationResult::Invalid { errors } = schema.validate(&payload) {
            let mut data = Payload::new();
            data.insert("validation".to_string(), json!(errors));
            return Err(OperationError::bad_request("Invalid request payload input").with_data(data));
        }
    }

    let span = info_span!(
        "operation",
        operation = %binding.full_name,
        request_id = %ctx.correlation_id,
    );
    let ctx = OperationContext::new(ctx, principal, binding.client.clone());
    (binding.handler)(payload, ctx).instrument(span).await
}

fn parse_body(body: &[u8]) -> Result<Payload, OperationError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Payload::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Payload::new()),
        Ok(_) => Err(OperationError::bad_request("request body must be a JSON object")),
        Err(e) => Err(OperationError::bad_request(format!("invalid JSON body: {e}"))),
    }
}

/// Folds path and query parameters into the body. Later sources win:
/// body < path parameters < query parameters.
pub fn merge_payload(
    mut body: Payload,
    path_params: HashMap<String, String>,
    query: HashMap<String, String>,
) -> Payload {
    for (key, value) in path_params.into_iter().chain(query) {
        body.insert(key, Value::String(value));
    }
    body
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
