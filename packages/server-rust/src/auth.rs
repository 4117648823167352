//! Token verification and per-route scope enforcement.
//!
//! Verification sits behind [`TokenVerifier`]; the default [`JwtVerifier`]
//! checks HS256 tokens signed with the configured key. A route protected by
//! an [`AuthRequirement`] rejects requests whose token is missing, fails
//! verification, or carries none of the route's scopes.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::operation::OperationError;

/// Authentication strategy of a protected route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStrategy {
    /// Bearer token checked by the host's [`TokenVerifier`].
    Token,
}

/// Auth requirement attached to a route descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequirement {
    pub strategy: AuthStrategy,
    /// Accepted scopes. Empty means any verified token is enough.
    pub scope: Vec<String>,
}

/// Identity extracted from a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub client_id: Option<String>,
    pub scopes: Vec<String>,
}

impl Principal {
    /// Whether this principal satisfies a route's scope list.
    #[must_use]
    pub fn has_any_scope(&self, required: &[String]) -> bool {
        required.is_empty() || required.iter().any(|s| self.scopes.contains(s))
    }
}

/// Errors raised while authorizing a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    Missing,
    #[error("Invalid token: {0}")]
    Invalid(String),
    #[error("Insufficient scope")]
    InsufficientScope,
}

impl AuthError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Missing | Self::Invalid(_) => StatusCode::UNAUTHORIZED,
            Self::InsufficientScope => StatusCode::FORBIDDEN,
        }
    }
}

/// Verifies a raw token and returns the identity it carries.
pub trait TokenVerifier: Send + Sync {
    /// # Errors
    ///
    /// Returns [`AuthError::Invalid`] when the token cannot be trusted.
    fn verify(&self, token: &str) -> Result<Principal, AuthError>;
}

// ---------------------------------------------------------------------------
// JwtVerifier
// ---------------------------------------------------------------------------

/// `scope` claim: a single scope or a list of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScopeClaim {
    One(String),
    Many(Vec<String>),
}

/// Claims read from a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ScopeClaim>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// HS256 JWT verifier. Checks the signature and, when present, expiry.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    #[must_use]
    pub fn new(signing_key: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(signing_key.as_bytes()),
            validation,
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::Invalid(e.to_string()))?;

        let scopes = match data.claims.scope {
            Some(ScopeClaim::One(scope)) => vec![scope],
            Some(ScopeClaim::Many(scopes)) => scopes,
            None => Vec::new(),
        };

        Ok(Principal {
            client_id: data.claims.sub,
            scopes,
        })
    }
}

// ---------------------------------------------------------------------------
// Route guard
// ---------------------------------------------------------------------------

/// State of the auth middleware mounted on one protected route.
#[derive(Clone)]
pub struct RouteGuard {
    pub verifier: Arc<dyn TokenVerifier>,
    pub requirement: AuthRequirement,
}

impl RouteGuard {
    /// Authorizes a raw `authorization` header value.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] describing why the request was rejected.
    pub fn authorize(&self, header: Option<&str>) -> Result<Principal, AuthError> {
        let header = header.map(str::trim).filter(|h| !h.is_empty()).ok_or(AuthError::Missing)?;
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .unwrap_or(header)
            .trim();

        let principal = match self.requirement.strategy {
            AuthStrategy::Token => self.verifier.verify(token)?,
        };

        if principal.has_any_scope(&self.requirement.scope) {
            Ok(principal)
        } else {
            Err(AuthError::InsufficientScope)
        }
    }
}

/// Axum middleware enforcing a [`RouteGuard`]. The verified [`Principal`] is
/// stored in the request extensions for the request adapter.
///
/// # Errors
///
/// Rejects the request with 401 or 403 rendered as an [`OperationError`].
pub async fn require_token(
    State(guard): State<RouteGuard>,
    mut request: Request,
    next: Next,
) -> Result<Response, OperationError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let principal = guard.authorize(header).map_err(|e| {
        debug!(path = %request.uri().path(), error = %e, "request rejected by auth");
        e
    })?;

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}
