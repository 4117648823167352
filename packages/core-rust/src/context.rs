use uuid::Uuid;

/// Header carrying the correlation id between services.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Header carrying the caller's authorization credential.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Per-request context propagated to every call the request makes.
///
/// Built once when a request enters the host and passed explicitly down the
/// call graph. Each in-flight request owns its own value, so concurrent
/// requests never see each other's correlation id or credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Identifier shared by every call in one logical request chain.
    pub correlation_id: String,
    /// Raw `authorization` header value of the inbound request, if any.
    pub authorization: Option<String>,
}

impl RequestContext {
    #[must_use]
    pub fn new(correlation_id: impl Into<String>, authorization: Option<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            authorization,
        }
    }

    /// Starts a new request chain with a fresh correlation id and no credential.
    ///
    /// Used for calls that do not originate from an inbound request, such as
    /// startup tasks.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(generate_correlation_id(), None)
    }

    /// Builds the context of an inbound request from its header values.
    ///
    /// A missing or blank correlation id is replaced by a generated one.
    #[must_use]
    pub fn from_inbound(correlation_id: Option<&str>, authorization: Option<&str>) -> Self {
        let correlation_id = correlation_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map_or_else(generate_correlation_id, str::to_string);

        Self {
            correlation_id,
            authorization: authorization.map(str::to_string),
        }
    }

    #[must_use]
    pub fn with_authorization(mut self, authorization: impl Into<String>) -> Self {
        self.authorization = Some(authorization.into());
        self
    }
}

/// Generates a new unique correlation id (UUID v4).
#[must_use]
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_keeps_given_values() {
        let ctx = RequestContext::from_inbound(Some("abc"), Some("Bearer t"));
        assert_eq!(ctx.correlation_id, "abc");
        assert_eq!(ctx.authorization.as_deref(), Some("Bearer t"));
    }

    #[test]
    fn inbound_generates_missing_correlation_id() {
        let ctx = RequestContext::from_inbound(None, None);
        assert!(!ctx.correlation_id.is_empty());
        assert!(Uuid::parse_str(&ctx.correlation_id).is_ok());
        assert!(ctx.authorization.is_none());
    }

    #[test]
    fn inbound_generates_for_blank_correlation_id() {
        let ctx = RequestContext::from_inbound(Some("  "), None);
        assert!(!ctx.correlation_id.trim().is_empty());
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = RequestContext::generate();
        let b = RequestContext::generate();
        assert_ne!(a.correlation_id, b.correlation_id);
    }

    #[test]
    fn with_authorization_sets_credential() {
        let ctx = RequestContext::new("id-1", None).with_authorization("Bearer x");
        assert_eq!(ctx.authorization.as_deref(), Some("Bearer x"));
    }
}
