//! Operation reference grammar.
//!
//! Callers address operations with one of three forms:
//!
//! - `name` -- service and operation share the same name
//! - `service:operation`
//! - `service:version:operation`
//!
//! The version defaults to [`DEFAULT_VERSION`] whenever it is not spelled out.

use std::fmt;
use std::str::FromStr;

/// Version assumed when a reference does not name one.
pub const DEFAULT_VERSION: &str = "v1";

const SEPARATOR: char = ':';

/// Errors from parsing an operation reference.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    #[error("invalid operation reference `{reference}`: {reason}")]
    InvalidFormat {
        reference: String,
        reason: &'static str,
    },
}

/// A parsed `{service, version, operation}` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationReference {
    pub service_name: String,
    pub service_version: String,
    pub operation_name: String,
}

impl OperationReference {
    #[must_use]
    pub fn new(
        service_name: impl Into<String>,
        service_version: impl Into<String>,
        operation_name: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: service_version.into(),
            operation_name: operation_name.into(),
        }
    }

    /// Parses a colon-delimited reference of one to three segments.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError::InvalidFormat`] for an empty reference, a
    /// reference with more than three segments, or one with an empty segment.
    pub fn parse(reference: &str) -> Result<Self, ReferenceError> {
        let invalid = |reason| ReferenceError::InvalidFormat {
            reference: reference.to_string(),
            reason,
        };

        if reference.is_empty() {
            return Err(invalid("reference is empty"));
        }

        let segments: Vec<&str> = reference.split(SEPARATOR).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid("segments must not be empty"));
        }

        match segments.as_slice() {
            [name] => Ok(Self::new(*name, DEFAULT_VERSION, *name)),
            [service, operation] => Ok(Self::new(*service, DEFAULT_VERSION, *operation)),
            [service, version, operation] => Ok(Self::new(*service, *version, *operation)),
            _ => Err(invalid("expected at most three `:`-separated segments")),
        }
    }

    /// Canonical `service:version:operation` key used by the registry.
    #[must_use]
    pub fn full_name(&self) -> String {
        full_name(
            &self.service_name,
            &self.service_version,
            &self.operation_name,
        )
    }
}

impl FromStr for OperationReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for OperationReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.service_name, self.service_version, self.operation_name
        )
    }
}

/// Builds the canonical full name from its three parts.
#[must_use]
pub fn full_name(service_name: &str, service_version: &str, operation_name: &str) -> String {
    format!("{service_name}{SEPARATOR}{service_version}{SEPARATOR}{operation_name}")
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn single_segment_names_service_and_operation() {
        let r = OperationReference::parse("ping").unwrap();
        assert_eq!(r.service_name, "ping");
        assert_eq!(r.operation_name, "ping");
        assert_eq!(r.service_version, "v1");
    }

    #[test]
    fn two_segments_default_version() {
        let r = OperationReference::parse("orders:create").unwrap();
        assert_eq!(r, OperationReference::new("orders", "v1", "create"));
    }

    #[test]
    fn three_segments_keep_explicit_version() {
        let r: OperationReference = "orders:v2:create".parse().unwrap();
        assert_eq!(r, OperationReference::new("orders", "v2", "create"));
        assert_eq!(r.full_name(), "orders:v2:create");
        assert_eq!(r.to_string(), "orders:v2:create");
    }

    #[test]
    fn more_than_three_segments_is_rejected() {
        let err = OperationReference::parse("a:b:c:d").unwrap_err();
        assert!(matches!(
            err,
            ReferenceError::InvalidFormat { ref reference, .. } if reference == "a:b:c:d"
        ));
    }

    #[test]
    fn empty_reference_and_empty_segments_are_rejected() {
        assert!(OperationReference::parse("").is_err());
        assert!(OperationReference::parse("orders:").is_err());
        assert!(OperationReference::parse(":v1:create").is_err());
        assert!(OperationReference::parse("orders::create").is_err());
    }

    fn segment() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_-]{0,11}"
    }

    proptest! {
        #[test]
        fn version_defaults_unless_given(
            service in segment(),
            version in proptest::option::of(segment()),
            operation in segment(),
        ) {
            let reference = match &version {
                Some(v) => format!("{service}:{v}:{operation}"),
                None => format!("{service}:{operation}"),
            };
            let parsed = OperationReference::parse(&reference).unwrap();
            prop_assert_eq!(&parsed.service_name, &service);
            prop_assert_eq!(&parsed.operation_name, &operation);
            prop_assert_eq!(
                parsed.service_version,
                version.unwrap_or_else(|| DEFAULT_VERSION.to_string())
            );
        }

        #[test]
        fn full_name_round_trips_through_parse(
            service in segment(),
            version in segment(),
            operation in segment(),
        ) {
            let name = full_name(&service, &version, &operation);
            let parsed = OperationReference::parse(&name).unwrap();
            prop_assert_eq!(parsed.full_name(), name);
        }
    }
}
