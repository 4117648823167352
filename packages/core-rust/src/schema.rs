use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Merged input of an operation: body fields, path parameters and query
/// parameters folded into one JSON object.
pub type Payload = Map<String, Value>;

/// Result of validating a payload against an operation's schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// The payload conforms to the schema.
    Valid,
    /// The payload violates one or more schema constraints.
    Invalid {
        /// Human-readable descriptions of each validation failure.
        errors: Vec<String>,
    },
}

impl ValidationResult {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Hook run on the merged payload before an operation's handler.
pub trait PayloadValidator: Send + Sync {
    fn validate(&self, payload: &Payload) -> ValidationResult;
}

impl<F> PayloadValidator for F
where
    F: Fn(&Payload) -> ValidationResult + Send + Sync,
{
    fn validate(&self, payload: &Payload) -> ValidationResult {
        self(payload)
    }
}

/// Single field definition within a payload schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    /// Name of the field.
    pub name: String,
    /// Whether the field must be present in every payload.
    pub required: bool,
}

/// Field-presence schema: the minimal built-in validator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayloadSchema {
    pub fields: Vec<FieldDef>,
}

impl PayloadSchema {
    /// Schema requiring each of the given fields.
    #[must_use]
    pub fn required<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: names
                .into_iter()
                .map(|name| FieldDef {
                    name: name.into(),
                    required: true,
                })
                .collect(),
        }
    }
}

impl PayloadValidator for PayloadSchema {
    fn validate(&self, payload: &Payload) -> ValidationResult {
        let errors: Vec<String> = self
            .fields
            .iter()
            .filter(|f| f.required && !payload.contains_key(&f.name))
            .map(|f| format!("\"{}\" is required", f.name))
            .collect();

        if errors.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid { errors }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test payloads are objects"),
        }
    }

    #[test]
    fn required_fields_present_is_valid() {
        let schema = PayloadSchema::required(["item"]);
        assert!(schema.validate(&payload(json!({"item": 1}))).is_valid());
    }

    #[test]
    fn missing_required_field_is_reported() {
        let schema = PayloadSchema::required(["item", "qty"]);
        let result = schema.validate(&payload(json!({"item": 1})));
        assert_eq!(
            result,
            ValidationResult::Invalid {
                errors: vec!["\"qty\" is required".to_string()]
            }
        );
    }

    #[test]
    fn optional_fields_are_not_enforced() {
        let schema = PayloadSchema {
            fields: vec![FieldDef {
                name: "note".to_string(),
                required: false,
            }],
        };
        assert!(schema.validate(&Payload::new()).is_valid());
    }

    #[test]
    fn closures_are_validators() {
        let reject_all = |_: &Payload| ValidationResult::Invalid {
            errors: vec!["nope".to_string()],
        };
        assert!(!reject_all.validate(&Payload::new()).is_valid());
    }
}
