//! C9 (schema slice) — structural payload validation. Deliberately not the
//! `jsonschema` crate: the spec's schema config is a simplified structural
//! checker (`type`/`required`/per-field string/number/array constraints/
//! `additionalProperties`), not full JSON Schema, so a hand-rolled walker
//! mirrors the contract exactly instead of adapting a bigger one to it.

use crate::model::{ErrorHandling, FieldRule, SchemaConfig};
use serde_json::Value;
use std::sync::Arc;

pub type CustomValidator = Box<dyn Fn(&Value) -> ValidationOutcome + Send + Sync>;

#[derive(Clone, Debug, Default)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationOutcome {
    pub fn ok() -> Self {
        Self { valid: true, errors: Vec::new() }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self { valid: false, errors: vec![error.into()] }
    }

    fn merge(&mut self, other: ValidationOutcome) {
        if !other.valid {
            self.valid = false;
        }
        self.errors.extend(other.errors);
    }
}

pub struct Validator {
    custom_validators: Vec<CustomValidator>,
}

impl Validator {
    pub fn new() -> Self {
        Self { custom_validators: Vec::new() }
    }

    pub fn with_custom_validator(mut self, validator: CustomValidator) -> Self {
        self.custom_validators.push(validator);
        self
    }

    /// Validates `data` against `schema`. When invalid, `schema.error_handling`
    /// decides the caller's disposition: `Reject` returns the failing
    /// outcome as-is, `Warn` logs and returns a valid outcome, `Ignore`
    /// silently returns a valid outcome.
    pub fn validate(&self, data: &Value, schema: &SchemaConfig) -> ValidationOutcome {
        let mut outcome = self.validate_structural(data, schema);
        for validator in &self.custom_validators {
            outcome.merge(validator(data));
        }
        if outcome.valid {
            return outcome;
        }
        match schema.error_handling {
            ErrorHandling::Reject => outcome,
            ErrorHandling::Warn => {
                log::warn!("schema validation failed: {:?}", outcome.errors);
                ValidationOutcome::ok()
            }
            ErrorHandling::Ignore => ValidationOutcome::ok(),
        }
    }

    fn validate_structural(&self, data: &Value, schema: &SchemaConfig) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::ok();
        if let Some(expected_type) = &schema.schema_type {
            if !type_matches(data, expected_type) {
                outcome.merge(ValidationOutcome::fail(format!("expected type {expected_type}")));
            }
        }
        let Some(obj) = data.as_object() else {
            if schema.schema_type.as_deref() == Some("object") {
                return outcome;
            }
            return outcome;
        };
        for required_field in &schema.required {
            if !obj.contains_key(required_field) {
                outcome.merge(ValidationOutcome::fail(format!("missing required field `{required_field}`")));
            }
        }
        for (field, rule) in &schema.properties {
            if let Some(value) = obj.get(field) {
                outcome.merge(validate_field(field, value, rule));
            }
        }
        if !schema.additional_properties {
            let known: std::collections::HashSet<&str> = schema.properties.keys().map(|s| s.as_str()).collect();
            for key in obj.keys() {
                if !known.contains(key.as_str()) {
                    outcome.merge(ValidationOutcome::fail(format!("unexpected field `{key}`")));
                }
            }
        }
        outcome
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn validate_field(field: &str, value: &Value, rule: &FieldRule) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::ok();
    if let Some(expected_type) = &rule.field_type {
        if !type_matches(value, expected_type) {
            outcome.merge(ValidationOutcome::fail(format!("field `{field}` expected type {expected_type}")));
            return outcome;
        }
    }
    if let Some(s) = value.as_str() {
        if let Some(min) = rule.min_length {
            if s.len() < min {
                outcome.merge(ValidationOutcome::fail(format!("field `{field}` shorter than {min}")));
            }
        }
        if let Some(max) = rule.max_length {
            if s.len() > max {
                outcome.merge(ValidationOutcome::fail(format!("field `{field}` longer than {max}")));
            }
        }
        if let Some(pattern) = &rule.pattern {
            match regex::Regex::new(pattern) {
                Ok(re) => {
                    if !re.is_match(s) {
                        outcome.merge(ValidationOutcome::fail(format!("field `{field}` does not match pattern")));
                    }
                }
                Err(e) => {
                    outcome.merge(ValidationOutcome::fail(format!("field `{field}` has an invalid pattern: {e}")));
                }
            }
        }
    }
    if let Some(n) = value.as_f64() {
        if let Some(min) = rule.minimum {
            if n < min {
                outcome.merge(ValidationOutcome::fail(format!("field `{field}` below minimum {min}")));
            }
        }
        if let Some(max) = rule.maximum {
            if n > max {
                outcome.merge(ValidationOutcome::fail(format!("field `{field}` above maximum {max}")));
            }
        }
    }
    if let Some(arr) = value.as_array() {
        if let Some(min) = rule.min_items {
            if arr.len() < min {
                outcome.merge(ValidationOutcome::fail(format!("field `{field}` has fewer than {min} items")));
            }
        }
        if let Some(max) = rule.max_items {
            if arr.len() > max {
                outcome.merge(ValidationOutcome::fail(format!("field `{field}` has more than {max} items")));
            }
        }
    }
    outcome
}

pub type SharedValidator = Arc<Validator>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn required_fields_are_enforced() {
        let schema = SchemaConfig {
            schema_type: Some("object".to_string()),
            required: vec!["name".to_string()],
            properties: HashMap::new(),
            additional_properties: true,
            strict_mode: false,
            error_handling: ErrorHandling::Reject,
        };
        let validator = Validator::new();
        assert!(!validator.validate(&json!({}), &schema).valid);
        assert!(validator.validate(&json!({ "name": "x" }), &schema).valid);
    }

    #[test]
    fn field_rules_enforce_bounds() {
        let mut properties = HashMap::new();
        properties.insert(
            "age".to_string(),
            FieldRule {
                field_type: Some("integer".to_string()),
                minimum: Some(0.0),
                maximum: Some(130.0),
                ..Default::default()
            },
        );
        let schema = SchemaConfig {
            schema_type: Some("object".to_string()),
            required: Vec::new(),
            properties,
            additional_properties: true,
            strict_mode: false,
            error_handling: ErrorHandling::Reject,
        };
        let validator = Validator::new();
        assert!(!validator.validate(&json!({ "age": 200 }), &schema).valid);
        assert!(validator.validate(&json!({ "age": 30 }), &schema).valid);
    }

    #[test]
    fn pattern_rule_matches_with_real_regex_syntax() {
        let mut properties = HashMap::new();
        properties.insert(
            "id".to_string(),
            FieldRule {
                pattern: Some(r"^\d+$".to_string()),
                ..Default::default()
            },
        );
        let schema = SchemaConfig {
            schema_type: Some("object".to_string()),
            required: Vec::new(),
            properties,
            additional_properties: true,
            strict_mode: false,
            error_handling: ErrorHandling::Reject,
        };
        let validator = Validator::new();
        assert!(validator.validate(&json!({ "id": "12345" }), &schema).valid);
        assert!(!validator.validate(&json!({ "id": "abc" }), &schema).valid);
    }

    #[test]
    fn warn_mode_passes_through_but_logs() {
        let schema = SchemaConfig {
            schema_type: Some("object".to_string()),
            required: vec!["name".to_string()],
            properties: HashMap::new(),
            additional_properties: true,
            strict_mode: false,
            error_handling: ErrorHandling::Warn,
        };
        let validator = Validator::new();
        assert!(validator.validate(&json!({}), &schema).valid);
    }
}
