//! Parameter validation for capability invocations
//!
//! [`validate`] checks a raw JSON input record against a capability's
//! parameter schema and produces the canonical string-keyed, string-valued map
//! that is sent to the driver and merged into stored state.
//!
//! Canonicalization rules:
//! - integers are truncated toward zero (57.9 becomes "57"), never rounded
//! - arrays render as `[a,b,...]` with each element truncated
//! - everything else is stringified; strings are taken verbatim
//!
//! Keys in the input that the schema does not declare are ignored.

use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::capability::{Capability, IntRange, ParameterSpec};
use crate::device::StateMap;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),
    #[error("Parameter '{0}' out of range")]
    OutOfRange(String),
    #[error("Parameter '{0}' has the wrong array length")]
    LengthMismatch(String),
    #[error("Invalid value for '{0}'")]
    InvalidEnumValue(String),
    #[error("Parameter '{name}' must be {expected}")]
    InvalidType { name: String, expected: &'static str },
}

impl ValidationError {
    /// Name of the offending parameter
    pub fn parameter(&self) -> &str {
        match self {
            Self::MissingParameter(name)
            | Self::OutOfRange(name)
            | Self::LengthMismatch(name)
            | Self::InvalidEnumValue(name)
            | Self::InvalidType { name, .. } => name,
        }
    }
}

/// Validate raw input against a capability and return its canonical form
pub fn validate(
    capability: &Capability,
    input: &Map<String, Value>,
) -> Result<StateMap, ValidationError> {
    let mut canonical = StateMap::new();

    for (name, spec) in &capability.parameters {
        let value = input
            .get(name)
            .ok_or_else(|| ValidationError::MissingParameter(name.clone()))?;

        let rendered = match spec {
            ParameterSpec::Integer { range } => validate_integer(name, value, range.as_ref())?,
            ParameterSpec::Array { length, range } => {
                validate_array(name, value, *length, range.as_ref())?
            }
            ParameterSpec::Enum { values } => {
                let allowed = if values.is_empty() {
                    &capability.operations
                } else {
                    values
                };
                validate_literal(name, value, allowed)?
            }
            ParameterSpec::String => validate_literal(name, value, &capability.operations)?,
        };

        canonical.insert(name.clone(), rendered);
    }

    Ok(canonical)
}

fn validate_integer(
    name: &str,
    value: &Value,
    range: Option<&IntRange>,
) -> Result<String, ValidationError> {
    let n = truncate(value).ok_or_else(|| ValidationError::InvalidType {
        name: name.to_string(),
        expected: "a number",
    })?;
    check_range(name, n, range)?;
    Ok(n.to_string())
}

fn validate_array(
    name: &str,
    value: &Value,
    length: usize,
    range: Option<&IntRange>,
) -> Result<String, ValidationError> {
    let items = value.as_array().ok_or_else(|| ValidationError::InvalidType {
        name: name.to_string(),
        expected: "an array",
    })?;
    if items.len() != length {
        return Err(ValidationError::LengthMismatch(name.to_string()));
    }

    let mut elements = Vec::with_capacity(items.len());
    for item in items {
        let n = truncate(item).ok_or_else(|| ValidationError::InvalidType {
            name: name.to_string(),
            expected: "an array of numbers",
        })?;
        check_range(name, n, range)?;
        elements.push(n.to_string());
    }

    Ok(format!("[{}]", elements.join(",")))
}

fn validate_literal(
    name: &str,
    value: &Value,
    allowed: &[String],
) -> Result<String, ValidationError> {
    let rendered = stringify_value(value);
    if !allowed.is_empty() && !allowed.iter().any(|op| *op == rendered) {
        return Err(ValidationError::InvalidEnumValue(name.to_string()));
    }
    Ok(rendered)
}

fn check_range(name: &str, n: i64, range: Option<&IntRange>) -> Result<(), ValidationError> {
    match range {
        Some(range) if !range.contains(n) => Err(ValidationError::OutOfRange(name.to_string())),
        _ => Ok(()),
    }
}

/// Interpret a JSON value as a number truncated toward zero.
///
/// Numeric strings are accepted; values beyond the `i64` range saturate.
fn truncate(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => Some(truncate_number(n)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(|f| f.trunc() as i64),
        _ => None,
    }
}

fn truncate_number(n: &Number) -> i64 {
    if let Some(i) = n.as_i64() {
        i
    } else if n.is_u64() {
        i64::MAX
    } else {
        n.as_f64().map(|f| f.trunc() as i64).unwrap_or_default()
    }
}

/// Render a JSON value as a canonical state string.
///
/// Strings are taken verbatim; every other value uses its JSON text.
pub fn stringify_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::capabilities_for_type;
    use serde_json::json;

    fn input(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test input must be an object"),
        }
    }

    fn brightness() -> Capability {
        Capability::new("brightness", "Adjust brightness")
            .with_operations(["set"])
            .with_parameter("level", ParameterSpec::integer(0, 100))
    }

    fn color() -> Capability {
        Capability::new("color", "RGB color").with_parameter("rgb", ParameterSpec::array(3))
    }

    #[test]
    fn test_integer_out_of_range() {
        let err = validate(&brightness(), &input(json!({"level": 150}))).unwrap_err();
        assert_eq!(err, ValidationError::OutOfRange("level".to_string()));
    }

    #[test]
    fn test_integer_truncates_toward_zero() {
        let canonical = validate(&brightness(), &input(json!({"level": 57.9}))).unwrap();
        assert_eq!(canonical.get("level").map(String::as_str), Some("57"));
    }

    #[test]
    fn test_integer_bounds_are_inclusive() {
        for (raw, expected) in [(json!(0), "0"), (json!(100), "100"), (json!(100.99), "100")] {
            let canonical = validate(&brightness(), &input(json!({"level": raw}))).unwrap();
            assert_eq!(canonical["level"], expected);
        }
        let err = validate(&brightness(), &input(json!({"level": -1}))).unwrap_err();
        assert_eq!(err, ValidationError::OutOfRange("level".to_string()));
    }

    #[test]
    fn test_truncation_applies_before_range_check() {
        // -0.5 truncates to 0, which is inside [0, 100]
        let canonical = validate(&brightness(), &input(json!({"level": -0.5}))).unwrap();
        assert_eq!(canonical["level"], "0");
    }

    #[test]
    fn test_integer_accepts_numeric_string() {
        let canonical = validate(&brightness(), &input(json!({"level": "42.7"}))).unwrap();
        assert_eq!(canonical["level"], "42");
    }

    #[test]
    fn test_integer_rejects_non_number() {
        let err = validate(&brightness(), &input(json!({"level": "bright"}))).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidType { .. }));
        assert_eq!(err.parameter(), "level");
    }

    #[test]
    fn test_unbounded_integer() {
        let cap = Capability::new("speed", "")
            .with_parameter("rpm", ParameterSpec::Integer { range: None });
        let canonical = validate(&cap, &input(json!({"rpm": -9000}))).unwrap();
        assert_eq!(canonical["rpm"], "-9000");
    }

    #[test]
    fn test_array_without_range_keeps_large_elements() {
        let canonical = validate(&color(), &input(json!({"rgb": [10, 20, 300]}))).unwrap();
        assert_eq!(canonical["rgb"], "[10,20,300]");
    }

    #[test]
    fn test_array_length_mismatch() {
        let err = validate(&color(), &input(json!({"rgb": [10, 20]}))).unwrap_err();
        assert_eq!(err, ValidationError::LengthMismatch("rgb".to_string()));
        let err = validate(&color(), &input(json!({"rgb": [1, 2, 3, 4]}))).unwrap_err();
        assert_eq!(err, ValidationError::LengthMismatch("rgb".to_string()));
    }

    #[test]
    fn test_array_arity_is_not_fixed_at_three() {
        let cap = Capability::new("pattern", "")
            .with_parameter("steps", ParameterSpec::array(5));
        let canonical =
            validate(&cap, &input(json!({"steps": [1.9, 2, -3.7, 4, 5]}))).unwrap();
        assert_eq!(canonical["steps"], "[1,2,-3,4,5]");

        let empty = Capability::new("noop", "").with_parameter("none", ParameterSpec::array(0));
        let canonical = validate(&empty, &input(json!({"none": []}))).unwrap();
        assert_eq!(canonical["none"], "[]");
    }

    #[test]
    fn test_array_element_range_when_declared() {
        let bulb_color = capabilities_for_type("bulb")
            .into_iter()
            .find(|c| c.name == "color")
            .unwrap();
        let err = validate(&bulb_color, &input(json!({"rgb": [10, 20, 300]}))).unwrap_err();
        assert_eq!(err, ValidationError::OutOfRange("rgb".to_string()));

        let canonical = validate(&bulb_color, &input(json!({"rgb": [255, 0, 12.5]}))).unwrap();
        assert_eq!(canonical["rgb"], "[255,0,12]");
    }

    #[test]
    fn test_array_rejects_non_sequence() {
        let err = validate(&color(), &input(json!({"rgb": "10,20,30"}))).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidType { .. }));
        let err = validate(&color(), &input(json!({"rgb": [1, "x", 3]}))).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidType { .. }));
    }

    #[test]
    fn test_string_checked_against_capability_operations() {
        let power = Capability::new("power", "")
            .with_operations(["on", "off"])
            .with_parameter("power", ParameterSpec::String);

        let canonical = validate(&power, &input(json!({"power": "off"}))).unwrap();
        assert_eq!(canonical["power"], "off");

        let err = validate(&power, &input(json!({"power": "dim"}))).unwrap_err();
        assert_eq!(err, ValidationError::InvalidEnumValue("power".to_string()));
    }

    #[test]
    fn test_string_without_operations_accepts_anything() {
        let label = Capability::new("label", "").with_parameter("text", ParameterSpec::String);
        let canonical = validate(&label, &input(json!({"text": true}))).unwrap();
        assert_eq!(canonical["text"], "true");
        let canonical = validate(&label, &input(json!({"text": 12}))).unwrap();
        assert_eq!(canonical["text"], "12");
    }

    #[test]
    fn test_enum_prefers_its_own_values() {
        let mode = Capability::new("mode", "")
            .with_operations(["set"])
            .with_parameter(
                "mode",
                ParameterSpec::Enum {
                    values: vec!["eco".to_string(), "boost".to_string()],
                },
            );
        assert!(validate(&mode, &input(json!({"mode": "eco"}))).is_ok());
        let err = validate(&mode, &input(json!({"mode": "set"}))).unwrap_err();
        assert_eq!(err, ValidationError::InvalidEnumValue("mode".to_string()));
    }

    #[test]
    fn test_missing_parameter() {
        let err = validate(&brightness(), &input(json!({"brightness": 10}))).unwrap_err();
        assert_eq!(err, ValidationError::MissingParameter("level".to_string()));
    }

    #[test]
    fn test_extra_keys_ignored() {
        let canonical =
            validate(&brightness(), &input(json!({"level": 5, "transition": 2}))).unwrap();
        assert_eq!(canonical.len(), 1);
        assert_eq!(canonical["level"], "5");
    }

    #[test]
    fn test_no_parameters_yields_empty_map() {
        let cap = Capability::new("identify", "Blink the LED");
        let canonical = validate(&cap, &input(json!({"anything": 1}))).unwrap();
        assert!(canonical.is_empty());
    }

    #[test]
    fn test_stringify_value() {
        assert_eq!(stringify_value(&json!("ON")), "ON");
        assert_eq!(stringify_value(&json!(254)), "254");
        assert_eq!(stringify_value(&json!(false)), "false");
        assert_eq!(stringify_value(&json!(null)), "null");
        assert_eq!(stringify_value(&json!({"x": 1})), r#"{"x":1}"#);
    }
}
