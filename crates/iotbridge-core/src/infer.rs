//! Best-effort capability inference from observed payloads
//!
//! Devices that announce themselves by publishing state (rather than being
//! registered with a known type) get capabilities guessed from the first
//! payload seen. The guess lives behind [`CapabilityInference`] so it can be
//! swapped without touching the validator or the drivers.

use serde_json::{Map, Value};

use crate::capability::{Capability, ParameterSpec};

/// Guesses a capability list from a device's reported state
pub trait CapabilityInference: Send + Sync {
    fn infer(&self, payload: &Map<String, Value>) -> Vec<Capability>;
}

/// Keys that usually accept commands
const CONTROL_KEYWORDS: &[&str] = &[
    "state",
    "power",
    "command",
    "mode",
    "level",
    "brightness",
    "speed",
    "volume",
];

/// Keyword heuristic: one capability per reported key
#[derive(Debug, Clone, Default)]
pub struct KeywordInference;

impl KeywordInference {
    fn param_spec(value: &Value) -> ParameterSpec {
        match value {
            Value::Number(_) => ParameterSpec::integer(0, 100),
            _ => ParameterSpec::String,
        }
    }

    /// Only string values are considered commandable
    fn is_writable(key: &str, value: &Value) -> bool {
        let Value::String(s) = value else {
            return false;
        };

        let key = key.to_lowercase();
        if CONTROL_KEYWORDS.iter().any(|kw| key.contains(kw)) {
            return true;
        }

        // Short all-caps values look like commands ("ON", "TOGGLE")
        s.chars().count() <= 6 && *s == s.to_uppercase()
    }
}

impl CapabilityInference for KeywordInference {
    fn infer(&self, payload: &Map<String, Value>) -> Vec<Capability> {
        payload
            .iter()
            .map(|(key, value)| {
                Capability::new(key.clone(), format!("Auto-discovered capability for '{}'", key))
                    .writable(Self::is_writable(key, value))
                    .with_parameter(key.clone(), Self::param_spec(value))
            })
            .collect()
    }
}
