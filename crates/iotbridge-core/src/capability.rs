//! Capability schemas describing what a device accepts
//!
//! A capability carries its parameter schema as a tagged union decided once at
//! deserialization time. The wire format is the flat JSON shape used by the
//! REST surface, e.g. `{"type": "integer", "range": [0, 100]}`. Any type name
//! other than `integer`, `array`, or `enum` is read as an opaque string.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inclusive integer bounds, serialized as `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[i64; 2]", into = "[i64; 2]")]
pub struct IntRange {
    pub min: i64,
    pub max: i64,
}

impl IntRange {
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: i64) -> bool {
        self.min <= value && value <= self.max
    }
}

impl TryFrom<[i64; 2]> for IntRange {
    type Error = String;

    fn try_from([min, max]: [i64; 2]) -> Result<Self, Self::Error> {
        if min > max {
            return Err(format!("range minimum {} exceeds maximum {}", min, max));
        }
        Ok(Self { min, max })
    }
}

impl From<IntRange> for [i64; 2] {
    fn from(range: IntRange) -> Self {
        [range.min, range.max]
    }
}

/// Schema for a single invocation parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParameterSpec {
    /// Whole number, optionally bounded
    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<IntRange>,
    },
    /// Fixed-length sequence of integers, each optionally bounded
    Array {
        length: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<IntRange>,
    },
    /// Literal drawn from an explicit list, or from the capability's operations
    /// when the list is empty
    Enum {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        values: Vec<String>,
    },
    /// Opaque string
    #[serde(other)]
    String,
}

impl ParameterSpec {
    pub fn integer(min: i64, max: i64) -> Self {
        Self::Integer {
            range: Some(IntRange::new(min, max)),
        }
    }

    pub fn array(length: usize) -> Self {
        Self::Array {
            length,
            range: None,
        }
    }

    pub fn bounded_array(length: usize, min: i64, max: i64) -> Self {
        Self::Array {
            length,
            range: Some(IntRange::new(min, max)),
        }
    }
}

/// A named, schema-described action or attribute a device exposes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Name, unique within its device
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Whether callers may invoke it to change device state
    #[serde(default)]
    pub writable: bool,
    /// Accepted literal values for enum-style capabilities
    #[serde(default)]
    pub operations: Vec<String>,
    /// Parameter schemas keyed by parameter name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, ParameterSpec>,
}

impl Capability {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            writable: false,
            operations: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    pub fn with_operations<I, S>(mut self, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.operations = operations.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }
}
