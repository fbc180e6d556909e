//! Per-call backend options.
//!
//! Clients pass an `a{sv}` dictionary with every parse request. Backends
//! decode it into their own typed configuration with serde; unknown keys are
//! meant to be rejected by the target struct.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::HandlerError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options {
    values: Map<String, Value>,
}

impl Options {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Decode the whole dictionary into a backend's option struct.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        serde_json::from_value(Value::Object(self.values.clone()))
            .map_err(|e| HandlerError::failed("InvalidOptions", e))
    }
}

impl From<Map<String, Value>> for Options {
    fn from(values: Map<String, Value>) -> Self {
        Self::new(values)
    }
}
