//! Progress tokens (`params._meta.progressToken`).
//!
//! Opaque, caller-chosen, and never interpreted by the gateway beyond
//! equality — the proxy uses it only to correlate an upstream's
//! `notifications/progress` back to the request that started the call.

use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgressToken(Value);

impl ProgressToken {
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl fmt::Display for ProgressToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => write!(f, "{s}"),
            other => write!(f, "{other}"),
        }
    }
}
