//! Router message types
//!
//! One JSON object per request and per reply:
//!
//! ```text
//! request: {"mod": "loader", "message": "ping", "data": null}
//! reply:   {"success": true, "reply": {"version": "0.1.0"}}
//!          {"success": false, "error": "Unknown mod 'x'"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message addressed to one mod
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterRequest {
    #[serde(rename = "mod")]
    pub mod_id: String,

    pub message: String,

    #[serde(default)]
    pub data: Value,
}

impl RouterRequest {
    pub fn new(mod_id: impl Into<String>, message: impl Into<String>, data: Value) -> Self {
        Self {
            mod_id: mod_id.into(),
            message: message.into(),
            data,
        }
    }

    /// Parse raw request text, describing exactly what is wrong on failure
    pub fn parse(raw: &str) -> Result<Self, String> {
        let value: Value = serde_json::from_str(raw).map_err(|e| format!("Invalid JSON: {}", e))?;
        let Value::Object(mut object) = value else {
            return Err("Request is not an object".to_string());
        };

        let mod_id = take_string(&mut object, "mod")?;
        let message = take_string(&mut object, "message")?;
        let data = object.remove("data").unwrap_or(Value::Null);

        Ok(Self { mod_id, message, data })
    }
}

fn take_string(object: &mut serde_json::Map<String, Value>, key: &str) -> Result<String, String> {
    match object.remove(key) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(format!("Key '{}' is not a string", key)),
        None => Err(format!("Object does not have '{}' key", key)),
    }
}

/// Reply to one request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterReply {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RouterReply {
    pub fn ok(reply: Value) -> Self {
        Self {
            success: true,
            reply: Some(reply),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            reply: None,
            error: Some(message.into()),
        }
    }

    /// Convert into the reply value, turning a failure into an error
    pub fn into_result(self) -> eyre::Result<Value> {
        if self.success {
            Ok(self.reply.unwrap_or(Value::Null))
        } else {
            Err(eyre::eyre!(
                "Host error: {}",
                self.error.unwrap_or_else(|| "unknown error".to_string())
            ))
        }
    }
}
