use crate::error::{CoreError, ErrorKind};
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Error half of a handler body; `From<CoreError>` lets domain calls use `?`.
#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<CoreError> for HandlerErr {
    fn from(e: CoreError) -> Self {
        if matches!(e.kind, ErrorKind::Storage | ErrorKind::Configuration) {
            tracing::warn!(code = e.code, kind = e.kind.as_str(), message = %e.message, "request failed");
        }
        // The kind rides along in details so callers can group codes.
        let mut details = match e.details {
            Some(serde_json::Value::Object(map)) => serde_json::Value::Object(map),
            Some(other) => json!({ "context": other }),
            None => json!({}),
        };
        details["kind"] = json!(e.kind.as_str());
        Self {
            code: e.code,
            message: e.message,
            details: Some(details),
        }
    }
}
