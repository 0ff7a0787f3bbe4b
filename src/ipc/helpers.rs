use crate::dates::parse_date;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Value};

/// Runs `f` against the open workspace database and wraps the outcome as a
/// response for `req`.
pub fn with_db(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &Value) -> Result<Value, HandlerErr>,
) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn to_json<T: serde::Serialize>(v: &T) -> Result<Value, HandlerErr> {
    serde_json::to_value(v).map_err(|e| HandlerErr {
        code: "internal",
        message: e.to_string(),
        details: None,
    })
}

fn wrong_type(key: &str, expected: &str) -> HandlerErr {
    HandlerErr {
        code: "bad_params",
        message: format!("{} must be {}", key, expected),
        details: Some(json!({ "param": key })),
    }
}

fn missing(key: &str) -> HandlerErr {
    HandlerErr {
        code: "bad_params",
        message: format!("missing {}", key),
        details: Some(json!({ "param": key })),
    }
}

/// `None` for an absent or null member.
fn present<'a>(params: &'a Value, key: &str) -> Option<&'a Value> {
    params.get(key).filter(|v| !v.is_null())
}

pub fn opt_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match present(params, key) {
        None => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| wrong_type(key, "an integer")),
    }
}

pub fn req_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    opt_i64(params, key)?.ok_or_else(|| missing(key))
}

pub fn opt_f64(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match present(params, key) {
        None => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| wrong_type(key, "a number")),
    }
}

pub fn req_f64(params: &Value, key: &str) -> Result<f64, HandlerErr> {
    opt_f64(params, key)?.ok_or_else(|| missing(key))
}

pub fn opt_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match present(params, key) {
        None => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| wrong_type(key, "a string")),
    }
}

pub fn req_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    opt_str(params, key)?.ok_or_else(|| missing(key))
}

pub fn opt_bool(params: &Value, key: &str, default: bool) -> Result<bool, HandlerErr> {
    match present(params, key) {
        None => Ok(default),
        Some(v) => v.as_bool().ok_or_else(|| wrong_type(key, "a boolean")),
    }
}

pub fn opt_date(params: &Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    match opt_str(params, key)? {
        None => Ok(None),
        Some(s) => Ok(Some(parse_date(&s)?)),
    }
}

pub fn req_date(params: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    opt_date(params, key)?.ok_or_else(|| missing(key))
}

/// Patch semantics for nullable columns: absent leaves the value alone,
/// `null` clears it.
pub fn nullable_str(params: &Value, key: &str) -> Result<Option<Option<String>>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(Value::String(s)) => Ok(Some(Some(s.clone()))),
        Some(_) => Err(wrong_type(key, "a string or null")),
    }
}

pub fn nullable_i64(params: &Value, key: &str) -> Result<Option<Option<i64>>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(v) => v
            .as_i64()
            .map(|n| Some(Some(n)))
            .ok_or_else(|| wrong_type(key, "an integer or null")),
    }
}

/// The `patch` object of an update request; members outside `allowed` are
/// rejected so the set of mutable fields stays closed.
pub fn patch_object<'a>(params: &'a Value, allowed: &[&str]) -> Result<&'a Value, HandlerErr> {
    let Some(patch) = params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    if let Some(obj) = patch.as_object() {
        if let Some(unknown) = obj.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(HandlerErr {
                code: "bad_params",
                message: format!("unknown patch field: {}", unknown),
                details: Some(json!({ "allowed": allowed })),
            });
        }
    }
    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nullable_distinguishes_absent_from_null() {
        let p = json!({ "email": null, "notes": "x" });
        assert_eq!(nullable_str(&p, "email").unwrap(), Some(None));
        assert_eq!(nullable_str(&p, "notes").unwrap(), Some(Some("x".to_string())));
        assert_eq!(nullable_str(&p, "other").unwrap(), None);
    }

    #[test]
    fn wrong_types_are_bad_params() {
        let p = json!({ "courseId": "7", "flag": 1 });
        assert_eq!(req_i64(&p, "courseId").unwrap_err().code, "bad_params");
        assert_eq!(req_i64(&p, "lessonId").unwrap_err().message, "missing lessonId");
        assert_eq!(opt_bool(&p, "flag", false).unwrap_err().code, "bad_params");
        assert!(!opt_bool(&p, "absent", false).unwrap());
    }

    #[test]
    fn patch_rejects_unknown_fields() {
        let p = json!({ "patch": { "topic": "x", "seriesKey": "y" } });
        let e = patch_object(&p, &["topic"]).unwrap_err();
        assert_eq!(e.message, "unknown patch field: seriesKey");
        assert!(patch_object(&json!({}), &["topic"]).is_err());
    }
}
