use crate::config::{self, SetupSection};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{req_str, with_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{Map, Value};

fn load_failed(e: anyhow::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn setup_get(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut out = Map::new();
    for section in SetupSection::ALL {
        let v = config::load_section(conn, section).map_err(load_failed)?;
        out.insert(section.name().to_string(), v);
    }
    Ok(Value::Object(out))
}

fn setup_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let raw = req_str(params, "section")?;
    let Some(section) = SetupSection::parse(&raw) else {
        return Err(HandlerErr::bad_params("unknown section"));
    };
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    match config::update_section(conn, section, patch) {
        Ok(Ok(merged)) => Ok(merged),
        Ok(Err(msg)) => Err(HandlerErr::bad_params(msg)),
        Err(e) => Err(HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: None,
        }),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(with_db(state, req, setup_get)),
        "setup.update" => Some(with_db(state, req, setup_update)),
        _ => None,
    }
}
