use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{req_date, req_i64, req_str, to_json, with_db};
use crate::ipc::types::{AppState, Request};
use crate::term;
use rusqlite::Connection;
use serde_json::{json, Value};

fn terms_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "terms": to_json(&term::list_terms(conn)?)? }))
}

fn terms_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let id = term::create_term(
        conn,
        &req_str(params, "name")?,
        req_date(params, "startDate")?,
        req_date(params, "endDate")?,
    )?;
    Ok(json!({ "termId": id }))
}

fn terms_activate(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    term::activate_term(conn, req_i64(params, "termId")?)?;
    Ok(json!({ "ok": true }))
}

fn terms_active(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "term": to_json(&term::active_term(conn)?)? }))
}

fn terms_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    term::delete_term(conn, req_i64(params, "termId")?)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "terms.list" => Some(with_db(state, req, terms_list)),
        "terms.create" => Some(with_db(state, req, terms_create)),
        "terms.activate" => Some(with_db(state, req, terms_activate)),
        "terms.active" => Some(with_db(state, req, terms_active)),
        "terms.delete" => Some(with_db(state, req, terms_delete)),
        _ => None,
    }
}
