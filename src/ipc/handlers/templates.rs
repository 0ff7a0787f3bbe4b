use crate::assessment_types as types;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{opt_f64, opt_i64, opt_str, req_i64, req_str, to_json, with_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn templates_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "templates": to_json(&types::list_templates(conn)?)? }))
}

fn templates_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let id = types::create_template(
        conn,
        &req_str(params, "name")?,
        opt_str(params, "description")?.as_deref(),
        opt_i64(params, "gradingSystemId")?,
    )?;
    Ok(json!({ "templateId": id }))
}

fn templates_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    types::delete_template(conn, req_i64(params, "templateId")?)?;
    Ok(json!({ "ok": true }))
}

fn templates_items(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let items = types::template_items(conn, req_i64(params, "templateId")?)?;
    Ok(json!({ "items": to_json(&items)? }))
}

fn templates_add_item(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let id = types::add_template_item(
        conn,
        req_i64(params, "templateId")?,
        &req_str(params, "name")?,
        opt_i64(params, "parentItemId")?,
        opt_f64(params, "weight")?.unwrap_or(1.0),
    )?;
    Ok(json!({ "itemId": id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "templates.list" => Some(with_db(state, req, templates_list)),
        "templates.create" => Some(with_db(state, req, templates_create)),
        "templates.delete" => Some(with_db(state, req, templates_delete)),
        "templates.items" => Some(with_db(state, req, templates_items)),
        "templates.addItem" => Some(with_db(state, req, templates_add_item)),
        _ => None,
    }
}
