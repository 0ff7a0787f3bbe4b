use crate::assessment_types::{self as types, TypePatch};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    nullable_i64, opt_f64, opt_i64, opt_str, patch_object, req_i64, req_str, to_json, with_db,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn types_tree(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let nodes = types::get_tree(conn, req_i64(params, "courseId")?)?;
    Ok(json!({ "types": to_json(&nodes)? }))
}

fn types_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let id = types::add_type(
        conn,
        req_i64(params, "courseId")?,
        &req_str(params, "name")?,
        opt_i64(params, "parentId")?,
        opt_f64(params, "weight")?.unwrap_or(1.0),
    )?;
    Ok(json!({ "typeId": id }))
}

fn types_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let type_id = req_i64(params, "typeId")?;
    let p = patch_object(params, &["name", "weight", "parentId"])?;
    let patch = TypePatch {
        name: opt_str(p, "name")?,
        weight: opt_f64(p, "weight")?,
        parent_id: nullable_i64(p, "parentId")?,
    };
    types::update_type(conn, type_id, &patch)?;
    Ok(json!({ "ok": true }))
}

fn types_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let deleted = types::delete_type(conn, req_i64(params, "typeId")?)?;
    Ok(json!({ "deletedIds": deleted }))
}

fn types_from_template(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let created = types::create_from_template(
        conn,
        req_i64(params, "courseId")?,
        req_i64(params, "templateId")?,
    )?;
    let mapping: Vec<Value> = created
        .iter()
        .map(|(item_id, type_id)| json!({ "itemId": item_id, "typeId": type_id }))
        .collect();
    Ok(json!({ "created": mapping }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "assessmentTypes.tree" => Some(with_db(state, req, types_tree)),
        "assessmentTypes.create" => Some(with_db(state, req, types_create)),
        "assessmentTypes.update" => Some(with_db(state, req, types_update)),
        "assessmentTypes.delete" => Some(with_db(state, req, types_delete)),
        "assessmentTypes.fromTemplate" => Some(with_db(state, req, types_from_template)),
        _ => None,
    }
}
