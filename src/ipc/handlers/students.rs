use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{nullable_str, opt_str, patch_object, req_i64, req_str, to_json, with_db};
use crate::ipc::types::{AppState, Request};
use crate::students::{self, NewStudent, StudentPatch};
use rusqlite::Connection;
use serde_json::{json, Value};

fn students_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let list = students::list_students(conn)?;
    Ok(json!({ "students": to_json(&list)? }))
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let input = NewStudent {
        first_name: req_str(params, "firstName")?,
        last_name: req_str(params, "lastName")?,
        email: opt_str(params, "email")?,
        notes: opt_str(params, "notes")?,
    };
    let id = students::create_student(conn, &input)?;
    Ok(json!({ "studentId": id }))
}

fn students_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = req_i64(params, "studentId")?;
    let patch = patch_object(params, &["firstName", "lastName", "email", "notes"])?;
    let patch = StudentPatch {
        first_name: opt_str(patch, "firstName")?,
        last_name: opt_str(patch, "lastName")?,
        email: nullable_str(patch, "email")?,
        notes: nullable_str(patch, "notes")?,
    };
    students::update_student(conn, student_id, &patch)?;
    Ok(json!({ "ok": true }))
}

fn students_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    students::delete_student(conn, req_i64(params, "studentId")?)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "students.list" => Some(with_db(state, req, students_list)),
        "students.create" => Some(with_db(state, req, students_create)),
        "students.update" => Some(with_db(state, req, students_update)),
        "students.delete" => Some(with_db(state, req, students_delete)),
        _ => None,
    }
}
