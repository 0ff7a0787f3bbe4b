use crate::courses::{self, CourseKind, CoursePatch, NewCourse};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    nullable_str, opt_str, patch_object, req_i64, req_str, to_json, with_db,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn parse_kind(raw: &str) -> Result<CourseKind, HandlerErr> {
    CourseKind::parse(raw).ok_or_else(|| HandlerErr::bad_params("kind must be class or group"))
}

fn courses_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let list = courses::list_courses(conn)?;
    Ok(json!({ "courses": to_json(&list)? }))
}

fn courses_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let kind = match opt_str(params, "kind")? {
        Some(k) => parse_kind(&k)?,
        None => CourseKind::Class,
    };
    let input = NewCourse {
        name: req_str(params, "name")?,
        kind,
        subject: opt_str(params, "subject")?,
        color: opt_str(params, "color")?,
        description: opt_str(params, "description")?,
    };
    let id = courses::create_course(conn, &input)?;
    Ok(json!({ "courseId": id }))
}

fn courses_open(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course = courses::get_course(conn, req_i64(params, "courseId")?)?;
    Ok(json!({ "course": to_json(&course)? }))
}

fn courses_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = req_i64(params, "courseId")?;
    let patch = patch_object(params, &["name", "kind", "subject", "color", "description"])?;
    let kind = match opt_str(patch, "kind")? {
        Some(k) => Some(parse_kind(&k)?),
        None => None,
    };
    let patch = CoursePatch {
        name: opt_str(patch, "name")?,
        kind,
        subject: nullable_str(patch, "subject")?,
        color: nullable_str(patch, "color")?,
        description: nullable_str(patch, "description")?,
    };
    courses::update_course(conn, course_id, &patch)?;
    Ok(json!({ "ok": true }))
}

fn courses_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    courses::delete_course(conn, req_i64(params, "courseId")?)?;
    Ok(json!({ "ok": true }))
}

fn courses_enroll(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    courses::enroll(conn, req_i64(params, "courseId")?, req_i64(params, "studentId")?)?;
    Ok(json!({ "ok": true }))
}

fn courses_unenroll(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    courses::unenroll(conn, req_i64(params, "courseId")?, req_i64(params, "studentId")?)?;
    Ok(json!({ "ok": true }))
}

fn courses_students(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let roster = crate::students::course_students(conn, req_i64(params, "courseId")?)?;
    Ok(json!({ "students": to_json(&roster)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "courses.list" => Some(with_db(state, req, courses_list)),
        "courses.create" => Some(with_db(state, req, courses_create)),
        "courses.open" => Some(with_db(state, req, courses_open)),
        "courses.update" => Some(with_db(state, req, courses_update)),
        "courses.delete" => Some(with_db(state, req, courses_delete)),
        "courses.enroll" => Some(with_db(state, req, courses_enroll)),
        "courses.unenroll" => Some(with_db(state, req, courses_unenroll)),
        "courses.students" => Some(with_db(state, req, courses_students)),
        _ => None,
    }
}
