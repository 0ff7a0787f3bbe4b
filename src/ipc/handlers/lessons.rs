use crate::config;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    nullable_str, opt_bool, opt_date, opt_i64, opt_str, patch_object, req_date, req_i64, req_str,
    to_json, with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::lessons::{self, LessonPatch, LessonStatus, NewLesson};
use crate::series;
use rusqlite::Connection;
use serde_json::{json, Value};

const PATCH_FIELDS: &[&str] = &[
    "date",
    "time",
    "duration",
    "topic",
    "homework",
    "status",
    "statusNote",
];

fn parse_status(raw: &str) -> Result<LessonStatus, HandlerErr> {
    LessonStatus::parse(raw).ok_or_else(|| {
        HandlerErr::bad_params("status must be one of: normal, cancelled, moved, substituted")
    })
}

fn lessons_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let list = lessons::list_lessons(
        conn,
        req_i64(params, "courseId")?,
        opt_date(params, "from")?,
        opt_date(params, "to")?,
    )?;
    Ok(json!({ "lessons": to_json(&list)? }))
}

fn lessons_open(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let lesson = lessons::get_lesson(conn, req_i64(params, "lessonId")?)?;
    Ok(json!({ "lesson": to_json(&lesson)? }))
}

fn lessons_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let defaults = config::lesson_defaults(conn).map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })?;
    let draft = NewLesson {
        course_id: req_i64(params, "courseId")?,
        date: req_date(params, "date")?,
        time: opt_str(params, "time")?.unwrap_or(defaults.time),
        duration: opt_i64(params, "duration")?.unwrap_or(defaults.duration_units),
        topic: opt_str(params, "topic")?.unwrap_or_default(),
        homework: opt_str(params, "homework")?,
    };
    let recurring = opt_bool(params, "recurring", false)?;
    let ids = series::generate_lessons(conn, &draft, recurring)?;
    let series_key = match (recurring, ids.first()) {
        (true, Some(first)) => lessons::get_lesson(conn, *first)?.series_key,
        _ => None,
    };
    Ok(json!({ "lessonIds": ids, "seriesKey": series_key }))
}

fn lessons_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let lesson_id = req_i64(params, "lessonId")?;
    let propagate = opt_bool(params, "propagate", false)?;
    let p = patch_object(params, PATCH_FIELDS)?;
    let status = match opt_str(p, "status")? {
        Some(s) => Some(parse_status(&s)?),
        None => None,
    };
    let patch = LessonPatch {
        date: opt_date(p, "date")?,
        time: opt_str(p, "time")?,
        duration: opt_i64(p, "duration")?,
        topic: opt_str(p, "topic")?,
        homework: nullable_str(p, "homework")?,
        status,
        status_note: nullable_str(p, "statusNote")?,
    };
    let affected = lessons::update_lesson(conn, lesson_id, &patch, propagate)?;
    Ok(json!({ "affectedIds": affected }))
}

fn lessons_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let deleted = lessons::delete_lesson(
        conn,
        req_i64(params, "lessonId")?,
        opt_bool(params, "propagate", false)?,
    )?;
    Ok(json!({ "deletedIds": deleted }))
}

fn lessons_series(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let members = lessons::series_members(conn, req_i64(params, "lessonId")?)?;
    Ok(json!({ "lessons": to_json(&members)? }))
}

fn lessons_cancel_range(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let ids = lessons::cancel_between(
        conn,
        req_date(params, "from")?,
        req_date(params, "to")?,
        &opt_str(params, "note")?.unwrap_or_default(),
        opt_i64(params, "courseId")?,
    )?;
    Ok(json!({ "lessonIds": ids }))
}

fn lessons_series_key(_conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let weekday = req_i64(params, "weekday")?;
    let weekday = u32::try_from(weekday)
        .map_err(|_| HandlerErr::bad_params("weekday must be 1..7 (Monday = 1)"))?;
    let key = series::series_key(req_i64(params, "courseId")?, weekday, &req_str(params, "time")?)?;
    Ok(json!({ "seriesKey": key }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "lessons.list" => Some(with_db(state, req, lessons_list)),
        "lessons.open" => Some(with_db(state, req, lessons_open)),
        "lessons.create" => Some(with_db(state, req, lessons_create)),
        "lessons.update" => Some(with_db(state, req, lessons_update)),
        "lessons.delete" => Some(with_db(state, req, lessons_delete)),
        "lessons.series" => Some(with_db(state, req, lessons_series)),
        "lessons.cancelRange" => Some(with_db(state, req, lessons_cancel_range)),
        "lessons.seriesKey" => Some(with_db(state, req, lessons_series_key)),
        _ => None,
    }
}
