use crate::calc::{self, AggregationMode};
use crate::config;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    opt_date, opt_f64, opt_i64, opt_str, req_f64, req_i64, to_json, with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::marks::{self, NewMark};
use rusqlite::Connection;
use serde_json::{json, Value};

/// `mode` in params overrides the workspace setting for one call.
fn aggregation_mode(conn: &Connection, params: &Value) -> Result<AggregationMode, HandlerErr> {
    if let Some(raw) = opt_str(params, "mode")? {
        return AggregationMode::parse(&raw)
            .ok_or_else(|| HandlerErr::bad_params("mode must be one of: rollUp, rootOnly"));
    }
    config::aggregation_mode(conn).map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn assessments_record(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let input = NewMark {
        student_id: req_i64(params, "studentId")?,
        course_id: req_i64(params, "courseId")?,
        assessment_type_id: req_i64(params, "assessmentTypeId")?,
        lesson_id: opt_i64(params, "lessonId")?,
        grade: req_f64(params, "grade")?,
        weight: opt_f64(params, "weight")?,
        date: opt_date(params, "date")?,
        topic: opt_str(params, "topic")?,
        comment: opt_str(params, "comment")?,
    };
    let recorded = marks::record_mark(conn, &input)?;
    Ok(json!({ "assessmentId": recorded.id, "replaced": recorded.replaced }))
}

fn assessments_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let list = marks::list_marks(
        conn,
        req_i64(params, "courseId")?,
        opt_i64(params, "studentId")?,
    )?;
    Ok(json!({ "assessments": to_json(&list)? }))
}

fn assessments_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    marks::delete_mark(conn, req_i64(params, "assessmentId")?)?;
    Ok(json!({ "ok": true }))
}

fn grades_final(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let mode = aggregation_mode(conn, params)?;
    let grade = calc::final_grade(
        conn,
        req_i64(params, "studentId")?,
        req_i64(params, "courseId")?,
        mode,
    )?;
    Ok(json!({ "finalGrade": grade, "mode": mode.as_str() }))
}

fn grades_by_type(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let rows = calc::assessment_type_grades(
        conn,
        req_i64(params, "studentId")?,
        req_i64(params, "courseId")?,
    )?;
    Ok(json!({ "types": to_json(&rows)? }))
}

fn grades_course(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let mode = aggregation_mode(conn, params)?;
    let rows = calc::course_grades(conn, req_i64(params, "courseId")?, mode)?;
    Ok(json!({ "students": to_json(&rows)?, "mode": mode.as_str() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "assessments.record" => Some(with_db(state, req, assessments_record)),
        "assessments.list" => Some(with_db(state, req, assessments_list)),
        "assessments.delete" => Some(with_db(state, req, assessments_delete)),
        "grades.final" => Some(with_db(state, req, grades_final)),
        "grades.byType" => Some(with_db(state, req, grades_by_type)),
        "grades.course" => Some(with_db(state, req, grades_course)),
        _ => None,
    }
}
