use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    nullable_str, opt_f64, opt_i64, opt_str, patch_object, req_f64, req_i64, req_str, to_json,
    with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::scale::{self, GradingScalePatch, NewGradingScale};
use rusqlite::Connection;
use serde_json::{json, Value};

fn grading_systems_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "gradingSystems": to_json(&scale::list_scales(conn)?)? }))
}

fn grading_systems_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let input = NewGradingScale {
        name: req_str(params, "name")?,
        min_grade: req_f64(params, "minGrade")?,
        max_grade: req_f64(params, "maxGrade")?,
        step_size: req_f64(params, "stepSize")?,
        description: opt_str(params, "description")?,
    };
    let id = scale::create_scale(conn, &input)?;
    Ok(json!({ "gradingSystemId": id }))
}

fn grading_systems_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let scale_id = req_i64(params, "gradingSystemId")?;
    let p = patch_object(
        params,
        &["name", "minGrade", "maxGrade", "stepSize", "description"],
    )?;
    let patch = GradingScalePatch {
        name: opt_str(p, "name")?,
        min_grade: opt_f64(p, "minGrade")?,
        max_grade: opt_f64(p, "maxGrade")?,
        step_size: opt_f64(p, "stepSize")?,
        description: nullable_str(p, "description")?,
    };
    scale::update_scale(conn, scale_id, &patch)?;
    Ok(json!({ "ok": true }))
}

fn grading_systems_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    scale::delete_scale(conn, req_i64(params, "gradingSystemId")?)?;
    Ok(json!({ "ok": true }))
}

/// Either `gradingSystemId` or `courseId` names the scale.
fn grading_systems_validate(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let grade = req_f64(params, "grade")?;
    let (valid, scale_id) = match (opt_i64(params, "gradingSystemId")?, opt_i64(params, "courseId")?) {
        (Some(id), _) => (scale::is_valid(conn, grade, id)?, id),
        (None, Some(course_id)) => {
            let s = scale::scale_for_course(conn, course_id)?;
            (s.accepts(grade), s.id)
        }
        (None, None) => {
            return Err(HandlerErr::bad_params("missing gradingSystemId or courseId"));
        }
    };
    Ok(json!({ "valid": valid, "gradingSystemId": scale_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "gradingSystems.list" => Some(with_db(state, req, grading_systems_list)),
        "gradingSystems.create" => Some(with_db(state, req, grading_systems_create)),
        "gradingSystems.update" => Some(with_db(state, req, grading_systems_update)),
        "gradingSystems.delete" => Some(with_db(state, req, grading_systems_delete)),
        "gradingSystems.validate" => Some(with_db(state, req, grading_systems_validate)),
        _ => None,
    }
}
