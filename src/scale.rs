use crate::error::{CoreError, CoreResult};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::json;

/// Absorbs float noise when snapping a grade to the nearest legal step.
pub const GRADE_TOLERANCE: f64 = 1e-4;

/// Float noise allowed at the range bounds.
const RANGE_EPSILON: f64 = 1e-9;

/// A grading system: legal grades are `min, min + step, ...` up to `max`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingScale {
    pub id: i64,
    pub name: String,
    pub min_grade: f64,
    pub max_grade: f64,
    pub step_size: f64,
    pub description: Option<String>,
}

impl GradingScale {
    pub fn accepts(&self, grade: f64) -> bool {
        grade_on_scale(grade, self.min_grade, self.max_grade, self.step_size)
    }
}

#[derive(Debug, Clone)]
pub struct NewGradingScale {
    pub name: String,
    pub min_grade: f64,
    pub max_grade: f64,
    pub step_size: f64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GradingScalePatch {
    pub name: Option<String>,
    pub min_grade: Option<f64>,
    pub max_grade: Option<f64>,
    pub step_size: Option<f64>,
    pub description: Option<Option<String>>,
}

fn is_whole(x: f64) -> bool {
    (x - x.round()).abs() < 1e-6
}

/// Smallest number of decimals (up to 6) that represents `x` exactly enough.
fn decimal_places(x: f64) -> i32 {
    (0..=6)
        .find(|d| is_whole(x * 10f64.powi(*d)))
        .unwrap_or(6)
}

fn round_to(x: f64, places: i32) -> f64 {
    let f = 10f64.powi(places);
    (x * f).round() / f
}

/// Whether `grade` is a legal point of the scale `[min, max]` with `step`.
///
/// The nearest step is reconstructed and compared within
/// [`GRADE_TOLERANCE`]. When the step does not divide the range evenly
/// (0.33 on 1..6) the reconstruction is also compared after rounding it to
/// the precision the grade was written in, so `2.0` (3 steps = 1.99) passes.
pub fn grade_on_scale(grade: f64, min: f64, max: f64, step: f64) -> bool {
    if !grade.is_finite() || step <= 0.0 {
        return false;
    }
    if grade < min - RANGE_EPSILON || grade > max + RANGE_EPSILON {
        return false;
    }
    let steps = ((grade - min) / step).round();
    let nearest = min + steps * step;
    if (grade - nearest).abs() < GRADE_TOLERANCE {
        return true;
    }
    if is_whole((max - min) / step) {
        return false;
    }
    (round_to(nearest, decimal_places(grade)) - grade).abs() < GRADE_TOLERANCE
}

fn check_bounds(min: f64, max: f64, step: f64) -> CoreResult<()> {
    let ok = min.is_finite()
        && max.is_finite()
        && step.is_finite()
        && min < max
        && step > 0.0
        && step < max - min;
    if !ok {
        return Err(CoreError::bad_params(
            "grading system requires min < max and 0 < step < max - min",
        )
        .with_details(json!({ "minGrade": min, "maxGrade": max, "stepSize": step })));
    }
    Ok(())
}

fn scale_name(raw: &str) -> CoreResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(CoreError::bad_params("grading system name must not be empty"));
    }
    Ok(name.to_string())
}

const SCALE_COLUMNS: &str = "id, name, min_grade, max_grade, step_size, description";

fn scale_from_row(r: &Row<'_>) -> rusqlite::Result<GradingScale> {
    Ok(GradingScale {
        id: r.get(0)?,
        name: r.get(1)?,
        min_grade: r.get(2)?,
        max_grade: r.get(3)?,
        step_size: r.get(4)?,
        description: r.get(5)?,
    })
}

pub fn create_scale(conn: &Connection, input: &NewGradingScale) -> CoreResult<i64> {
    let name = scale_name(&input.name)?;
    check_bounds(input.min_grade, input.max_grade, input.step_size)?;
    conn.execute(
        "INSERT INTO grading_systems(name, min_grade, max_grade, step_size, description)
         VALUES(?, ?, ?, ?, ?)",
        (
            &name,
            input.min_grade,
            input.max_grade,
            input.step_size,
            &input.description,
        ),
    )
    .map_err(|e| CoreError::storage("db_insert_failed", e))?;
    Ok(conn.last_insert_rowid())
}

pub fn list_scales(conn: &Connection) -> CoreResult<Vec<GradingScale>> {
    let sql = format!("SELECT {} FROM grading_systems ORDER BY name, id", SCALE_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let scales = stmt
        .query_map([], scale_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(scales)
}

pub fn get_scale(conn: &Connection, scale_id: i64) -> CoreResult<GradingScale> {
    let sql = format!("SELECT {} FROM grading_systems WHERE id = ?", SCALE_COLUMNS);
    conn.query_row(&sql, [scale_id], scale_from_row)
        .optional()?
        .ok_or_else(|| CoreError::not_found("grading system", scale_id))
}

/// Bounds are re-checked on the merged result, not per field.
pub fn update_scale(conn: &Connection, scale_id: i64, patch: &GradingScalePatch) -> CoreResult<()> {
    let current = get_scale(conn, scale_id)?;
    check_bounds(
        patch.min_grade.unwrap_or(current.min_grade),
        patch.max_grade.unwrap_or(current.max_grade),
        patch.step_size.unwrap_or(current.step_size),
    )?;

    let mut fields: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    if let Some(name) = &patch.name {
        fields.push("name = ?");
        values.push(Value::Text(scale_name(name)?));
    }
    for (column, v) in [
        ("min_grade = ?", patch.min_grade),
        ("max_grade = ?", patch.max_grade),
        ("step_size = ?", patch.step_size),
    ] {
        if let Some(v) = v {
            fields.push(column);
            values.push(Value::Real(v));
        }
    }
    if let Some(d) = &patch.description {
        fields.push("description = ?");
        values.push(d.clone().map(Value::Text).unwrap_or(Value::Null));
    }
    if fields.is_empty() {
        return Ok(());
    }
    values.push(Value::Integer(scale_id));
    let sql = format!("UPDATE grading_systems SET {} WHERE id = ?", fields.join(", "));
    conn.execute(&sql, params_from_iter(values))
        .map_err(|e| CoreError::storage("db_update_failed", e))?;
    Ok(())
}

pub fn delete_scale(conn: &Connection, scale_id: i64) -> CoreResult<()> {
    get_scale(conn, scale_id)?;
    let templates: i64 = conn.query_row(
        "SELECT COUNT(*) FROM assessment_type_templates WHERE grading_system_id = ?",
        [scale_id],
        |r| r.get(0),
    )?;
    if templates > 0 {
        return Err(CoreError::validation(
            "in_use",
            "grading system is referenced by assessment type templates",
        )
        .with_details(json!({ "gradingSystemId": scale_id, "templates": templates })));
    }
    conn.execute("DELETE FROM grading_systems WHERE id = ?", [scale_id])
        .map_err(|e| CoreError::storage("db_delete_failed", e))?;
    Ok(())
}

/// Checks `grade` against the stored scale `scale_id`.
pub fn is_valid(conn: &Connection, grade: f64, scale_id: i64) -> CoreResult<bool> {
    Ok(get_scale(conn, scale_id)?.accepts(grade))
}

/// The scale a course grades on, resolved through its template.
pub fn scale_for_course(conn: &Connection, course_id: i64) -> CoreResult<GradingScale> {
    let row: Option<Option<i64>> = conn
        .query_row(
            "SELECT t.grading_system_id
             FROM courses c
             LEFT JOIN assessment_type_templates t ON t.id = c.template_id
             WHERE c.id = ?",
            [course_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(scale_id) = row.ok_or_else(|| CoreError::not_found("course", course_id))? else {
        return Err(CoreError::configuration(
            "no_grading_system",
            "course has no grading system; link it to a template with one",
        )
        .with_details(json!({ "courseId": course_id })));
    };
    get_scale(conn, scale_id)
}

/// Fails with `grade_out_of_scale` unless `grade` is legal on `scale`.
pub fn ensure_on_scale(scale: &GradingScale, grade: f64) -> CoreResult<()> {
    if scale.accepts(grade) {
        return Ok(());
    }
    Err(CoreError::validation(
        "grade_out_of_scale",
        format!(
            "grade {} is not a legal value of {} ({}..{}, step {})",
            grade, scale.name, scale.min_grade, scale.max_grade, scale.step_size
        ),
    )
    .with_details(json!({
        "grade": grade,
        "gradingSystemId": scale.id,
        "minGrade": scale.min_grade,
        "maxGrade": scale.max_grade,
        "stepSize": scale.step_size,
    })))
}
