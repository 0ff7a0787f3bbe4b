use crate::dates::{date_from_row, format_date};
use crate::error::{CoreError, CoreResult};
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::json;

/// One recorded grade.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mark {
    pub id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub assessment_type_id: i64,
    pub lesson_id: Option<i64>,
    pub grade: f64,
    pub weight: f64,
    pub date: NaiveDate,
    pub topic: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewMark {
    pub student_id: i64,
    pub course_id: i64,
    pub assessment_type_id: i64,
    pub lesson_id: Option<i64>,
    pub grade: f64,
    /// Defaults to 1.0.
    pub weight: Option<f64>,
    /// Defaults to the lesson's date, else today.
    pub date: Option<NaiveDate>,
    pub topic: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recorded {
    pub id: i64,
    /// True when an existing mark for the same (student, lesson) was replaced.
    pub replaced: bool,
}

const MARK_COLUMNS: &str =
    "id, student_id, course_id, assessment_type_id, lesson_id, grade, weight, date, topic, comment";

fn mark_from_row(r: &Row<'_>) -> rusqlite::Result<Mark> {
    let date: String = r.get(7)?;
    Ok(Mark {
        id: r.get(0)?,
        student_id: r.get(1)?,
        course_id: r.get(2)?,
        assessment_type_id: r.get(3)?,
        lesson_id: r.get(4)?,
        grade: r.get(5)?,
        weight: r.get(6)?,
        date: date_from_row(&date, 7)?,
        topic: r.get(8)?,
        comment: r.get(9)?,
    })
}

fn wrong_course(entity: &str, id: i64, actual: i64, expected: i64) -> CoreError {
    CoreError::bad_params(format!("{} belongs to another course", entity)).with_details(json!({
        "entity": entity,
        "id": id,
        "courseId": actual,
        "expectedCourseId": expected,
    }))
}

/// Validates a mark against the course's grading scale and stores it.
///
/// With a lesson, `(student, lesson)` is the upsert key: a second mark for
/// the same lesson replaces the first one and keeps its id.
pub fn record_mark(conn: &Connection, input: &NewMark) -> CoreResult<Recorded> {
    crate::courses::ensure_course_exists(conn, input.course_id)?;
    crate::students::ensure_student_exists(conn, input.student_id)?;

    let t = crate::assessment_types::get_type(conn, input.assessment_type_id)?;
    if t.course_id != input.course_id {
        return Err(wrong_course("assessment type", t.id, t.course_id, input.course_id));
    }
    let lesson = match input.lesson_id {
        Some(lesson_id) => {
            let lesson = crate::lessons::get_lesson(conn, lesson_id)?;
            if lesson.course_id != input.course_id {
                return Err(wrong_course("lesson", lesson.id, lesson.course_id, input.course_id));
            }
            Some(lesson)
        }
        None => None,
    };

    let weight = input.weight.unwrap_or(1.0);
    if !weight.is_finite() || weight <= 0.0 {
        return Err(CoreError::bad_params("mark weight must be > 0")
            .with_details(json!({ "weight": weight })));
    }

    let scale = crate::scale::scale_for_course(conn, input.course_id)?;
    crate::scale::ensure_on_scale(&scale, input.grade)?;

    let date = input
        .date
        .or(lesson.as_ref().map(|l| l.date))
        .unwrap_or_else(|| chrono::Local::now().date_naive());

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CoreError::storage("db_tx_failed", e))?;
    let existing: Option<i64> = match input.lesson_id {
        Some(lesson_id) => tx
            .query_row(
                "SELECT id FROM assessments WHERE student_id = ? AND lesson_id = ?",
                [input.student_id, lesson_id],
                |r| r.get(0),
            )
            .optional()?,
        None => None,
    };

    let recorded = match existing {
        Some(id) => {
            tx.execute(
                "UPDATE assessments
                 SET assessment_type_id = ?, grade = ?, weight = ?, date = ?, topic = ?, comment = ?
                 WHERE id = ?",
                (
                    input.assessment_type_id,
                    input.grade,
                    weight,
                    format_date(date),
                    &input.topic,
                    &input.comment,
                    id,
                ),
            )
            .map_err(|e| CoreError::storage("db_update_failed", e))?;
            Recorded { id, replaced: true }
        }
        None => {
            tx.execute(
                "INSERT INTO assessments(
                    student_id, course_id, assessment_type_id, lesson_id, grade, weight, date, topic, comment
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    input.student_id,
                    input.course_id,
                    input.assessment_type_id,
                    input.lesson_id,
                    input.grade,
                    weight,
                    format_date(date),
                    &input.topic,
                    &input.comment,
                ),
            )
            .map_err(|e| {
                CoreError::storage("db_insert_failed", e)
                    .with_details(json!({ "table": "assessments" }))
            })?;
            Recorded {
                id: tx.last_insert_rowid(),
                replaced: false,
            }
        }
    };
    tx.commit()
        .map_err(|e| CoreError::storage("db_commit_failed", e))?;
    Ok(recorded)
}

/// Marks of a course by date, optionally for one student only.
pub fn list_marks(conn: &Connection, course_id: i64, student_id: Option<i64>) -> CoreResult<Vec<Mark>> {
    crate::courses::ensure_course_exists(conn, course_id)?;
    let mut sql = format!("SELECT {} FROM assessments WHERE course_id = ?", MARK_COLUMNS);
    let mut values = vec![Value::Integer(course_id)];
    if let Some(student_id) = student_id {
        sql.push_str(" AND student_id = ?");
        values.push(Value::Integer(student_id));
    }
    sql.push_str(" ORDER BY date, id");
    let mut stmt = conn.prepare(&sql)?;
    let marks = stmt
        .query_map(params_from_iter(values), mark_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(marks)
}

pub fn delete_mark(conn: &Connection, mark_id: i64) -> CoreResult<()> {
    let changed = conn
        .execute("DELETE FROM assessments WHERE id = ?", [mark_id])
        .map_err(|e| CoreError::storage("db_delete_failed", e))?;
    if changed == 0 {
        return Err(CoreError::not_found("assessment", mark_id));
    }
    Ok(())
}
