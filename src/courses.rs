use crate::error::{CoreError, CoreResult};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseKind {
    Class,
    Group,
}

impl CourseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "class" => Some(Self::Class),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: i64,
    pub name: String,
    pub kind: CourseKind,
    pub subject: Option<String>,
    pub color: Option<String>,
    pub description: Option<String>,
    pub template_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewCourse {
    pub name: String,
    pub kind: CourseKind,
    pub subject: Option<String>,
    pub color: Option<String>,
    pub description: Option<String>,
}

/// Explicit optional members; `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default)]
pub struct CoursePatch {
    pub name: Option<String>,
    pub kind: Option<CourseKind>,
    pub subject: Option<Option<String>>,
    pub color: Option<Option<String>>,
    pub description: Option<Option<String>>,
}

const COURSE_COLUMNS: &str = "id, name, kind, subject, color, description, template_id";

fn course_from_row(r: &Row<'_>) -> rusqlite::Result<Course> {
    let kind: String = r.get(2)?;
    Ok(Course {
        id: r.get(0)?,
        name: r.get(1)?,
        kind: CourseKind::parse(&kind).unwrap_or(CourseKind::Class),
        subject: r.get(3)?,
        color: r.get(4)?,
        description: r.get(5)?,
        template_id: r.get(6)?,
    })
}

fn non_empty_name(name: &str) -> CoreResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::bad_params("course name must not be empty"));
    }
    Ok(name.to_string())
}

pub fn ensure_course_exists(conn: &Connection, course_id: i64) -> CoreResult<()> {
    let exists = conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |_r| Ok(()))
        .optional()?;
    if exists.is_none() {
        return Err(CoreError::not_found("course", course_id));
    }
    Ok(())
}

pub fn create_course(conn: &Connection, input: &NewCourse) -> CoreResult<i64> {
    let name = non_empty_name(&input.name)?;
    conn.execute(
        "INSERT INTO courses(name, kind, subject, color, description) VALUES(?, ?, ?, ?, ?)",
        (
            &name,
            input.kind.as_str(),
            &input.subject,
            &input.color,
            &input.description,
        ),
    )
    .map_err(|e| CoreError::storage("db_insert_failed", e))?;
    Ok(conn.last_insert_rowid())
}

pub fn list_courses(conn: &Connection) -> CoreResult<Vec<Course>> {
    let sql = format!("SELECT {} FROM courses ORDER BY name, id", COURSE_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let courses = stmt
        .query_map([], course_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(courses)
}

pub fn get_course(conn: &Connection, course_id: i64) -> CoreResult<Course> {
    let sql = format!("SELECT {} FROM courses WHERE id = ?", COURSE_COLUMNS);
    conn.query_row(&sql, [course_id], course_from_row)
        .optional()?
        .ok_or_else(|| CoreError::not_found("course", course_id))
}

pub fn update_course(conn: &Connection, course_id: i64, patch: &CoursePatch) -> CoreResult<()> {
    ensure_course_exists(conn, course_id)?;

    let mut fields: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    if let Some(name) = &patch.name {
        fields.push("name = ?");
        values.push(Value::Text(non_empty_name(name)?));
    }
    if let Some(kind) = patch.kind {
        fields.push("kind = ?");
        values.push(Value::Text(kind.as_str().to_string()));
    }
    for (column, v) in [
        ("subject = ?", &patch.subject),
        ("color = ?", &patch.color),
        ("description = ?", &patch.description),
    ] {
        if let Some(v) = v {
            fields.push(column);
            values.push(v.clone().map(Value::Text).unwrap_or(Value::Null));
        }
    }
    if fields.is_empty() {
        return Ok(());
    }
    values.push(Value::Integer(course_id));
    let sql = format!("UPDATE courses SET {} WHERE id = ?", fields.join(", "));
    conn.execute(&sql, params_from_iter(values))
        .map_err(|e| CoreError::storage("db_update_failed", e))?;
    Ok(())
}

/// Removes the course together with its marks, lessons, assessment types
/// and enrolments.
pub fn delete_course(conn: &Connection, course_id: i64) -> CoreResult<()> {
    ensure_course_exists(conn, course_id)?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CoreError::storage("db_tx_failed", e))?;

    // Dependency order; no ON DELETE CASCADE in the schema.
    for sql in [
        "DELETE FROM assessments WHERE course_id = ?",
        "DELETE FROM lessons WHERE course_id = ?",
        "DELETE FROM assessment_types WHERE course_id = ?",
        "DELETE FROM course_students WHERE course_id = ?",
        "DELETE FROM courses WHERE id = ?",
    ] {
        tx.execute(sql, [course_id]).map_err(|e| {
            CoreError::storage("db_delete_failed", e).with_details(json!({ "sql": sql }))
        })?;
    }

    tx.commit()
        .map_err(|e| CoreError::storage("db_commit_failed", e))?;
    tracing::info!(course_id, "course deleted");
    Ok(())
}

pub fn enroll(conn: &Connection, course_id: i64, student_id: i64) -> CoreResult<()> {
    ensure_course_exists(conn, course_id)?;
    crate::students::ensure_student_exists(conn, student_id)?;
    conn.execute(
        "INSERT OR IGNORE INTO course_students(course_id, student_id) VALUES(?, ?)",
        [course_id, student_id],
    )
    .map_err(|e| CoreError::storage("db_insert_failed", e))?;
    Ok(())
}

pub fn unenroll(conn: &Connection, course_id: i64, student_id: i64) -> CoreResult<()> {
    let changed = conn
        .execute(
            "DELETE FROM course_students WHERE course_id = ? AND student_id = ?",
            [course_id, student_id],
        )
        .map_err(|e| CoreError::storage("db_delete_failed", e))?;
    if changed == 0 {
        return Err(CoreError::new(
            crate::error::ErrorKind::NotFound,
            "not_found",
            "student is not enrolled in course",
        )
        .with_details(json!({ "courseId": course_id, "studentId": student_id })));
    }
    Ok(())
}
