use crate::error::{CoreError, CoreResult};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub notes: Option<String>,
}

impl Student {
    pub fn display_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }
}

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StudentPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<Option<String>>,
    pub notes: Option<Option<String>>,
}

const STUDENT_COLUMNS: &str = "s.id, s.first_name, s.last_name, s.email, s.notes";

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        first_name: r.get(1)?,
        last_name: r.get(2)?,
        email: r.get(3)?,
        notes: r.get(4)?,
    })
}

fn required_name(raw: &str, field: &str) -> CoreResult<String> {
    let v = raw.trim();
    if v.is_empty() {
        return Err(CoreError::bad_params(format!("{} must not be empty", field)));
    }
    Ok(v.to_string())
}

pub fn ensure_student_exists(conn: &Connection, student_id: i64) -> CoreResult<()> {
    let exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |_r| Ok(()))
        .optional()?;
    if exists.is_none() {
        return Err(CoreError::not_found("student", student_id));
    }
    Ok(())
}

pub fn create_student(conn: &Connection, input: &NewStudent) -> CoreResult<i64> {
    let first = required_name(&input.first_name, "firstName")?;
    let last = required_name(&input.last_name, "lastName")?;
    conn.execute(
        "INSERT INTO students(first_name, last_name, email, notes) VALUES(?, ?, ?, ?)",
        (&first, &last, &input.email, &input.notes),
    )
    .map_err(|e| CoreError::storage("db_insert_failed", e))?;
    Ok(conn.last_insert_rowid())
}

pub fn list_students(conn: &Connection) -> CoreResult<Vec<Student>> {
    let sql = format!(
        "SELECT {} FROM students s ORDER BY s.last_name, s.first_name, s.id",
        STUDENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let students = stmt
        .query_map([], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(students)
}

pub fn course_students(conn: &Connection, course_id: i64) -> CoreResult<Vec<Student>> {
    crate::courses::ensure_course_exists(conn, course_id)?;
    let sql = format!(
        "SELECT {}
         FROM students s
         JOIN course_students cs ON cs.student_id = s.id
         WHERE cs.course_id = ?
         ORDER BY s.last_name, s.first_name, s.id",
        STUDENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let students = stmt
        .query_map([course_id], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(students)
}

pub fn update_student(conn: &Connection, student_id: i64, patch: &StudentPatch) -> CoreResult<()> {
    ensure_student_exists(conn, student_id)?;
    let mut fields: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    if let Some(v) = &patch.first_name {
        fields.push("first_name = ?");
        values.push(Value::Text(required_name(v, "firstName")?));
    }
    if let Some(v) = &patch.last_name {
        fields.push("last_name = ?");
        values.push(Value::Text(required_name(v, "lastName")?));
    }
    if let Some(v) = &patch.email {
        fields.push("email = ?");
        values.push(v.clone().map(Value::Text).unwrap_or(Value::Null));
    }
    if let Some(v) = &patch.notes {
        fields.push("notes = ?");
        values.push(v.clone().map(Value::Text).unwrap_or(Value::Null));
    }
    if fields.is_empty() {
        return Ok(());
    }
    values.push(Value::Integer(student_id));
    let sql = format!("UPDATE students SET {} WHERE id = ?", fields.join(", "));
    conn.execute(&sql, params_from_iter(values))
        .map_err(|e| CoreError::storage("db_update_failed", e))?;
    Ok(())
}

/// Removes the student with all of their marks and enrolments.
pub fn delete_student(conn: &Connection, student_id: i64) -> CoreResult<()> {
    ensure_student_exists(conn, student_id)?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CoreError::storage("db_tx_failed", e))?;
    for sql in [
        "DELETE FROM assessments WHERE student_id = ?",
        "DELETE FROM course_students WHERE student_id = ?",
        "DELETE FROM students WHERE id = ?",
    ] {
        tx.execute(sql, [student_id])
            .map_err(|e| CoreError::storage("db_delete_failed", e))?;
    }
    tx.commit()
        .map_err(|e| CoreError::storage("db_commit_failed", e))?;
    tracing::info!(student_id, "student deleted");
    Ok(())
}
