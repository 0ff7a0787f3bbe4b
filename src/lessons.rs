use crate::dates::{date_from_row, format_date, normalize_time};
use crate::error::{CoreError, CoreResult};
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    Normal,
    Cancelled,
    Moved,
    Substituted,
}

impl LessonStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Cancelled => "cancelled",
            Self::Moved => "moved",
            Self::Substituted => "substituted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Some(Self::Normal),
            "cancelled" => Some(Self::Cancelled),
            "moved" => Some(Self::Moved),
            "substituted" => Some(Self::Substituted),
            _ => None,
        }
    }
}

/// One dated occurrence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: i64,
    pub course_id: i64,
    pub date: NaiveDate,
    pub time: String,
    pub duration: i64,
    pub topic: String,
    pub homework: Option<String>,
    pub status: LessonStatus,
    pub status_note: Option<String>,
    pub series_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewLesson {
    pub course_id: i64,
    pub date: NaiveDate,
    pub time: String,
    /// In standard lesson units (a double lesson is 2).
    pub duration: i64,
    pub topic: String,
    pub homework: Option<String>,
}

/// Closed set of mutable lesson fields. `None` leaves a field untouched;
/// for nullable columns `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct LessonPatch {
    pub date: Option<NaiveDate>,
    pub time: Option<String>,
    pub duration: Option<i64>,
    pub topic: Option<String>,
    pub homework: Option<Option<String>>,
    pub status: Option<LessonStatus>,
    pub status_note: Option<Option<String>>,
}

impl LessonPatch {
    fn assignments(&self) -> CoreResult<(Vec<&'static str>, Vec<Value>)> {
        let mut fields: Vec<&'static str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(d) = self.date {
            fields.push("date = ?");
            values.push(Value::Text(format_date(d)));
        }
        if let Some(t) = &self.time {
            fields.push("time = ?");
            values.push(Value::Text(normalize_time(t)?));
        }
        if let Some(n) = self.duration {
            fields.push("duration = ?");
            values.push(Value::Integer(validate_duration(n)?));
        }
        if let Some(t) = &self.topic {
            fields.push("topic = ?");
            values.push(Value::Text(t.trim().to_string()));
        }
        if let Some(h) = &self.homework {
            fields.push("homework = ?");
            values.push(opt_text(h));
        }
        if let Some(s) = self.status {
            fields.push("status = ?");
            values.push(Value::Text(s.as_str().to_string()));
        }
        match &self.status_note {
            Some(n) => {
                fields.push("status_note = ?");
                values.push(opt_text(n));
            }
            // Back to normal without a fresh note: the old note no longer applies.
            None if self.status == Some(LessonStatus::Normal) => {
                fields.push("status_note = ?");
                values.push(Value::Null);
            }
            None => {}
        }
        Ok((fields, values))
    }
}

fn opt_text(v: &Option<String>) -> Value {
    match v.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => Value::Text(s.to_string()),
        _ => Value::Null,
    }
}

fn validate_duration(n: i64) -> CoreResult<i64> {
    if n <= 0 {
        return Err(CoreError::bad_params("duration must be > 0")
            .with_details(json!({ "duration": n })));
    }
    Ok(n)
}

pub(crate) fn now_ts() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

pub(crate) fn id_placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(",")
}

const LESSON_COLUMNS: &str =
    "id, course_id, date, time, duration, topic, homework, status, status_note, series_key";

fn lesson_from_row(r: &Row<'_>) -> rusqlite::Result<Lesson> {
    let date: String = r.get(2)?;
    let status: String = r.get(7)?;
    Ok(Lesson {
        id: r.get(0)?,
        course_id: r.get(1)?,
        date: date_from_row(&date, 2)?,
        time: r.get(3)?,
        duration: r.get(4)?,
        topic: r.get(5)?,
        homework: r.get(6)?,
        status: LessonStatus::parse(&status).unwrap_or(LessonStatus::Normal),
        status_note: r.get(8)?,
        series_key: r.get(9)?,
    })
}

/// Checks a lesson draft before anything is written and returns it in
/// canonical form (normalized time, trimmed text).
pub(crate) fn validate_new(conn: &Connection, input: &NewLesson) -> CoreResult<NewLesson> {
    crate::courses::ensure_course_exists(conn, input.course_id)?;
    Ok(NewLesson {
        course_id: input.course_id,
        date: input.date,
        time: normalize_time(&input.time)?,
        duration: validate_duration(input.duration)?,
        topic: input.topic.trim().to_string(),
        homework: match opt_text(&input.homework) {
            Value::Text(s) => Some(s),
            _ => None,
        },
    })
}

pub(crate) fn insert_lesson(
    conn: &Connection,
    lesson: &NewLesson,
    series_key: Option<&str>,
    ts: &str,
) -> CoreResult<i64> {
    conn.execute(
        "INSERT INTO lessons(
            course_id, date, time, duration, topic, homework, status, status_note, series_key, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, 'normal', NULL, ?, ?, ?)",
        (
            lesson.course_id,
            format_date(lesson.date),
            &lesson.time,
            lesson.duration,
            &lesson.topic,
            &lesson.homework,
            series_key,
            ts,
            ts,
        ),
    )
    .map_err(|e| {
        CoreError::storage("db_insert_failed", e).with_details(json!({ "table": "lessons" }))
    })?;
    Ok(conn.last_insert_rowid())
}

pub fn get_lesson(conn: &Connection, lesson_id: i64) -> CoreResult<Lesson> {
    let sql = format!("SELECT {} FROM lessons WHERE id = ?", LESSON_COLUMNS);
    conn.query_row(&sql, [lesson_id], lesson_from_row)
        .optional()?
        .ok_or_else(|| CoreError::not_found("lesson", lesson_id))
}

/// Lessons of a course ordered by date and time, optionally limited to an
/// inclusive date range.
pub fn list_lessons(
    conn: &Connection,
    course_id: i64,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> CoreResult<Vec<Lesson>> {
    crate::courses::ensure_course_exists(conn, course_id)?;
    let mut where_clause = String::from("course_id = ?");
    let mut values: Vec<Value> = vec![Value::Integer(course_id)];
    if let Some(from) = from {
        where_clause.push_str(" AND date >= ?");
        values.push(Value::Text(format_date(from)));
    }
    if let Some(to) = to {
        where_clause.push_str(" AND date <= ?");
        values.push(Value::Text(format_date(to)));
    }
    let sql = format!(
        "SELECT {} FROM lessons WHERE {} ORDER BY date, time, id",
        LESSON_COLUMNS, where_clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let lessons = stmt
        .query_map(params_from_iter(values), lesson_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lessons)
}

fn require_series_key(lesson: &Lesson) -> CoreResult<&str> {
    lesson.series_key.as_deref().ok_or_else(|| {
        CoreError::validation("no_series", "lesson is not part of a recurring series")
            .with_details(json!({ "lessonId": lesson.id }))
    })
}

/// Every occurrence sharing the lesson's series key, past ones included.
pub fn series_members(conn: &Connection, lesson_id: i64) -> CoreResult<Vec<Lesson>> {
    let lesson = get_lesson(conn, lesson_id)?;
    let key = require_series_key(&lesson)?;
    let sql = format!(
        "SELECT {} FROM lessons WHERE series_key = ? AND course_id = ? ORDER BY date, time, id",
        LESSON_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let lessons = stmt
        .query_map((key, lesson.course_id), lesson_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lessons)
}

/// Ids a mutation of `target` applies to: the target alone, or with
/// propagation every occurrence of its series dated on or after it.
/// Earlier occurrences are never part of the set.
fn propagation_targets(conn: &Connection, target: &Lesson, propagate: bool) -> CoreResult<Vec<i64>> {
    if !propagate {
        return Ok(vec![target.id]);
    }
    let key = require_series_key(target)?;
    let mut stmt = conn.prepare(
        "SELECT id FROM lessons
         WHERE series_key = ? AND course_id = ? AND date >= ?
         ORDER BY date, time, id",
    )?;
    let ids = stmt
        .query_map((key, target.course_id, format_date(target.date)), |r| {
            r.get::<_, i64>(0)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Applies `patch` to one lesson, or with `propagate` to it and every later
/// occurrence of its series. The series key itself is never rewritten.
/// Returns the affected lesson ids.
pub fn update_lesson(
    conn: &Connection,
    lesson_id: i64,
    patch: &LessonPatch,
    propagate: bool,
) -> CoreResult<Vec<i64>> {
    let target = get_lesson(conn, lesson_id)?;
    if propagate {
        require_series_key(&target)?;
    }
    if propagate && patch.date.is_some() {
        return Err(CoreError::validation(
            "date_not_propagatable",
            "a date change applies to a single occurrence only",
        )
        .with_details(json!({ "lessonId": lesson_id })));
    }
    let (mut fields, mut values) = patch.assignments()?;
    if fields.is_empty() {
        return Ok(Vec::new());
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CoreError::storage("db_tx_failed", e))?;
    let ids = propagation_targets(&tx, &target, propagate)?;

    fields.push("updated_at = ?");
    values.push(Value::Text(now_ts()));
    values.extend(ids.iter().map(|id| Value::Integer(*id)));
    let sql = format!(
        "UPDATE lessons SET {} WHERE id IN ({})",
        fields.join(", "),
        id_placeholders(ids.len())
    );
    tx.execute(&sql, params_from_iter(values))
        .map_err(|e| CoreError::storage("db_update_failed", e))?;
    tx.commit()
        .map_err(|e| CoreError::storage("db_commit_failed", e))?;

    if propagate {
        tracing::info!(
            lesson_id,
            series_key = target.series_key.as_deref().unwrap_or_default(),
            affected = ids.len(),
            "propagated lesson update"
        );
    }
    Ok(ids)
}

/// Deletes one lesson, or with `propagate` it and every later occurrence of
/// its series. Marks recorded against a deleted lesson stay, detached from it.
/// Returns the deleted lesson ids.
pub fn delete_lesson(conn: &Connection, lesson_id: i64, propagate: bool) -> CoreResult<Vec<i64>> {
    let target = get_lesson(conn, lesson_id)?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CoreError::storage("db_tx_failed", e))?;
    let ids = propagation_targets(&tx, &target, propagate)?;
    let placeholders = id_placeholders(ids.len());
    let bind: Vec<Value> = ids.iter().map(|id| Value::Integer(*id)).collect();

    tx.execute(
        &format!(
            "UPDATE assessments SET lesson_id = NULL WHERE lesson_id IN ({})",
            placeholders
        ),
        params_from_iter(bind.iter()),
    )
    .map_err(|e| CoreError::storage("db_update_failed", e))?;
    tx.execute(
        &format!("DELETE FROM lessons WHERE id IN ({})", placeholders),
        params_from_iter(bind.iter()),
    )
    .map_err(|e| CoreError::storage("db_delete_failed", e))?;
    tx.commit()
        .map_err(|e| CoreError::storage("db_commit_failed", e))?;

    tracing::info!(lesson_id, propagate, deleted = ids.len(), "lessons deleted");
    Ok(ids)
}

/// Marks every lesson dated within `[from, to]` as cancelled with `note`,
/// optionally limited to one course. Used for holidays and school closures.
pub fn cancel_between(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
    note: &str,
    course_id: Option<i64>,
) -> CoreResult<Vec<i64>> {
    if from > to {
        return Err(CoreError::bad_params("from must not be after to").with_details(json!({
            "from": format_date(from),
            "to": format_date(to),
        })));
    }
    if let Some(course_id) = course_id {
        crate::courses::ensure_course_exists(conn, course_id)?;
    }

    let mut where_clause = String::from("date >= ? AND date <= ?");
    let mut values: Vec<Value> = vec![
        Value::Text(format_date(from)),
        Value::Text(format_date(to)),
    ];
    if let Some(course_id) = course_id {
        where_clause.push_str(" AND course_id = ?");
        values.push(Value::Integer(course_id));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CoreError::storage("db_tx_failed", e))?;
    let ids = {
        let mut stmt = tx.prepare(&format!(
            "SELECT id FROM lessons WHERE {} ORDER BY date, time, id",
            where_clause
        ))?;
        let ids = stmt
            .query_map(params_from_iter(values.iter()), |r| r.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };
    let note = note.trim();
    let mut update_values: Vec<Value> = vec![
        if note.is_empty() {
            Value::Null
        } else {
            Value::Text(note.to_string())
        },
        Value::Text(now_ts()),
    ];
    update_values.extend(values);
    tx.execute(
        &format!(
            "UPDATE lessons SET status = 'cancelled', status_note = ?, updated_at = ? WHERE {}",
            where_clause
        ),
        params_from_iter(update_values),
    )
    .map_err(|e| CoreError::storage("db_update_failed", e))?;
    tx.commit()
        .map_err(|e| CoreError::storage("db_commit_failed", e))?;
    Ok(ids)
}
