use crate::dates::{date_from_row, format_date};
use crate::error::{CoreError, CoreResult};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::json;

/// A teaching period. The active one bounds recurring lesson generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermWindow {
    pub id: i64,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub active: bool,
}

const TERM_COLUMNS: &str = "id, name, start_date, end_date, is_active";

fn term_from_row(r: &Row<'_>) -> rusqlite::Result<TermWindow> {
    let start: String = r.get(2)?;
    let end: String = r.get(3)?;
    Ok(TermWindow {
        id: r.get(0)?,
        name: r.get(1)?,
        start_date: date_from_row(&start, 2)?,
        end_date: date_from_row(&end, 3)?,
        active: r.get::<_, i64>(4)? != 0,
    })
}

pub fn create_term(
    conn: &Connection,
    name: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> CoreResult<i64> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::bad_params("term name must not be empty"));
    }
    if start_date > end_date {
        return Err(CoreError::bad_params("term start must not be after its end")
            .with_details(json!({
                "startDate": format_date(start_date),
                "endDate": format_date(end_date),
            })));
    }
    conn.execute(
        "INSERT INTO terms(name, start_date, end_date, is_active) VALUES(?, ?, ?, 0)",
        (name, format_date(start_date), format_date(end_date)),
    )
    .map_err(|e| CoreError::storage("db_insert_failed", e))?;
    Ok(conn.last_insert_rowid())
}

pub fn list_terms(conn: &Connection) -> CoreResult<Vec<TermWindow>> {
    let sql = format!("SELECT {} FROM terms ORDER BY start_date, id", TERM_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let terms = stmt
        .query_map([], term_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(terms)
}

pub fn get_term(conn: &Connection, term_id: i64) -> CoreResult<TermWindow> {
    let sql = format!("SELECT {} FROM terms WHERE id = ?", TERM_COLUMNS);
    conn.query_row(&sql, [term_id], term_from_row)
        .optional()?
        .ok_or_else(|| CoreError::not_found("term", term_id))
}

/// Makes `term_id` the only active term.
pub fn activate_term(conn: &Connection, term_id: i64) -> CoreResult<()> {
    get_term(conn, term_id)?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CoreError::storage("db_tx_failed", e))?;
    tx.execute("UPDATE terms SET is_active = 0 WHERE is_active <> 0", [])
        .map_err(|e| CoreError::storage("db_update_failed", e))?;
    tx.execute("UPDATE terms SET is_active = 1 WHERE id = ?", [term_id])
        .map_err(|e| CoreError::storage("db_update_failed", e))?;
    tx.commit()
        .map_err(|e| CoreError::storage("db_commit_failed", e))?;
    tracing::info!(term_id, "term activated");
    Ok(())
}

pub fn active_term(conn: &Connection) -> CoreResult<Option<TermWindow>> {
    let sql = format!(
        "SELECT {} FROM terms WHERE is_active <> 0 ORDER BY id DESC LIMIT 1",
        TERM_COLUMNS
    );
    Ok(conn.query_row(&sql, [], term_from_row).optional()?)
}

pub fn require_active_term(conn: &Connection) -> CoreResult<TermWindow> {
    active_term(conn)?.ok_or_else(|| {
        CoreError::configuration(
            "no_active_term",
            "no active term is set; activate a term before adding recurring lessons",
        )
    })
}

pub fn delete_term(conn: &Connection, term_id: i64) -> CoreResult<()> {
    let changed = conn
        .execute("DELETE FROM terms WHERE id = ?", [term_id])
        .map_err(|e| CoreError::storage("db_delete_failed", e))?;
    if changed == 0 {
        return Err(CoreError::not_found("term", term_id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::error::ErrorKind;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn require_active_term_is_a_configuration_error_when_unset() {
        let conn = db::open_in_memory().unwrap();
        create_term(&conn, "Autumn", d("2026-09-01"), d("2026-12-18")).unwrap();
        let e = require_active_term(&conn).unwrap_err();
        assert_eq!(e.kind, ErrorKind::Configuration);
        assert_eq!(e.code, "no_active_term");
    }

    #[test]
    fn activate_leaves_exactly_one_active_term() {
        let conn = db::open_in_memory().unwrap();
        let a = create_term(&conn, "Autumn", d("2026-09-01"), d("2026-12-18")).unwrap();
        let b = create_term(&conn, "Spring", d("2027-01-04"), d("2027-03-26")).unwrap();
        activate_term(&conn, a).unwrap();
        activate_term(&conn, b).unwrap();
        let active: Vec<i64> = list_terms(&conn)
            .unwrap()
            .into_iter()
            .filter(|t| t.active)
            .map(|t| t.id)
            .collect();
        assert_eq!(active, vec![b]);
        assert_eq!(require_active_term(&conn).unwrap().name, "Spring");
    }

    #[test]
    fn create_rejects_inverted_window() {
        let conn = db::open_in_memory().unwrap();
        let e = create_term(&conn, "Bad", d("2026-12-18"), d("2026-09-01")).unwrap_err();
        assert_eq!(e.code, "bad_params");
    }

    #[test]
    fn unknown_term_is_not_found() {
        let conn = db::open_in_memory().unwrap();
        assert_eq!(activate_term(&conn, 9).unwrap_err().code, "not_found");
        assert_eq!(delete_term(&conn, 9).unwrap_err().code, "not_found");
    }
}
