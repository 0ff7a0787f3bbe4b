use crate::dates::{format_date, normalize_time};
use crate::error::{CoreError, CoreResult};
use crate::lessons::{self, NewLesson};
use chrono::{Datelike, Days, NaiveDate};
use rusqlite::Connection;
use serde_json::json;

/// Key shared by every occurrence of one weekly pattern.
///
/// Pure function of (course, ISO weekday, time). The time is normalized first
/// so `8:00` and `08:00` land in the same series.
pub fn series_key(course_id: i64, iso_weekday: u32, time: &str) -> CoreResult<String> {
    if !(1..=7).contains(&iso_weekday) {
        return Err(CoreError::bad_params("weekday must be 1..7 (Monday = 1)")
            .with_details(json!({ "weekday": iso_weekday })));
    }
    let time = normalize_time(time)?;
    Ok(format!("c{}-d{}-{}", course_id, iso_weekday, time))
}

/// Every date from `anchor` to `until` inclusive that falls on the anchor's
/// weekday. Empty when `until` precedes `anchor`.
pub fn weekly_dates(anchor: NaiveDate, until: NaiveDate) -> Vec<NaiveDate> {
    let mut out = Vec::new();
    let mut next = Some(anchor);
    while let Some(d) = next {
        if d > until {
            break;
        }
        out.push(d);
        next = d.checked_add_days(Days::new(7));
    }
    out
}

/// `base`, or `base~2`, `base~3`, ... when moved occurrences of an earlier
/// series still carry the key from `from` on.
fn unused_key(conn: &Connection, base: &str, from: NaiveDate) -> CoreResult<String> {
    let from = format_date(from);
    let mut n = 1_u32;
    loop {
        let candidate = if n == 1 {
            base.to_string()
        } else {
            format!("{}~{}", base, n)
        };
        let taken: i64 = conn.query_row(
            "SELECT COUNT(*) FROM lessons WHERE series_key = ? AND date >= ?",
            (&candidate, &from),
            |r| r.get(0),
        )?;
        if taken == 0 {
            return Ok(candidate);
        }
        n += 1;
    }
}

/// Creates one lesson, or with `recurring` a weekly series from the draft's
/// date to the end of the active term. Everything is validated before the
/// first insert and a series is written in one transaction.
///
/// Returns the created lesson ids in date order.
pub fn generate_lessons(
    conn: &Connection,
    draft: &NewLesson,
    recurring: bool,
) -> CoreResult<Vec<i64>> {
    let lesson = lessons::validate_new(conn, draft)?;
    let ts = lessons::now_ts();
    if !recurring {
        let id = lessons::insert_lesson(conn, &lesson, None, &ts)?;
        return Ok(vec![id]);
    }

    let term = crate::term::require_active_term(conn)?;
    if lesson.date > term.end_date {
        return Err(CoreError::validation(
            "outside_term",
            "series anchor lies after the end of the active term",
        )
        .with_details(json!({
            "date": format_date(lesson.date),
            "termId": term.id,
            "termEnd": format_date(term.end_date),
        })));
    }

    // The slot is judged by the rows themselves: a propagated time change
    // moves lessons without rewriting their key.
    let occupied: i64 = conn.query_row(
        "SELECT COUNT(*) FROM lessons
         WHERE course_id = ? AND time = ? AND date >= ? AND strftime('%w', date) = ?",
        (
            lesson.course_id,
            &lesson.time,
            format_date(lesson.date),
            lesson.date.weekday().num_days_from_sunday().to_string(),
        ),
        |r| r.get(0),
    )?;
    if occupied > 0 {
        return Err(CoreError::validation(
            "series_exists",
            "a series for this course, weekday and time already continues from this date",
        )
        .with_details(json!({
            "courseId": lesson.course_id,
            "time": &lesson.time,
            "date": format_date(lesson.date),
            "existing": occupied,
        })));
    }

    let weekday = lesson.date.weekday().number_from_monday();
    let key = unused_key(
        conn,
        &series_key(lesson.course_id, weekday, &lesson.time)?,
        lesson.date,
    )?;

    let dates = weekly_dates(lesson.date, term.end_date);
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CoreError::storage("db_tx_failed", e))?;
    let mut ids = Vec::with_capacity(dates.len());
    for date in dates {
        let occurrence = NewLesson {
            date,
            ..lesson.clone()
        };
        ids.push(lessons::insert_lesson(&tx, &occurrence, Some(&key), &ts)?);
    }
    tx.commit()
        .map_err(|e| CoreError::storage("db_commit_failed", e))?;

    tracing::info!(
        course_id = lesson.course_id,
        series_key = %key,
        count = ids.len(),
        until = %format_date(term.end_date),
        "recurring series generated"
    );
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::courses::{self, CourseKind, NewCourse};
    use crate::db;
    use crate::error::ErrorKind;
    use crate::lessons::list_lessons;
    use crate::term;
    use chrono::Weekday;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn setup(term_end: Option<&str>) -> (Connection, i64) {
        let conn = db::open_in_memory().unwrap();
        let course = courses::create_course(
            &conn,
            &NewCourse {
                name: "10c Physics".into(),
                kind: CourseKind::Class,
                subject: Some("Physics".into()),
                color: None,
                description: None,
            },
        )
        .unwrap();
        if let Some(end) = term_end {
            let t = term::create_term(&conn, "Spring", d("2026-01-05"), d(end)).unwrap();
            term::activate_term(&conn, t).unwrap();
        }
        (conn, course)
    }

    fn draft(course: i64, date: &str, time: &str) -> NewLesson {
        NewLesson {
            course_id: course,
            date: d(date),
            time: time.into(),
            duration: 2,
            topic: "Optics".into(),
            homework: None,
        }
    }

    #[test]
    fn key_is_pure_and_time_normalized() {
        let a = series_key(3, 2, "8:00").unwrap();
        let b = series_key(3, 2, "08:00:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "c3-d2-08:00");
        assert_ne!(a, series_key(3, 3, "08:00").unwrap());
        assert_ne!(a, series_key(31, 2, "08:00").unwrap());
        assert_eq!(series_key(3, 0, "08:00").unwrap_err().code, "bad_params");
        assert_eq!(series_key(3, 8, "08:00").unwrap_err().code, "bad_params");
    }

    #[test]
    fn weekly_dates_stop_at_until_inclusive() {
        let dates = weekly_dates(d("2026-01-07"), d("2026-01-28"));
        assert_eq!(
            dates,
            vec![d("2026-01-07"), d("2026-01-14"), d("2026-01-21"), d("2026-01-28")]
        );
        assert!(dates.iter().all(|x| x.weekday() == Weekday::Wed));
        assert_eq!(weekly_dates(d("2026-01-07"), d("2026-01-27")).len(), 3);
        assert_eq!(weekly_dates(d("2026-01-07"), d("2026-01-07")).len(), 1);
        assert!(weekly_dates(d("2026-01-07"), d("2026-01-06")).is_empty());
    }

    #[test]
    fn recurring_series_is_bounded_by_term_end() {
        let (conn, course) = setup(Some("2026-02-10"));
        // 2026-01-13 is a Tuesday; the term ends on a Tuesday.
        let ids = generate_lessons(&conn, &draft(course, "2026-01-13", "9:45"), true).unwrap();
        assert_eq!(ids.len(), 5);

        let rows = list_lessons(&conn, course, None, None).unwrap();
        let dates: Vec<String> = rows.iter().map(|l| format_date(l.date)).collect();
        assert_eq!(
            dates,
            vec!["2026-01-13", "2026-01-20", "2026-01-27", "2026-02-03", "2026-02-10"]
        );
        for l in &rows {
            assert_eq!(l.series_key.as_deref(), Some(format!("c{}-d2-09:45", course).as_str()));
            assert_eq!(l.time, "09:45");
            assert_eq!(l.duration, 2);
            assert_eq!(l.status, crate::lessons::LessonStatus::Normal);
        }
    }

    #[test]
    fn single_lesson_needs_no_term() {
        let (conn, course) = setup(None);
        let ids = generate_lessons(&conn, &draft(course, "2026-01-13", "08:00"), false).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(crate::lessons::get_lesson(&conn, ids[0]).unwrap().series_key, None);
    }

    #[test]
    fn recurring_without_active_term_is_configuration_error() {
        let (conn, course) = setup(None);
        let e = generate_lessons(&conn, &draft(course, "2026-01-13", "08:00"), true).unwrap_err();
        assert_eq!(e.kind, ErrorKind::Configuration);
        assert_eq!(e.code, "no_active_term");
        assert!(list_lessons(&conn, course, None, None).unwrap().is_empty());
    }

    #[test]
    fn unknown_course_rejected_before_any_insert() {
        let (conn, _) = setup(Some("2026-03-31"));
        let e = generate_lessons(&conn, &draft(999, "2026-01-13", "08:00"), true).unwrap_err();
        assert_eq!(e.code, "not_found");
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM lessons", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn anchor_after_term_end_is_rejected() {
        let (conn, course) = setup(Some("2026-02-10"));
        let e = generate_lessons(&conn, &draft(course, "2026-02-11", "08:00"), true).unwrap_err();
        assert_eq!(e.code, "outside_term");
    }

    #[test]
    fn overlapping_series_is_rejected() {
        let (conn, course) = setup(Some("2026-02-10"));
        generate_lessons(&conn, &draft(course, "2026-01-13", "08:00"), true).unwrap();
        let e = generate_lessons(&conn, &draft(course, "2026-01-27", "8:00"), true).unwrap_err();
        assert_eq!(e.code, "series_exists");
        // Another time slot on the same weekday is a separate series.
        generate_lessons(&conn, &draft(course, "2026-01-27", "10:00"), true).unwrap();
        assert_eq!(list_lessons(&conn, course, None, None).unwrap().len(), 5 + 3);
    }

    #[test]
    fn slot_check_follows_propagated_time_change() {
        let (conn, course) = setup(Some("2026-02-10"));
        let first = generate_lessons(&conn, &draft(course, "2026-01-13", "08:00"), true).unwrap();
        let moved = crate::lessons::LessonPatch {
            time: Some("09:45".into()),
            ..Default::default()
        };
        crate::lessons::update_lesson(&conn, first[0], &moved, true).unwrap();

        // 09:45 is now taken by the moved series.
        let e = generate_lessons(&conn, &draft(course, "2026-01-13", "09:45"), true).unwrap_err();
        assert_eq!(e.code, "series_exists");

        // 08:00 is free again; the new series must not share the old key.
        let second = generate_lessons(&conn, &draft(course, "2026-01-13", "08:00"), true).unwrap();
        assert_eq!(second.len(), 5);
        let old_key = crate::lessons::get_lesson(&conn, first[0]).unwrap().series_key;
        let new_key = crate::lessons::get_lesson(&conn, second[0]).unwrap().series_key;
        assert_eq!(old_key, Some(format!("c{}-d2-08:00", course)));
        assert_eq!(new_key, Some(format!("c{}-d2-08:00~2", course)));

        let topic = crate::lessons::LessonPatch {
            topic: Some("Lenses".into()),
            ..Default::default()
        };
        let affected = crate::lessons::update_lesson(&conn, second[0], &topic, true).unwrap();
        assert_eq!(affected, second);
        assert_eq!(crate::lessons::get_lesson(&conn, first[0]).unwrap().topic, "Optics");
    }

    #[test]
    fn single_lesson_occupies_its_slot() {
        let (conn, course) = setup(Some("2026-02-10"));
        generate_lessons(&conn, &draft(course, "2026-01-27", "08:00"), false).unwrap();
        let e = generate_lessons(&conn, &draft(course, "2026-01-13", "08:00"), true).unwrap_err();
        assert_eq!(e.code, "series_exists");
    }

    #[test]
    fn invalid_duration_rejected() {
        let (conn, course) = setup(Some("2026-02-10"));
        let mut l = draft(course, "2026-01-13", "08:00");
        l.duration = 0;
        assert_eq!(generate_lessons(&conn, &l, true).unwrap_err().code, "bad_params");
    }
}
