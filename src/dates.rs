use crate::error::{CoreError, CoreResult};
use chrono::{NaiveDate, NaiveTime};
use serde_json::json;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn parse_date(raw: &str) -> CoreResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|_| {
        CoreError::bad_params("date must be YYYY-MM-DD").with_details(json!({ "value": raw }))
    })
}

pub fn format_date(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

/// Rows are written by this crate only, so a bad value means a corrupted
/// workspace; surface it as a conversion failure instead of panicking.
pub fn date_from_row(raw: &str, idx: usize) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Canonical `HH:MM` form of a time-of-day.
///
/// Accepts `H:MM`, `HH:MM` and `HH:MM:SS` (seconds are dropped), so that
/// `8:05`, `08:05` and `08:05:00` all name the same slot.
pub fn normalize_time(raw: &str) -> CoreResult<String> {
    let bad = || {
        CoreError::bad_params("time must be HH:MM").with_details(json!({ "value": raw }))
    };
    let parts: Vec<&str> = raw.trim().split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(bad());
    }
    let mut nums = [0u32; 3];
    for (i, p) in parts.iter().enumerate() {
        if p.is_empty() || p.len() > 2 || !p.chars().all(|c| c.is_ascii_digit()) {
            return Err(bad());
        }
        nums[i] = p.parse().map_err(|_| bad())?;
    }
    let t = NaiveTime::from_hms_opt(nums[0], nums[1], nums[2]).ok_or_else(bad)?;
    Ok(t.format("%H:%M").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_time_pads_and_drops_seconds() {
        assert_eq!(normalize_time("8:05").unwrap(), "08:05");
        assert_eq!(normalize_time("08:05").unwrap(), "08:05");
        assert_eq!(normalize_time(" 08:05:00 ").unwrap(), "08:05");
        assert_eq!(normalize_time("23:59").unwrap(), "23:59");
    }

    #[test]
    fn normalize_time_rejects_garbage() {
        for raw in ["", "8", "24:00", "12:60", "ab:cd", "1:2:3:4", "123:00", "-1:30"] {
            let e = normalize_time(raw).unwrap_err();
            assert_eq!(e.code, "bad_params", "input {:?}", raw);
        }
    }

    #[test]
    fn parse_date_roundtrips_iso() {
        let d = parse_date("2026-02-28").unwrap();
        assert_eq!(format_date(d), "2026-02-28");
        assert!(parse_date("28.02.2026").is_err());
        assert!(parse_date("2026-02-30").is_err());
    }
}
