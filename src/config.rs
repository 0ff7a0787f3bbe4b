use crate::calc::AggregationMode;
use crate::db;
use crate::dates::normalize_time;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupSection {
    Lessons,
    Grading,
}

impl SetupSection {
    pub const ALL: [SetupSection; 2] = [SetupSection::Lessons, SetupSection::Grading];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lessons" => Some(Self::Lessons),
            "grading" => Some(Self::Grading),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Lessons => "lessons",
            Self::Grading => "grading",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Lessons => "setup.lessons",
            Self::Grading => "setup.grading",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Lessons => json!({
            "defaultDurationUnits": 1,
            "defaultTime": "08:00"
        }),
        SetupSection::Grading => json!({
            "aggregation": "rollUp"
        }),
    }
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

/// Validates every field of `patch` and writes it into `current`.
/// Unknown fields are rejected.
pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Lessons => match k.as_str() {
                "defaultDurationUnits" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 8)?));
                }
                "defaultTime" => {
                    let raw = v.as_str().ok_or_else(|| format!("{} must be string", k))?;
                    let t = normalize_time(raw).map_err(|e| format!("{}: {}", k, e.message))?;
                    obj.insert(k.clone(), Value::String(t));
                }
                _ => return Err(format!("unknown lessons field: {}", k)),
            },
            SetupSection::Grading => match k.as_str() {
                "aggregation" => {
                    let raw = v.as_str().ok_or_else(|| format!("{} must be string", k))?;
                    let mode = AggregationMode::parse(raw)
                        .ok_or_else(|| "aggregation must be one of: rollUp, rootOnly".to_string())?;
                    obj.insert(k.clone(), Value::String(mode.as_str().to_string()));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
        }
    }
    Ok(())
}

/// Defaults with the stored section merged on top.
pub fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Stored fields that no longer validate fall back to defaults.
            if let Err(msg) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.name(), %msg, "ignoring invalid stored setup");
            }
        }
    }
    Ok(current)
}

pub fn update_section(
    conn: &Connection,
    section: SetupSection,
    patch: &Map<String, Value>,
) -> anyhow::Result<Result<Value, String>> {
    let mut current = load_section(conn, section)?;
    if let Err(msg) = merge_section_patch(section, &mut current, patch) {
        return Ok(Err(msg));
    }
    db::settings_set_json(conn, section.key(), &current)?;
    Ok(Ok(current))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonDefaults {
    pub duration_units: i64,
    pub time: String,
}

pub fn lesson_defaults(conn: &Connection) -> anyhow::Result<LessonDefaults> {
    let v = load_section(conn, SetupSection::Lessons)?;
    Ok(LessonDefaults {
        duration_units: v
            .get("defaultDurationUnits")
            .and_then(|x| x.as_i64())
            .unwrap_or(1),
        time: v
            .get("defaultTime")
            .and_then(|x| x.as_str())
            .unwrap_or("08:00")
            .to_string(),
    })
}

pub fn aggregation_mode(conn: &Connection) -> anyhow::Result<AggregationMode> {
    let v = load_section(conn, SetupSection::Grading)?;
    Ok(v.get("aggregation")
        .and_then(|x| x.as_str())
        .and_then(AggregationMode::parse)
        .unwrap_or_default())
}
