//! Decoding of persisted task blobs, including the pre-versioned formats.
//!
//! Older blobs are a bare JSON array of flat task objects (`estimatedTime`,
//! `date`, `startTime`, `focus` or `focusLevel`, `createdAt`/`updatedAt`), with
//! or without a `history` array. They are repaired entry by entry; only a
//! blob whose overall shape is wrong is rejected.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::{Map, Value};

use crate::task::{Category, FocusLevel, Priority, TaskVersion};
use crate::time::{parse_day_key, parse_time_of_day};

pub const SCHEMA_VERSION: u32 = 1;

/// Raw task entries pulled out of a blob, before per-entry repair.
#[derive(Debug)]
pub(crate) struct RawBlob {
    pub entries: Vec<Value>,
    /// True when the blob predates `schemaVersion`.
    pub legacy: bool,
}

/// Check the overall shape of a blob. `Err` carries the reason it must be
/// discarded.
pub(crate) fn decode_blob(bytes: &[u8]) -> Result<RawBlob, String> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| format!("not valid JSON: {e}"))?;
    match value {
        Value::Array(entries) => Ok(RawBlob {
            entries,
            legacy: true,
        }),
        Value::Object(mut obj) => {
            let version = match obj.get("schemaVersion") {
                None => None,
                Some(v) => Some(
                    v.as_u64()
                        .ok_or_else(|| "schemaVersion is not a number".to_string())?,
                ),
            };
            if let Some(v) = version {
                if v > u64::from(SCHEMA_VERSION) {
                    return Err(format!(
                        "schemaVersion {v} is newer than supported {SCHEMA_VERSION}"
                    ));
                }
            }
            match obj.remove("tasks") {
                Some(Value::Array(entries)) => Ok(RawBlob {
                    entries,
                    legacy: version.is_none(),
                }),
                Some(_) => Err("'tasks' is not an array".to_string()),
                None => Err("missing 'tasks' array".to_string()),
            }
        }
        _ => Err("expected an object or array at top level".to_string()),
    }
}

/// Outcome of repairing one task entry.
#[derive(Debug)]
pub(crate) struct RepairedEntry {
    pub id: Option<String>,
    pub history: Vec<TaskVersion>,
    /// Anything had to be migrated or defaulted.
    pub repaired: bool,
}

pub(crate) fn repair_entry(entry: &Value, now: DateTime<Utc>) -> Result<RepairedEntry, String> {
    let obj = entry
        .as_object()
        .ok_or_else(|| "task entry is not an object".to_string())?;

    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let mut repaired = false;
    let history = match obj.get("history") {
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match serde_json::from_value::<TaskVersion>(item.clone()) {
                    Ok(v) => out.push(v),
                    Err(_) => {
                        repaired = true;
                        let o = item
                            .as_object()
                            .ok_or_else(|| "history entry is not an object".to_string())?;
                        out.push(legacy_version(o, now)?);
                    }
                }
            }
            out
        }
        Some(_) => return Err("'history' is not an array".to_string()),
        None => {
            // Flat task object from before histories existed.
            repaired = true;
            vec![legacy_version(obj, now)?]
        }
    };

    if history.is_empty() {
        return Err("empty history".to_string());
    }

    Ok(RepairedEntry {
        id,
        history,
        repaired,
    })
}

/// Build a version from a loosely-shaped object.
pub(crate) fn legacy_version(obj: &Map<String, Value>, now: DateTime<Utc>) -> Result<TaskVersion, String> {
    let title = str_field(obj, &["title"])
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| "missing title".to_string())?;

    let category = str_field(obj, &["category"])
        .map(|c| Category::from_label(&c))
        .unwrap_or(Category::Other);

    let description = str_field(obj, &["description"]).filter(|d| !d.is_empty());

    let estimated_minutes = match field(obj, &["estimatedMinutes", "estimatedTime"]) {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_u64().and_then(|m| u32::try_from(m).ok()),
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => s.trim().parse::<u32>().ok(),
        Some(other) => return Err(format!("bad estimated time: {other}")),
    };

    let (scheduled_date, embedded_time) = match str_field(obj, &["scheduledDate", "date"]) {
        None => (None, None),
        Some(s) if s.trim().is_empty() => (None, None),
        Some(s) => parse_date_or_datetime(&s)?,
    };

    let start_time = match str_field(obj, &["startTime"]) {
        Some(s) if !s.trim().is_empty() => {
            Some(parse_time_of_day(&s).map_err(|e| e.to_string())?)
        }
        _ => embedded_time,
    };

    let priority = str_field(obj, &["priority"])
        .and_then(|p| p.parse::<Priority>().ok())
        .unwrap_or(Priority::NotUrgentImportant);

    let focus_level = legacy_focus(obj)?;

    let deleted = obj.get("deleted").and_then(Value::as_bool).unwrap_or(false);

    let timestamp = str_field(obj, &["timestamp", "updatedAt", "createdAt"])
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(now);

    Ok(TaskVersion {
        timestamp,
        revision: 0,
        title,
        category,
        description,
        estimated_minutes,
        scheduled_date,
        start_time,
        priority,
        focus_level,
        deleted,
    })
}

fn legacy_focus(obj: &Map<String, Value>) -> Result<FocusLevel, String> {
    match field(obj, &["focusLevel", "focus"]) {
        None | Some(Value::Null) => Ok(FocusLevel::default()),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u8::try_from(n).ok())
            .and_then(|n| FocusLevel::new(n).ok())
            .ok_or_else(|| format!("focus level {n} outside 1..=5")),
        Some(Value::String(s)) => {
            if let Ok(n) = s.trim().parse::<u8>() {
                return FocusLevel::new(n).map_err(|e| e.to_string());
            }
            FocusLevel::from_legacy_label(s).ok_or_else(|| format!("unknown focus label '{s}'"))
        }
        Some(other) => Err(format!("bad focus value: {other}")),
    }
}

/// `YYYY-MM-DD`, or a date-time such as `YYYY-MM-DDTHH:MM` from variants
/// that carried the time inside the date field.
fn parse_date_or_datetime(s: &str) -> Result<(Option<NaiveDate>, Option<NaiveTime>), String> {
    let s = s.trim();
    match s.split_once('T') {
        None => Ok((Some(parse_day_key(s).map_err(|e| e.to_string())?), None)),
        Some((date, time)) => {
            let date = parse_day_key(date).map_err(|e| e.to_string())?;
            let hhmm: String = time.chars().take(5).collect();
            let time = parse_time_of_day(&hhmm).map_err(|e| e.to_string())?;
            Ok((Some(date), Some(time)))
        }
    }
}

fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| obj.get(*n))
}

fn str_field(obj: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| obj.get(*n).and_then(Value::as_str))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn rejects_wrong_top_level_shapes() {
        assert!(decode_blob(b"not json").is_err());
        assert!(decode_blob(b"42").is_err());
        assert!(decode_blob(br#"{"schemaVersion": 1}"#).is_err());
        assert!(decode_blob(br#"{"schemaVersion": 1, "tasks": {}}"#).is_err());
        assert!(decode_blob(br#"{"schemaVersion": 99, "tasks": []}"#).is_err());
    }

    #[test]
    fn accepts_bare_array_as_legacy() {
        let blob = decode_blob(b"[{}, {}]").unwrap();
        assert!(blob.legacy);
        assert_eq!(blob.entries.len(), 2);

        let blob = decode_blob(br#"{"schemaVersion": 1, "tasks": []}"#).unwrap();
        assert!(!blob.legacy);
    }

    #[test]
    fn flat_legacy_task_becomes_single_entry_history() {
        let entry = json!({
            "id": "lx3abc12345",
            "title": "Read ch.3",
            "category": "Physics",
            "description": "",
            "estimatedTime": 45,
            "date": "2024-03-10",
            "startTime": "14:30",
            "priority": "not-urgent-important",
            "focusLevel": 3,
            "createdAt": "2024-03-01T08:00:00.000Z",
            "updatedAt": "2024-03-02T08:00:00.000Z"
        });
        let r = repair_entry(&entry, now()).unwrap();
        assert!(r.repaired);
        assert_eq!(r.id.as_deref(), Some("lx3abc12345"));
        assert_eq!(r.history.len(), 1);

        let v = &r.history[0];
        assert_eq!(v.category, Category::Physics);
        assert_eq!(v.description, None);
        assert_eq!(v.estimated_minutes, Some(45));
        assert_eq!(v.scheduled_date, Some(parse_day_key("2024-03-10").unwrap()));
        assert_eq!(v.start_time, Some(parse_time_of_day("14:30").unwrap()));
        assert_eq!(v.focus_level.get(), 3);
        assert_eq!(v.timestamp.to_rfc3339(), "2024-03-02T08:00:00+00:00");
        assert!(!v.deleted);
    }

    #[test]
    fn focus_labels_map_explicitly() {
        let deep = json!({"title": "x", "focus": "deep"});
        let v = legacy_version(deep.as_object().unwrap(), now()).unwrap();
        assert_eq!(v.focus_level.get(), 5);

        let bogus = json!({"title": "x", "focus": "frantic"});
        assert!(legacy_version(bogus.as_object().unwrap(), now()).is_err());

        let out_of_range = json!({"title": "x", "focusLevel": 9});
        assert!(legacy_version(out_of_range.as_object().unwrap(), now()).is_err());
    }

    #[test]
    fn datetime_in_date_field_splits_into_date_and_time() {
        let e = json!({"title": "x", "date": "2024-03-10T09:45"});
        let v = legacy_version(e.as_object().unwrap(), now()).unwrap();
        assert_eq!(v.scheduled_date, Some(parse_day_key("2024-03-10").unwrap()));
        assert_eq!(v.start_time, Some(parse_time_of_day("09:45").unwrap()));
    }

    #[test]
    fn missing_title_is_unrepairable() {
        let e = json!({"id": "a", "category": "Math"});
        assert!(repair_entry(&e, now()).is_err());
    }

    #[test]
    fn current_schema_history_parses_without_repair() {
        let e = json!({
            "id": "a",
            "history": [{
                "timestamp": "2024-03-01T10:00:00Z",
                "revision": 7,
                "title": "Read",
                "category": "Math",
                "description": null,
                "estimatedMinutes": null,
                "scheduledDate": null,
                "startTime": null,
                "priority": "urgent-important",
                "focusLevel": 2,
                "deleted": false
            }]
        });
        let r = repair_entry(&e, now()).unwrap();
        assert!(!r.repaired);
        assert_eq!(r.history[0].revision, 7);
    }
}
