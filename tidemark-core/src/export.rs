//! Export serializer: a structured JSON document and RFC 4180 CSV.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use csv::{QuoteStyle, Terminator, WriterBuilder};
use serde::Serialize;

use crate::error::{PlannerError, Result};
use crate::history::HistoryEntry;
use crate::migrate::SCHEMA_VERSION;
use crate::task::{TaskSnapshot, TaskVersion};
use crate::time::{day_key, format_time_of_day};

pub const CSV_HEADER: [&str; 13] = [
    "ID",
    "History Index",
    "Revision",
    "Timestamp",
    "Title",
    "Category",
    "Description",
    "Estimated Minutes",
    "Scheduled Date",
    "Start Time",
    "Priority",
    "Focus Level",
    "Deleted",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportScope {
    /// Current state of every live task.
    Current,
    /// Every version of every task, tombstones included.
    History,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

/// The rows to export, borrowed from a store read.
#[derive(Debug, Clone, Copy)]
pub enum ExportEntries<'a> {
    Current(&'a [TaskSnapshot]),
    History(&'a [HistoryEntry]),
}

impl ExportEntries<'_> {
    pub fn scope(&self) -> ExportScope {
        match self {
            ExportEntries::Current(_) => ExportScope::Current,
            ExportEntries::History(_) => ExportScope::History,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ExportEntries::Current(e) => e.len(),
            ExportEntries::History(e) => e.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn rows(&self) -> Vec<(&str, Option<usize>, &TaskVersion)> {
        match self {
            ExportEntries::Current(e) => e.iter().map(|t| (t.id.as_str(), None, &t.version)).collect(),
            ExportEntries::History(e) => e
                .iter()
                .map(|h| (h.task_id.as_str(), Some(h.index), &h.version))
                .collect(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportDocument<'a, T: Serialize> {
    schema_version: u32,
    exported_at: DateTime<Utc>,
    scope: ExportScope,
    entries: &'a [T],
}

/// `learning-tasks-YYYY-MM-DD.<ext>`
pub fn export_file_name(format: ExportFormat, date: NaiveDate) -> String {
    format!("learning-tasks-{}.{}", day_key(date), format.extension())
}

/// Pretty-printed JSON. Every version field is present, unset optionals as
/// `null`.
pub fn export_structured(entries: ExportEntries<'_>, exported_at: DateTime<Utc>) -> Result<String> {
    let scope = entries.scope();
    let out = match entries {
        ExportEntries::Current(e) => serde_json::to_string_pretty(&ExportDocument {
            schema_version: SCHEMA_VERSION,
            exported_at,
            scope,
            entries: e,
        }),
        ExportEntries::History(e) => serde_json::to_string_pretty(&ExportDocument {
            schema_version: SCHEMA_VERSION,
            exported_at,
            scope,
            entries: e,
        }),
    };
    Ok(out?)
}

/// One header row plus one row per entry. Fields containing the delimiter,
/// a quote or a line break are quoted with inner quotes doubled.
pub fn export_delimited(entries: ExportEntries<'_>) -> Result<String> {
    let mut w = WriterBuilder::new()
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::CRLF)
        .from_writer(Vec::new());

    w.write_record(CSV_HEADER)?;
    for (id, index, v) in entries.rows() {
        w.write_record(record(id, index, v))?;
    }

    let bytes = w
        .into_inner()
        .map_err(|e| PlannerError::Serialization(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| PlannerError::Serialization(e.to_string()))
}

fn record(id: &str, index: Option<usize>, v: &TaskVersion) -> [String; 13] {
    [
        id.to_string(),
        index.map(|i| i.to_string()).unwrap_or_default(),
        v.revision.to_string(),
        v.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        v.title.clone(),
        v.category.label().to_string(),
        v.description.clone().unwrap_or_default(),
        v.estimated_minutes.map(|m| m.to_string()).unwrap_or_default(),
        v.scheduled_date.map(day_key).unwrap_or_default(),
        v.start_time.map(format_time_of_day).unwrap_or_default(),
        v.priority.as_str().to_string(),
        v.focus_level.get().to_string(),
        v.deleted.to_string(),
    ]
}
