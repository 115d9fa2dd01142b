//! Weekly reflection log.
//!
//! Summaries are append-only and persisted as one blob, with the same load
//! and write-failure rules as the task store.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::rc::Rc;
use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::error::{PlannerError, Result};
use crate::ids::IdSource;
use crate::migrate::SCHEMA_VERSION;
use crate::storage::KeyValueStore;

pub const SUMMARIES_KEY: &str = "learningSummaries";

/// ISO-8601 week of a date, as `(iso_year, week)`.
pub fn iso_week(date: NaiveDate) -> (i32, u32) {
    let w = date.iso_week();
    (w.year(), w.week())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklySummary {
    pub id: String,
    pub week: u32,
    pub year: i32,
    #[serde(default)]
    pub went_well: String,
    #[serde(default)]
    pub blockers: String,
    #[serde(default)]
    pub next_steps: String,
    pub created_at: DateTime<Utc>,
}

/// What the caller fills in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryDraft {
    pub went_well: String,
    pub blockers: String,
    pub next_steps: String,
}

impl SummaryDraft {
    pub fn validate(&self) -> Result<()> {
        if [&self.went_well, &self.blockers, &self.next_steps]
            .iter()
            .all(|s| s.trim().is_empty())
        {
            return Err(PlannerError::validation("summary is empty"));
        }
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredSummaries<'a> {
    schema_version: u32,
    summaries: &'a [WeeklySummary],
}

pub struct SummaryLog {
    entries: Vec<WeeklySummary>,
    storage: Rc<dyn KeyValueStore>,
    clock: Rc<dyn Clock>,
    ids: Rc<dyn IdSource>,
}

impl SummaryLog {
    pub fn new(storage: Rc<dyn KeyValueStore>, clock: Rc<dyn Clock>, ids: Rc<dyn IdSource>) -> Self {
        Self {
            entries: Vec::new(),
            storage,
            clock,
            ids,
        }
    }

    /// Load the log. Entries that do not parse are dropped; a blob with the
    /// wrong shape resets to empty and is returned alongside.
    pub fn load(
        storage: Rc<dyn KeyValueStore>,
        clock: Rc<dyn Clock>,
        ids: Rc<dyn IdSource>,
    ) -> Result<(Self, Option<PlannerError>)> {
        let mut log = Self::new(storage, clock, ids);
        let bytes = log
            .storage
            .get(SUMMARIES_KEY)
            .map_err(|e| PlannerError::storage(SUMMARIES_KEY, e))?;
        let Some(bytes) = bytes else {
            return Ok((log, None));
        };

        let raw = match decode(&bytes) {
            Ok(raw) => raw,
            Err(reason) => {
                error!(key = SUMMARIES_KEY, %reason, "persisted summaries are malformed; starting empty");
                return Ok((log, Some(PlannerError::malformed(SUMMARIES_KEY, reason))));
            }
        };
        for (pos, item) in raw.into_iter().enumerate() {
            match serde_json::from_value::<WeeklySummary>(item) {
                Ok(s) => log.entries.push(s),
                Err(e) => warn!(entry = pos, error = %e, "dropping unreadable summary"),
            }
        }
        debug!(loaded = log.entries.len(), "summaries loaded");
        Ok((log, None))
    }

    /// Append a summary for the ISO week containing `reference`.
    pub fn save(&mut self, reference: NaiveDate, draft: SummaryDraft) -> Result<WeeklySummary> {
        draft.validate()?;
        let (year, week) = iso_week(reference);
        let summary = WeeklySummary {
            id: self.ids.new_id(),
            week,
            year,
            went_well: draft.went_well,
            blockers: draft.blockers,
            next_steps: draft.next_steps,
            created_at: self.clock.now(),
        };
        debug!(summary_id = %summary.id, year, week, "weekly summary saved");
        self.entries.push(summary.clone());
        self.persist()?;
        Ok(summary)
    }

    pub fn all(&self) -> &[WeeklySummary] {
        &self.entries
    }

    pub fn for_week(&self, year: i32, week: u32) -> Vec<&WeeklySummary> {
        self.entries
            .iter()
            .filter(|s| s.year == year && s.week == week)
            .collect()
    }

    fn persist(&self) -> Result<()> {
        let bytes = serde_json::to_vec(&StoredSummaries {
            schema_version: SCHEMA_VERSION,
            summaries: &self.entries,
        })?;
        self.storage.set(SUMMARIES_KEY, &bytes).map_err(|e| {
            error!(key = SUMMARIES_KEY, error = %e, "persisting summaries failed");
            PlannerError::storage(SUMMARIES_KEY, e)
        })
    }
}

fn decode(bytes: &[u8]) -> std::result::Result<Vec<Value>, String> {
    match serde_json::from_slice::<Value>(bytes).map_err(|e| format!("not valid JSON: {e}"))? {
        Value::Array(items) => Ok(items),
        Value::Object(mut obj) => {
            let version = obj.get("schemaVersion").and_then(Value::as_u64).unwrap_or(0);
            if version > u64::from(SCHEMA_VERSION) {
                return Err(format!("schemaVersion {version} is newer than supported"));
            }
            match obj.remove("summaries") {
                Some(Value::Array(items)) => Ok(items),
                _ => Err("missing 'summaries' array".to_string()),
            }
        }
        _ => Err("expected an object or array at top level".to_string()),
    }
}
