//! Task model: an identity that owns an append-only history of versions.
//!
//! `TaskVersion` is what gets persisted; `TaskDraft` is what callers hand in;
//! `TaskSnapshot` is the derived "current task" view. The three never mix, so
//! a derived shape cannot leak back into storage.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, Result};
use crate::history::latest_non_deleted;

/// Subject tag. Unknown labels read back as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum Category {
    AiMl,
    QuantumComputing,
    Physics,
    Math,
    ContentCreation,
    Freelancing,
    Other,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::AiMl,
        Category::QuantumComputing,
        Category::Physics,
        Category::Math,
        Category::ContentCreation,
        Category::Freelancing,
        Category::Other,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::AiMl => "AI/ML",
            Category::QuantumComputing => "Quantum Computing",
            Category::Physics => "Physics",
            Category::Math => "Math",
            Category::ContentCreation => "Content Creation",
            Category::Freelancing => "Freelancing",
            Category::Other => "Other",
        }
    }

    pub fn from_label(label: &str) -> Self {
        let l = label.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(l))
            .unwrap_or(Category::Other)
    }
}

impl From<String> for Category {
    fn from(s: String) -> Self {
        Category::from_label(&s)
    }
}

impl From<Category> for &'static str {
    fn from(c: Category) -> Self {
        c.label()
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Eisenhower quadrant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    UrgentImportant,
    NotUrgentImportant,
    UrgentNotImportant,
    NotUrgentNotImportant,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::UrgentImportant => "urgent-important",
            Priority::NotUrgentImportant => "not-urgent-important",
            Priority::UrgentNotImportant => "urgent-not-important",
            Priority::NotUrgentNotImportant => "not-urgent-not-important",
        }
    }

    /// Human label shown on task cards.
    pub fn label(self) -> &'static str {
        match self {
            Priority::UrgentImportant => "Urgent & Important",
            Priority::NotUrgentImportant => "Important",
            Priority::UrgentNotImportant => "Urgent",
            Priority::NotUrgentNotImportant => "Normal",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = PlannerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "urgent-important" => Ok(Priority::UrgentImportant),
            "not-urgent-important" => Ok(Priority::NotUrgentImportant),
            "urgent-not-important" => Ok(Priority::UrgentNotImportant),
            "not-urgent-not-important" => Ok(Priority::NotUrgentNotImportant),
            other => Err(PlannerError::validation(format!("unknown priority '{other}'"))),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Focus ordinal, 1 (shallow) ..= 5 (deep).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct FocusLevel(u8);

impl FocusLevel {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(level: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&level) {
            Ok(Self(level))
        } else {
            Err(PlannerError::validation(format!(
                "focus level must be {}..={}, got {level}",
                Self::MIN,
                Self::MAX
            )))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Mapping for the older deep/medium/shallow vocabulary.
    pub fn from_legacy_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "deep" => Some(Self(5)),
            "medium" => Some(Self(3)),
            "shallow" => Some(Self(1)),
            _ => None,
        }
    }
}

impl Default for FocusLevel {
    fn default() -> Self {
        Self(3)
    }
}

impl TryFrom<u8> for FocusLevel {
    type Error = PlannerError;

    fn try_from(v: u8) -> Result<Self> {
        FocusLevel::new(v)
    }
}

impl From<FocusLevel> for u8 {
    fn from(f: FocusLevel) -> Self {
        f.0
    }
}

/// One immutable entry in a task's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskVersion {
    pub timestamp: DateTime<Utc>,

    /// Store-wide write counter; orders versions that share a timestamp.
    #[serde(default)]
    pub revision: u64,

    pub title: String,
    pub category: Category,
    pub description: Option<String>,
    pub estimated_minutes: Option<u32>,

    /// `None` means unscheduled.
    pub scheduled_date: Option<NaiveDate>,

    /// Time of day on `scheduled_date`. `None` means local midnight.
    #[serde(default, with = "crate::time::hhmm")]
    pub start_time: Option<NaiveTime>,

    pub priority: Priority,
    pub focus_level: FocusLevel,
    pub deleted: bool,
}

impl TaskVersion {
    pub(crate) fn from_draft(draft: TaskDraft, timestamp: DateTime<Utc>, revision: u64) -> Self {
        Self {
            timestamp,
            revision,
            title: draft.title,
            category: draft.category,
            description: draft.description,
            estimated_minutes: draft.estimated_minutes,
            scheduled_date: draft.scheduled_date,
            start_time: draft.start_time,
            priority: draft.priority,
            focus_level: draft.focus_level,
            deleted: false,
        }
    }

    /// Copy of this version marked deleted.
    pub(crate) fn tombstone(&self, timestamp: DateTime<Utc>, revision: u64) -> Self {
        Self {
            timestamp,
            revision,
            deleted: true,
            ..self.clone()
        }
    }

    /// Scheduling fields that decide the due instant.
    pub fn due_key(&self) -> (Option<NaiveDate>, Option<NaiveTime>) {
        (self.scheduled_date, self.start_time)
    }
}

/// Caller-supplied task data for create/update. Full replacement: nothing is
/// inherited from the prior version unless the caller copies it in.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDraft {
    pub title: String,
    pub category: Category,
    pub description: Option<String>,
    pub estimated_minutes: Option<u32>,
    pub scheduled_date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub priority: Priority,
    pub focus_level: FocusLevel,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            category: Category::Other,
            description: None,
            estimated_minutes: None,
            scheduled_date: None,
            start_time: None,
            priority: Priority::NotUrgentImportant,
            focus_level: FocusLevel::default(),
        }
    }

    /// Pre-populate a draft from an existing version (partial edits).
    pub fn from_version(v: &TaskVersion) -> Self {
        Self {
            title: v.title.clone(),
            category: v.category,
            description: v.description.clone(),
            estimated_minutes: v.estimated_minutes,
            scheduled_date: v.scheduled_date,
            start_time: v.start_time,
            priority: v.priority,
            focus_level: v.focus_level,
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_minutes(mut self, minutes: u32) -> Self {
        self.estimated_minutes = Some(minutes);
        self
    }

    pub fn scheduled_on(mut self, date: NaiveDate) -> Self {
        self.scheduled_date = Some(date);
        self
    }

    pub fn starting_at(mut self, time: NaiveTime) -> Self {
        self.start_time = Some(time);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_focus(mut self, focus: FocusLevel) -> Self {
        self.focus_level = focus;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(PlannerError::validation("title is required"));
        }
        Ok(())
    }
}

/// A stable identity plus its full history. The history is never reordered
/// or truncated, and its first entry is never a tombstone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: String,
    history: Vec<TaskVersion>,
}

impl Task {
    pub(crate) fn new(id: String, first: TaskVersion) -> Self {
        debug_assert!(!first.deleted);
        Self {
            id,
            history: vec![first],
        }
    }

    /// Rebuild from persisted parts; `None` when the history breaks the
    /// non-empty / live-first invariant.
    pub(crate) fn from_parts(id: String, history: Vec<TaskVersion>) -> Option<Self> {
        match history.first() {
            Some(first) if !first.deleted => Some(Self { id, history }),
            _ => None,
        }
    }

    pub fn history(&self) -> &[TaskVersion] {
        &self.history
    }

    pub(crate) fn append(&mut self, version: TaskVersion) {
        self.history.push(version);
    }

    /// Load-time only: legacy versions arrive without a revision.
    pub(crate) fn set_revision(&mut self, index: usize, revision: u64) {
        if let Some(v) = self.history.get_mut(index) {
            v.revision = revision;
        }
    }

    pub fn current(&self) -> Option<&TaskVersion> {
        latest_non_deleted(&self.history)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.history.last().map(|v| v.timestamp)
    }

    pub fn snapshot(&self) -> Option<TaskSnapshot> {
        self.current().map(|v| TaskSnapshot {
            id: self.id.clone(),
            version: v.clone(),
        })
    }
}

/// Derived current state of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub id: String,
    #[serde(flatten)]
    pub version: TaskVersion,
}
