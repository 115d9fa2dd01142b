//! Dashboard aggregates over current tasks

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::task::{Category, FocusLevel, TaskSnapshot};
use crate::time::local_date;

/// How many upcoming tasks the dashboard lists by default
pub const UPCOMING_LIMIT: usize = 5;

/// Everything the dashboard shows, computed in one pass over current state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub total_tasks: usize,
    pub minutes_per_category: Vec<(Category, u32)>,
    /// Index 0 is focus level 1
    pub focus_distribution: [u32; 5],
    pub upcoming: Vec<TaskSnapshot>,
}

impl Dashboard {
    pub fn build(current: &[TaskSnapshot], now: DateTime<Utc>, zone: Tz) -> Self {
        Self {
            total_tasks: current.len(),
            minutes_per_category: minutes_per_category(current),
            focus_distribution: focus_distribution(current),
            upcoming: upcoming(current, now, zone, UPCOMING_LIMIT),
        }
    }

    pub fn total_minutes(&self) -> u32 {
        self.minutes_per_category.iter().map(|(_, m)| m).sum()
    }
}

/// Estimated minutes per category, every category present
pub fn minutes_per_category(current: &[TaskSnapshot]) -> Vec<(Category, u32)> {
    Category::ALL
        .into_iter()
        .map(|c| {
            let total = current
                .iter()
                .filter(|t| t.version.category == c)
                .filter_map(|t| t.version.estimated_minutes)
                .fold(0u32, u32::saturating_add);
            (c, total)
        })
        .collect()
}

pub fn focus_distribution(current: &[TaskSnapshot]) -> [u32; 5] {
    let mut out = [0u32; 5];
    for t in current {
        let level = t.version.focus_level.get();
        out[usize::from(level - FocusLevel::MIN)] += 1;
    }
    out
}

/// Tasks scheduled today or later, soonest first
pub fn upcoming(current: &[TaskSnapshot], now: DateTime<Utc>, zone: Tz, limit: usize) -> Vec<TaskSnapshot> {
    let today = local_date(now, zone);
    let mut out: Vec<TaskSnapshot> = current
        .iter()
        .filter(|t| t.version.scheduled_date.is_some_and(|d| d >= today))
        .cloned()
        .collect();
    out.sort_by_key(|t| t.version.due_key());
    out.truncate(limit);
    out
}
