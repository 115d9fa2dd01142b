//! Scheduling index: date buckets, week ranges, overdue checks and
//! drag-reschedule patches, all derived from current task snapshots.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use std::collections::BTreeMap;

use crate::task::{TaskDraft, TaskSnapshot, TaskVersion};
use crate::time::{day_key, local_date, local_midnight, start_of_week};

/// Timeline bounds for slot drops, as on the day view.
pub const TIMELINE_START_HOUR: u32 = 6;
pub const TIMELINE_END_HOUR: u32 = 22;
pub const SLOT_MINUTES: u32 = 15;

/// Current tasks grouped by `YYYY-MM-DD`, plus everything unscheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct DateBuckets {
    /// The local date the view is anchored on ("today" for the caller).
    pub reference: NaiveDate,
    pub by_date: BTreeMap<String, Vec<TaskSnapshot>>,
    pub unscheduled: Vec<TaskSnapshot>,
}

impl DateBuckets {
    pub fn today(&self) -> &[TaskSnapshot] {
        self.day(self.reference)
    }

    pub fn day(&self, date: NaiveDate) -> &[TaskSnapshot] {
        self.by_date
            .get(&day_key(date))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Buckets for every day in `[start, end]`, empty days included.
    pub fn range(&self, start: NaiveDate, end: NaiveDate) -> Vec<(NaiveDate, &[TaskSnapshot])> {
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .map(|d| (d, self.day(d)))
            .collect()
    }

    pub fn week(&self, reference: NaiveDate, week_start: Weekday) -> Vec<(NaiveDate, &[TaskSnapshot])> {
        let (start, end) = range_for_week(reference, week_start);
        self.range(start, end)
    }

    /// Tasks in buckets strictly before the reference date, oldest first.
    pub fn before_reference(&self) -> Vec<&TaskSnapshot> {
        let cutoff = day_key(self.reference);
        self.by_date
            .range(..cutoff)
            .flat_map(|(_, tasks)| tasks.iter())
            .collect()
    }

    pub fn scheduled_count(&self) -> usize {
        self.by_date.values().map(Vec::len).sum()
    }
}

/// Group current tasks by scheduled date. Within a day, untimed tasks come
/// first, then by start time; ties keep the input order.
pub fn bucket_by_date(current: &[TaskSnapshot], reference: NaiveDate) -> DateBuckets {
    let mut out = DateBuckets {
        reference,
        by_date: BTreeMap::new(),
        unscheduled: Vec::new(),
    };
    for t in current {
        match t.version.scheduled_date {
            Some(date) => out.by_date.entry(day_key(date)).or_default().push(t.clone()),
            None => out.unscheduled.push(t.clone()),
        }
    }
    for day in out.by_date.values_mut() {
        day.sort_by_key(|t| t.version.start_time);
    }
    out
}

/// Scheduled before today's local date. Deleted tasks have no snapshot, so
/// they never reach here.
pub fn is_overdue(version: &TaskVersion, now: DateTime<Utc>, zone: Tz) -> bool {
    match version.scheduled_date {
        Some(date) => local_midnight(date, zone) < local_midnight(local_date(now, zone), zone),
        None => false,
    }
}

/// Inclusive `[first, last]` day of the week containing `date`.
pub fn range_for_week(date: NaiveDate, week_start: Weekday) -> (NaiveDate, NaiveDate) {
    let start = start_of_week(date, week_start);
    (start, start + Duration::days(6))
}

/// Where a dragged task was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropTarget {
    Unscheduled,
    /// A day bucket; the prior time of day is kept.
    Day(NaiveDate),
    /// A time slot on the day timeline.
    Slot { date: NaiveDate, time: NaiveTime },
}

/// The full-replacement draft for dropping `current` onto `target`.
pub fn reschedule_patch(current: &TaskVersion, target: DropTarget) -> TaskDraft {
    let mut draft = TaskDraft::from_version(current);
    match target {
        DropTarget::Unscheduled => draft.scheduled_date = None,
        DropTarget::Day(date) => draft.scheduled_date = Some(date),
        DropTarget::Slot { date, time } => {
            draft.scheduled_date = Some(date);
            draft.start_time = Some(snap_to_slot(time));
        }
    }
    draft
}

/// Round to the nearest slot and clamp into the timeline window.
pub fn snap_to_slot(time: NaiveTime) -> NaiveTime {
    let minutes = time.hour() * 60 + time.minute();
    let snapped = ((minutes + SLOT_MINUTES / 2) / SLOT_MINUTES) * SLOT_MINUTES;
    let clamped = snapped.clamp(TIMELINE_START_HOUR * 60, TIMELINE_END_HOUR * 60);
    NaiveTime::from_hms_opt(clamped / 60, clamped % 60, 0).unwrap_or(NaiveTime::MIN)
}
