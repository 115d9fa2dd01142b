//! History reducer: pure derivations over task histories.
//!
//! Current state is recomputed on every read. Nothing here caches, because
//! every mutation is an append.

use serde::Serialize;

use crate::task::{Task, TaskVersion};

/// Latest entry with `deleted == false`, scanning from the end.
pub fn latest_non_deleted(history: &[TaskVersion]) -> Option<&TaskVersion> {
    history.iter().rev().find(|v| !v.deleted)
}

/// One version tagged with its owner and position.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub task_id: String,
    pub index: usize,
    #[serde(flatten)]
    pub version: TaskVersion,
}

/// Every version of every task, newest timestamp first. Equal timestamps put
/// the later write first.
pub fn flatten_and_sort<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Vec<HistoryEntry> {
    let mut out: Vec<HistoryEntry> = tasks
        .into_iter()
        .flat_map(|t| {
            t.history()
                .iter()
                .enumerate()
                .map(move |(index, v)| HistoryEntry {
                    task_id: t.id.clone(),
                    index,
                    version: v.clone(),
                })
        })
        .collect();

    out.sort_by(|a, b| {
        b.version
            .timestamp
            .cmp(&a.version.timestamp)
            .then_with(|| b.version.revision.cmp(&a.version.revision))
    });
    out
}
