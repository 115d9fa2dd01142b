//! Task store: the versioned, append-only task collection.
//!
//! Mutations only ever append a version. After every mutation the whole
//! collection is written back as one blob; a failed write surfaces as
//! `PlannerError::Storage` but the in-memory append stands.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::error::{PlannerError, Result};
use crate::history::{flatten_and_sort, HistoryEntry};
use crate::ids::IdSource;
use crate::migrate::{decode_blob, repair_entry, SCHEMA_VERSION};
use crate::storage::KeyValueStore;
use crate::task::{Task, TaskDraft, TaskSnapshot, TaskVersion};

pub const TASKS_KEY: &str = "learningTasks";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredTasks<'a> {
    schema_version: u32,
    tasks: &'a [Task],
}

/// What happened while loading the persisted blob.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: usize,
    /// Entries migrated from an older shape or with defaulted fields.
    pub repaired: usize,
    /// Entries that arrived without a usable id and got a fresh one.
    pub assigned_ids: usize,
    /// Entries that could not be repaired at all.
    pub dropped: usize,
    /// Set when the whole blob was discarded and the store started empty.
    pub reset: Option<PlannerError>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.repaired == 0 && self.assigned_ids == 0 && self.dropped == 0 && self.reset.is_none()
    }
}

pub struct TaskStore {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
    next_revision: u64,
    storage: Rc<dyn KeyValueStore>,
    clock: Rc<dyn Clock>,
    ids: Rc<dyn IdSource>,
}

impl TaskStore {
    /// Empty store that persists under `TASKS_KEY`. Nothing is read.
    pub fn new(storage: Rc<dyn KeyValueStore>, clock: Rc<dyn Clock>, ids: Rc<dyn IdSource>) -> Self {
        Self {
            tasks: Vec::new(),
            index: HashMap::new(),
            next_revision: 1,
            storage,
            clock,
            ids,
        }
    }

    /// Load the persisted collection, repairing what can be repaired.
    ///
    /// Only a failed read is an error. A blob with the wrong overall shape
    /// resets to an empty store and is reported in `LoadReport::reset`; the
    /// stored bytes stay untouched until the next mutation.
    pub fn load(
        storage: Rc<dyn KeyValueStore>,
        clock: Rc<dyn Clock>,
        ids: Rc<dyn IdSource>,
    ) -> Result<(Self, LoadReport)> {
        let mut store = Self::new(storage, clock, ids);
        let mut report = LoadReport::default();

        let bytes = store
            .storage
            .get(TASKS_KEY)
            .map_err(|e| PlannerError::storage(TASKS_KEY, e))?;
        let Some(bytes) = bytes else {
            return Ok((store, report));
        };

        let blob = match decode_blob(&bytes) {
            Ok(b) => b,
            Err(reason) => {
                error!(key = TASKS_KEY, %reason, "persisted tasks are malformed; starting empty");
                report.reset = Some(PlannerError::malformed(TASKS_KEY, reason));
                return Ok((store, report));
            }
        };
        if blob.legacy {
            debug!(entries = blob.entries.len(), "migrating pre-versioned task blob");
        }

        let now = store.clock.now();
        let mut unrevisioned: Vec<(usize, usize)> = Vec::new();

        for (pos, entry) in blob.entries.iter().enumerate() {
            let repaired = match repair_entry(entry, now) {
                Ok(r) => r,
                Err(reason) => {
                    warn!(entry = pos, %reason, "dropping unrepairable task entry");
                    report.dropped += 1;
                    continue;
                }
            };

            let id = match repaired.id {
                Some(id) if !store.index.contains_key(&id) => id,
                other => {
                    let fresh = store.ids.new_id();
                    warn!(entry = pos, old = ?other, new = %fresh, "assigning fresh task id");
                    report.assigned_ids += 1;
                    fresh
                }
            };

            let Some(task) = Task::from_parts(id, repaired.history) else {
                warn!(entry = pos, "dropping task whose history starts with a tombstone");
                report.dropped += 1;
                continue;
            };

            if repaired.repaired {
                report.repaired += 1;
            }

            let slot = store.tasks.len();
            for (i, v) in task.history().iter().enumerate() {
                if v.revision == 0 {
                    unrevisioned.push((slot, i));
                } else {
                    store.next_revision = store.next_revision.max(v.revision + 1);
                }
            }
            store.index.insert(task.id.clone(), slot);
            store.tasks.push(task);
        }

        // Legacy versions get revisions in load order, after any existing ones.
        for (slot, i) in unrevisioned {
            let rev = store.next_revision;
            store.next_revision += 1;
            store.tasks[slot].set_revision(i, rev);
        }

        report.loaded = store.tasks.len();
        debug!(
            loaded = report.loaded,
            repaired = report.repaired,
            dropped = report.dropped,
            "task store loaded"
        );
        Ok((store, report))
    }

    pub fn create_task(&mut self, draft: TaskDraft) -> Result<String> {
        draft.validate()?;
        let id = self.ids.new_id();
        let version = TaskVersion::from_draft(draft, self.clock.now(), self.bump_revision());
        debug!(task_id = %id, revision = version.revision, "task created");

        self.index.insert(id.clone(), self.tasks.len());
        self.tasks.push(Task::new(id.clone(), version));
        self.persist().map_err(|e| e.with_task_id(&id))?;
        Ok(id)
    }

    /// Append a full-replacement version. Fails with `NotFound` when the id
    /// is unknown or the task has been deleted.
    pub fn update_task(&mut self, id: &str, draft: TaskDraft) -> Result<()> {
        draft.validate()?;
        let slot = self.live_slot(id)?;
        let timestamp = self.stamp(slot);
        let version = TaskVersion::from_draft(draft, timestamp, self.bump_revision());
        debug!(task_id = %id, revision = version.revision, "task updated");

        self.tasks[slot].append(version);
        self.persist()
    }

    /// Append a tombstone. Deleting an already-deleted task is a no-op; an
    /// unknown id is `NotFound`.
    pub fn delete_task(&mut self, id: &str) -> Result<()> {
        let slot = *self
            .index
            .get(id)
            .ok_or_else(|| PlannerError::NotFound(id.to_string()))?;
        let Some(current) = self.tasks[slot].current().cloned() else {
            debug!(task_id = %id, "delete on already-deleted task ignored");
            return Ok(());
        };

        let timestamp = self.stamp(slot);
        let tombstone = current.tombstone(timestamp, self.bump_revision());
        debug!(task_id = %id, revision = tombstone.revision, "task deleted");

        self.tasks[slot].append(tombstone);
        self.persist()
    }

    pub fn get_current(&self, id: &str) -> Option<TaskSnapshot> {
        self.task(id).and_then(Task::snapshot)
    }

    /// Current snapshot of every live task, in creation order.
    pub fn list_current(&self) -> Vec<TaskSnapshot> {
        self.tasks.iter().filter_map(Task::snapshot).collect()
    }

    pub fn list_history(&self) -> Vec<HistoryEntry> {
        flatten_and_sort(&self.tasks)
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn live_slot(&self, id: &str) -> Result<usize> {
        match self.index.get(id) {
            Some(&slot) if self.tasks[slot].current().is_some() => Ok(slot),
            _ => Err(PlannerError::NotFound(id.to_string())),
        }
    }

    /// Clock reading, never earlier than the task's last version.
    fn stamp(&self, slot: usize) -> DateTime<Utc> {
        let now = self.clock.now();
        match self.tasks[slot].last_timestamp() {
            Some(last) if last > now => last,
            _ => now,
        }
    }

    fn bump_revision(&mut self) -> u64 {
        let r = self.next_revision;
        self.next_revision += 1;
        r
    }

    fn persist(&self) -> Result<()> {
        let blob = StoredTasks {
            schema_version: SCHEMA_VERSION,
            tasks: &self.tasks,
        };
        let bytes = serde_json::to_vec(&blob)?;
        self.storage.set(TASKS_KEY, &bytes).map_err(|e| {
            error!(key = TASKS_KEY, error = %e, "persisting tasks failed; in-memory state kept");
            PlannerError::storage(TASKS_KEY, e)
        })
    }
}
