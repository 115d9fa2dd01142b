//! tidemark-core: versioned task store, scheduling index and due-date
//! notifications for the Tidemark learning planner

pub mod alerts;
pub mod clock;
pub mod dashboard;
pub mod error;
pub mod export;
pub mod history;
pub mod ids;
mod migrate;
pub mod notify;
pub mod planner;
pub mod schedule;
pub mod storage;
pub mod store;
pub mod summary;
pub mod task;
pub mod time;

pub use alerts::{
    Alert, AlertHandle, AlertSink, ManualTimer, Permission, RecordingAlerts, Timer, TimerHandle,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use dashboard::Dashboard;
pub use error::{PlannerError, Result};
pub use export::{export_file_name, ExportFormat, ExportScope};
pub use history::HistoryEntry;
pub use ids::{IdSource, SequentialIds, UlidSource};
pub use migrate::SCHEMA_VERSION;
pub use notify::{LoopStatus, NotificationSettings, PollReport};
pub use planner::{Collaborators, Planner, PlannerConfig, StartupReport};
pub use schedule::{DateBuckets, DropTarget};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use store::{LoadReport, TaskStore};
pub use summary::{SummaryDraft, WeeklySummary};
pub use task::{Category, FocusLevel, Priority, Task, TaskDraft, TaskSnapshot, TaskVersion};
