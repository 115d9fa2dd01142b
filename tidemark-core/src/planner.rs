//! Planner facade: the one object a host builds at startup.
//!
//! It owns the task store, the notifier and its loop, and the summary log,
//! and keeps them consistent (a due-time change re-arms notifications).

use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

use crate::alerts::{AlertSink, Timer};
use crate::clock::Clock;
use crate::dashboard::Dashboard;
use crate::error::{PlannerError, Result};
use crate::export::{export_delimited, export_structured, ExportEntries, ExportScope};
use crate::history::HistoryEntry;
use crate::ids::IdSource;
use crate::notify::{InteractHandler, LoopStatus, NotificationLoop, NotificationSettings, Notifier, PollReport};
use crate::schedule::{self, DateBuckets, DropTarget};
use crate::storage::KeyValueStore;
use crate::store::{LoadReport, TaskStore};
use crate::summary::{SummaryDraft, SummaryLog, WeeklySummary};
use crate::task::{TaskDraft, TaskSnapshot, TaskVersion};
use crate::time::local_date;

type DueKey = Option<(Option<NaiveDate>, Option<NaiveTime>)>;

/// Host collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Rc<dyn KeyValueStore>,
    pub clock: Rc<dyn Clock>,
    pub ids: Rc<dyn IdSource>,
    pub alerts: Rc<dyn AlertSink>,
    pub timer: Rc<dyn Timer>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannerConfig {
    /// The zone "local" dates are computed in.
    pub zone: Tz,
    pub week_start: Weekday,
    /// Used until settings have been persisted once.
    pub notifications: NotificationSettings,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            zone: chrono_tz::UTC,
            week_start: Weekday::Mon,
            notifications: NotificationSettings::default(),
        }
    }
}

/// Load problems across every persisted blob.
#[derive(Debug, Default)]
pub struct StartupReport {
    pub tasks: LoadReport,
    pub notifications: Option<PlannerError>,
    pub summaries: Option<PlannerError>,
}

impl StartupReport {
    pub fn is_clean(&self) -> bool {
        self.tasks.is_clean() && self.notifications.is_none() && self.summaries.is_none()
    }
}

pub struct Planner {
    store: Rc<RefCell<TaskStore>>,
    notifier: Rc<RefCell<Notifier>>,
    notifications: NotificationLoop,
    summaries: SummaryLog,
    clock: Rc<dyn Clock>,
    config: PlannerConfig,
}

impl Planner {
    /// Load all persisted state. The notification loop is not started.
    pub fn open(c: Collaborators, config: PlannerConfig) -> Result<(Self, StartupReport)> {
        let (store, tasks) = TaskStore::load(c.storage.clone(), c.clock.clone(), c.ids.clone())?;
        let (notifier, notifications) = Notifier::load(c.storage.clone(), config.zone, config.notifications)?;
        let (summaries, summary_problem) = SummaryLog::load(c.storage, c.clock.clone(), c.ids)?;

        let store = Rc::new(RefCell::new(store));
        let notifier = Rc::new(RefCell::new(notifier));
        let loop_ = NotificationLoop::new(notifier.clone(), store.clone(), c.clock.clone(), c.alerts, c.timer);

        let planner = Self {
            store,
            notifier,
            notifications: loop_,
            summaries,
            clock: c.clock,
            config,
        };
        let report = StartupReport {
            tasks,
            notifications,
            summaries: summary_problem,
        };
        Ok((planner, report))
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        local_date(self.clock.now(), self.config.zone)
    }

    // Task store

    pub fn create_task(&mut self, draft: TaskDraft) -> Result<String> {
        self.store.borrow_mut().create_task(draft)
    }

    /// Full replacement. A changed due time re-arms the task's notification,
    /// even when the write itself failed.
    pub fn update_task(&mut self, id: &str, draft: TaskDraft) -> Result<()> {
        let before = self.due_key(id);
        let result = self.store.borrow_mut().update_task(id, draft);
        self.rearm_if_moved(id, before, result)
    }

    pub fn delete_task(&mut self, id: &str) -> Result<()> {
        let before = self.due_key(id);
        let result = self.store.borrow_mut().delete_task(id);
        self.rearm_if_moved(id, before, result)
    }

    pub fn get_current(&self, id: &str) -> Option<TaskSnapshot> {
        self.store.borrow().get_current(id)
    }

    pub fn list_current(&self) -> Vec<TaskSnapshot> {
        self.store.borrow().list_current()
    }

    pub fn list_history(&self) -> Vec<HistoryEntry> {
        self.store.borrow().list_history()
    }

    /// Every version of one task, oldest first, tombstones included.
    pub fn history_of(&self, id: &str) -> Option<Vec<TaskVersion>> {
        self.store.borrow().task(id).map(|t| t.history().to_vec())
    }

    // Scheduling index

    pub fn bucket_by_date(&self, reference: NaiveDate) -> DateBuckets {
        schedule::bucket_by_date(&self.list_current(), reference)
    }

    pub fn is_overdue(&self, task: &TaskSnapshot, now: DateTime<Utc>) -> bool {
        schedule::is_overdue(&task.version, now, self.config.zone)
    }

    /// Current tasks scheduled before today, oldest first.
    pub fn overdue(&self) -> Vec<TaskSnapshot> {
        let buckets = self.bucket_by_date(self.today());
        buckets.before_reference().into_iter().cloned().collect()
    }

    pub fn range_for_week(&self, date: NaiveDate) -> (NaiveDate, NaiveDate) {
        schedule::range_for_week(date, self.config.week_start)
    }

    /// Apply a drag-and-drop: build the patch from the current version and
    /// update through the normal path.
    pub fn move_task(&mut self, id: &str, target: DropTarget) -> Result<()> {
        let current = self
            .get_current(id)
            .ok_or_else(|| PlannerError::NotFound(id.to_string()))?;
        let draft = schedule::reschedule_patch(&current.version, target);
        self.update_task(id, draft)
    }

    // Export

    pub fn export_structured(&self, scope: ExportScope) -> Result<String> {
        let now = self.clock.now();
        let store = self.store.borrow();
        match scope {
            ExportScope::Current => {
                let current = store.list_current();
                export_structured(ExportEntries::Current(&current), now)
            }
            ExportScope::History => {
                let history = store.list_history();
                export_structured(ExportEntries::History(&history), now)
            }
        }
    }

    pub fn export_delimited(&self, scope: ExportScope) -> Result<String> {
        let store = self.store.borrow();
        match scope {
            ExportScope::Current => {
                let current = store.list_current();
                export_delimited(ExportEntries::Current(&current))
            }
            ExportScope::History => {
                let history = store.list_history();
                export_delimited(ExportEntries::History(&history))
            }
        }
    }

    // Notifications

    pub fn notification_settings(&self) -> NotificationSettings {
        self.notifier.borrow().settings()
    }

    /// Validate and persist new settings. A running loop restarts to pick
    /// them up (or stops, if notifications were disabled).
    pub fn configure_notifications(&mut self, settings: NotificationSettings) -> Result<()> {
        let result = self.notifier.borrow_mut().configure(settings);
        if matches!(&result, Err(e) if !e.is_storage()) {
            return result;
        }
        if self.notifications.is_running() {
            let status = self.notifications.restart();
            debug!(?status, "notification loop restarted after settings change");
        }
        result
    }

    pub fn start_notifications(&self) -> LoopStatus {
        self.notifications.start()
    }

    pub fn stop_notifications(&self) {
        self.notifications.stop();
    }

    pub fn notifications_running(&self) -> bool {
        self.notifications.is_running()
    }

    /// One check-and-fire pass right now.
    pub fn poll_notifications(&self) -> PollReport {
        self.notifications.tick()
    }

    pub fn on_alert_interact(&self, handler: InteractHandler) {
        self.notifications.set_interact_handler(handler);
    }

    pub fn notified_task_ids(&self) -> Vec<String> {
        self.notifier.borrow().notified_ids().map(str::to_string).collect()
    }

    /// The host regained focus: run the daily sweep.
    pub fn on_focus(&mut self) -> Result<usize> {
        let current = self.list_current();
        self.notifier.borrow_mut().daily_sweep(&current, self.clock.now())
    }

    // Dashboard and summaries

    pub fn dashboard(&self) -> Dashboard {
        Dashboard::build(&self.list_current(), self.clock.now(), self.config.zone)
    }

    pub fn save_summary(&mut self, reference: NaiveDate, draft: SummaryDraft) -> Result<WeeklySummary> {
        self.summaries.save(reference, draft)
    }

    pub fn summaries(&self) -> &[WeeklySummary] {
        self.summaries.all()
    }

    fn due_key(&self, id: &str) -> DueKey {
        self.get_current(id).map(|t| t.version.due_key())
    }

    fn rearm_if_moved(
        &self,
        id: &str,
        before: DueKey,
        result: Result<()>,
    ) -> Result<()> {
        if matches!(&result, Err(e) if !e.is_storage()) {
            return result;
        }
        if before == self.due_key(id) {
            return result;
        }
        let rearmed = self.notifier.borrow_mut().rearm(id).map(|_| ());
        result.and(rearmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{ManualTimer, Permission, RecordingAlerts};
    use crate::clock::FixedClock;
    use crate::ids::SequentialIds;
    use crate::storage::MemoryStore;
    use crate::time::{parse_day_key, parse_time_of_day};
    use chrono::{Duration, TimeZone};

    struct Harness {
        planner: Planner,
        clock: Rc<FixedClock>,
        alerts: Rc<RecordingAlerts>,
        timer: ManualTimer,
        storage: Rc<MemoryStore>,
    }

    fn harness(permission: Permission) -> Harness {
        let storage = Rc::new(MemoryStore::new());
        let clock = Rc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap()));
        let alerts = Rc::new(RecordingAlerts::new(permission));
        let timer = ManualTimer::new();
        let (planner, report) = Planner::open(
            Collaborators {
                storage: storage.clone(),
                clock: clock.clone(),
                ids: Rc::new(SequentialIds::new("t")),
                alerts: alerts.clone(),
                timer: Rc::new(timer.clone()),
            },
            PlannerConfig::default(),
        )
        .unwrap();
        assert!(report.is_clean());
        Harness {
            planner,
            clock,
            alerts,
            timer,
            storage,
        }
    }

    fn due_at(title: &str, time: &str) -> TaskDraft {
        TaskDraft::new(title)
            .scheduled_on(parse_day_key("2024-03-10").unwrap())
            .starting_at(parse_time_of_day(time).unwrap())
    }

    #[test]
    fn loop_fires_through_the_timer() {
        let mut h = harness(Permission::Granted);
        h.planner.create_task(due_at("Read", "09:10")).unwrap();

        assert_eq!(h.planner.start_notifications(), LoopStatus::Running);
        assert_eq!(h.timer.intervals(), vec![std::time::Duration::from_secs(60)]);
        h.timer.fire_all();
        h.timer.fire_all();
        assert_eq!(h.alerts.fired().len(), 1);

        h.planner.stop_notifications();
        assert_eq!(h.timer.active_count(), 0);
    }

    #[test]
    fn default_permission_requests_once_and_arms_on_grant() {
        let h = harness(Permission::Default);
        assert_eq!(h.planner.start_notifications(), LoopStatus::AwaitingPermission);
        assert_eq!(h.planner.start_notifications(), LoopStatus::AwaitingPermission);
        assert_eq!(h.alerts.permission_requests(), 1);
        assert_eq!(h.timer.active_count(), 0);

        h.alerts.resolve_permission(Permission::Granted);
        assert!(h.planner.notifications_running());
        assert_eq!(h.timer.active_count(), 1);
    }

    #[test]
    fn denied_permission_stays_dormant() {
        let h = harness(Permission::Default);
        h.planner.start_notifications();
        h.alerts.resolve_permission(Permission::Denied);
        assert!(!h.planner.notifications_running());
        assert_eq!(h.planner.start_notifications(), LoopStatus::PermissionDenied);
        assert_eq!(h.alerts.permission_requests(), 1);
    }

    #[test]
    fn settings_change_restarts_running_loop() {
        let mut h = harness(Permission::Granted);
        h.planner.start_notifications();
        h.planner
            .configure_notifications(NotificationSettings {
                poll_interval_minutes: 5,
                ..NotificationSettings::default()
            })
            .unwrap();
        assert_eq!(h.timer.intervals(), vec![std::time::Duration::from_secs(300)]);

        h.planner
            .configure_notifications(NotificationSettings {
                enabled: false,
                ..NotificationSettings::default()
            })
            .unwrap();
        assert!(!h.planner.notifications_running());
        assert_eq!(h.timer.active_count(), 0);
    }

    #[test]
    fn reschedule_rearms_even_when_the_write_fails() {
        let mut h = harness(Permission::Granted);
        let id = h.planner.create_task(due_at("Read", "09:10")).unwrap();
        h.planner.poll_notifications();
        assert_eq!(h.planner.notified_task_ids(), vec![id.clone()]);

        h.storage.fail_writes(true);
        let err = h.planner.update_task(&id, due_at("Read", "11:00")).unwrap_err();
        assert!(err.is_storage());
        assert!(h.planner.notified_task_ids().is_empty());

        h.storage.fail_writes(false);
        h.clock.set(Utc.with_ymd_and_hms(2024, 3, 10, 10, 50, 0).unwrap());
        assert_eq!(h.planner.poll_notifications().fired.len(), 1);
    }

    #[test]
    fn title_edit_does_not_rearm() {
        let mut h = harness(Permission::Granted);
        let id = h.planner.create_task(due_at("Read", "09:10")).unwrap();
        h.planner.poll_notifications();
        h.planner.update_task(&id, due_at("Read more", "09:10")).unwrap();
        assert_eq!(h.planner.notified_task_ids(), vec![id]);
        assert!(h.planner.poll_notifications().fired.is_empty());
    }

    #[test]
    fn move_task_keeps_time_and_clicks_reach_handler() {
        let mut h = harness(Permission::Granted);
        let id = h.planner.create_task(due_at("Read", "09:10")).unwrap();

        let clicked = Rc::new(RefCell::new(Vec::<String>::new()));
        let sink = clicked.clone();
        h.planner.on_alert_interact(Rc::new(move |task_id: &str| sink.borrow_mut().push(task_id.to_string())));
        h.planner.poll_notifications();
        h.alerts.click(0);
        assert_eq!(*clicked.borrow(), vec![id.clone()]);

        let tomorrow = parse_day_key("2024-03-11").unwrap();
        h.planner.move_task(&id, DropTarget::Day(tomorrow)).unwrap();
        let moved = h.planner.get_current(&id).unwrap();
        assert_eq!(moved.version.scheduled_date, Some(tomorrow));
        assert_eq!(moved.version.start_time, Some(parse_time_of_day("09:10").unwrap()));
        assert!(h.planner.notified_task_ids().is_empty());
    }

    #[test]
    fn overdue_lists_tasks_before_today() {
        let mut h = harness(Permission::Granted);
        h.planner
            .create_task(TaskDraft::new("old").scheduled_on(parse_day_key("2024-03-08").unwrap()))
            .unwrap();
        h.planner.create_task(due_at("today", "18:00")).unwrap();
        let overdue = h.planner.overdue();
        assert_eq!(overdue.len(), 1);
        assert!(h.planner.is_overdue(&overdue[0], h.planner.now()));

        h.clock.advance(Duration::days(1));
        assert_eq!(h.planner.overdue().len(), 2);
    }

    #[test]
    fn on_focus_sweeps_future_tasks() {
        let mut h = harness(Permission::Granted);
        let id = h.planner.create_task(due_at("Read", "09:10")).unwrap();
        h.planner.poll_notifications();

        // Same task, same day, window still open: the mark stays.
        assert_eq!(h.planner.on_focus().unwrap(), 0);
        assert_eq!(h.planner.notified_task_ids(), vec![id]);
    }
}
