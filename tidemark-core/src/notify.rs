//! Due-date notifications.
//!
//! `Notifier` is the stateless-per-tick check-and-fire pass plus the
//! persisted "already notified" set. `NotificationLoop` arms it on the host
//! timer once alert permission is granted, and stays dormant otherwise.
//!
//! Per task the states are NotEligible -> Eligible -> Notified. A task is
//! eligible while `now` is in `[due - advance, due)`, it is not already in
//! the notified set, and (if restricted) the local hour is inside working
//! hours.

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};
use tracing::{debug, error, info, warn};

use crate::alerts::{Alert, AlertHandle, AlertSink, Permission, Timer, TimerHandle};
use crate::clock::Clock;
use crate::error::{PlannerError, Result};
use crate::migrate::SCHEMA_VERSION;
use crate::storage::KeyValueStore;
use crate::store::TaskStore;
use crate::task::{TaskSnapshot, TaskVersion};
use crate::time::{local_date, local_instant};

pub const NOTIFICATION_KEY: &str = "notificationState";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    pub enabled: bool,
    pub advance_minutes: u32,
    pub poll_interval_minutes: u32,
    pub restrict_to_working_hours: bool,
    /// Hour of day, 0..=23.
    pub working_hours_start: u8,
    /// Hour of day, 0..=23. Exclusive.
    pub working_hours_end: u8,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            advance_minutes: 15,
            poll_interval_minutes: 1,
            restrict_to_working_hours: false,
            working_hours_start: 9,
            working_hours_end: 17,
        }
    }
}

impl NotificationSettings {
    pub fn validate(&self) -> Result<()> {
        if self.advance_minutes == 0 {
            return Err(PlannerError::validation("advance minutes must be > 0"));
        }
        if self.poll_interval_minutes == 0 {
            return Err(PlannerError::validation("poll interval minutes must be > 0"));
        }
        if self.working_hours_start > 23 || self.working_hours_end > 23 {
            return Err(PlannerError::validation("working hours must be 0..=23"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.poll_interval_minutes) * 60)
    }

    /// `[start, end)`; equal bounds mean all day, and `start > end` wraps
    /// past midnight.
    pub fn within_working_hours(&self, hour: u32) -> bool {
        let (s, e) = (u32::from(self.working_hours_start), u32::from(self.working_hours_end));
        match s.cmp(&e) {
            std::cmp::Ordering::Equal => true,
            std::cmp::Ordering::Less => (s..e).contains(&hour),
            std::cmp::Ordering::Greater => hour >= s || hour < e,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedState {
    schema_version: u32,
    settings: NotificationSettings,
    notified_task_ids: BTreeSet<String>,
    last_sweep_date: Option<NaiveDate>,
}

/// One alert that went out during a poll pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredAlert {
    pub task_id: String,
    pub handle: AlertHandle,
}

#[derive(Debug, Default)]
pub struct PollReport {
    pub fired: Vec<FiredAlert>,
    /// Tasks whose eligibility check failed and were skipped.
    pub skipped: usize,
    /// Alerts the sink refused; they stay eligible for the next pass.
    pub sink_failures: usize,
    /// The notified set could not be written back.
    pub persist_error: Option<PlannerError>,
}

/// The local instant a task is due: its date at its start time, or local
/// midnight when it has no time.
pub fn due_instant(version: &TaskVersion, zone: Tz) -> Option<DateTime<Utc>> {
    version
        .scheduled_date
        .map(|d| local_instant(d, version.start_time, zone))
}

pub struct Notifier {
    settings: NotificationSettings,
    notified: BTreeSet<String>,
    last_sweep: Option<NaiveDate>,
    zone: Tz,
    storage: Rc<dyn KeyValueStore>,
}

impl Notifier {
    pub fn new(storage: Rc<dyn KeyValueStore>, zone: Tz, settings: NotificationSettings) -> Self {
        Self {
            settings,
            notified: BTreeSet::new(),
            last_sweep: None,
            zone,
            storage,
        }
    }

    /// Load persisted settings and the notified set. A malformed blob falls
    /// back to `defaults` and is returned alongside for the caller to report.
    pub fn load(
        storage: Rc<dyn KeyValueStore>,
        zone: Tz,
        defaults: NotificationSettings,
    ) -> Result<(Self, Option<PlannerError>)> {
        let mut n = Self::new(storage, zone, defaults);
        let bytes = n
            .storage
            .get(NOTIFICATION_KEY)
            .map_err(|e| PlannerError::storage(NOTIFICATION_KEY, e))?;
        let Some(bytes) = bytes else {
            return Ok((n, None));
        };

        let parsed = serde_json::from_slice::<PersistedState>(&bytes)
            .map_err(|e| e.to_string())
            .and_then(|s| {
                if s.schema_version > SCHEMA_VERSION {
                    Err(format!("schemaVersion {} is newer than supported", s.schema_version))
                } else {
                    s.settings.validate().map_err(|e| e.to_string())?;
                    Ok(s)
                }
            });

        match parsed {
            Ok(state) => {
                n.settings = state.settings;
                n.notified = state.notified_task_ids;
                n.last_sweep = state.last_sweep_date;
                Ok((n, None))
            }
            Err(reason) => {
                error!(key = NOTIFICATION_KEY, %reason, "notification state is malformed; using defaults");
                Ok((n, Some(PlannerError::malformed(NOTIFICATION_KEY, reason))))
            }
        }
    }

    pub fn settings(&self) -> NotificationSettings {
        self.settings
    }

    pub fn configure(&mut self, settings: NotificationSettings) -> Result<()> {
        settings.validate()?;
        self.settings = settings;
        debug!(?settings, "notification settings changed");
        self.persist()
    }

    pub fn is_notified(&self, task_id: &str) -> bool {
        self.notified.contains(task_id)
    }

    pub fn notified_ids(&self) -> impl Iterator<Item = &str> {
        self.notified.iter().map(String::as_str)
    }

    pub fn last_sweep(&self) -> Option<NaiveDate> {
        self.last_sweep
    }

    /// Forget that `task_id` was notified, after its due time changed.
    pub fn rearm(&mut self, task_id: &str) -> Result<bool> {
        if !self.notified.remove(task_id) {
            return Ok(false);
        }
        debug!(task_id, "notification re-armed");
        self.persist()?;
        Ok(true)
    }

    /// Clear notified ids for tasks scheduled today or later, so a task due
    /// again on a new day alerts again. Tasks whose window has already opened
    /// keep their mark; that alert belongs to the current due time.
    pub fn daily_sweep(&mut self, current: &[TaskSnapshot], now: DateTime<Utc>) -> Result<usize> {
        let today = local_date(now, self.zone);
        let advance = Duration::minutes(self.settings.advance_minutes.into());
        let mut cleared = 0;

        for t in current {
            let Some(date) = t.version.scheduled_date else { continue };
            if date < today || !self.notified.contains(&t.id) {
                continue;
            }
            let window_open = due_instant(&t.version, self.zone)
                .and_then(|due| due.checked_sub_signed(advance))
                .is_some_and(|open| now >= open);
            if window_open {
                continue;
            }
            self.notified.remove(&t.id);
            cleared += 1;
        }

        let sweep_changed = self.last_sweep != Some(today);
        self.last_sweep = Some(today);
        if cleared > 0 || sweep_changed {
            debug!(cleared, %today, "daily notification sweep");
            self.persist()?;
        }
        Ok(cleared)
    }

    /// Eligible for an alert right now, ignoring the notified set.
    pub fn in_window(&self, version: &TaskVersion, now: DateTime<Utc>) -> Result<bool> {
        let Some(due) = due_instant(version, self.zone) else {
            return Ok(false);
        };
        let open = due
            .checked_sub_signed(Duration::minutes(self.settings.advance_minutes.into()))
            .ok_or_else(|| PlannerError::validation("due time out of range"))?;
        Ok(open <= now && now < due)
    }

    /// One check-and-fire pass. Safe to call at any time; the notified set
    /// keeps repeated passes from alerting twice.
    pub fn poll(&mut self, current: &[TaskSnapshot], now: DateTime<Utc>, sink: &dyn AlertSink) -> PollReport {
        let mut report = PollReport::default();
        if !self.settings.enabled {
            return report;
        }

        if self.last_sweep != Some(local_date(now, self.zone)) {
            if let Err(e) = self.daily_sweep(current, now) {
                report.persist_error = Some(e);
            }
        }

        let local_hour = now.with_timezone(&self.zone).hour();
        if self.settings.restrict_to_working_hours && !self.settings.within_working_hours(local_hour) {
            debug!(local_hour, "outside working hours; skipping notification pass");
            return report;
        }

        for t in current {
            if self.notified.contains(&t.id) {
                continue;
            }
            match self.in_window(&t.version, now) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(task_id = %t.id, error = %e, "eligibility check failed; skipping task");
                    report.skipped += 1;
                    continue;
                }
            }

            let alert = self.alert_for(t);
            match sink.fire(&alert) {
                Ok(handle) => {
                    info!(task_id = %t.id, "due notification sent");
                    self.notified.insert(t.id.clone());
                    if let Err(e) = self.persist() {
                        report.persist_error = Some(e);
                    }
                    report.fired.push(FiredAlert {
                        task_id: t.id.clone(),
                        handle,
                    });
                }
                Err(e) => {
                    error!(task_id = %t.id, error = %e, "alert sink failed");
                    report.sink_failures += 1;
                }
            }
        }
        report
    }

    fn alert_for(&self, t: &TaskSnapshot) -> Alert {
        let v = &t.version;
        let when = match (v.scheduled_date, v.start_time) {
            (Some(d), Some(time)) => format!("{} at {}", d, time.format("%H:%M")),
            (Some(d), None) => d.to_string(),
            _ => "soon".to_string(),
        };
        Alert {
            title: format!("Task due soon: {}", v.title),
            body: format!("{} task due {}", v.category, when),
            tag: format!("tidemark-{}", t.id),
        }
    }

    fn persist(&self) -> Result<()> {
        let state = PersistedState {
            schema_version: SCHEMA_VERSION,
            settings: self.settings,
            notified_task_ids: self.notified.clone(),
            last_sweep_date: self.last_sweep,
        };
        let bytes = serde_json::to_vec(&state)?;
        self.storage.set(NOTIFICATION_KEY, &bytes).map_err(|e| {
            error!(key = NOTIFICATION_KEY, error = %e, "persisting notification state failed");
            PlannerError::storage(NOTIFICATION_KEY, e)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Running,
    AwaitingPermission,
    Disabled,
    PermissionDenied,
}

pub type InteractHandler = Rc<dyn Fn(&str)>;

struct LoopShared {
    notifier: Rc<RefCell<Notifier>>,
    store: Rc<RefCell<TaskStore>>,
    clock: Rc<dyn Clock>,
    sink: Rc<dyn AlertSink>,
    timer: Rc<dyn Timer>,
    handle: RefCell<Option<Box<dyn TimerHandle>>>,
    awaiting_permission: Cell<bool>,
    on_interact: RefCell<Option<InteractHandler>>,
}

/// The polling loop, owned by the host process through a cancellable timer.
pub struct NotificationLoop {
    shared: Rc<LoopShared>,
}

impl NotificationLoop {
    pub fn new(
        notifier: Rc<RefCell<Notifier>>,
        store: Rc<RefCell<TaskStore>>,
        clock: Rc<dyn Clock>,
        sink: Rc<dyn AlertSink>,
        timer: Rc<dyn Timer>,
    ) -> Self {
        Self {
            shared: Rc::new(LoopShared {
                notifier,
                store,
                clock,
                sink,
                timer,
                handle: RefCell::new(None),
                awaiting_permission: Cell::new(false),
                on_interact: RefCell::new(None),
            }),
        }
    }

    /// Arm the loop if notifications are enabled and permitted. With
    /// permission not yet asked, one request goes out and the loop arms when
    /// (and if) it is granted.
    pub fn start(&self) -> LoopStatus {
        let s = &self.shared;
        if s.handle.borrow().is_some() {
            return LoopStatus::Running;
        }
        if !s.notifier.borrow().settings().enabled {
            return LoopStatus::Disabled;
        }
        match s.sink.permission() {
            Permission::Granted => {
                arm(s);
                LoopStatus::Running
            }
            Permission::Denied => {
                debug!("alert permission denied; notifications stay dormant");
                LoopStatus::PermissionDenied
            }
            Permission::Default => {
                if !s.awaiting_permission.replace(true) {
                    let weak = Rc::downgrade(s);
                    s.sink.request_permission(Box::new(move |p| on_permission(&weak, p)));
                }
                LoopStatus::AwaitingPermission
            }
        }
    }

    pub fn stop(&self) {
        if let Some(mut h) = self.shared.handle.borrow_mut().take() {
            h.cancel();
            info!("notification loop stopped");
        }
    }

    /// Stop and start again, picking up changed settings.
    pub fn restart(&self) -> LoopStatus {
        self.stop();
        self.start()
    }

    pub fn is_running(&self) -> bool {
        self.shared.handle.borrow().is_some()
    }

    /// Run one pass immediately, outside the timer.
    pub fn tick(&self) -> PollReport {
        tick(&self.shared)
    }

    /// Called with the task id when the user interacts with an alert.
    pub fn set_interact_handler(&self, handler: InteractHandler) {
        *self.shared.on_interact.borrow_mut() = Some(handler);
    }
}

impl Drop for NotificationLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn arm(s: &Rc<LoopShared>) {
    let interval = s.notifier.borrow().settings().poll_interval();
    let weak: Weak<LoopShared> = Rc::downgrade(s);
    let handle = s.timer.every(
        interval,
        Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                tick(&shared);
            }
        }),
    );
    if let Some(mut old) = s.handle.borrow_mut().replace(handle) {
        old.cancel();
    }
    info!(interval_secs = interval.as_secs(), "notification loop armed");
}

fn on_permission(weak: &Weak<LoopShared>, permission: Permission) {
    let Some(s) = weak.upgrade() else { return };
    s.awaiting_permission.set(false);
    let enabled = s.notifier.borrow().settings().enabled;
    if permission == Permission::Granted && enabled && s.handle.borrow().is_none() {
        arm(&s);
    } else {
        debug!(?permission, "notification loop left dormant");
    }
}

fn tick(s: &LoopShared) -> PollReport {
    let now = s.clock.now();
    let current = s.store.borrow().list_current();
    let report = s.notifier.borrow_mut().poll(&current, now, &*s.sink);

    if let Some(handler) = s.on_interact.borrow().clone() {
        for fired in &report.fired {
            let h = handler.clone();
            let id = fired.task_id.clone();
            s.sink.on_interact(&fired.handle, Box::new(move || h(&id)));
        }
    }
    report
}
