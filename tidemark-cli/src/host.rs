//! Host collaborators for the terminal: file-backed storage, a printing
//! alert sink and a tokio timer.

use anyhow::{Context, Result, bail};
use std::cell::Cell;
use std::io::Write;
use std::rc::Rc;
use std::time::Duration;
use tidemark_core::alerts::{InteractCallback, PermissionCallback, TickCallback};
use tidemark_core::{
    Alert, AlertHandle, AlertSink, Collaborators, FileStore, Permission, Planner, PlannerError,
    StartupReport, SystemClock, Timer, TimerHandle, UlidSource,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::config::load_config;
use crate::state::data_dir;

/// Prints alerts to stdout. A terminal can always show text, so permission
/// is granted up front.
#[derive(Default)]
pub struct TerminalAlerts {
    next: Cell<u64>,
}

impl TerminalAlerts {
    pub fn new() -> Self {
        Self { next: Cell::new(0) }
    }
}

impl AlertSink for TerminalAlerts {
    fn permission(&self) -> Permission {
        Permission::Granted
    }

    fn request_permission(&self, on_result: PermissionCallback) {
        on_result(Permission::Granted);
    }

    fn fire(&self, alert: &Alert) -> Result<AlertHandle, String> {
        let n = self.next.get();
        self.next.set(n + 1);
        let mut out = std::io::stdout().lock();
        writeln!(out, "\x07[{}] {}\n    {}", alert.tag, alert.title, alert.body)
            .and_then(|_| out.flush())
            .map_err(|e| e.to_string())?;
        Ok(AlertHandle(n))
    }

    fn on_interact(&self, handle: &AlertHandle, _callback: InteractCallback) {
        debug!(?handle, "terminal alerts cannot be clicked; interaction handler dropped");
    }
}

/// Runs tick callbacks on the current `LocalSet`.
pub struct TokioTimer;

struct TokioTimerHandle(Option<JoinHandle<()>>);

impl TimerHandle for TokioTimerHandle {
    fn cancel(&mut self) {
        if let Some(h) = self.0.take() {
            h.abort();
        }
    }
}

impl Drop for TokioTimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl Timer for TokioTimer {
    fn every(&self, interval: Duration, mut tick: TickCallback) -> Box<dyn TimerHandle> {
        let handle = tokio::task::spawn_local(async move {
            let mut iv = tokio::time::interval(interval);
            iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                // The first tick completes immediately, so a pass runs on start.
                iv.tick().await;
                tick();
            }
        });
        Box::new(TokioTimerHandle(Some(handle)))
    }
}

/// Open the planner over `~/.tidemark/data`, reporting any load repairs on
/// stderr.
pub fn open_planner() -> Result<Planner> {
    let cfg = load_config()?;
    let planner_config = cfg.planner_config()?;
    let dir = data_dir()?;
    let storage = FileStore::open(&dir).with_context(|| format!("open data dir {}", dir.display()))?;

    let (planner, report) = Planner::open(
        Collaborators {
            storage: Rc::new(storage),
            clock: Rc::new(SystemClock),
            ids: Rc::new(UlidSource),
            alerts: Rc::new(TerminalAlerts::new()),
            timer: Rc::new(TokioTimer),
        },
        planner_config,
    )
    .context("load planner state")?;
    report_startup(&report);
    Ok(planner)
}

fn report_startup(report: &StartupReport) {
    let t = &report.tasks;
    if let Some(e) = &t.reset {
        eprintln!("warning: {e}; starting with no tasks (the file is kept until the next change)");
    }
    if t.repaired > 0 || t.dropped > 0 || t.assigned_ids > 0 {
        warn!(repaired = t.repaired, dropped = t.dropped, assigned_ids = t.assigned_ids, "task data repaired on load");
        eprintln!(
            "note: migrated stored tasks ({} repaired, {} dropped, {} given new ids)",
            t.repaired, t.dropped, t.assigned_ids
        );
    }
    for e in [&report.notifications, &report.summaries].into_iter().flatten() {
        eprintln!("warning: {e}; using defaults");
    }
}

/// Map a core result, turning a failed write into a clear "not saved" error.
pub fn saved<T>(result: tidemark_core::Result<T>) -> Result<T> {
    match result {
        Ok(v) => Ok(v),
        Err(e @ PlannerError::Storage { task_id: Some(_), .. }) => {
            let id = e.task_id().unwrap_or_default();
            bail!("{e}; task {id} was created but not saved to disk")
        }
        Err(e @ PlannerError::Storage { .. }) => bail!("{e}; the change was not saved to disk"),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_terminal_alerts_grant_and_number_handles() {
        let sink = TerminalAlerts::new();
        let got = Rc::new(RefCell::new(None));
        let g = got.clone();
        sink.request_permission(Box::new(move |p| *g.borrow_mut() = Some(p)));
        assert_eq!(*got.borrow(), Some(Permission::Granted));

        let alert = Alert {
            title: "Task due soon: x".into(),
            body: "Math task due soon".into(),
            tag: "tidemark-x".into(),
        };
        assert_eq!(sink.fire(&alert).unwrap(), AlertHandle(0));
        assert_eq!(sink.fire(&alert).unwrap(), AlertHandle(1));
    }

    #[test]
    fn test_storage_errors_mention_unsaved_change() {
        let err = saved::<()>(Err(PlannerError::storage("learningTasks", "disk full"))).unwrap_err();
        assert!(err.to_string().contains("not saved"));
        let err = saved::<()>(Err(
            PlannerError::storage("learningTasks", "disk full").with_task_id("01hx"),
        ))
        .unwrap_err();
        assert!(err.to_string().contains("task 01hx was created"));
        let err = saved::<()>(Err(PlannerError::NotFound("x".into()))).unwrap_err();
        assert!(err.to_string().contains("task not found"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_tokio_timer_ticks_until_cancelled() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let count = Rc::new(Cell::new(0));
                let c = count.clone();
                let mut handle = TokioTimer.every(Duration::from_millis(5), Box::new(move || c.set(c.get() + 1)));
                tokio::time::sleep(Duration::from_millis(30)).await;
                handle.cancel();
                let seen = count.get();
                assert!(seen >= 2, "ticked {seen} times");
                tokio::time::sleep(Duration::from_millis(20)).await;
                assert_eq!(count.get(), seen);
            })
            .await;
    }
}
