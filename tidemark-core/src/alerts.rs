//! Alert sink and timer collaborators, plus recording fakes.
//!
//! Both are host facilities. Permission requests resolve through a callback;
//! timers fire a callback on the host's own event loop until cancelled.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    /// Not asked yet.
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub body: String,
    /// Host-side dedupe tag.
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertHandle(pub u64);

pub type PermissionCallback = Box<dyn FnOnce(Permission)>;
pub type InteractCallback = Box<dyn FnMut()>;

pub trait AlertSink {
    fn permission(&self) -> Permission;

    /// Fire-and-forget; `on_result` runs whenever the host resolves it.
    fn request_permission(&self, on_result: PermissionCallback);

    fn fire(&self, alert: &Alert) -> Result<AlertHandle, String>;

    fn on_interact(&self, handle: &AlertHandle, callback: InteractCallback);
}

pub type TickCallback = Box<dyn FnMut()>;

pub trait TimerHandle {
    fn cancel(&mut self);
}

pub trait Timer {
    fn every(&self, interval: Duration, tick: TickCallback) -> Box<dyn TimerHandle>;
}

/// Alert sink that records everything it is asked to show.
///
/// Permission requests are parked until `resolve_permission` is called, so
/// tests can exercise the async boundary.
#[derive(Default)]
pub struct RecordingAlerts {
    permission: Cell<Option<Permission>>,
    pending: RefCell<Vec<PermissionCallback>>,
    fired: RefCell<Vec<Alert>>,
    interactions: RefCell<Vec<(AlertHandle, InteractCallback)>>,
    fail_fire: Cell<bool>,
    requests: Cell<usize>,
}

impl RecordingAlerts {
    pub fn new(permission: Permission) -> Self {
        let s = Self::default();
        s.permission.set(Some(permission));
        s
    }

    pub fn fired(&self) -> Vec<Alert> {
        self.fired.borrow().clone()
    }

    pub fn permission_requests(&self) -> usize {
        self.requests.get()
    }

    pub fn fail_fire(&self, fail: bool) {
        self.fail_fire.set(fail);
    }

    pub fn resolve_permission(&self, result: Permission) {
        self.permission.set(Some(result));
        let pending: Vec<_> = self.pending.borrow_mut().drain(..).collect();
        for cb in pending {
            cb(result);
        }
    }

    /// Simulate a click on the n-th fired alert.
    pub fn click(&self, index: usize) {
        let handle = AlertHandle(index as u64);
        let mut interactions = self.interactions.borrow_mut();
        for (h, cb) in interactions.iter_mut() {
            if *h == handle {
                cb();
            }
        }
    }
}

impl AlertSink for RecordingAlerts {
    fn permission(&self) -> Permission {
        self.permission.get().unwrap_or(Permission::Default)
    }

    fn request_permission(&self, on_result: PermissionCallback) {
        self.requests.set(self.requests.get() + 1);
        self.pending.borrow_mut().push(on_result);
    }

    fn fire(&self, alert: &Alert) -> Result<AlertHandle, String> {
        if self.fail_fire.get() {
            return Err("alert sink unavailable".to_string());
        }
        let mut fired = self.fired.borrow_mut();
        fired.push(alert.clone());
        Ok(AlertHandle((fired.len() - 1) as u64))
    }

    fn on_interact(&self, handle: &AlertHandle, callback: InteractCallback) {
        self.interactions.borrow_mut().push((handle.clone(), callback));
    }
}

struct ManualSlot {
    interval: Duration,
    tick: TickCallback,
    active: Rc<Cell<bool>>,
}

/// Timer that only fires when told to.
#[derive(Default, Clone)]
pub struct ManualTimer {
    slots: Rc<RefCell<Vec<ManualSlot>>>,
}

struct ManualHandle {
    active: Rc<Cell<bool>>,
}

impl TimerHandle for ManualHandle {
    fn cancel(&mut self) {
        self.active.set(false);
    }
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_count(&self) -> usize {
        self.slots.borrow().iter().filter(|s| s.active.get()).count()
    }

    pub fn intervals(&self) -> Vec<Duration> {
        self.slots
            .borrow()
            .iter()
            .filter(|s| s.active.get())
            .map(|s| s.interval)
            .collect()
    }

    /// Run every active callback once.
    pub fn fire_all(&self) {
        // Callbacks may re-arm the timer, so run them outside the borrow.
        let mut taken: Vec<ManualSlot> = self.slots.borrow_mut().drain(..).collect();
        for slot in taken.iter_mut().filter(|s| s.active.get()) {
            (slot.tick)();
        }
        let mut slots = self.slots.borrow_mut();
        let added: Vec<ManualSlot> = slots.drain(..).collect();
        slots.extend(taken.into_iter().filter(|s| s.active.get()));
        slots.extend(added);
    }
}

impl Timer for ManualTimer {
    fn every(&self, interval: Duration, tick: TickCallback) -> Box<dyn TimerHandle> {
        let active = Rc::new(Cell::new(true));
        self.slots.borrow_mut().push(ManualSlot {
            interval,
            tick,
            active: active.clone(),
        });
        Box::new(ManualHandle { active })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_timer_stops_after_cancel() {
        let timer = ManualTimer::new();
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let mut handle = timer.every(Duration::from_secs(60), Box::new(move || h.set(h.get() + 1)));

        timer.fire_all();
        timer.fire_all();
        assert_eq!(hits.get(), 2);

        handle.cancel();
        timer.fire_all();
        assert_eq!(hits.get(), 2);
        assert_eq!(timer.active_count(), 0);
    }

    #[test]
    fn permission_resolves_through_callback() {
        let sink = RecordingAlerts::new(Permission::Default);
        let seen = Rc::new(Cell::new(None));
        let s = seen.clone();
        sink.request_permission(Box::new(move |p| s.set(Some(p))));
        assert_eq!(seen.get(), None);

        sink.resolve_permission(Permission::Granted);
        assert_eq!(seen.get(), Some(Permission::Granted));
        assert_eq!(sink.permission(), Permission::Granted);
    }
}
