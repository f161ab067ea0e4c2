// src/trigger/engine.rs

use std::collections::BTreeSet;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::errors::{Result, TreeError};
use crate::events::{TreeEvent, TreeEventName};
use crate::sync::lock;
use crate::types::NodeId;

use super::interval::parse_interval;
use super::timer::PeriodicTimer;
use super::{CallbackId, NodeTrigger, TriggerCallback, TriggerInfo};

fn after(at: DateTime<Local>, interval: Duration) -> DateTime<Local> {
    chrono::TimeDelta::from_std(interval)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(at)
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct ScheduleTimes {
    last_start: Option<DateTime<Local>>,
    next_start: Option<DateTime<Local>>,
}

/// Per-node trigger: fires on subscribed tree events and, if configured, on
/// a periodic interval.
///
/// Lifecycle:
/// - constructed inactive; the interval is parsed once from the reference
///   string.
/// - [`start`](Self::start) registers a callback (multicast: every call adds
///   one) and arms the periodic timer.
/// - [`stop`](Self::stop) removes exactly the given callback and clears the
///   last event. Once no callback remains the trigger is inactive and its
///   timer halted.
/// - [`on_fired`](Self::on_fired) invokes all callbacks in registration order
///   on the calling thread, then re-arms the timer.
pub struct TriggerEngine {
    owner_id: NodeId,
    referenced_node_id: NodeId,
    internal_events: BTreeSet<TreeEventName>,
    reference: String,
    interval: Option<Duration>,
    active: AtomicBool,
    callbacks: Mutex<Vec<(CallbackId, TriggerCallback)>>,
    next_callback_id: AtomicU64,
    last_event: Mutex<Option<Arc<TreeEvent>>>,
    times: Mutex<ScheduleTimes>,
    timer: Mutex<Option<PeriodicTimer>>,
    rearm_failures: AtomicU64,
    weak_self: Weak<TriggerEngine>,
}

impl fmt::Debug for TriggerEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerEngine")
            .field("owner_id", &self.owner_id)
            .field("referenced_node_id", &self.referenced_node_id)
            .field("internal_events", &self.internal_events)
            .field("interval", &self.interval)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl TriggerEngine {
    /// Build an inactive trigger.
    ///
    /// - `owner_id`: node whose evaluation this trigger restarts.
    /// - `referenced_node_id`: node whose events this trigger listens to.
    /// - `events`: subscribed event names.
    /// - `reference`: free-form text scanned for an interval token.
    pub fn new(
        owner_id: impl Into<NodeId>,
        referenced_node_id: impl Into<NodeId>,
        events: impl IntoIterator<Item = TreeEventName>,
        reference: &str,
    ) -> Result<Arc<Self>> {
        let interval = parse_interval(reference)?;
        let owner_id = owner_id.into();
        let referenced_node_id = referenced_node_id.into();
        let internal_events: BTreeSet<TreeEventName> = events.into_iter().collect();

        debug!(
            node = %owner_id,
            referenced = %referenced_node_id,
            ?interval,
            events = internal_events.len(),
            "trigger constructed"
        );

        Ok(Arc::new_cyclic(|weak_self| Self {
            owner_id,
            referenced_node_id,
            internal_events,
            reference: reference.to_string(),
            interval,
            active: AtomicBool::new(false),
            callbacks: Mutex::new(Vec::new()),
            next_callback_id: AtomicU64::new(1),
            last_event: Mutex::new(None),
            times: Mutex::new(ScheduleTimes::default()),
            timer: Mutex::new(None),
            rearm_failures: AtomicU64::new(0),
            weak_self: weak_self.clone(),
        }))
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn referenced_node_id(&self) -> &str {
        &self.referenced_node_id
    }

    pub fn internal_events(&self) -> &BTreeSet<TreeEventName> {
        &self.internal_events
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Configured period, `None` for purely event-driven triggers.
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn callback_count(&self) -> usize {
        lock(&self.callbacks).len()
    }

    pub fn last_tree_event(&self) -> Option<Arc<TreeEvent>> {
        lock(&self.last_event).clone()
    }

    /// Number of re-arm attempts that found the timer already torn down.
    pub fn rearm_failures(&self) -> u64 {
        self.rearm_failures.load(Ordering::Relaxed)
    }

    /// Whether `event` is one this trigger subscribes to.
    pub fn listens_to(&self, event: &TreeEvent) -> bool {
        event.source_id() == self.referenced_node_id
            && self.internal_events.contains(event.name())
    }

    /// Register `callback` and arm the trigger.
    ///
    /// Periodic triggers need a Tokio runtime for their timer; calling this
    /// outside of one fails with [`TreeError::NoRuntime`] and registers
    /// nothing.
    pub fn start(&self, callback: TriggerCallback) -> Result<CallbackId> {
        let handle = match self.interval {
            Some(_) => Some(
                Handle::try_current().map_err(|_| TreeError::NoRuntime(self.owner_id.clone()))?,
            ),
            None => None,
        };

        let id = CallbackId(self.next_callback_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.callbacks).push((id, callback));

        if let (Some(interval), Some(handle)) = (self.interval, handle) {
            let now = Local::now();
            {
                let mut times = lock(&self.times);
                times.last_start = Some(now);
                times.next_start = Some(after(now, interval));
            }

            let first = Instant::now() + interval;
            let mut timer = lock(&self.timer);
            match timer.as_ref() {
                Some(existing) if existing.is_running() => {
                    if existing.arm(first).is_err() {
                        *timer = Some(PeriodicTimer::spawn(&handle, first, self.weak_self.clone()));
                    }
                }
                _ => {
                    *timer = Some(PeriodicTimer::spawn(&handle, first, self.weak_self.clone()));
                }
            }
        }

        self.active.store(true, Ordering::Release);
        info!(
            node = %self.owner_id,
            callback = id.0,
            periodic = self.interval.is_some(),
            "trigger started"
        );
        Ok(id)
    }

    /// Remove the callback registered under `id`.
    ///
    /// Returns `false` if no such callback was registered. Does not interrupt
    /// a callback invocation already in progress.
    pub fn stop(&self, id: CallbackId) -> bool {
        let (removed, remaining) = {
            let mut callbacks = lock(&self.callbacks);
            let before = callbacks.len();
            callbacks.retain(|(cid, _)| *cid != id);
            (callbacks.len() != before, callbacks.len())
        };

        if remaining == 0 {
            self.active.store(false, Ordering::Release);
            // Dropping the timer aborts its task.
            lock(&self.timer).take();
            *lock(&self.times) = ScheduleTimes::default();
        }
        lock(&self.last_event).take();

        info!(
            node = %self.owner_id,
            callback = id.0,
            removed,
            remaining,
            "trigger stopped"
        );
        removed
    }

    /// Fire the trigger.
    ///
    /// `source` is `None` for timer-induced fires. Callbacks run synchronously
    /// on the calling thread, in registration order; a panicking callback is
    /// logged and the remaining callbacks still run.
    ///
    /// A periodic trigger stopped while this fire is in flight loses its
    /// timer before the re-arm; that is counted in
    /// [`rearm_failures`](Self::rearm_failures). Fires arriving after the
    /// stop have no timer to re-arm and count nothing.
    pub fn on_fired(&self, source: Option<Arc<TreeEvent>>) {
        *lock(&self.last_event) = source.clone();

        let mut had_timer = false;
        if self.interval.is_some() {
            if let Some(timer) = lock(&self.timer).as_ref() {
                timer.pause();
                had_timer = true;
            }
        }

        if self.is_active() {
            let callbacks: Vec<(CallbackId, TriggerCallback)> = lock(&self.callbacks).clone();
            for (id, callback) in callbacks {
                let result = catch_unwind(AssertUnwindSafe(|| callback(source.as_deref())));
                if result.is_err() {
                    error!(
                        node = %self.owner_id,
                        callback = id.0,
                        "trigger callback panicked"
                    );
                }
            }
        }

        if let Some(interval) = self.interval {
            self.rearm(interval, had_timer);
        }
    }

    fn rearm(&self, interval: Duration, had_timer: bool) {
        let armed = {
            let timer = lock(&self.timer);
            match timer.as_ref() {
                Some(t) => t.arm(Instant::now() + interval).is_ok(),
                None => false,
            }
        };

        if armed {
            lock(&self.times).next_start = Some(after(Local::now(), interval));
        } else if had_timer {
            self.rearm_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                node = %self.owner_id,
                "periodic timer was torn down while re-arming; fire completed without re-arm"
            );
        }
    }

    /// Next scheduled periodic fire, `None` if non-periodic or not running.
    pub fn next_run(&self) -> Option<DateTime<Local>> {
        self.interval?;
        let running = lock(&self.timer).as_ref().is_some_and(|t| t.is_running());
        if !running {
            return None;
        }
        lock(&self.times).next_start
    }

    pub fn info(&self) -> TriggerInfo {
        let next_run = self.next_run();
        let events: Vec<&str> = self
            .internal_events
            .iter()
            .map(|e| e.display_name())
            .collect();

        let mut description = if events.is_empty() {
            String::new()
        } else {
            format!("on {}", events.join(", "))
        };

        if let Some(next) = next_run {
            if !description.is_empty() {
                description.push_str("; ");
            }
            description.push_str(&format!("next run {}", next.format("%Y-%m-%d %H:%M:%S")));
        }

        TriggerInfo {
            next_run,
            description,
        }
    }
}

impl NodeTrigger for TriggerEngine {
    fn start(&self, callback: TriggerCallback) -> Result<CallbackId> {
        TriggerEngine::start(self, callback)
    }

    fn stop(&self, id: CallbackId) -> bool {
        TriggerEngine::stop(self, id)
    }

    fn info(&self) -> TriggerInfo {
        TriggerEngine::info(self)
    }
}
