// src/events/queue.rs

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tracing::{debug, error, trace};

use crate::events::TreeEvent;
use crate::sync::lock;
use crate::trigger::TriggerEngine;
use crate::types::Admission;

/// One pending trigger firing.
///
/// Owned by the queue between `schedule` and the drain worker picking it up.
pub struct ComposedQueueElement {
    pub key: String,
    pub source: Arc<TreeEvent>,
    pub trigger: Arc<TriggerEngine>,
}

impl std::fmt::Debug for ComposedQueueElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposedQueueElement")
            .field("key", &self.key)
            .field("source", &self.source)
            .field("trigger", &self.trigger.owner_id())
            .finish()
    }
}

/// What `schedule` did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Element queued under the given composed key.
    Enqueued { key: String },
    /// An element for the same (event, node) pair was already pending and the
    /// queue runs in [`Admission::Coalesce`] mode.
    Coalesced { key: String },
}

/// Process-wide queue decoupling event production from trigger firing.
///
/// Semantics:
/// - `schedule` composes the key `eventName:nodeId(n)` with the first `n >= 1`
///   not carried by a pending element, and appends the element (FIFO).
/// - At most one drain worker runs at a time. The running flag is claimed
///   with a compare-and-swap, never a read-then-write.
/// - The drain worker fires elements synchronously in FIFO order until it
///   observes the queue empty. A panic in one trigger is logged and does not
///   stop the rest of the queue.
/// - Nodes whose events retrigger each other therefore never recurse on the
///   producer's stack.
///
/// Not suitable for guaranteed-delivery logging: in `Coalesce` mode
/// duplicates of a pending pair are dropped.
#[derive(Debug)]
pub struct EventDispatchQueue {
    pending: Mutex<VecDeque<ComposedQueueElement>>,
    draining: AtomicBool,
    admission: Admission,
}

impl EventDispatchQueue {
    pub fn new(admission: Admission) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            admission,
        })
    }

    pub fn admission(&self) -> Admission {
        self.admission
    }

    /// Number of elements waiting to be drained.
    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.pending).is_empty()
    }

    /// Whether a drain worker currently owns the queue.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Queue `trigger` to be fired with `event` on the drain worker.
    pub fn schedule(
        self: &Arc<Self>,
        event: Arc<TreeEvent>,
        node_id: &str,
        trigger: Arc<TriggerEngine>,
    ) -> ScheduleOutcome {
        let base = format!("{}:{}", event.name().as_str(), node_id);

        let outcome = {
            let mut pending = lock(&self.pending);
            let mut counter: usize = 1;
            let mut key = compose_key(&base, counter);

            while pending.iter().any(|el| el.key == key) {
                if self.admission == Admission::Coalesce {
                    debug!(key = %key, "pending element for this event/node pair; coalescing");
                    return ScheduleOutcome::Coalesced { key };
                }
                counter += 1;
                key = compose_key(&base, counter);
            }

            trace!(key = %key, depth = pending.len() + 1, "enqueued tree event");
            pending.push_back(ComposedQueueElement {
                key: key.clone(),
                source: event,
                trigger,
            });
            ScheduleOutcome::Enqueued { key }
        };

        self.ensure_drain_worker();
        outcome
    }

    fn ensure_drain_worker(self: &Arc<Self>) {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let queue = Arc::clone(self);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || queue.drain());
            }
            Err(_) => {
                let spawned = std::thread::Builder::new()
                    .name("tree-event-drain".into())
                    .spawn(move || queue.drain());
                if let Err(err) = spawned {
                    // Leave the flag cleared so the next schedule call retries.
                    self.draining.store(false, Ordering::Release);
                    error!(error = %err, "failed to start event drain worker");
                }
            }
        }
    }

    fn drain(&self) {
        debug!("event drain worker started");
        let mut fired = 0usize;

        loop {
            let next = lock(&self.pending).pop_front();
            match next {
                Some(element) => {
                    fire(element);
                    fired += 1;
                }
                None => {
                    self.draining.store(false, Ordering::Release);

                    // A producer may have enqueued after our empty read but
                    // before the flag was cleared; it saw a running worker and
                    // did not start one. Reclaim the flag and keep going.
                    if lock(&self.pending).is_empty() {
                        break;
                    }
                    if self
                        .draining
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }

        debug!(fired, "event drain worker finished");
    }
}

fn compose_key(base: &str, counter: usize) -> String {
    format!("{base}({counter})")
}

fn fire(element: ComposedQueueElement) {
    let ComposedQueueElement {
        key,
        source,
        trigger,
    } = element;

    trace!(key = %key, "firing queued trigger");
    let result = catch_unwind(AssertUnwindSafe(|| trigger.on_fired(Some(source))));
    if result.is_err() {
        error!(
            key = %key,
            owner = %trigger.owner_id(),
            "trigger panicked while draining; continuing with next element"
        );
    }
}
