// src/events/router.rs

use std::sync::{Arc, RwLock};

use tracing::trace;

use crate::events::{EventDispatchQueue, ScheduleOutcome, TreeEvent, TreeEventSink};
use crate::sync::{read, write};
use crate::trigger::TriggerEngine;

/// Event producer side: routes each published event to the triggers that
/// subscribe to it, via the dispatch queue.
///
/// A trigger matches when the event name is one of its internal events and
/// the event's source is the trigger's referenced node.
#[derive(Debug)]
pub struct EventRouter {
    queue: Arc<EventDispatchQueue>,
    triggers: RwLock<Vec<Arc<TriggerEngine>>>,
}

impl EventRouter {
    pub fn new(queue: Arc<EventDispatchQueue>) -> Arc<Self> {
        Arc::new(Self {
            queue,
            triggers: RwLock::new(Vec::new()),
        })
    }

    pub fn queue(&self) -> &Arc<EventDispatchQueue> {
        &self.queue
    }

    pub fn register(&self, trigger: Arc<TriggerEngine>) {
        write(&self.triggers).push(trigger);
    }

    /// Remove a trigger by identity. Returns whether it was registered.
    pub fn unregister(&self, trigger: &Arc<TriggerEngine>) -> bool {
        let mut triggers = write(&self.triggers);
        let before = triggers.len();
        triggers.retain(|t| !Arc::ptr_eq(t, trigger));
        triggers.len() != before
    }

    /// Route one event; returns the outcome of every schedule call made.
    pub fn route(&self, event: &Arc<TreeEvent>) -> Vec<ScheduleOutcome> {
        let matching: Vec<Arc<TriggerEngine>> = read(&self.triggers)
            .iter()
            .filter(|t| t.listens_to(event))
            .cloned()
            .collect();

        trace!(
            event = %event.name(),
            source = %event.source_id(),
            matching = matching.len(),
            "routing tree event"
        );

        matching
            .into_iter()
            .map(|trigger| {
                let owner = trigger.owner_id().to_string();
                self.queue.schedule(Arc::clone(event), &owner, trigger)
            })
            .collect()
    }
}

impl TreeEventSink for EventRouter {
    fn publish(&self, event: Arc<TreeEvent>) {
        self.route(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TreeEventName;
    use crate::types::Admission;

    #[test]
    fn only_matching_name_and_source_are_scheduled() {
        let router = EventRouter::new(EventDispatchQueue::new(Admission::Suffix));
        let on_a =
            TriggerEngine::new("watcher", "a", [TreeEventName::LogicalChanged], "").unwrap();
        let on_b =
            TriggerEngine::new("other", "b", [TreeEventName::LogicalChanged], "").unwrap();
        router.register(on_a.clone());
        router.register(on_b);

        let outcomes = router.route(&TreeEvent::new(TreeEventName::LogicalChanged, "a", "a"));
        assert_eq!(outcomes.len(), 1);

        let outcomes = router.route(&TreeEvent::new(TreeEventName::Finished, "a", "a"));
        assert!(outcomes.is_empty());

        assert!(router.unregister(&on_a));
        let outcomes = router.route(&TreeEvent::new(TreeEventName::LogicalChanged, "a", "a"));
        assert!(outcomes.is_empty());
    }
}
