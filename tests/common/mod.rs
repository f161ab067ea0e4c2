#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Instant;

use checktree::events::TreeEvent;
use checktree::trigger::{TriggerCallback, callback};

pub use checktree_test_utils::{init_tracing, wait_until};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Callback recording the wall-clock instant and source event name of every
/// invocation.
pub fn stamp_recorder(log: &Arc<Mutex<Vec<(Instant, Option<String>)>>>) -> TriggerCallback {
    let log = Arc::clone(log);
    callback(move |source: Option<&TreeEvent>| {
        log.lock()
            .unwrap()
            .push((Instant::now(), source.map(|e| e.name().to_string())));
    })
}

/// Callback appending `tag` to a shared list.
pub fn tag_recorder(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> TriggerCallback {
    let log = Arc::clone(log);
    callback(move |_| log.lock().unwrap().push(tag))
}
