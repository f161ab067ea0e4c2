mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use checktree::events::{EventDispatchQueue, EventRouter, TreeEvent, TreeEventName};
use checktree::trigger::{NodeTrigger, TriggerEngine};
use checktree::types::Admission;

use common::{TestResult, init_tracing, stamp_recorder, tag_recorder, wait_until};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn periodic_trigger_fires_itself_with_at_least_the_interval_between_fires() -> TestResult {
    init_tracing();

    let trigger = TriggerEngine::new("n1", "n1", [], "poll every MS:50")?;
    let log = Arc::new(Mutex::new(Vec::new()));
    let id = trigger.start(stamp_recorder(&log))?;

    let fired = wait_until(Duration::from_secs(3), || log.lock().unwrap().len() >= 3).await;
    assert!(fired, "expected three timer fires");
    trigger.stop(id);

    let stamps = log.lock().unwrap().clone();
    for pair in stamps.windows(2) {
        assert!(
            pair[1].0.duration_since(pair[0].0) >= Duration::from_millis(50),
            "fires closer than the interval: {:?}",
            pair[1].0.duration_since(pair[0].0)
        );
    }
    assert!(stamps.iter().all(|(_, source)| source.is_none()));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn next_run_is_reported_while_running_and_cleared_after_stop() -> TestResult {
    init_tracing();

    let trigger = TriggerEngine::new("n1", "n1", [TreeEventName::Exception], "H:1")?;
    assert!(trigger.info().next_run.is_none());

    let id = trigger.start(tag_recorder(&Arc::new(Mutex::new(Vec::new())), "x"))?;
    let info = trigger.info();
    let next = info.next_run.expect("running periodic trigger has a next run");
    assert!(next > chrono::Local::now() + chrono::TimeDelta::minutes(59));
    assert!(info.description.starts_with("on exception; next run "));

    trigger.stop(id);
    assert!(!trigger.is_active());
    assert!(trigger.info().next_run.is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopping_one_callback_leaves_the_other_firing_on_routed_events() -> TestResult {
    init_tracing();

    let router = EventRouter::new(EventDispatchQueue::new(Admission::Suffix));
    let trigger = TriggerEngine::new("owner", "source", [TreeEventName::Finished], "")?;
    router.register(Arc::clone(&trigger));

    let log = Arc::new(Mutex::new(Vec::new()));
    let first = trigger.start(tag_recorder(&log, "first"))?;
    let _second = trigger.start(tag_recorder(&log, "second"))?;

    router.route(&TreeEvent::new(TreeEventName::Finished, "source", "source"));
    assert!(wait_until(Duration::from_secs(2), || log.lock().unwrap().len() == 2).await);
    assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);

    assert!(trigger.stop(first));
    router.route(&TreeEvent::new(TreeEventName::Finished, "source", "source"));
    assert!(wait_until(Duration::from_secs(2), || log.lock().unwrap().len() == 3).await);
    assert_eq!(log.lock().unwrap()[2], "second");

    // Events from other nodes or with other names are ignored.
    assert!(router.route(&TreeEvent::new(TreeEventName::Finished, "other", "other")).is_empty());
    assert!(router.route(&TreeEvent::new(TreeEventName::Started, "source", "source")).is_empty());
    Ok(())
}

#[test]
fn trigger_is_usable_through_the_node_trigger_trait() -> TestResult {
    let trigger: Arc<dyn NodeTrigger> =
        TriggerEngine::new("n", "n", [TreeEventName::Breaked], "")?;
    let id = trigger.start(tag_recorder(&Arc::new(Mutex::new(Vec::new())), "t"))?;
    assert_eq!(trigger.info().description, "on aborted");
    assert!(trigger.stop(id));
    assert!(!trigger.stop(id));
    Ok(())
}
