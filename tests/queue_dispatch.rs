mod common;

use std::sync::{Arc, Barrier, Mutex};
use std::time::{Duration, Instant};

use checktree::events::{EventDispatchQueue, ScheduleOutcome, TreeEvent, TreeEventName};
use checktree::trigger::{TriggerEngine, callback};
use checktree::types::Admission;

use common::{TestResult, init_tracing};

fn counting_trigger(owner: &str, hits: &Arc<Mutex<Vec<String>>>) -> Arc<TriggerEngine> {
    let trigger = TriggerEngine::new(owner, owner, [TreeEventName::Finished], "").unwrap();
    let hits = Arc::clone(hits);
    let tag = owner.to_string();
    trigger
        .start(callback(move |_| hits.lock().unwrap().push(tag.clone())))
        .unwrap();
    trigger
}

fn wait_for(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn concurrent_schedules_for_different_pairs_each_fire_exactly_once() -> TestResult {
    init_tracing();

    let queue = EventDispatchQueue::new(Admission::Suffix);
    let hits = Arc::new(Mutex::new(Vec::new()));
    let a = counting_trigger("a", &hits);
    let b = counting_trigger("b", &hits);

    let barrier = Arc::new(Barrier::new(2));
    let producers: Vec<_> = [("a", a), ("b", b)]
        .into_iter()
        .map(|(node, trigger)| {
            let queue = Arc::clone(&queue);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                let event = TreeEvent::new(TreeEventName::Finished, node, node);
                queue.schedule(event, node, trigger)
            })
        })
        .collect();

    for producer in producers {
        let outcome = producer.join().unwrap();
        assert!(matches!(outcome, ScheduleOutcome::Enqueued { .. }));
    }

    assert!(wait_for(Duration::from_secs(2), || hits.lock().unwrap().len() == 2));
    std::thread::sleep(Duration::from_millis(50));

    let mut hits = hits.lock().unwrap().clone();
    hits.sort();
    assert_eq!(hits, vec!["a", "b"]);
    assert!(wait_for(Duration::from_secs(1), || queue.is_empty() && !queue.is_draining()));
    Ok(())
}

#[test]
fn burst_for_one_pair_delivers_every_element_in_suffix_mode() -> TestResult {
    init_tracing();

    let queue = EventDispatchQueue::new(Admission::Suffix);
    let hits = Arc::new(Mutex::new(Vec::new()));
    let trigger = counting_trigger("n", &hits);

    for _ in 0..20 {
        let event = TreeEvent::new(TreeEventName::Finished, "n", "n");
        queue.schedule(event, "n", Arc::clone(&trigger));
    }

    assert!(wait_for(Duration::from_secs(2), || hits.lock().unwrap().len() == 20));
    assert!(wait_for(Duration::from_secs(1), || !queue.is_draining()));
    Ok(())
}

#[test]
fn fire_hands_the_queued_event_to_the_trigger() -> TestResult {
    let queue = EventDispatchQueue::new(Admission::Suffix);
    let trigger = TriggerEngine::new("n", "n", [TreeEventName::Exception], "")?;
    let seen = Arc::new(Mutex::new(None));
    {
        let seen = Arc::clone(&seen);
        trigger.start(callback(move |source| {
            *seen.lock().unwrap() = source.map(|e| (e.name().clone(), e.source_id().to_string()));
        }))?;
    }

    queue.schedule(
        TreeEvent::new(TreeEventName::Exception, "n", "n"),
        "n",
        Arc::clone(&trigger),
    );

    assert!(wait_for(Duration::from_secs(2), || seen.lock().unwrap().is_some()));
    assert_eq!(
        *seen.lock().unwrap(),
        Some((TreeEventName::Exception, "n".to_string()))
    );
    assert!(wait_for(Duration::from_secs(1), || trigger.last_tree_event().is_some()));
    Ok(())
}
