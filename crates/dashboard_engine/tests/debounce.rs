mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashboard_engine::DebounceScheduler;
use pretty_assertions::assert_eq;
use tokio::time::sleep;

use common::init_logging;

const WINDOW: Duration = Duration::from_millis(300);

fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn FnOnce() + Send>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);
    let make = move |value: &str| -> Box<dyn FnOnce() + Send> {
        let sink = Arc::clone(&sink);
        let value = value.to_string();
        Box::new(move || sink.lock().unwrap().push(value))
    };
    (calls, make)
}

#[tokio::test(start_paused = true)]
async fn rapid_calls_collapse_into_one_with_the_last_argument() {
    init_logging();
    let scheduler = DebounceScheduler::new();
    let (calls, action) = recorder();

    for query in ["a", "ap", "app", "appl", "apple"] {
        scheduler.schedule("search", WINDOW, action(query));
        sleep(Duration::from_millis(100)).await;
    }
    assert!(calls.lock().unwrap().is_empty());

    sleep(WINDOW).await;
    assert_eq!(*calls.lock().unwrap(), vec!["apple".to_string()]);
    assert!(!scheduler.is_pending(&"search"));
}

#[tokio::test(start_paused = true)]
async fn flush_now_runs_immediately_and_only_once() {
    init_logging();
    let scheduler = DebounceScheduler::new();
    let (calls, action) = recorder();

    scheduler.schedule("search", WINDOW, action("msft"));
    assert!(scheduler.flush_now(&"search"));
    assert_eq!(*calls.lock().unwrap(), vec!["msft".to_string()]);

    sleep(WINDOW * 2).await;
    assert_eq!(calls.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn flush_without_pending_action_does_nothing() {
    let scheduler: DebounceScheduler<&str> = DebounceScheduler::new();
    assert!(!scheduler.flush_now(&"search"));
}

#[tokio::test(start_paused = true)]
async fn cancel_drops_the_pending_action() {
    let scheduler = DebounceScheduler::new();
    let (calls, action) = recorder();

    scheduler.schedule("search", WINDOW, action("ibm"));
    assert!(scheduler.cancel(&"search"));
    assert!(!scheduler.cancel(&"search"));

    sleep(WINDOW * 2).await;
    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn keys_are_debounced_independently() {
    let scheduler = DebounceScheduler::new();
    let (calls, action) = recorder();

    scheduler.schedule("left", WINDOW, action("left"));
    sleep(Duration::from_millis(200)).await;
    scheduler.schedule("right", WINDOW, action("right"));
    sleep(Duration::from_millis(150)).await;
    assert_eq!(*calls.lock().unwrap(), vec!["left".to_string()]);

    sleep(WINDOW).await;
    assert_eq!(
        *calls.lock().unwrap(),
        vec!["left".to_string(), "right".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn dropping_the_scheduler_discards_pending_actions() {
    let (calls, action) = recorder();
    {
        let scheduler = DebounceScheduler::new();
        scheduler.schedule("search", WINDOW, action("gone"));
    }
    sleep(WINDOW * 2).await;
    assert!(calls.lock().unwrap().is_empty());
}
