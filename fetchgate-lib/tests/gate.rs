use std::sync::{Arc, Mutex};
use std::time::Duration;

use fetchgate_lib::gate::{DEFAULT_DEBOUNCE_DELAY, DEFAULT_THROTTLE_INTERVAL, Gate};
use fetchgate_lib::{FetchConfig, FetchContext, RequestKey, Scheduler};
use pretty_assertions::assert_eq;

#[tokio::test(start_paused = true)]
async fn test_search_as_you_type_fetches_last_query_only() {
    let ctx = FetchContext::new(FetchConfig::default());
    let (scheduler, mut inbox) = Scheduler::<String>::new(&ctx);
    let gate = Gate::new();
    let fetched = Arc::new(Mutex::new(Vec::new()));

    for query in ["b", "bl", "bla", "blad", "blade"] {
        let scheduler = scheduler.clone();
        let fetched = fetched.clone();
        gate.debounce("search", DEFAULT_DEBOUNCE_DELAY, move || {
            let key = RequestKey::endpoint("search", [("q", query)]);
            scheduler.schedule(key, move || async move {
                fetched.lock().unwrap().push(query);
                Ok(format!("results for {query}"))
            });
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let delivery = inbox.recv().await.unwrap();
    assert_eq!(delivery.key, RequestKey::endpoint("search", [("q", "blade")]));
    assert_eq!(delivery.outcome, Ok("results for blade".to_string()));
    assert_eq!(*fetched.lock().unwrap(), vec!["blade"]);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_button_is_throttled() {
    let gate = Gate::new();

    let passed = (0..20)
        .filter(|_| gate.throttle("refresh", DEFAULT_THROTTLE_INTERVAL).can_proceed())
        .count();
    assert_eq!(passed, 1);

    let throttle = gate.throttle("refresh", DEFAULT_THROTTLE_INTERVAL);
    tokio::time::advance(throttle.wait_time()).await;
    assert!(throttle.can_proceed());
}
