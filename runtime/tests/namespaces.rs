//! Namespace batching, global hooks and bubbling listeners.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use futures::future::join_all;
use proptest::prelude::*;
use staged_http_core::HttpRequestArgs;
use staged_http_runtime::{GlobalHttpEvents, HttpManager, HttpManagerConfig, ListenerOptions};
use staged_http_testing::{
    HookRecorder, MockReply, MockTransportFactory, init_test_tracing, properties, test_clock,
};
use std::time::Duration;

fn manager(factory: &MockTransportFactory) -> HttpManager {
    init_test_tracing();
    HttpManager::with_clock(factory.clone(), HttpManagerConfig::default(), test_clock())
}

#[tokio::test]
async fn concurrent_requests_close_one_batch_per_namespace() {
    let factory = MockTransportFactory::new()
        .route("/fast", MockReply::ok("a").delayed(Duration::from_millis(10)))
        .route("/slow", MockReply::ok("b").delayed(Duration::from_millis(40)))
        .route("/other", MockReply::ok("c"));
    let manager = manager(&factory);
    let recorder = HookRecorder::new();
    manager.add_namespace(Some("x"), GlobalHttpEvents::new().on_all_complete(recorder.batch_hook("x")));
    manager.add_namespace(Some("y"), GlobalHttpEvents::new().on_all_complete(recorder.batch_hook("y")));

    let slow = manager.execute_request_async(HttpRequestArgs::get("/slow").with_namespace("x"));
    let fast = manager.execute_request_async(HttpRequestArgs::get("/fast").with_namespace("x"));
    let other = manager.execute_request_async(HttpRequestArgs::get("/other").with_namespace("y"));

    assert_eq!(manager.get_all_active_requests().len(), 3);
    assert_eq!(manager.get_active_requests(Some("x")).len(), 2);

    let (slow, fast, other) = tokio::join!(slow, fast, other);

    let batches = recorder.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].label, "y");
    assert_eq!(batches[0].request_ids, vec![other.request_id]);
    assert_eq!(batches[1].label, "x");
    assert_eq!(batches[1].request_ids, vec![fast.request_id, slow.request_id]);
    assert!(manager.get_all_active_requests().is_empty());
}

#[tokio::test]
async fn sequential_requests_close_separate_batches() {
    let factory = MockTransportFactory::new();
    let manager = manager(&factory);
    let recorder = HookRecorder::new();
    manager.add_namespace(None, GlobalHttpEvents::new().on_all_complete(recorder.batch_hook("batch")));

    let first = manager.execute_request_async(HttpRequestArgs::get("/a")).await;
    let second = manager.execute_request_async(HttpRequestArgs::get("/b")).await;

    let batches = recorder.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].request_ids, vec![first.request_id]);
    assert_eq!(batches[1].request_ids, vec![second.request_id]);
}

#[tokio::test]
async fn failed_requests_still_join_their_batch() {
    let factory = MockTransportFactory::new()
        .route("/ok", MockReply::ok(""))
        .route("/bad", MockReply::with_status(500, ""))
        .route("/down", MockReply::NetworkError);
    let manager = manager(&factory);
    let recorder = HookRecorder::new();
    manager.add_namespace(None, GlobalHttpEvents::new().on_all_complete(recorder.batch_hook("batch")));

    let runs: Vec<_> = ["/ok", "/bad", "/down"]
        .into_iter()
        .map(|url| manager.execute_request_async(HttpRequestArgs::get(url)))
        .collect();
    let completed = join_all(runs).await;

    let batches = recorder.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].request_ids.len(), 3);
    assert_eq!(completed.iter().filter(|c| c.success()).count(), 1);
}

#[tokio::test]
async fn failing_batch_hook_does_not_disturb_later_batches() {
    let factory = MockTransportFactory::new();
    let manager = manager(&factory);
    manager.add_namespace(None, GlobalHttpEvents::new().on_all_complete(|_| Err("boom".into())));

    let first = manager.execute_request_async(HttpRequestArgs::get("/a")).await;
    assert!(first.success());

    let recorder = HookRecorder::new();
    manager.add_namespace(None, GlobalHttpEvents::new().on_all_complete(recorder.batch_hook("batch")));
    let second = manager.execute_request_async(HttpRequestArgs::get("/b")).await;

    assert!(second.success());
    assert_eq!(recorder.batches()[0].request_ids, vec![second.request_id]);
}

#[tokio::test]
async fn namespace_hooks_are_isolated() {
    let factory = MockTransportFactory::new();
    let manager = manager(&factory);
    let recorder = HookRecorder::new();
    manager.add_namespace(None, GlobalHttpEvents::new().on_success(recorder.hook("default")));
    manager.add_namespace(Some("api"), GlobalHttpEvents::new().on_success(recorder.hook("api")));

    manager.execute_request_async(HttpRequestArgs::get("/a")).await;
    manager
        .execute_request_async(HttpRequestArgs::get("/b").with_namespace("api"))
        .await;
    manager
        .execute_request_async(HttpRequestArgs::get("/c").with_namespace("fresh"))
        .await;

    assert_eq!(recorder.trace(), vec!["default@http.success", "api@http.success"]);
    assert_eq!(
        manager.get_namespace(Some("fresh")).key(),
        Some("fresh"),
    );
}

#[tokio::test]
async fn removed_namespace_events_stop_firing() {
    let factory = MockTransportFactory::new();
    let manager = manager(&factory);
    let recorder = HookRecorder::new();
    manager.add_namespace(Some("api"), GlobalHttpEvents::new().on_complete(recorder.hook("api")));

    manager
        .execute_request_async(HttpRequestArgs::get("/a").with_namespace("api"))
        .await;
    assert!(manager.remove_namespace_events(Some("api")));
    manager
        .execute_request_async(HttpRequestArgs::get("/b").with_namespace("api"))
        .await;

    assert_eq!(recorder.count("http.complete"), 1);
    assert!(!manager.remove_namespace_events(Some("never")));
}

#[tokio::test]
async fn listeners_run_by_priority_after_the_namespace_hook() {
    let factory = MockTransportFactory::new();
    let manager = manager(&factory);
    let recorder = HookRecorder::new();
    manager.add_namespace(None, GlobalHttpEvents::new().on_success(recorder.hook("global")));
    manager.add_event_listener("http.success", recorder.hook("low"), ListenerOptions::default());
    manager.add_event_listener(
        "http.success",
        recorder.hook("high"),
        ListenerOptions::default().with_priority(10),
    );
    manager.add_event_listener("http.success", recorder.hook("once"), ListenerOptions::default().once());

    manager.execute_request_async(HttpRequestArgs::get("/a")).await;
    manager.execute_request_async(HttpRequestArgs::get("/b")).await;

    assert_eq!(
        recorder.trace(),
        vec![
            "global@http.success",
            "high@http.success",
            "low@http.success",
            "once@http.success",
            "global@http.success",
            "high@http.success",
            "low@http.success",
        ]
    );
}

#[tokio::test]
async fn listeners_can_be_removed_by_id_or_name() {
    let factory = MockTransportFactory::new();
    let manager = manager(&factory);
    let recorder = HookRecorder::new();
    let handle = manager.add_event_listener("http.complete", recorder.hook("a"), ListenerOptions::default());
    manager.add_event_listener("http.complete", recorder.hook("b"), ListenerOptions::default());
    manager.add_namespace_event_listener(
        Some("api"),
        "http.complete",
        recorder.hook("api"),
        ListenerOptions::default(),
    );

    assert!(manager.remove_event_listener(&handle.id.to_string()));
    manager.execute_request_async(HttpRequestArgs::get("/a")).await;
    assert_eq!(recorder.trace(), vec!["b@http.complete"]);

    assert!(manager.remove_event_listener("http.complete"));
    assert!(!manager.remove_event_listener("http.complete"));
    manager.execute_request_async(HttpRequestArgs::get("/b")).await;
    manager
        .execute_request_async(HttpRequestArgs::get("/c").with_namespace("api"))
        .await;

    assert_eq!(recorder.trace(), vec!["b@http.complete", "api@http.complete"]);
    assert!(manager.remove_namespace_event_listener(Some("api"), "http.complete"));
}

#[tokio::test]
async fn failing_listener_is_a_handler_crash() {
    let factory = MockTransportFactory::new();
    let manager = manager(&factory);
    let recorder = HookRecorder::new();
    manager.add_event_listener(
        "http.success",
        |_| Err("listener failed".into()),
        ListenerOptions::default(),
    );

    let completed = manager
        .execute_request_async(
            HttpRequestArgs::get("/a")
                .on_error(recorder.hook("local"))
                .on_complete(recorder.hook("local")),
        )
        .await;

    let error = completed.error.unwrap();
    assert_eq!(error.step_key(), "http.success");
    assert_eq!(error.cause(), Some("listener failed"));
    assert_eq!(recorder.keys(), vec!["http.complete"]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn one_wave_is_one_batch(replies in proptest::collection::vec(properties::finite_reply(), 1..6)) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let mut factory = MockTransportFactory::new();
            for (index, reply) in replies.iter().enumerate() {
                factory = factory.route(format!("/r{index}"), reply.clone());
            }
            let manager = HttpManager::with_clock(factory, HttpManagerConfig::default(), test_clock());
            let recorder = HookRecorder::new();
            manager.add_namespace(None, GlobalHttpEvents::new().on_all_complete(recorder.batch_hook("batch")));

            let runs: Vec<_> = (0..replies.len())
                .map(|index| manager.execute_request_async(HttpRequestArgs::get(format!("/r{index}"))))
                .collect();
            let completed = join_all(runs).await;

            let batches = recorder.batches();
            prop_assert_eq!(batches.len(), 1);
            prop_assert_eq!(batches[0].request_ids.len(), replies.len());
            for request in &completed {
                prop_assert!(request.request_status.is_terminal());
                prop_assert_eq!(
                    request.success(),
                    staged_http_core::is_success_status(request.status_code)
                );
                prop_assert!(batches[0].request_ids.contains(&request.request_id));
            }
            prop_assert!(manager.get_all_active_requests().is_empty());
            Ok(())
        })?;
    }
}
