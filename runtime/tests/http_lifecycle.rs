//! Integration tests for the per-request lifecycle.
//!
//! Every test drives an [`HttpManager`] over scripted mock transports and
//! checks the resulting status, error and hook order.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect
#![allow(clippy::panic)] // Tests can panic

use serde_json::json;
use staged_http_core::{
    HttpRequestArgs, HttpRequestStatus, ResponseBody, ResponseType, StepKind, Transport,
    ValidationError,
};
use staged_http_runtime::{
    GlobalHttpEvents, HttpManager, HttpManagerConfig, ListenerOptions, PipelineStatus,
};
use staged_http_testing::{
    HookRecorder, MockReply, MockTransportFactory, RequestTest, init_test_tracing, test_clock,
};
use std::time::Duration;

fn manager(factory: &MockTransportFactory) -> HttpManager {
    init_test_tracing();
    HttpManager::with_clock(factory.clone(), HttpManagerConfig::default(), test_clock())
}

/// Local and namespace hooks for all four hook stages.
fn observed(request: HttpRequestArgs, recorder: &HookRecorder) -> HttpRequestArgs {
    request
        .on_before_send(recorder.hook("local"))
        .on_success(recorder.hook("local"))
        .on_error(recorder.hook("local"))
        .on_complete(recorder.hook("local"))
}

fn global_events(recorder: &HookRecorder) -> GlobalHttpEvents {
    GlobalHttpEvents::new()
        .on_before_send(recorder.hook("global"))
        .on_success(recorder.hook("global"))
        .on_error(recorder.hook("global"))
        .on_complete(recorder.hook("global"))
}

#[tokio::test]
async fn ok_request_runs_success_path() {
    let factory = MockTransportFactory::new().route("/ok", MockReply::ok("fine"));
    let manager = manager(&factory);
    let recorder = HookRecorder::new();
    manager.add_namespace(None, global_events(&recorder));

    let completed = manager
        .execute_request_async(observed(HttpRequestArgs::get("/ok"), &recorder))
        .await;

    assert!(completed.success());
    assert_eq!(completed.status_code, 200);
    assert_eq!(completed.request_status, HttpRequestStatus::Complete);
    assert!(completed.error.is_none());
    assert_eq!(completed.response, Some(ResponseBody::Text("fine".to_string())));
    assert_eq!(completed.completed_at, test_clock_now());
    assert_eq!(
        recorder.trace(),
        vec![
            "local@http.beforesend",
            "global@http.beforesend",
            "local@http.success",
            "global@http.success",
            "local@http.complete",
            "global@http.complete",
        ]
    );
    assert!(manager.get_all_active_requests().is_empty());
}

#[tokio::test]
async fn only_late_hooks_see_the_transport() {
    let factory = MockTransportFactory::new();
    let manager = manager(&factory);
    let recorder = HookRecorder::new();

    manager
        .execute_request_async(observed(HttpRequestArgs::get("/anything"), &recorder))
        .await;

    let calls = recorder.calls();
    assert!(!calls[0].has_transport);
    assert!(calls[1..].iter().all(|call| call.has_transport && call.status_code == 200));
}

#[tokio::test]
async fn not_found_fails_through_error_hooks() {
    let factory = MockTransportFactory::new().route("/missing", MockReply::with_status(404, "nope"));
    let manager = manager(&factory);
    let recorder = HookRecorder::new();
    manager.add_namespace(None, global_events(&recorder));

    let completed = manager
        .execute_request_async(observed(HttpRequestArgs::get("/missing"), &recorder))
        .await;

    assert!(!completed.success());
    assert_eq!(completed.status_code, 404);
    assert_eq!(completed.request_status, HttpRequestStatus::Failed);
    let error = completed.error.expect("404 should record an error");
    assert_eq!(error.message(), "HTTP Error: Server Returned 404");
    assert_eq!(error.step_kind(), StepKind::Job);
    assert_eq!(error.step_key(), "http.send");

    assert_eq!(
        recorder.keys(),
        vec![
            "http.beforesend",
            "http.beforesend",
            "http.error",
            "http.error",
            "http.complete",
            "http.complete",
        ]
    );
    let error_call = &recorder.calls()[2];
    assert_eq!(error_call.status, HttpRequestStatus::Failed);
    assert_eq!(error_call.error.as_deref(), Some("HTTP Error: Server Returned 404"));
}

#[tokio::test]
async fn not_modified_counts_as_success() {
    RequestTest::new()
        .given_route("/cached", MockReply::with_status(304, ""))
        .when_request(HttpRequestArgs::get("/cached"))
        .then_completed(|completed| {
            assert!(completed.success());
            assert_eq!(completed.request_status, HttpRequestStatus::Complete);
        })
        .run()
        .await;
}

#[tokio::test]
async fn slow_request_times_out() {
    let factory = MockTransportFactory::new().route("/slow", MockReply::Hang);
    let manager = manager(&factory);
    let recorder = HookRecorder::new();

    let completed = manager
        .execute_request_async(observed(
            HttpRequestArgs::get("/slow").with_timeout(Duration::from_millis(50)),
            &recorder,
        ))
        .await;

    assert_eq!(completed.request_status, HttpRequestStatus::TimedOut);
    assert_eq!(
        completed.error.unwrap().message(),
        "HTTP Error: Request timed out after 50 milliseconds."
    );
    assert_eq!(
        recorder.keys(),
        vec!["http.beforesend", "http.error", "http.complete"]
    );
}

#[tokio::test]
async fn default_timeout_applies_when_request_has_none() {
    let factory = MockTransportFactory::new().route("/slow", MockReply::Hang);
    let manager = HttpManager::with_clock(
        factory.clone(),
        HttpManagerConfig::default().with_default_timeout(Duration::from_millis(30)),
        test_clock(),
    );

    let completed = manager.execute_request_async(HttpRequestArgs::get("/slow")).await;

    assert_eq!(completed.request_status, HttpRequestStatus::TimedOut);
    assert_eq!(
        completed.error.unwrap().message(),
        "HTTP Error: Request timed out after 30 milliseconds."
    );
    assert_eq!(factory.last().unwrap().timeout(), Some(Duration::from_millis(30)));
}

#[tokio::test]
async fn network_error_fails_with_unknown_error() {
    let factory = MockTransportFactory::new().route("/down", MockReply::NetworkError);
    let manager = manager(&factory);
    let recorder = HookRecorder::new();

    let completed = manager
        .execute_request_async(observed(HttpRequestArgs::get("/down"), &recorder))
        .await;

    assert_eq!(completed.request_status, HttpRequestStatus::Failed);
    assert_eq!(completed.status_code, 0);
    assert_eq!(completed.error.unwrap().message(), "HTTP Error: An unknown error occurred.");
    assert_eq!(recorder.count("http.error"), 1);
}

#[tokio::test]
async fn unclassified_end_skips_error_hooks() {
    let factory = MockTransportFactory::new().route("/dropped", MockReply::Drop);
    let manager = manager(&factory);
    let recorder = HookRecorder::new();

    let completed = manager
        .execute_request_async(observed(HttpRequestArgs::get("/dropped"), &recorder))
        .await;

    assert_eq!(completed.request_status, HttpRequestStatus::Aborted);
    assert_eq!(completed.error.unwrap().message(), "HTTP Error: An unknown error occurred.");
    assert_eq!(recorder.keys(), vec!["http.beforesend", "http.complete"]);
}

#[tokio::test]
async fn transport_construction_failure_is_an_exception() {
    let factory = MockTransportFactory::new().failing();
    let manager = manager(&factory);
    let recorder = HookRecorder::new();

    let completed = manager
        .execute_request_async(observed(HttpRequestArgs::get("/ok"), &recorder))
        .await;

    assert_eq!(completed.request_status, HttpRequestStatus::Exception);
    let error = completed.error.unwrap();
    assert_eq!(error.message(), "Failed to construct transport.");
    assert_eq!(error.step_key(), "http.open");
    assert!(error.cause().is_some());
    assert_eq!(recorder.keys(), vec!["http.beforesend", "http.error", "http.complete"]);
}

#[tokio::test]
async fn missing_url_fails_to_open() {
    let factory = MockTransportFactory::new();
    let manager = manager(&factory);

    let completed = manager.execute_request_async(HttpRequestArgs::new()).await;

    assert_eq!(completed.request_status, HttpRequestStatus::Exception);
    assert_eq!(completed.error.unwrap().message(), "Failed to open request.");
    assert!(!factory.last().unwrap().was_sent());
}

#[tokio::test]
async fn request_settings_reach_the_transport() {
    RequestTest::new()
        .given_route("/orders", MockReply::with_status(201, r#"{"id":7}"#))
        .when_request(
            HttpRequestArgs::post("/orders")
                .with_header("X-Trace", "abc")
                .unwrap()
                .with_header("X-Retry", 2u64)
                .unwrap()
                .with_content_type("application/json")
                .unwrap()
                .with_body(r#"{"item":1}"#)
                .include_credentials(true)
                .with_response_type(ResponseType::Json),
        )
        .then_completed(|completed| {
            assert!(completed.success());
            assert_eq!(completed.response, Some(ResponseBody::Json(json!({"id": 7}))));
        })
        .then_transport(|transport| {
            assert_eq!(transport.method().as_deref(), Some("POST"));
            assert_eq!(transport.header("content-type").as_deref(), Some("application/json"));
            assert_eq!(transport.header("x-trace").as_deref(), Some("abc"));
            assert_eq!(transport.header("x-retry").as_deref(), Some("2"));
            assert!(transport.with_credentials());
            assert_eq!(transport.response_type(), Some(ResponseType::Json));
            assert_eq!(transport.sent_body(), Some(br#"{"item":1}"#.to_vec()));
        })
        .run()
        .await;
}

#[tokio::test]
async fn rejected_headers_are_skipped() {
    let factory = MockTransportFactory::new().reject_header("X-Bad");
    let manager = manager(&factory);

    let completed = manager
        .execute_request_async(
            HttpRequestArgs::get("/ok")
                .with_header("X-Bad", "1")
                .unwrap()
                .with_header("X-Good", "2")
                .unwrap(),
        )
        .await;

    assert!(completed.success());
    assert_eq!(
        factory.last().unwrap().headers(),
        vec![("X-Good".to_string(), "2".to_string())]
    );
}

#[tokio::test]
async fn unknown_response_type_sets_no_hint() {
    RequestTest::new()
        .when_request(HttpRequestArgs::get("/plain"))
        .then_transport(|transport| {
            assert_eq!(transport.response_type(), None);
            assert_eq!(transport.header("content-type"), None);
        })
        .run()
        .await;
}

#[tokio::test]
async fn context_flows_between_stages() {
    let factory = MockTransportFactory::new();
    let manager = manager(&factory);
    let recorder = HookRecorder::new();

    let request = HttpRequestArgs::get("/ok")
        .with_context(json!({"step": 0}))
        .on_before_send(recorder.hook_with("before", |event| {
            event.set_context(json!({"step": 1}));
            Ok(())
        }))
        .on_success(recorder.hook_with("success", |event| {
            let step = event.context()["step"].as_i64().unwrap();
            event.context_mut()["step"] = json!(step + 1);
            Ok(())
        }))
        .on_complete(recorder.hook("complete"));

    let completed = manager.execute_request_async(request).await;

    let contexts: Vec<_> = recorder.calls().into_iter().map(|call| call.context).collect();
    assert_eq!(contexts, vec![json!({"step": 0}), json!({"step": 1}), json!({"step": 2})]);
    assert_eq!(completed.request.context(), &json!({"step": 2}));
}

#[tokio::test]
async fn cancel_in_before_send_skips_the_transport() {
    let factory = MockTransportFactory::new();
    let manager = manager(&factory);
    let recorder = HookRecorder::new();

    let request = observed(HttpRequestArgs::get("/ok"), &recorder).on_before_send(recorder.hook_with(
        "cancel",
        |event| {
            event.cancel();
            Ok(())
        },
    ));

    let completed = manager.execute_request_async(request).await;

    assert_eq!(completed.request_status, HttpRequestStatus::Canceled);
    assert!(completed.error.is_none());
    assert!(factory.created().is_empty());
    assert_eq!(recorder.keys(), vec!["http.beforesend", "http.complete"]);
}

#[tokio::test]
async fn cancel_in_flight_aborts_the_transport() {
    let factory = MockTransportFactory::new().route("/hang", MockReply::Hang);
    let manager = manager(&factory);
    let recorder = HookRecorder::new();

    let run = tokio::spawn(
        manager.execute_request_async(observed(HttpRequestArgs::get("/hang"), &recorder)),
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    let active = manager.get_all_active_requests();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].request_status, HttpRequestStatus::Sent);
    assert!(active[0].cancel());

    let completed = run.await.unwrap();
    assert_eq!(completed.request_status, HttpRequestStatus::Canceled);
    assert!(factory.last().unwrap().was_aborted());
    assert_eq!(recorder.keys(), vec!["http.beforesend", "http.complete"]);
    assert!(!active[0].cancel());
}

#[tokio::test]
async fn failing_hook_routes_to_completion() {
    let factory = MockTransportFactory::new();
    let manager = manager(&factory);
    let recorder = HookRecorder::new();
    manager.add_namespace(None, global_events(&recorder));

    let request = observed(HttpRequestArgs::get("/ok"), &recorder)
        .on_success(recorder.hook_with("local", |_| Err("bad payload".into())));

    let completed = manager.execute_request_async(request).await;

    assert_eq!(completed.request_status, HttpRequestStatus::Exception);
    let error = completed.error.unwrap();
    assert_eq!(error.step_key(), "http.success");
    assert_eq!(error.step_kind(), StepKind::Event);
    assert_eq!(error.cause(), Some("bad payload"));
    assert_eq!(
        recorder.trace(),
        vec![
            "local@http.beforesend",
            "global@http.beforesend",
            "local@http.success",
            "local@http.complete",
            "global@http.complete",
        ]
    );
}

#[tokio::test]
async fn panicking_hook_is_contained() {
    let factory = MockTransportFactory::new();
    let manager = manager(&factory);
    let recorder = HookRecorder::new();

    let request = observed(HttpRequestArgs::get("/ok"), &recorder)
        .on_before_send(|_| panic!("hook exploded"));

    let completed = manager.execute_request_async(request).await;

    assert_eq!(completed.request_status, HttpRequestStatus::Exception);
    assert!(completed.error.unwrap().message().contains("hook exploded"));
    assert!(factory.created().is_empty());
    assert_eq!(recorder.keys(), vec!["http.complete"]);
}

#[tokio::test]
async fn failing_complete_hook_does_not_repeat_completion() {
    let factory = MockTransportFactory::new();
    let manager = manager(&factory);
    let recorder = HookRecorder::new();
    manager.add_namespace(
        None,
        GlobalHttpEvents::new()
            .on_complete(recorder.hook("global"))
            .on_all_complete(recorder.batch_hook("batch")),
    );

    let request = HttpRequestArgs::get("/ok")
        .on_complete(recorder.hook_with("local", |_| Err("late failure".into())));

    let completed = manager.execute_request_async(request).await;

    assert_eq!(completed.request_status, HttpRequestStatus::Exception);
    assert_eq!(recorder.trace(), vec!["local@http.complete", "global@http.complete"]);
    assert_eq!(recorder.batches().len(), 1);
}

#[tokio::test]
async fn end_on_handler_crash_still_finishes_bookkeeping() {
    let factory = MockTransportFactory::new();
    let manager = HttpManager::with_clock(
        factory.clone(),
        HttpManagerConfig::default().with_end_on_handler_crash(true),
        test_clock(),
    );
    let recorder = HookRecorder::new();
    manager.add_namespace(None, GlobalHttpEvents::new().on_all_complete(recorder.batch_hook("batch")));

    let request = observed(HttpRequestArgs::get("/ok"), &recorder)
        .on_before_send(|_| Err("stop here".into()));

    let completed = manager.execute_request_async(request).await;

    assert_eq!(completed.request_status, HttpRequestStatus::Exception);
    assert!(recorder.keys().is_empty());
    assert_eq!(recorder.batches().len(), 1);
    assert!(manager.get_all_active_requests().is_empty());
}

#[tokio::test]
async fn stop_propagation_silences_the_rest_of_the_stage() {
    let factory = MockTransportFactory::new();
    let manager = manager(&factory);
    let recorder = HookRecorder::new();
    manager.add_namespace(None, global_events(&recorder));
    manager.add_event_listener("http.success", recorder.hook("listener"), ListenerOptions::default());
    manager.add_event_listener("http.complete", recorder.hook("listener"), ListenerOptions::default());

    let request = observed(HttpRequestArgs::get("/ok"), &recorder).on_success(recorder.hook_with(
        "local",
        |event| {
            event.stop_propagation();
            assert!(event.is_propagation_stopped());
            Ok(())
        },
    ));

    manager.execute_request_async(request).await;

    assert_eq!(
        recorder.trace(),
        vec![
            "local@http.beforesend",
            "global@http.beforesend",
            "local@http.success",
            "local@http.complete",
            "global@http.complete",
            "listener@http.complete",
        ]
    );
}

#[tokio::test]
async fn pause_holds_request_until_force_resumed() {
    let factory = MockTransportFactory::new();
    let manager = manager(&factory);
    let recorder = HookRecorder::new();

    let request = HttpRequestArgs::get("/ok")
        .on_before_send(recorder.hook_with("pause", |event| {
            event.pause();
            Ok(())
        }))
        .on_complete(recorder.hook("complete"));

    let run = tokio::spawn(manager.execute_request_async(request));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let active = manager.get_active_requests(None);
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].pipeline_status, PipelineStatus::Paused);
    assert_eq!(active[0].request_status, HttpRequestStatus::NotStarted);
    assert!(factory.created().is_empty());

    assert!(active[0].force_resume());
    let completed = run.await.unwrap();

    assert!(completed.success());
    assert_eq!(recorder.keys(), vec!["http.beforesend", "http.complete"]);
    assert!(!active[0].force_resume());
}

#[tokio::test]
async fn cancel_while_paused_skips_remaining_steps() {
    let factory = MockTransportFactory::new();
    let manager = manager(&factory);
    let recorder = HookRecorder::new();
    manager.add_namespace(None, global_events(&recorder));

    let request = HttpRequestArgs::get("/ok").on_before_send(recorder.hook_with("pause", |event| {
        event.pause();
        Ok(())
    }));

    let run = tokio::spawn(manager.execute_request_async(request));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let active = manager.get_active_requests(None);
    assert_eq!(active[0].pipeline_status, PipelineStatus::Paused);
    assert!(active[0].cancel());
    assert!(active[0].force_resume());
    let completed = run.await.unwrap();

    assert_eq!(completed.request_status, HttpRequestStatus::Canceled);
    assert_eq!(recorder.trace(), vec!["pause@http.beforesend", "global@http.complete"]);
    assert!(factory.created().is_empty());
}

#[tokio::test]
async fn cancel_while_listener_paused_never_opens_transport() {
    let factory = MockTransportFactory::new();
    let manager = manager(&factory);
    let recorder = HookRecorder::new();
    manager.add_event_listener(
        "http.beforesend",
        recorder.hook_with("listener", |event| {
            event.pause();
            Ok(())
        }),
        ListenerOptions::default(),
    );

    let request = HttpRequestArgs::get("/ok").on_complete(recorder.hook("local"));
    let run = tokio::spawn(manager.execute_request_async(request));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let active = manager.get_active_requests(None);
    assert_eq!(active[0].pipeline_status, PipelineStatus::Paused);
    assert!(active[0].cancel());
    assert!(active[0].force_resume());
    let completed = run.await.unwrap();

    assert_eq!(completed.request_status, HttpRequestStatus::Canceled);
    assert_eq!(recorder.trace(), vec!["listener@http.beforesend", "local@http.complete"]);
    assert!(factory.created().is_empty());
}

#[tokio::test]
async fn callback_submission_reports_completion() {
    let factory = MockTransportFactory::new();
    let manager = manager(&factory);
    let (sender, receiver) = tokio::sync::oneshot::channel();

    let request_id = manager.execute_request(HttpRequestArgs::get("/ok"), move |completed| {
        let _ = sender.send(completed);
    });

    let completed = receiver.await.unwrap();
    assert_eq!(completed.request_id, request_id);
    assert!(completed.success());
}

#[tokio::test]
async fn json_descriptions_are_validated_then_run() {
    let factory = MockTransportFactory::new().route("/users", MockReply::json(&json!([{"id": 1}])));
    let manager = manager(&factory);

    let completed = manager
        .execute_json(&json!({
            "url": "/users",
            "method": "get",
            "responseType": "json",
            "headers": [{"key": "X-Page", "value": 2}, {"key": "bad key", "value": 1}],
            "context": {"page": 2},
        }))
        .await
        .unwrap();

    assert!(completed.success());
    assert_eq!(completed.response, Some(ResponseBody::Json(json!([{"id": 1}]))));
    assert_eq!(completed.request.context(), &json!({"page": 2}));
    assert_eq!(factory.last().unwrap().header("X-Page").as_deref(), Some("2"));

    let invalid = manager.execute_json(&json!({"url": 42})).await;
    assert_eq!(
        invalid.unwrap_err(),
        ValidationError::WrongType {
            field: "url",
            expected: "a string"
        }
    );
    assert_eq!(factory.created().len(), 1);
}

#[tokio::test]
async fn dropping_the_future_releases_the_request() {
    let factory = MockTransportFactory::new().route("/hang", MockReply::Hang);
    let manager = manager(&factory);
    let recorder = HookRecorder::new();
    manager.add_namespace(None, GlobalHttpEvents::new().on_all_complete(recorder.batch_hook("batch")));

    let run = manager.execute_request_async(HttpRequestArgs::get("/hang"));
    assert_eq!(manager.get_all_active_requests().len(), 1);

    let _ = tokio::time::timeout(Duration::from_millis(20), run).await;

    assert!(manager.get_all_active_requests().is_empty());
    assert_eq!(recorder.batches().len(), 1);
    assert!(factory.last().unwrap().was_aborted());
}

fn test_clock_now() -> chrono::DateTime<chrono::Utc> {
    use staged_http_core::environment::Clock;
    test_clock().now()
}
