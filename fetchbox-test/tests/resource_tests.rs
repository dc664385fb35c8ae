use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fetchbox::{
    Clock, DEFAULT_CONTENT_TYPE, DataSource, ErrorCause, ErrorKind, FreshnessPolicy, Headers,
    Response, ResourceEvent, StageKey, TransportOutcome,
};
use fetchbox_test::tracing::capture_events;
use fetchbox_test::{
    ManualClock, RecordingObserver, StubProvider, response, run_local, settle, status,
    test_service, test_service_builder,
};
use http::Method;
use pretty_assertions::assert_eq;
use serde_json::json;
use tracing::Level;

fn tagged(body: &str, etag: &str) -> TransportOutcome {
    let headers: Headers = [("Content-Type", "text/plain"), ("ETag", etag)]
        .into_iter()
        .collect();
    TransportOutcome::response(200, headers, body.to_owned())
}

#[tokio::test]
async fn text_response_is_decoded_to_string() {
    run_local(async {
        let provider = StubProvider::new();
        provider.respond(Method::GET, "/v1/greeting", response(200, "text/plain", "eep eep"));
        let service = test_service(&provider, &ManualClock::default());
        let resource = service.resource("greeting").unwrap();
        let observer = RecordingObserver::new();
        resource.add_observer(observer.clone());

        let info = resource.load().wait().await;

        assert!(info.is_new);
        assert_eq!(resource.text().as_deref(), Some("eep eep"));
        assert_eq!(resource.typed_content::<String>(), Some("eep eep".to_owned()));
        assert_eq!(resource.latest_data().unwrap().content_type(), "text/plain");
        assert!(resource.latest_error().is_none());
        assert_eq!(
            observer.events_without_progress(),
            vec![
                ResourceEvent::ObserverAdded,
                ResourceEvent::Requested,
                ResourceEvent::NewData(DataSource::Network),
            ]
        );
    })
    .await;
}

#[tokio::test]
async fn json_response_is_decoded_to_value() {
    run_local(async {
        let provider = StubProvider::new();
        provider.respond(
            Method::GET,
            "/v1/users/1",
            response(200, "application/json", r#"{"name":"eep"}"#),
        );
        let service = test_service(&provider, &ManualClock::default());
        let resource = service.resource("users/1").unwrap();

        resource.load().wait().await;

        assert_eq!(resource.json(), Some(json!({ "name": "eep" })));
    })
    .await;
}

#[tokio::test]
async fn load_if_needed_returns_the_load_in_flight() {
    run_local(async {
        let provider = StubProvider::new();
        let service = test_service(&provider, &ManualClock::default());
        let resource = service.resource("slow").unwrap();

        let first = resource.load_if_needed().unwrap();
        let second = resource.load_if_needed().unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.request_count(), 1);
        assert!(resource.is_loading());
    })
    .await;
}

#[tokio::test]
async fn data_expires_after_expiration_time() {
    run_local(async {
        let provider = StubProvider::new();
        let clock = ManualClock::default();
        provider.respond(Method::GET, "/v1/items", response(200, "text/plain", "items"));
        let service = test_service_builder(&provider, &clock)
            .configure_all(|config| {
                config.policy = FreshnessPolicy::builder()
                    .expiration_time(Duration::from_secs(10))
                    .retry_time(Duration::from_secs(2))
                    .build();
            })
            .build()
            .unwrap();
        let resource = service.resource("items").unwrap();

        resource.load_if_needed().unwrap().wait().await;
        assert_eq!(resource.timestamp(), Some(clock.now()));

        clock.advance(Duration::from_secs(10));
        assert!(resource.load_if_needed().is_none());

        clock.advance(Duration::from_millis(1));
        resource.load_if_needed().unwrap().wait().await;
        assert_eq!(provider.request_count(), 2);
    })
    .await;
}

#[tokio::test]
async fn errors_expire_after_retry_time() {
    run_local(async {
        let provider = StubProvider::new();
        let clock = ManualClock::default();
        provider.respond(Method::GET, "/v1/items", status(500));
        let service = test_service_builder(&provider, &clock)
            .configure_all(|config| {
                config.policy = FreshnessPolicy::builder()
                    .expiration_time(Duration::from_secs(60))
                    .retry_time(Duration::from_secs(2))
                    .build();
            })
            .build()
            .unwrap();
        let resource = service.resource("items").unwrap();

        resource.load().wait().await;
        assert_eq!(resource.latest_error().unwrap().http_status_code, Some(500));

        clock.advance(Duration::from_secs(2));
        assert!(resource.load_if_needed().is_none());

        clock.advance(Duration::from_millis(1));
        assert!(resource.load_if_needed().is_some());
    })
    .await;
}

#[tokio::test]
async fn invalidation_is_consumed_by_a_completed_load() {
    run_local(async {
        let provider = StubProvider::new();
        provider.respond(Method::GET, "/v1/items", response(200, "text/plain", "items"));
        let service = test_service(&provider, &ManualClock::default());
        let resource = service.resource("items").unwrap();

        resource.load().wait().await;
        assert!(resource.load_if_needed().is_none());

        resource.invalidate();
        assert!(resource.is_invalidated());
        assert_eq!(resource.text().as_deref(), Some("items"));

        resource.load_if_needed().unwrap().wait().await;
        assert!(!resource.is_invalidated());
        assert!(resource.load_if_needed().is_none());
    })
    .await;
}

#[tokio::test]
async fn invalidation_survives_a_cancelled_load() {
    run_local(async {
        let provider = StubProvider::new();
        let service = test_service(&provider, &ManualClock::default());
        let resource = service.resource("items").unwrap();
        let observer = RecordingObserver::new();
        resource.add_observer(observer.clone());

        resource.invalidate();
        let load = resource.load_if_needed().unwrap();
        load.cancel();

        assert!(resource.is_invalidated());
        assert!(!resource.is_loading());
        assert!(provider.last_pending().unwrap().is_cancelled());
        assert_eq!(
            observer.events_without_progress(),
            vec![
                ResourceEvent::ObserverAdded,
                ResourceEvent::Requested,
                ResourceEvent::RequestCancelled,
            ]
        );
    })
    .await;
}

#[tokio::test]
async fn cancelled_reload_keeps_fresh_data_invalidated() {
    run_local(async {
        let provider = StubProvider::new();
        provider.respond_once(Method::GET, "/v1/items", response(200, "text/plain", "items"));
        let clock = ManualClock::default();
        let service = test_service_builder(&provider, &clock)
            .configure_all(|config| {
                config.policy.expiration_time = Duration::from_secs(60);
            })
            .build()
            .unwrap();
        let resource = service.resource("items").unwrap();
        resource.load().wait().await;
        assert!(resource.load_if_needed().is_none());

        resource.invalidate();
        resource.load_if_needed().unwrap().cancel();

        assert!(resource.is_invalidated());
        assert_eq!(resource.text().as_deref(), Some("items"));
        let reload = resource.load_if_needed();
        assert!(reload.is_some());
        reload.unwrap().cancel();
    })
    .await;
}

#[tokio::test]
async fn adopting_a_tracked_load_is_a_no_op() {
    run_local(async {
        let provider = StubProvider::new();
        let service = test_service(&provider, &ManualClock::default());
        let resource = service.resource("items").unwrap();
        let observer = RecordingObserver::new();
        resource.add_observer(observer.clone());

        let load = resource.load();
        assert_eq!(resource.load_using(load.clone()), load);
        assert_eq!(resource.load_if_needed(), Some(load.clone()));
        assert_eq!(resource.load_requests().len(), 1);

        provider
            .last_pending()
            .unwrap()
            .respond(response(200, "text/plain", "items"));
        load.wait().await;
        settle().await;

        assert_eq!(
            observer.events_without_progress(),
            vec![
                ResourceEvent::ObserverAdded,
                ResourceEvent::Requested,
                ResourceEvent::NewData(DataSource::Network),
            ]
        );
        assert!(!resource.is_loading());
    })
    .await;
}

#[tokio::test]
async fn not_modified_without_local_data_fails() {
    run_local(async {
        let provider = StubProvider::new();
        provider.respond(Method::GET, "/v1/items", status(304));
        let service = test_service(&provider, &ManualClock::default());
        let resource = service.resource("items").unwrap();

        resource.load().wait().await;

        let error = resource.latest_error().unwrap();
        assert_eq!(error.kind(), ErrorKind::NoLocalDataFor304);
        assert!(matches!(error.cause, Some(ErrorCause::NoLocalDataFor304)));
        assert_eq!(error.http_status_code, Some(304));
        assert!(resource.latest_data().is_none());
    })
    .await;
}

#[tokio::test]
async fn not_modified_keeps_content_and_skips_the_pipeline() {
    run_local(async {
        let provider = StubProvider::new();
        let clock = ManualClock::default();
        let runs = Arc::new(AtomicUsize::new(0));
        let counted = runs.clone();
        let service = test_service_builder(&provider, &clock)
            .configure_all(move |config| {
                let counted = counted.clone();
                config
                    .pipeline_mut()
                    .stage_mut(StageKey::Cleanup)
                    .add(move |response: Response| {
                        counted.fetch_add(1, Ordering::SeqCst);
                        response
                    });
            })
            .build()
            .unwrap();
        provider
            .respond_once(Method::GET, "/v1/items", tagged("eep eep", "\"v1\""))
            .respond_once(Method::GET, "/v1/items", status(304));
        let resource = service.resource("items").unwrap();
        let observer = RecordingObserver::new();
        resource.add_observer(observer.clone());

        resource.load().wait().await;
        let first = resource.latest_data().unwrap();
        observer.clear();

        clock.advance(Duration::from_secs(5));
        let info = resource.load().wait().await;

        assert!(!info.is_new);
        let second = resource.latest_data().unwrap();
        assert!(second.same_content(&first));
        assert_eq!(second.timestamp(), clock.now());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(
            provider.requests()[1].headers.get("If-None-Match"),
            Some("\"v1\"")
        );
        assert!(provider.requests()[0].headers.get("If-None-Match").is_none());
        assert_eq!(
            observer.events_without_progress(),
            vec![ResourceEvent::Requested, ResourceEvent::NotModified]
        );
    })
    .await;
}

#[tokio::test]
async fn error_status_keeps_previous_data() {
    run_local(async {
        let provider = StubProvider::new();
        provider
            .respond_once(Method::GET, "/v1/items", response(200, "text/plain", "items"))
            .respond_once(Method::GET, "/v1/items", response(404, "text/plain", "gone"))
            .respond_once(Method::GET, "/v1/items", status(503));
        let service = test_service(&provider, &ManualClock::default());
        let resource = service.resource("items").unwrap();

        resource.load().wait().await;
        resource.load().wait().await;

        let error = resource.latest_error().unwrap();
        assert_eq!(error.kind(), ErrorKind::HttpStatus);
        assert_eq!(error.http_status_code, Some(404));
        assert!(error.entity.is_some());
        assert_eq!(resource.text().as_deref(), Some("items"));

        resource.load().wait().await;
        assert_eq!(resource.latest_error().unwrap().http_status_code, Some(503));
        assert_eq!(resource.text().as_deref(), Some("items"));
    })
    .await;
}

#[tokio::test]
async fn new_data_clears_the_error() {
    run_local(async {
        let provider = StubProvider::new();
        provider
            .respond_once(Method::GET, "/v1/items", status(500))
            .respond_once(Method::GET, "/v1/items", response(200, "text/plain", "items"));
        let service = test_service(&provider, &ManualClock::default());
        let resource = service.resource("items").unwrap();

        resource.load().wait().await;
        assert!(resource.latest_error().is_some());

        resource.load().wait().await;
        assert!(resource.latest_error().is_none());
        assert_eq!(resource.text().as_deref(), Some("items"));
    })
    .await;
}

#[tokio::test]
async fn wipe_discards_late_responses() {
    let (collector, _guard) = capture_events();
    run_local(async {
        let provider = StubProvider::new();
        let service = test_service(&provider, &ManualClock::default());
        let resource = service.resource("items").unwrap();
        resource.override_local_content("local".to_owned());
        resource.load();
        let pending = provider.last_pending().unwrap();
        let observer = RecordingObserver::new();
        resource.add_observer(observer.clone());

        resource.wipe();

        assert!(resource.latest_data().is_none());
        assert!(!resource.is_loading());
        assert!(pending.is_cancelled());
        assert_eq!(
            observer.events_without_progress(),
            vec![
                ResourceEvent::ObserverAdded,
                ResourceEvent::NewData(DataSource::Wipe),
            ]
        );

        pending.respond(response(200, "text/plain", "late"));
        settle().await;

        assert!(resource.latest_data().is_none());
        assert!(resource.latest_error().is_none());
        assert_eq!(observer.events_without_progress().len(), 2);
    })
    .await;
    collector.assert_logged(Level::DEBUG, "Request already cancelled; dropping late response");
}

#[tokio::test]
async fn concurrent_requests_are_tracked_separately() {
    run_local(async {
        let provider = StubProvider::new();
        let service = test_service(&provider, &ManualClock::default());
        let resource = service.resource("items").unwrap();

        let first = resource.request_with(Method::GET, |descriptor| {
            descriptor.header("X-Attempt", "a");
        });
        let second = resource.request_with(Method::GET, |descriptor| {
            descriptor.header("X-Attempt", "b");
        });
        assert_eq!(resource.all_requests(), vec![first.clone(), second.clone()]);
        assert!(resource.is_requesting());
        assert!(!resource.is_loading());

        let pending = provider.pending();
        assert_eq!(pending[0].request().headers.get("X-Attempt"), Some("a"));
        assert_eq!(pending[1].request().headers.get("X-Attempt"), Some("b"));

        pending[0].respond(response(200, "text/plain", "first"));
        first.wait().await;

        assert_eq!(resource.all_requests(), vec![second]);
        assert!(resource.latest_data().is_none());
    })
    .await;
}

#[tokio::test]
async fn configured_headers_are_sent() {
    run_local(async {
        let provider = StubProvider::new();
        let service = test_service_builder(&provider, &ManualClock::default())
            .configure("items/**", |config| {
                config.headers.insert("Authorization", "Bearer token");
            })
            .build()
            .unwrap();

        service.resource("items/1").unwrap().request(Method::DELETE);
        service.resource("other").unwrap().request(Method::GET);

        let requests = provider.requests();
        assert_eq!(requests[0].method, Method::DELETE);
        assert_eq!(requests[0].headers.get("authorization"), Some("Bearer token"));
        assert!(requests[1].headers.get("authorization").is_none());
    })
    .await;
}

#[tokio::test]
async fn local_content_override_is_binary() {
    run_local(async {
        let provider = StubProvider::new();
        let service = test_service(&provider, &ManualClock::default());
        let resource = service.resource("items").unwrap();
        let observer = RecordingObserver::new();
        resource.add_observer(observer.clone());

        resource.override_local_content("x");

        let entity = resource.latest_data().unwrap();
        assert_eq!(entity.content_type(), DEFAULT_CONTENT_TYPE);
        assert_eq!(resource.text().as_deref(), Some("x"));
        assert_eq!(provider.request_count(), 0);
        assert_eq!(
            observer.events(),
            vec![
                ResourceEvent::ObserverAdded,
                ResourceEvent::NewData(DataSource::LocalOverride),
            ]
        );
    })
    .await;
}

#[tokio::test]
async fn override_with_same_entity_is_not_modified() {
    run_local(async {
        let provider = StubProvider::new();
        let service = test_service(&provider, &ManualClock::default());
        let resource = service.resource("items").unwrap();
        resource.override_local_content("x");
        let observer = RecordingObserver::new();
        resource.add_observer(observer.clone());

        resource.override_local_data(resource.latest_data().unwrap());

        assert_eq!(
            observer.events(),
            vec![ResourceEvent::ObserverAdded, ResourceEvent::NotModified]
        );
    })
    .await;
}
