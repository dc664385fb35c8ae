use std::sync::Arc;

use fetchbox::pipeline::{EntityCache, MemoryCache};
use fetchbox::{DataSource, ResourceEvent, Service, StageKey};
use fetchbox_test::{
    ManualClock, RecordingObserver, StubProvider, response, run_local, settle,
    test_service_builder,
};
use http::Method;
use pretty_assertions::assert_eq;

fn cached_service(provider: &StubProvider, cache: &Arc<MemoryCache>) -> Service {
    let cache: Arc<dyn EntityCache> = cache.clone();
    test_service_builder(provider, &ManualClock::default())
        .configure_all(move |config| {
            config
                .pipeline_mut()
                .stage_mut(StageKey::Decoding)
                .set_cache(Some(cache.clone()));
        })
        .build()
        .unwrap()
}

#[tokio::test]
async fn load_writes_cache_and_new_resource_reads_it() {
    run_local(async {
        let cache = Arc::new(MemoryCache::new());
        let provider = StubProvider::new();
        provider.respond(Method::GET, "/v1/items", response(200, "text/plain", "items"));

        let first = cached_service(&provider, &cache);
        first.resource("items").unwrap().load().wait().await;
        assert_eq!(cache.len(), 1);

        let offline = StubProvider::new();
        let second = cached_service(&offline, &cache);
        let resource = second.resource("items").unwrap();
        let observer = RecordingObserver::new();
        resource.add_observer(observer.clone());
        settle().await;

        assert_eq!(resource.text().as_deref(), Some("items"));
        assert_eq!(
            observer.events(),
            vec![
                ResourceEvent::ObserverAdded,
                ResourceEvent::NewData(DataSource::Cache),
            ]
        );
        assert_eq!(offline.request_count(), 0);
    })
    .await;
}

#[tokio::test]
async fn non_get_requests_are_not_cached() {
    run_local(async {
        let cache = Arc::new(MemoryCache::new());
        let provider = StubProvider::new();
        provider.respond(Method::POST, "/v1/items", response(200, "text/plain", "created"));
        let service = cached_service(&provider, &cache);

        service
            .resource("items")
            .unwrap()
            .request(Method::POST)
            .wait()
            .await;

        assert!(cache.is_empty());
    })
    .await;
}

#[tokio::test]
async fn wipe_removes_cached_entry() {
    run_local(async {
        let cache = Arc::new(MemoryCache::new());
        let provider = StubProvider::new();
        provider.respond(Method::GET, "/v1/items", response(200, "text/plain", "items"));
        let service = cached_service(&provider, &cache);
        let resource = service.resource("items").unwrap();

        resource.load().wait().await;
        assert_eq!(cache.len(), 1);

        resource.wipe();
        settle().await;

        assert!(cache.is_empty());
        assert!(resource.latest_data().is_none());
    })
    .await;
}

#[tokio::test]
async fn wipe_before_cache_read_completes_discards_it() {
    run_local(async {
        let cache = Arc::new(MemoryCache::new());
        let provider = StubProvider::new();
        provider.respond(Method::GET, "/v1/items", response(200, "text/plain", "items"));
        cached_service(&provider, &cache)
            .resource("items")
            .unwrap()
            .load()
            .wait()
            .await;

        let service = cached_service(&StubProvider::new(), &cache);
        let resource = service.resource("items").unwrap();
        let observer = RecordingObserver::new();
        resource.add_observer(observer.clone());
        resource.wipe();
        settle().await;

        assert!(resource.latest_data().is_none());
        assert_eq!(
            observer.events(),
            vec![
                ResourceEvent::ObserverAdded,
                ResourceEvent::NewData(DataSource::Wipe),
            ]
        );
    })
    .await;
}

#[tokio::test]
async fn local_data_wins_over_a_late_cache_read() {
    run_local(async {
        let cache = Arc::new(MemoryCache::new());
        let provider = StubProvider::new();
        provider.respond(Method::GET, "/v1/items", response(200, "text/plain", "stale"));
        cached_service(&provider, &cache)
            .resource("items")
            .unwrap()
            .load()
            .wait()
            .await;

        let service = cached_service(&StubProvider::new(), &cache);
        let resource = service.resource("items").unwrap();
        resource.override_local_content("fresh".to_owned());
        settle().await;

        assert_eq!(resource.text().as_deref(), Some("fresh"));
    })
    .await;
}
