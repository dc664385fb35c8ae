use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use fetchbox::{DataSource, Resource, ResourceEvent};
use fetchbox_test::{
    ManualClock, RecordingObserver, StubProvider, response, run_local, status, test_service,
};
use http::Method;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn only_the_new_observer_is_welcomed() {
    run_local(async {
        let provider = StubProvider::new();
        let service = test_service(&provider, &ManualClock::default());
        let resource = service.resource("items").unwrap();
        let first = RecordingObserver::new();
        let second = RecordingObserver::new();

        resource.add_observer(first.clone());
        resource.add_observer(second.clone());

        assert_eq!(first.events(), vec![ResourceEvent::ObserverAdded]);
        assert_eq!(second.events(), vec![ResourceEvent::ObserverAdded]);
        assert_eq!(resource.observer_count(), 2);
    })
    .await;
}

#[tokio::test]
async fn failed_load_sequence() {
    run_local(async {
        let provider = StubProvider::new();
        provider.respond(Method::GET, "/v1/items", status(500));
        let service = test_service(&provider, &ManualClock::default());
        let resource = service.resource("items").unwrap();
        let observer = RecordingObserver::new();
        resource.add_observer(observer.clone());

        resource.load().wait().await;

        assert_eq!(
            observer.events_without_progress(),
            vec![
                ResourceEvent::ObserverAdded,
                ResourceEvent::Requested,
                ResourceEvent::Error,
            ]
        );
        assert!(
            observer
                .events()
                .contains(&ResourceEvent::Progress(1.0))
        );
    })
    .await;
}

#[tokio::test]
async fn observers_are_notified_in_insertion_order() {
    run_local(async {
        let provider = StubProvider::new();
        let service = test_service(&provider, &ManualClock::default());
        let resource = service.resource("items").unwrap();
        let order = Rc::new(RefCell::new(Vec::new()));
        for name in ["a", "b", "c"] {
            let order = order.clone();
            resource.add_observer(move |_: &Resource, event: &ResourceEvent| {
                if *event == ResourceEvent::NewData(DataSource::LocalOverride) {
                    order.borrow_mut().push(name);
                }
            });
        }

        resource.override_local_content("x");

        assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
    })
    .await;
}

#[tokio::test]
async fn removed_observer_stops_observing() {
    run_local(async {
        let provider = StubProvider::new();
        let service = test_service(&provider, &ManualClock::default());
        let resource = service.resource("items").unwrap();
        let observer = RecordingObserver::new();
        let id = resource.add_observer(observer.clone());

        assert!(resource.remove_observer(id));
        assert!(observer.stopped());
        assert!(!resource.has_observer(id));
        assert!(!resource.remove_observer(id));

        resource.override_local_content("x");
        assert_eq!(observer.events(), vec![ResourceEvent::ObserverAdded]);
    })
    .await;
}

#[tokio::test]
async fn owned_observer_goes_with_its_owner() {
    run_local(async {
        let provider = StubProvider::new();
        let service = test_service(&provider, &ManualClock::default());
        let resource = service.resource("items").unwrap();
        let owner = Rc::new(());
        let observer = RecordingObserver::new();
        let id = resource.add_observer_owned_by(&owner, observer.clone());
        assert!(resource.has_observer(id));

        drop(owner);
        resource.override_local_content("x");

        assert_eq!(resource.observer_count(), 0);
        assert_eq!(observer.events(), vec![ResourceEvent::ObserverAdded]);
    })
    .await;
}

#[tokio::test]
async fn liveness_check_prunes_observer() {
    run_local(async {
        let provider = StubProvider::new();
        let service = test_service(&provider, &ManualClock::default());
        let resource = service.resource("items").unwrap();
        let alive = Rc::new(Cell::new(true));
        let flag = alive.clone();
        let observer = RecordingObserver::new();
        resource.add_observer_with_liveness(move || flag.get(), observer.clone());

        resource.override_local_content("x");
        alive.set(false);
        resource.override_local_content("y");

        assert_eq!(
            observer.events(),
            vec![
                ResourceEvent::ObserverAdded,
                ResourceEvent::NewData(DataSource::LocalOverride),
            ]
        );
        assert_eq!(resource.observer_count(), 0);
    })
    .await;
}

#[tokio::test]
async fn unobserved_load_is_cancelled() {
    run_local(async {
        let provider = StubProvider::new();
        let service = test_service(&provider, &ManualClock::default());
        let resource = service.resource("items").unwrap();
        let observer = RecordingObserver::new();
        let id = resource.add_observer(observer.clone());
        let load = resource.load();

        resource.cancel_load_if_unobserved();
        assert!(!load.is_completed());

        resource.remove_observer(id);
        resource.cancel_load_if_unobserved();
        assert!(load.response().unwrap().is_cancellation());
        assert!(provider.last_pending().unwrap().is_cancelled());
        assert!(!resource.is_loading());
    })
    .await;
}

#[tokio::test]
async fn delayed_cancel_checks_observers_when_it_fires() {
    run_local(async {
        let provider = StubProvider::new();
        let service = test_service(&provider, &ManualClock::default());
        let kept = service.resource("kept").unwrap();
        let dropped = service.resource("dropped").unwrap();
        let kept_load = kept.load();
        let dropped_load = dropped.load();

        let kept_check = kept.cancel_load_if_unobserved_after(Duration::from_millis(10));
        let dropped_check = dropped.cancel_load_if_unobserved_after(Duration::from_millis(10));
        kept.add_observer(RecordingObserver::new());
        assert!(!dropped_load.is_completed());

        kept_check.await.unwrap();
        dropped_check.await.unwrap();

        assert!(!kept_load.is_completed());
        assert!(dropped_load.response().unwrap().is_cancellation());
    })
    .await;
}

#[tokio::test]
async fn new_data_reaches_every_observer() {
    run_local(async {
        let provider = StubProvider::new();
        provider.respond(Method::GET, "/v1/items", response(200, "text/plain", "items"));
        let service = test_service(&provider, &ManualClock::default());
        let resource = service.resource("items").unwrap();
        let observers = [RecordingObserver::new(), RecordingObserver::new()];
        for observer in &observers {
            resource.add_observer(observer.clone());
        }

        resource.load().wait().await;

        for observer in &observers {
            assert_eq!(
                observer.events_without_progress(),
                vec![
                    ResourceEvent::ObserverAdded,
                    ResourceEvent::Requested,
                    ResourceEvent::NewData(DataSource::Network),
                ]
            );
        }
    })
    .await;
}
