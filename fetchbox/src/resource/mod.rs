//! Addressable, stateful cache entries.
//!
//! A [`Resource`] is the local view of one URL: the latest data, the latest
//! error, and the requests in flight for it. There is at most one live
//! resource per URL and [`Service`](crate::Service); clones of the handle
//! share state.
//!
//! ```text
//!           load() / load_if_needed()
//! Resource ───────────────────────────▶ Request ──▶ networking provider
//!    ▲                                     │
//!    └──── latest_data / latest_error ◀────┘ (on completion)
//!                  │
//!                  ▼
//!              observers
//! ```
//!
//! Generic [`request`](Resource::request)s never change resource state;
//! only loads do.

mod observer;
mod state;

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fetchbox_core::{Entity, RequestDescriptor, RequestError, Response, ResponseInfo};
use http::Method;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use url::Url;

pub use observer::{DataSource, ObserverId, ResourceEvent, ResourceObserver};

use crate::config::Configuration;
use crate::error::ServiceError;
use crate::request::network::NetworkRecipe;
use crate::request::{Request, RequestPhase};
use crate::service::{Service, child_url};
use observer::{ObserverTable, SharedObserver};
use state::ResourceState;

pub(crate) struct ResourceInner {
    url: Url,
    service: Service,
    state: RefCell<ResourceState>,
    observers: RefCell<ObserverTable>,
}

/// Handle to the cached state of one URL.
#[derive(Clone)]
pub struct Resource {
    inner: Rc<ResourceInner>,
}

impl Resource {
    pub(crate) fn new(service: Service, url: Url) -> Resource {
        Resource {
            inner: Rc::new(ResourceInner {
                url,
                service,
                state: RefCell::new(ResourceState::default()),
                observers: RefCell::new(ObserverTable::default()),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<ResourceInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(inner: &Weak<ResourceInner>) -> Option<Resource> {
        inner.upgrade().map(|inner| Resource { inner })
    }

    /// The resource's URL.
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// The service that owns this resource.
    pub fn service(&self) -> &Service {
        &self.inner.service
    }

    /// Configuration for requests with `method`.
    pub fn configuration(&self, method: &Method) -> Configuration {
        self.inner.service.configuration(&self.inner.url, method)
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.service.clock().now()
    }

    // -- Requests -----------------------------------------------------------

    /// Starts a request with `method` and the configured headers.
    ///
    /// The response does not change the resource's data or error.
    pub fn request(&self, method: Method) -> Request {
        self.request_with(method, |_| {})
    }

    /// Like [`request`](Self::request), letting `mutator` adjust the request
    /// (headers, body) before it is sent.
    ///
    /// `mutator` runs again each time the request is
    /// [repeated](Request::repeated).
    pub fn request_with<F>(&self, method: Method, mutator: F) -> Request
    where
        F: Fn(&mut RequestDescriptor) + 'static,
    {
        let config = self.configuration(&method);
        let url = self.inner.url.clone();
        let headers = config.headers.clone();
        let descriptor_method = method.clone();
        let build = Rc::new(move || {
            let mut descriptor = RequestDescriptor::new(descriptor_method.clone(), url.clone());
            descriptor.headers.extend(headers.iter());
            mutator(&mut descriptor);
            descriptor
        });

        let resource = self.downgrade();
        let prior_entity = Rc::new(move || {
            let inner = resource.upgrade()?;
            let state = inner.state.borrow();
            state.latest_data.clone()
        });

        let recipe = NetworkRecipe {
            build,
            provider: self.inner.service.provider(),
            pipeline: config.pipeline.clone(),
            offload: self.inner.service.offload().clone(),
            prior_entity,
            cache_url: self.inner.url.clone(),
            progress_interval: config.policy.progress_reporting_interval,
        };
        let mut request = Request::network(recipe, self.inner.service.clock());
        for decorator in &config.request_decorators {
            request = decorator(self, request);
        }
        if request.phase() == RequestPhase::NotStarted {
            request.start();
        }
        self.track(&request);
        request
    }

    fn track(&self, request: &Request) {
        self.inner
            .state
            .borrow_mut()
            .all_requests
            .push(request.clone());
        let resource = self.clone();
        let id = request.id();
        request.on_completion(move |_| {
            ResourceState::untrack(&mut resource.inner.state.borrow_mut().all_requests, id);
        });
    }

    /// Starts a GET whose outcome updates this resource and notifies its
    /// observers.
    ///
    /// Sends `If-None-Match` when the latest data carries an `ETag`.
    pub fn load(&self) -> Request {
        let resource = self.downgrade();
        let request = self.request_with(Method::GET, move |descriptor| {
            let Some(inner) = resource.upgrade() else {
                return;
            };
            let etag = {
                let state = inner.state.borrow();
                state
                    .latest_data
                    .as_ref()
                    .and_then(|entity| entity.etag().map(str::to_owned))
            };
            if let Some(etag) = etag {
                descriptor.header(http::header::IF_NONE_MATCH.as_str(), etag);
            }
        });
        self.load_using(request)
    }

    /// Adopts `request` as a load of this resource.
    ///
    /// The request may come from anywhere, including another resource. Its
    /// outcome updates this resource like any load, and it can be cancelled
    /// through this resource. It is started if it has not been already.
    ///
    /// Adopting a load this resource already tracks returns it unchanged.
    pub fn load_using(&self, request: Request) -> Request {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.load_requests.contains(&request) {
                trace!(
                    url = %self.inner.url,
                    request_id = request.id(),
                    "Request is already a load of this resource"
                );
                return request;
            }
            state.load_requests.push(request.clone());
        }
        if request.phase() == RequestPhase::NotStarted {
            request.start();
        }
        self.notify(ResourceEvent::Requested);

        let resource = self.clone();
        request.on_progress(move |progress| resource.notify(ResourceEvent::Progress(progress)));
        let resource = self.clone();
        let id = request.id();
        request.on_completion(move |info| resource.load_completed(id, info));
        request
    }

    fn load_completed(&self, id: u64, info: &ResponseInfo) {
        let event = {
            let mut state = self.inner.state.borrow_mut();
            if !ResourceState::untrack(&mut state.load_requests, id) {
                debug!(
                    url = %self.inner.url,
                    request_id = id,
                    "Ignoring completion of a request this resource no longer tracks"
                );
                return;
            }

            match &info.response {
                Response::Failure(error) if error.is_cancellation() => {
                    ResourceEvent::RequestCancelled
                }
                Response::Success(entity) if info.is_new => {
                    state.latest_data = Some(entity.clone());
                    state.latest_error = None;
                    state.invalidated = false;
                    ResourceEvent::NewData(DataSource::Network)
                }
                Response::Success(entity) => {
                    let now = self.now();
                    let touched = state.latest_data.as_ref().unwrap_or(entity).touched(now);
                    state.latest_data = Some(touched);
                    state.latest_error = None;
                    state.invalidated = false;
                    ResourceEvent::NotModified
                }
                Response::Failure(error) => {
                    state.latest_error = Some(error.clone());
                    state.invalidated = false;
                    ResourceEvent::Error
                }
            }
        };
        trace!(url = %self.inner.url, request_id = id, ?event, "Load completed");
        self.notify(event);
    }

    /// Loads if there is no load in flight and the data (or error) is stale
    /// or [invalidated](Self::invalidate).
    ///
    /// Returns the in-flight load if there is one, the new load if one was
    /// started, and `None` if the current state is fresh enough.
    pub fn load_if_needed(&self) -> Option<Request> {
        if let Some(request) = self.inner.state.borrow().load_requests.first() {
            return Some(request.clone());
        }

        let policy = self.configuration(&Method::GET).policy;
        if self.inner.state.borrow().is_up_to_date(&policy, self.now()) {
            trace!(url = %self.inner.url, "Resource is up to date; not loading");
            return None;
        }
        Some(self.load())
    }

    /// Cancels every load in flight if the resource has no observers.
    pub fn cancel_load_if_unobserved(&self) {
        if self.observer_count() > 0 {
            return;
        }
        let loads = self.inner.state.borrow().load_requests.clone();
        if !loads.is_empty() {
            debug!(
                url = %self.inner.url,
                count = loads.len(),
                "Cancelling loads of unobserved resource"
            );
        }
        for request in loads {
            request.cancel();
        }
    }

    /// Like [`cancel_load_if_unobserved`](Self::cancel_load_if_unobserved),
    /// checking for observers once `delay` has elapsed.
    pub fn cancel_load_if_unobserved_after(&self, delay: Duration) -> JoinHandle<()> {
        let resource = self.downgrade();
        tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            if let Some(resource) = Resource::upgrade(&resource) {
                resource.cancel_load_if_unobserved();
            }
        })
    }

    // -- Local state changes ------------------------------------------------

    /// Replaces the latest data with `entity` and clears the latest error.
    ///
    /// Bypasses the pipeline.
    pub fn override_local_data(&self, entity: Entity) {
        let event = {
            let mut state = self.inner.state.borrow_mut();
            let unchanged = state
                .latest_data
                .as_ref()
                .is_some_and(|current| current.same_content(&entity));
            state.latest_data = Some(entity);
            state.latest_error = None;
            state.invalidated = false;
            if unchanged {
                ResourceEvent::NotModified
            } else {
                ResourceEvent::NewData(DataSource::LocalOverride)
            }
        };
        self.notify(event);
    }

    /// Replaces the content of the latest data, keeping its headers.
    ///
    /// Without data, creates an entity of [`DEFAULT_CONTENT_TYPE`](fetchbox_core::DEFAULT_CONTENT_TYPE).
    pub fn override_local_content<T>(&self, content: T)
    where
        T: Any + Send + Sync,
    {
        let now = self.now();
        let entity = match self.latest_data() {
            Some(current) => current.replacing_content(content, now),
            None => Entity::binary(content, now),
        };
        self.override_local_data(entity);
    }

    /// Forces the next [`load_if_needed`](Self::load_if_needed) to load.
    ///
    /// Data and error are untouched. The flag survives loads that are
    /// cancelled.
    pub fn invalidate(&self) {
        trace!(url = %self.inner.url, "Invalidating resource");
        self.inner.state.borrow_mut().invalidated = true;
    }

    /// Cancels every request, clears data and error, and removes cached
    /// entries.
    ///
    /// Late responses to the cancelled requests never reach the resource.
    pub fn wipe(&self) {
        let cancelled = {
            let mut state = self.inner.state.borrow_mut();
            let mut requests = std::mem::take(&mut state.load_requests);
            requests.append(&mut state.all_requests);
            state.latest_data = None;
            state.latest_error = None;
            state.invalidated = false;
            state.pending_cache_read = false;
            requests
        };
        debug!(
            url = %self.inner.url,
            cancelled = cancelled.len(),
            "Wiping resource"
        );
        for request in &cancelled {
            request.cancel();
        }

        let pipeline = self.configuration(&Method::GET).pipeline;
        if pipeline.has_caches() {
            let url = self.inner.url.clone();
            self.inner.service.offload().spawn("cache_remove", async move {
                pipeline.remove_cache_entries(&url).await;
            });
        }
        self.notify(ResourceEvent::NewData(DataSource::Wipe));
    }

    pub(crate) fn begin_cache_read(&self) {
        self.inner.state.borrow_mut().pending_cache_read = true;
    }

    /// Applies an entity read from a cache, unless the resource already has
    /// data or an error, or was wiped since the read started.
    pub(crate) fn apply_cached_entity(&self, entity: Option<Entity>) {
        let applied = {
            let mut state = self.inner.state.borrow_mut();
            let pending = std::mem::take(&mut state.pending_cache_read);
            match entity {
                Some(entity)
                    if pending && state.latest_data.is_none() && state.latest_error.is_none() =>
                {
                    state.latest_data = Some(entity);
                    true
                }
                _ => false,
            }
        };
        if applied {
            self.notify(ResourceEvent::NewData(DataSource::Cache));
        } else {
            trace!(url = %self.inner.url, "Discarding cache read result");
        }
    }

    // -- Accessors ----------------------------------------------------------

    /// The latest data, if any.
    pub fn latest_data(&self) -> Option<Entity> {
        self.inner.state.borrow().latest_data.clone()
    }

    /// The latest error, cleared by the next success.
    pub fn latest_error(&self) -> Option<RequestError> {
        self.inner.state.borrow().latest_error.clone()
    }

    /// When the data or error was last updated, whichever is later.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.inner.state.borrow().timestamp()
    }

    /// Returns `true` while a load is in flight.
    pub fn is_loading(&self) -> bool {
        !self.inner.state.borrow().load_requests.is_empty()
    }

    /// Returns `true` while any request made through this resource is in
    /// flight.
    pub fn is_requesting(&self) -> bool {
        let state = self.inner.state.borrow();
        !state.all_requests.is_empty() || !state.load_requests.is_empty()
    }

    /// Requests made through this resource that are still in flight.
    pub fn all_requests(&self) -> Vec<Request> {
        self.inner.state.borrow().all_requests.clone()
    }

    /// Loads that are still in flight.
    pub fn load_requests(&self) -> Vec<Request> {
        self.inner.state.borrow().load_requests.clone()
    }

    /// Returns `true` if the next [`load_if_needed`](Self::load_if_needed)
    /// is forced to load.
    pub fn is_invalidated(&self) -> bool {
        self.inner.state.borrow().invalidated
    }

    /// Latest data as text.
    pub fn text(&self) -> Option<String> {
        let state = self.inner.state.borrow();
        state
            .latest_data
            .as_ref()
            .and_then(|entity| entity.text().map(|text| text.into_owned()))
    }

    /// Latest data as JSON, once the pipeline has decoded it.
    pub fn json(&self) -> Option<serde_json::Value> {
        self.typed_content()
    }

    /// Latest data downcast to `T`.
    pub fn typed_content<T>(&self) -> Option<T>
    where
        T: Any + Clone,
    {
        let state = self.inner.state.borrow();
        state
            .latest_data
            .as_ref()
            .and_then(|entity| entity.typed_content::<T>().cloned())
    }

    // -- Observers ----------------------------------------------------------

    /// Adds an observer that stays until [removed](Self::remove_observer).
    ///
    /// The observer immediately receives [`ResourceEvent::ObserverAdded`].
    pub fn add_observer<O>(&self, observer: O) -> ObserverId
    where
        O: ResourceObserver + 'static,
    {
        let observer: SharedObserver = Rc::new(observer);
        let id = self.inner.observers.borrow_mut().add(observer.clone());
        self.welcome(&observer);
        id
    }

    /// Adds an observer that lives as long as `owner`.
    pub fn add_observer_owned_by<T, O>(&self, owner: &Rc<T>, observer: O) -> ObserverId
    where
        T: 'static,
        O: ResourceObserver + 'static,
    {
        let observer: SharedObserver = Rc::new(observer);
        let id = self
            .inner
            .observers
            .borrow_mut()
            .add_owned(owner, observer.clone());
        self.welcome(&observer);
        id
    }

    /// Adds an observer that is dropped once `is_alive` returns `false`.
    pub fn add_observer_with_liveness<L, O>(&self, is_alive: L, observer: O) -> ObserverId
    where
        L: Fn() -> bool + 'static,
        O: ResourceObserver + 'static,
    {
        let observer: SharedObserver = Rc::new(observer);
        let id = self
            .inner
            .observers
            .borrow_mut()
            .add_with_liveness(Box::new(is_alive), observer.clone());
        self.welcome(&observer);
        id
    }

    fn welcome(&self, observer: &SharedObserver) {
        observer.resource_changed(self, &ResourceEvent::ObserverAdded);
    }

    /// Removes an observer. Returns `false` if it was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let removed = self.inner.observers.borrow_mut().remove(id);
        match removed {
            Some(observer) => {
                observer.stopped_observing(self);
                true
            }
            None => false,
        }
    }

    /// Returns `true` if the observer is still registered and alive.
    pub fn has_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.inner.observers.borrow_mut();
        observers.live();
        observers.get(id).is_some()
    }

    /// Number of live observers. Drops observers whose owner is gone.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.borrow_mut().live().len()
    }

    fn notify(&self, event: ResourceEvent) {
        let observers = self.inner.observers.borrow_mut().live();
        for observer in observers {
            observer.resource_changed(self, &event);
        }
    }

    // -- Navigation ---------------------------------------------------------

    /// Resource for `path` appended to this URL (query dropped).
    pub fn child(&self, path: &str) -> Result<Resource, ServiceError> {
        let url = child_url(&self.inner.url, path)?;
        Ok(self.inner.service.resource_from_url(url))
    }

    /// Resource for a URL reference resolved against this one, like a link
    /// in a document.
    pub fn relative(&self, reference: &str) -> Result<Resource, ServiceError> {
        let url = self.inner.url.join(reference)?;
        Ok(self.inner.service.resource_from_url(url))
    }

    /// Resource for this URL with query parameter `name` set to `value`, or
    /// removed when `value` is `None`.
    pub fn with_param(&self, name: &str, value: Option<&str>) -> Resource {
        let mut url = self.inner.url.clone();
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != name)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        if kept.is_empty() && value.is_none() {
            url.set_query(None);
        } else {
            let mut query = url.query_pairs_mut();
            query.clear().extend_pairs(kept);
            if let Some(value) = value {
                query.append_pair(name, value);
            }
        }
        self.inner.service.resource_from_url(url)
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Resource {}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Resource")
            .field("url", &self.inner.url.as_str())
            .field("latest_data", &state.latest_data)
            .field("latest_error", &state.latest_error.as_ref().map(|e| &e.user_message))
            .field("loading", &!state.load_requests.is_empty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::sync::Arc;

    use fetchbox_core::{
        NetworkingProvider, RequestNetworking, TransferMetrics, TransportCompletion,
        DEFAULT_CONTENT_TYPE,
    };
    use tokio::task::LocalSet;

    use super::*;

    /// Provider whose requests never complete.
    struct Silent;

    struct Pending(#[allow(dead_code)] TransportCompletion);

    impl RequestNetworking for Pending {
        fn cancel(&self) {}
        fn transfer_metrics(&self) -> TransferMetrics {
            TransferMetrics::default()
        }
    }

    impl NetworkingProvider for Silent {
        fn start_request(
            &self,
            _request: RequestDescriptor,
            completion: TransportCompletion,
        ) -> Box<dyn RequestNetworking> {
            Box::new(Pending(completion))
        }
    }

    fn service() -> Service {
        Service::builder()
            .base_url("https://api.example.com/v1")
            .provider(Arc::new(Silent))
            .build()
            .unwrap()
    }

    #[test]
    fn local_content_on_empty_resource_is_binary() {
        let resource = service().resource("/notes").unwrap();
        resource.override_local_content("x");

        let data = resource.latest_data().unwrap();
        assert_eq!(data.content_type(), DEFAULT_CONTENT_TYPE);
        assert_eq!(resource.text().as_deref(), Some("x"));
    }

    #[test]
    fn local_content_keeps_existing_headers() {
        let resource = service().resource("/notes").unwrap();
        resource.override_local_data(Entity::with_content_type(
            "old".to_owned(),
            "text/plain",
            Utc::now(),
        ));
        resource.override_local_content("new".to_owned());

        let data = resource.latest_data().unwrap();
        assert_eq!(data.content_type(), "text/plain");
        assert_eq!(resource.text().as_deref(), Some("new"));
    }

    #[test]
    fn observers_receive_events_in_order() {
        let resource = service().resource("/notes").unwrap();
        let events = Rc::new(RefCell::new(Vec::new()));
        let seen = events.clone();
        let id = resource.add_observer(move |_: &Resource, event: &ResourceEvent| {
            seen.borrow_mut().push(*event);
        });

        resource.override_local_content("a");
        resource.invalidate();
        resource.wipe();
        assert!(resource.remove_observer(id));
        resource.override_local_content("b");

        assert_eq!(
            *events.borrow(),
            vec![
                ResourceEvent::ObserverAdded,
                ResourceEvent::NewData(DataSource::LocalOverride),
                ResourceEvent::NewData(DataSource::Wipe),
            ]
        );
    }

    #[test]
    fn owned_observers_die_with_their_owner() {
        let resource = service().resource("/notes").unwrap();
        let owner = Rc::new(());
        resource.add_observer_owned_by(&owner, |_: &Resource, _: &ResourceEvent| {});
        assert_eq!(resource.observer_count(), 1);

        drop(owner);
        assert_eq!(resource.observer_count(), 0);
    }

    #[test]
    fn navigation_reuses_canonical_resources() {
        let service = service();
        let users = service.resource("/users").unwrap();

        let user = users.child("7").unwrap();
        assert_eq!(user.url().as_str(), "https://api.example.com/v1/users/7");
        assert_eq!(user, service.resource("/users/7").unwrap());

        let sibling = user.relative("8").unwrap();
        assert_eq!(sibling.url().as_str(), "https://api.example.com/v1/users/8");

        let page = users.with_param("page", Some("2"));
        assert_eq!(page.url().as_str(), "https://api.example.com/v1/users?page=2");
        assert_eq!(page.with_param("page", None), users);
    }

    #[tokio::test]
    async fn wipe_cancels_requests_in_flight() {
        LocalSet::new()
            .run_until(async {
                let resource = service().resource("/notes").unwrap();
                let load = resource.load();
                let post = resource.request(Method::POST);
                assert!(resource.is_loading());
                assert_eq!(resource.all_requests().len(), 2);

                resource.wipe();
                assert!(load.response().unwrap().is_cancellation());
                assert!(post.response().unwrap().is_cancellation());
                assert!(!resource.is_requesting());
                assert!(resource.latest_data().is_none());
            })
            .await;
    }
}
