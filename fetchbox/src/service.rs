//! The resource registry.
//!
//! A [`Service`] ties together a networking provider, a configuration
//! resolver, a clock and an offload manager, and hands out one canonical
//! [`Resource`] per URL. The registry holds resources weakly: a resource
//! lives as long as someone holds a handle to it (a caller, an observer
//! closure, or one of its own requests in flight).

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use fetchbox_core::{Clock, NetworkingProvider, Pipeline, SystemClock};
use http::Method;
use smol_str::SmolStr;
use tracing::{debug, warn};
use url::{Position, Url};

use crate::config::{ConfigResolver, Configuration, PatternConfig, UrlMatcher, UrlPattern};
use crate::error::{ConfigError, ServiceError};
use crate::offload::{OffloadConfig, OffloadKey, OffloadManager};
use crate::resource::{Resource, ResourceInner};

struct ServiceInner {
    base_url: Option<Url>,
    provider: Arc<dyn NetworkingProvider>,
    resolver: Box<dyn ConfigResolver>,
    clock: Arc<dyn Clock>,
    offload: OffloadManager,
    resources: RefCell<HashMap<Url, Weak<ResourceInner>>>,
}

/// Entry point: creates and caches resources.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use fetchbox::Service;
/// # fn provider() -> std::sync::Arc<dyn fetchbox::NetworkingProvider> { unimplemented!() }
///
/// let service = Service::builder()
///     .base_url("https://api.example.com/v1")
///     .provider(provider())
///     .configure("/users/**", |config| {
///         config.policy.expiration_time = Duration::from_secs(300);
///     })
///     .build()
///     .unwrap();
///
/// fetchbox::context::run(async move {
///     let user = service.resource("/users/7").unwrap();
///     if let Some(load) = user.load_if_needed() {
///         load.wait().await;
///     }
///     println!("{:?}", user.json());
/// })
/// .unwrap();
/// ```
#[derive(Clone)]
pub struct Service {
    inner: Rc<ServiceInner>,
}

impl Service {
    /// Creates a builder.
    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::default()
    }

    /// The base URL relative resource paths are resolved against.
    pub fn base_url(&self) -> Option<&Url> {
        self.inner.base_url.as_ref()
    }

    /// The canonical resource for `path` under the base URL.
    pub fn resource(&self, path: &str) -> Result<Resource, ServiceError> {
        let base = self.inner.base_url.as_ref().ok_or(ServiceError::NoBaseUrl)?;
        let url = child_url(base, path)?;
        Ok(self.resource_from_url(url))
    }

    /// The canonical resource for an absolute URL.
    pub fn resource_at(&self, url: &str) -> Result<Resource, ServiceError> {
        Ok(self.resource_from_url(Url::parse(url)?))
    }

    /// The canonical resource for `url`, created on first use.
    ///
    /// When the resource is created and its GET pipeline has entity
    /// caches, a cache read starts in the background; this then needs the
    /// [coordination context](crate::context).
    pub fn resource_from_url(&self, url: Url) -> Resource {
        let existing = self
            .inner
            .resources
            .borrow()
            .get(&url)
            .and_then(Resource::upgrade);
        if let Some(resource) = existing {
            return resource;
        }

        let resource = Resource::new(self.clone(), url.clone());
        self.inner
            .resources
            .borrow_mut()
            .insert(url, resource.downgrade());
        self.load_cached_entity(&resource);
        resource
    }

    fn load_cached_entity(&self, resource: &Resource) {
        let pipeline = self.configuration(resource.url(), &Method::GET).pipeline;
        if !pipeline.has_caches() {
            return;
        }

        let url = resource.url().clone();
        let key = OffloadKey::Entity(SmolStr::new(url.as_str()));
        let read = self.inner.offload.run_with_key(key, async move {
            pipeline.cached_entity(&url).await
        });
        let Some(read) = read else {
            debug!(url = %resource.url(), "Cache read already in flight");
            return;
        };

        resource.begin_cache_read();
        let target = resource.downgrade();
        tokio::task::spawn_local(async move {
            let entity = read.await.unwrap_or_else(|error| {
                warn!(%error, "Entity cache read did not finish");
                None
            });
            if let Some(resource) = Resource::upgrade(&target) {
                resource.apply_cached_entity(entity);
            }
        });
    }

    /// Configuration for requests to `url` with `method`.
    pub fn configuration(&self, url: &Url, method: &Method) -> Configuration {
        self.inner.resolver.resolve(url, method)
    }

    /// The clock used for timestamps and staleness checks.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.inner.clock.clone()
    }

    /// The manager running pipeline and cache work off the coordination
    /// context.
    pub fn offload(&self) -> &OffloadManager {
        &self.inner.offload
    }

    pub(crate) fn provider(&self) -> Arc<dyn NetworkingProvider> {
        self.inner.provider.clone()
    }

    fn live_resources(&self) -> Vec<Resource> {
        self.inner
            .resources
            .borrow()
            .values()
            .filter_map(Resource::upgrade)
            .collect()
    }

    /// Wipes every live resource `predicate` accepts.
    pub fn wipe_resources<F>(&self, predicate: F)
    where
        F: Fn(&Resource) -> bool,
    {
        for resource in self.live_resources() {
            if predicate(&resource) {
                resource.wipe();
            }
        }
    }

    /// Wipes every live resource whose URL matches `pattern`.
    pub fn wipe_resources_matching(&self, pattern: &str) -> Result<(), ServiceError> {
        let pattern = UrlPattern::new(pattern, self.base_url())?;
        self.wipe_resources(|resource| pattern.matches(resource.url()));
        Ok(())
    }

    /// Invalidates every live resource `predicate` accepts.
    pub fn invalidate_resources<F>(&self, predicate: F)
    where
        F: Fn(&Resource) -> bool,
    {
        for resource in self.live_resources() {
            if predicate(&resource) {
                resource.invalidate();
            }
        }
    }

    /// Forgets resources nobody holds any more.
    ///
    /// Returns how many registry entries were removed.
    pub fn flush_unused_resources(&self) -> usize {
        let mut resources = self.inner.resources.borrow_mut();
        let before = resources.len();
        resources.retain(|_, resource| resource.strong_count() > 0);
        let flushed = before - resources.len();
        if flushed > 0 {
            debug!(flushed, "Flushed unused resources");
        }
        flushed
    }

    /// Number of live resources.
    pub fn resource_count(&self) -> usize {
        self.inner
            .resources
            .borrow()
            .values()
            .filter(|resource| resource.strong_count() > 0)
            .count()
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("base_url", &self.inner.base_url.as_ref().map(Url::as_str))
            .field("resources", &self.resource_count())
            .finish()
    }
}

/// Appends `path` to `base` as a child path, dropping the query.
pub(crate) fn child_url(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let prefix = &base[..Position::AfterPath];
    Url::parse(&format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        path.trim_start_matches('/')
    ))
}

type Mutator = Rc<dyn Fn(&mut Configuration)>;

enum PendingMatcher {
    All,
    Pattern(String),
    Exact(String),
    Predicate(Rc<dyn Fn(&Url) -> bool>),
}

impl PendingMatcher {
    fn compile(self, base: Option<&Url>) -> Result<UrlMatcher, ConfigError> {
        Ok(match self {
            PendingMatcher::All => UrlMatcher::All,
            PendingMatcher::Pattern(pattern) => UrlMatcher::Pattern(UrlPattern::new(&pattern, base)?),
            PendingMatcher::Exact(url) => {
                let parsed = match base {
                    Some(base) if !url.contains("://") => child_url(base, &url),
                    _ => Url::parse(&url),
                };
                UrlMatcher::Exact(parsed.map_err(|source| ConfigError::InvalidUrl { url, source })?)
            }
            PendingMatcher::Predicate(predicate) => UrlMatcher::Predicate(predicate),
        })
    }
}

struct PendingEntry {
    matcher: PendingMatcher,
    methods: Option<Vec<Method>>,
    mutator: Mutator,
}

/// Builder for [`Service`].
///
/// Configuration entries are applied in the order they are added, on top
/// of a base configuration with the standard transformers (text and JSON
/// decoding) unless disabled.
pub struct ServiceBuilder {
    base_url: Option<String>,
    provider: Option<Arc<dyn NetworkingProvider>>,
    clock: Arc<dyn Clock>,
    offload: OffloadConfig,
    standard_transformers: bool,
    entries: Vec<PendingEntry>,
    resolver: Option<Box<dyn ConfigResolver>>,
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        ServiceBuilder {
            base_url: None,
            provider: None,
            clock: Arc::new(SystemClock),
            offload: OffloadConfig::default(),
            standard_transformers: true,
            entries: Vec::new(),
            resolver: None,
        }
    }
}

impl ServiceBuilder {
    /// Base URL for [`Service::resource`] paths and relative patterns.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// The networking provider. Required.
    pub fn provider<P>(mut self, provider: P) -> Self
    where
        P: NetworkingProvider + 'static,
    {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// Clock for timestamps and staleness checks.
    pub fn clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Offload manager settings.
    pub fn offload(mut self, config: OffloadConfig) -> Self {
        self.offload = config;
        self
    }

    /// Whether the base pipeline has the text and JSON decoders.
    pub fn standard_transformers(mut self, enabled: bool) -> Self {
        self.standard_transformers = enabled;
        self
    }

    fn entry(mut self, matcher: PendingMatcher, methods: Option<Vec<Method>>, mutator: Mutator) -> Self {
        self.entries.push(PendingEntry {
            matcher,
            methods,
            mutator,
        });
        self
    }

    /// Adjusts configuration for every URL.
    pub fn configure_all<F>(self, mutator: F) -> Self
    where
        F: Fn(&mut Configuration) + 'static,
    {
        self.entry(PendingMatcher::All, None, Rc::new(mutator))
    }

    /// Adjusts configuration for URLs matching a glob.
    ///
    /// `*` matches within one path segment and `**` across segments.
    /// Relative patterns are resolved against the base URL.
    pub fn configure<F>(self, pattern: &str, mutator: F) -> Self
    where
        F: Fn(&mut Configuration) + 'static,
    {
        self.entry(PendingMatcher::Pattern(pattern.to_owned()), None, Rc::new(mutator))
    }

    /// Like [`configure`](Self::configure), only for the given methods.
    pub fn configure_for_methods<I, F>(self, pattern: &str, methods: I, mutator: F) -> Self
    where
        I: IntoIterator<Item = Method>,
        F: Fn(&mut Configuration) + 'static,
    {
        self.entry(
            PendingMatcher::Pattern(pattern.to_owned()),
            Some(methods.into_iter().collect()),
            Rc::new(mutator),
        )
    }

    /// Adjusts configuration for one URL, absolute or relative to the base.
    pub fn configure_exact<F>(self, url: &str, mutator: F) -> Self
    where
        F: Fn(&mut Configuration) + 'static,
    {
        self.entry(PendingMatcher::Exact(url.to_owned()), None, Rc::new(mutator))
    }

    /// Adjusts configuration for URLs `predicate` accepts.
    pub fn configure_matching<P, F>(self, predicate: P, mutator: F) -> Self
    where
        P: Fn(&Url) -> bool + 'static,
        F: Fn(&mut Configuration) + 'static,
    {
        self.entry(PendingMatcher::Predicate(Rc::new(predicate)), None, Rc::new(mutator))
    }

    /// Replaces pattern-based configuration with a custom resolver.
    ///
    /// Cannot be combined with `configure*` entries.
    pub fn config_resolver<R>(mut self, resolver: R) -> Self
    where
        R: ConfigResolver + 'static,
    {
        self.resolver = Some(Box::new(resolver));
        self
    }

    /// Builds the service.
    pub fn build(self) -> Result<Service, ServiceError> {
        let base_url = self
            .base_url
            .map(|url| Url::parse(&url).map_err(ServiceError::InvalidBaseUrl))
            .transpose()?;
        let provider = self.provider.ok_or(ServiceError::MissingProvider)?;

        let resolver = match self.resolver {
            Some(_) if !self.entries.is_empty() => return Err(ServiceError::ConflictingResolvers),
            Some(resolver) => resolver,
            None => {
                let pipeline = if self.standard_transformers {
                    Pipeline::standard()
                } else {
                    Pipeline::new()
                };
                let mut table = PatternConfig::new(Configuration::new(pipeline));
                for entry in self.entries {
                    let matcher = entry.matcher.compile(base_url.as_ref())?;
                    let mutator = entry.mutator;
                    table.add(matcher, entry.methods, move |config| mutator(config));
                }
                Box::new(table)
            }
        };

        Ok(Service {
            inner: Rc::new(ServiceInner {
                base_url,
                provider,
                resolver,
                clock: self.clock,
                offload: OffloadManager::new(self.offload),
                resources: RefCell::new(HashMap::new()),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fetchbox_core::{RequestDescriptor, RequestNetworking, TransportCompletion};

    use super::*;

    struct Unused;

    impl NetworkingProvider for Unused {
        fn start_request(
            &self,
            _request: RequestDescriptor,
            _completion: TransportCompletion,
        ) -> Box<dyn RequestNetworking> {
            unreachable!("no requests in these tests")
        }
    }

    fn builder() -> ServiceBuilder {
        Service::builder()
            .base_url("https://api.example.com/v1/")
            .provider(Unused)
    }

    #[test]
    fn provider_is_required() {
        let result = Service::builder().base_url("https://x.test").build();
        assert!(matches!(result, Err(ServiceError::MissingProvider)));
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let result = Service::builder().base_url("not a url").provider(Unused).build();
        assert!(matches!(result, Err(ServiceError::InvalidBaseUrl(_))));
    }

    #[test]
    fn paths_need_a_base_url() {
        let service = Service::builder().provider(Unused).build().unwrap();
        assert!(matches!(service.resource("/x"), Err(ServiceError::NoBaseUrl)));
        assert!(service.resource_at("https://other.test/x").is_ok());
    }

    #[test]
    fn custom_resolver_conflicts_with_entries() {
        let result = builder()
            .configure_all(|_| {})
            .config_resolver(|_: &Url, _: &Method| Configuration::default())
            .build();
        assert!(matches!(result, Err(ServiceError::ConflictingResolvers)));
    }

    #[test]
    fn bad_pattern_surfaces_at_build() {
        let result = Service::builder()
            .provider(Unused)
            .configure("/relative/*", |_| {})
            .build();
        assert!(matches!(
            result,
            Err(ServiceError::Config(ConfigError::RelativePatternWithoutBase(_)))
        ));
    }

    #[test]
    fn one_resource_per_url_while_held() {
        let service = builder().build().unwrap();
        let a = service.resource("users").unwrap();
        let b = service.resource("/users").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.url().as_str(), "https://api.example.com/v1/users");
        assert_eq!(service.resource_count(), 1);

        drop(a);
        drop(b);
        assert_eq!(service.resource_count(), 0);
        assert_eq!(service.flush_unused_resources(), 1);
    }

    #[test]
    fn entries_resolve_by_pattern_method_and_url() {
        let service = builder()
            .configure_all(|config| config.policy.retry_time = Duration::from_secs(2))
            .configure("/users/*", |config| {
                config.policy.expiration_time = Duration::from_secs(60)
            })
            .configure_for_methods("/users/*", [Method::POST], |config| {
                config.headers.insert("X-Write", "1");
            })
            .configure_exact("/status", |config| {
                config.policy.expiration_time = Duration::from_secs(1)
            })
            .configure_matching(
                |url| url.host_str() == Some("cdn.example.com"),
                |config| config.policy.expiration_time = Duration::from_secs(3600),
            )
            .build()
            .unwrap();

        let user = Url::parse("https://api.example.com/v1/users/3").unwrap();
        let get = service.configuration(&user, &Method::GET);
        assert_eq!(get.policy.retry_time, Duration::from_secs(2));
        assert_eq!(get.policy.expiration_time, Duration::from_secs(60));
        assert!(get.headers.get("x-write").is_none());
        let post = service.configuration(&user, &Method::POST);
        assert_eq!(post.headers.get("X-Write"), Some("1"));

        let status = Url::parse("https://api.example.com/v1/status").unwrap();
        assert_eq!(
            service.configuration(&status, &Method::GET).policy.expiration_time,
            Duration::from_secs(1)
        );

        let asset = Url::parse("https://cdn.example.com/logo.png").unwrap();
        assert_eq!(
            service.configuration(&asset, &Method::GET).policy.expiration_time,
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn invalidate_resources_by_predicate() {
        let service = builder().build().unwrap();
        let users = service.resource("/users").unwrap();
        let posts = service.resource("/posts").unwrap();

        service.invalidate_resources(|resource| resource.url().path().ends_with("/users"));
        assert!(users.is_invalidated());
        assert!(!posts.is_invalidated());
    }

    #[test]
    fn wipe_resources_by_pattern() {
        let service = builder().build().unwrap();
        let users = service.resource("/users/1").unwrap();
        let posts = service.resource("/posts/1").unwrap();
        users.override_local_content("u");
        posts.override_local_content("p");

        service.wipe_resources_matching("/users/*").unwrap();
        assert!(users.latest_data().is_none());
        assert!(posts.latest_data().is_some());
    }

    #[test]
    fn standard_transformers_can_be_disabled() {
        let service = builder().standard_transformers(false).build().unwrap();
        let url = Url::parse("https://api.example.com/v1/x").unwrap();
        let config = service.configuration(&url, &Method::GET);
        assert!(config.pipeline.stage(&fetchbox_core::StageKey::Decoding).is_none());
    }
}
