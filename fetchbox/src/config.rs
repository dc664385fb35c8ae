//! Per-resource configuration.
//!
//! Every request a [`Resource`] makes is shaped by a [`Configuration`]:
//! freshness policy, default headers, the response pipeline and request
//! decorators. A [`ConfigResolver`] picks the configuration for a URL and
//! HTTP method; the default one, [`PatternConfig`], applies an ordered list
//! of mutators whose [`UrlMatcher`] and method filter match.
//!
//! ## URL patterns
//!
//! [`UrlPattern`] globs are matched against the URL without its query:
//!
//! | Pattern | Matches |
//! |---------|---------|
//! | `/users/*` | `/users/1`, not `/users/1/posts` |
//! | `/users/**` | `/users/1`, `/users/1/posts` |
//! | `https://cdn.example.com/**` | anything on that host |
//!
//! Relative patterns are resolved against the service base URL.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use fetchbox_core::{Headers, Pipeline};
use http::Method;
use regex::Regex;
use tracing::trace;
use url::{Position, Url};

use crate::error::ConfigError;
use crate::policy::FreshnessPolicy;
use crate::request::Request;
use crate::resource::Resource;

/// Hook that may wrap or replace a request before it starts.
pub type RequestDecorator = Rc<dyn Fn(&Resource, Request) -> Request>;

/// Settings for requests made by one resource with one method.
#[derive(Clone)]
pub struct Configuration {
    /// Freshness and progress settings.
    pub policy: FreshnessPolicy,
    /// Headers added to every request.
    pub headers: Headers,
    /// Pipeline applied to responses.
    pub pipeline: Arc<Pipeline>,
    /// Decorators applied in order right after a request is created.
    ///
    /// A decorator that returns a different request replaces the original,
    /// which is then never started.
    pub request_decorators: Vec<RequestDecorator>,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration::new(Pipeline::standard())
    }
}

impl Configuration {
    /// Configuration with default policy, no headers and the given pipeline.
    pub fn new(pipeline: Pipeline) -> Self {
        Configuration {
            policy: FreshnessPolicy::default(),
            headers: Headers::new(),
            pipeline: Arc::new(pipeline),
            request_decorators: Vec::new(),
        }
    }

    /// Mutable access to the pipeline, cloning it if shared.
    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        Arc::make_mut(&mut self.pipeline)
    }

    /// Appends a request decorator.
    pub fn decorate_requests<F>(&mut self, decorator: F) -> &mut Self
    where
        F: Fn(&Resource, Request) -> Request + 'static,
    {
        self.request_decorators.push(Rc::new(decorator));
        self
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("policy", &self.policy)
            .field("headers", &self.headers)
            .field("pipeline", &self.pipeline)
            .field("request_decorators", &self.request_decorators.len())
            .finish()
    }
}

/// Chooses the configuration for a URL and method.
pub trait ConfigResolver {
    /// Configuration for requests to `url` with `method`.
    fn resolve(&self, url: &Url, method: &Method) -> Configuration;
}

impl<F> ConfigResolver for F
where
    F: Fn(&Url, &Method) -> Configuration,
{
    fn resolve(&self, url: &Url, method: &Method) -> Configuration {
        self(url, method)
    }
}

/// Compiled URL glob.
#[derive(Clone)]
pub struct UrlPattern {
    pattern: String,
    regex: Regex,
}

impl UrlPattern {
    /// Compiles `pattern`, resolving relative patterns against `base`.
    pub fn new(pattern: &str, base: Option<&Url>) -> Result<Self, ConfigError> {
        let absolute = if pattern.contains("://") {
            pattern.to_owned()
        } else {
            let base = base.ok_or_else(|| ConfigError::RelativePatternWithoutBase(pattern.into()))?;
            let prefix = &base[..Position::AfterPath];
            format!(
                "{}/{}",
                prefix.trim_end_matches('/'),
                pattern.trim_start_matches('/')
            )
        };

        let regex = Regex::new(&glob_to_regex(&absolute)).map_err(|source| {
            ConfigError::InvalidPattern {
                pattern: pattern.to_owned(),
                source,
            }
        })?;
        Ok(UrlPattern {
            pattern: pattern.to_owned(),
            regex,
        })
    }

    /// Returns `true` if `url` (ignoring its query) matches.
    pub fn matches(&self, url: &Url) -> bool {
        self.regex.is_match(&url[..Position::AfterPath])
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Debug for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UrlPattern").field(&self.pattern).finish()
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut regex = String::with_capacity(glob.len() * 2);
    regex.push('^');
    let mut rest = glob;
    while let Some(index) = rest.find('*') {
        regex.push_str(&regex::escape(&rest[..index]));
        if rest[index..].starts_with("**") {
            regex.push_str(".*");
            rest = &rest[index + 2..];
        } else {
            regex.push_str("[^/]*");
            rest = &rest[index + 1..];
        }
    }
    regex.push_str(&regex::escape(rest));
    regex.push('$');
    regex
}

/// Which URLs a configuration entry applies to.
#[derive(Clone)]
pub enum UrlMatcher {
    /// Every URL.
    All,
    /// URLs matching a glob.
    Pattern(UrlPattern),
    /// One exact URL.
    Exact(Url),
    /// URLs accepted by a predicate.
    Predicate(Rc<dyn Fn(&Url) -> bool>),
}

impl UrlMatcher {
    /// Returns `true` if `url` matches.
    pub fn matches(&self, url: &Url) -> bool {
        match self {
            UrlMatcher::All => true,
            UrlMatcher::Pattern(pattern) => pattern.matches(url),
            UrlMatcher::Exact(exact) => exact == url,
            UrlMatcher::Predicate(predicate) => predicate(url),
        }
    }
}

impl fmt::Debug for UrlMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlMatcher::All => f.write_str("All"),
            UrlMatcher::Pattern(pattern) => pattern.fmt(f),
            UrlMatcher::Exact(url) => f.debug_tuple("Exact").field(&url.as_str()).finish(),
            UrlMatcher::Predicate(_) => f.write_str("Predicate"),
        }
    }
}

type ConfigMutator = Rc<dyn Fn(&mut Configuration)>;

#[derive(Clone)]
struct ConfigEntry {
    matcher: UrlMatcher,
    methods: Option<Vec<Method>>,
    mutator: ConfigMutator,
}

impl ConfigEntry {
    fn applies(&self, url: &Url, method: &Method) -> bool {
        self.methods
            .as_ref()
            .is_none_or(|methods| methods.contains(method))
            && self.matcher.matches(url)
    }
}

/// Ordered table of configuration mutators.
///
/// Resolution starts from a base configuration and applies every matching
/// entry in the order they were added, so later entries override earlier
/// ones.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use fetchbox::config::{ConfigResolver, Configuration, PatternConfig, UrlMatcher, UrlPattern};
/// use http::Method;
/// use url::Url;
///
/// let base = Url::parse("https://api.example.com/v1").unwrap();
/// let mut config = PatternConfig::new(Configuration::default());
/// config.add(
///     UrlMatcher::Pattern(UrlPattern::new("/users/*", Some(&base)).unwrap()),
///     None,
///     |config| config.policy.expiration_time = Duration::from_secs(600),
/// );
///
/// let user = Url::parse("https://api.example.com/v1/users/7").unwrap();
/// let resolved = config.resolve(&user, &Method::GET);
/// assert_eq!(resolved.policy.expiration_time, Duration::from_secs(600));
/// ```
#[derive(Clone, Default)]
pub struct PatternConfig {
    base: Configuration,
    entries: Vec<ConfigEntry>,
}

impl PatternConfig {
    /// Table with no entries on top of `base`.
    pub fn new(base: Configuration) -> Self {
        PatternConfig {
            base,
            entries: Vec::new(),
        }
    }

    /// Appends an entry. `methods == None` matches every method.
    pub fn add<F>(&mut self, matcher: UrlMatcher, methods: Option<Vec<Method>>, mutator: F) -> &mut Self
    where
        F: Fn(&mut Configuration) + 'static,
    {
        self.entries.push(ConfigEntry {
            matcher,
            methods,
            mutator: Rc::new(mutator),
        });
        self
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ConfigResolver for PatternConfig {
    fn resolve(&self, url: &Url, method: &Method) -> Configuration {
        let mut config = self.base.clone();
        for entry in self.entries.iter().filter(|entry| entry.applies(url, method)) {
            trace!(%url, %method, matcher = ?entry.matcher, "Applying configuration entry");
            (entry.mutator)(&mut config);
        }
        config
    }
}

impl fmt::Debug for PatternConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternConfig")
            .field("base", &self.base)
            .field(
                "entries",
                &self.entries.iter().map(|entry| &entry.matcher).collect::<Vec<_>>(),
            )
            .finish()
    }
}
