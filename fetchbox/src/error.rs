use thiserror::Error;

/// Error building configuration entries.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A URL glob could not be compiled.
    #[error("invalid URL pattern {pattern:?}")]
    InvalidPattern {
        /// The pattern as written.
        pattern: String,
        /// Underlying regex error.
        #[source]
        source: regex::Error,
    },

    /// A relative pattern was given but the service has no base URL.
    #[error("relative URL pattern {0:?} needs a service base URL")]
    RelativePatternWithoutBase(String),

    /// An exact-match URL could not be parsed.
    #[error("invalid URL {url:?} in configuration")]
    InvalidUrl {
        /// The URL as written.
        url: String,
        /// Underlying parse error.
        #[source]
        source: url::ParseError,
    },
}

/// Error building a [`Service`](crate::Service) or resolving resource URLs.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The base URL could not be parsed.
    #[error("invalid base URL")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// A resource URL could not be parsed.
    #[error("invalid resource URL")]
    InvalidUrl(#[from] url::ParseError),

    /// A path was given but the service has no base URL.
    #[error("service has no base URL; use an absolute resource URL")]
    NoBaseUrl,

    /// No networking provider was configured.
    #[error("a networking provider is required")]
    MissingProvider,

    /// Configuration entries were added alongside a custom resolver.
    #[error("configuration entries cannot be combined with a custom config resolver")]
    ConflictingResolvers,

    /// A configuration entry was invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
