//! Immutable snapshots of fetched content.
//!
//! An [`Entity`] is what a resource remembers after a successful fetch: the
//! content (raw bytes or whatever the pipeline decoded them into), the
//! response headers, the media type and charset derived from `Content-Type`,
//! and the time the data was received.
//!
//! ## Content
//!
//! Content is stored type-erased as [`Content`] so that pipeline stages can
//! turn bytes into strings, JSON values or application models without the
//! entity type changing. Use [`Entity::typed_content`] to get it back:
//!
//! ```
//! use fetchbox_core::Entity;
//! use chrono::Utc;
//!
//! let entity = Entity::with_content_type("hello".to_owned(), "text/plain", Utc::now());
//! assert_eq!(entity.typed_content::<String>().map(String::as_str), Some("hello"));
//! assert_eq!(entity.text().as_deref(), Some("hello"));
//! ```
//!
//! ## Identity
//!
//! Cloning an entity is cheap: content and headers live behind an `Arc`.
//! [`Entity::touched`] produces a copy with a fresh timestamp that still
//! shares its content, which is how a `304 Not Modified` keeps "the same"
//! data. [`Entity::same_content`] checks that sharing.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::headers::Headers;

/// Type-erased entity content.
pub type Content = Arc<dyn Any + Send + Sync>;

/// Media type used when a response carries no `Content-Type` header.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Parsed `Content-Type` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Lower-cased media type, e.g. `text/plain`.
    pub media_type: String,
    /// Charset parameter, if present.
    pub charset: Option<String>,
}

impl ContentType {
    /// Parses a `Content-Type` header value.
    ///
    /// Splits on `;`, trims every part, lower-cases the media type and picks
    /// up a `charset=` parameter (quotes stripped). An empty media type
    /// falls back to [`DEFAULT_CONTENT_TYPE`].
    pub fn parse(value: &str) -> Self {
        let mut parts = value.split(';').map(str::trim);
        let media_type = parts
            .next()
            .filter(|media_type| !media_type.is_empty())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_owned());
        let charset = parts.find_map(|param| {
            let (name, value) = param.split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim().trim_matches('"').to_owned())
        });
        ContentType {
            media_type,
            charset,
        }
    }
}

impl Default for ContentType {
    fn default() -> Self {
        ContentType {
            media_type: DEFAULT_CONTENT_TYPE.to_owned(),
            charset: None,
        }
    }
}

struct EntityInner {
    content: Content,
    content_type: ContentType,
    headers: Headers,
}

/// Immutable snapshot of fetched (or locally supplied) content.
#[derive(Clone)]
pub struct Entity {
    inner: Arc<EntityInner>,
    timestamp: DateTime<Utc>,
}

impl Entity {
    /// Creates an entity, deriving content type and charset from `headers`.
    pub fn new<T>(content: T, headers: Headers, timestamp: DateTime<Utc>) -> Self
    where
        T: Any + Send + Sync,
    {
        Self::from_shared(Arc::new(content), headers, timestamp)
    }

    /// Creates an entity from already type-erased content.
    pub fn from_shared(content: Content, headers: Headers, timestamp: DateTime<Utc>) -> Self {
        let content_type = headers
            .get(http::header::CONTENT_TYPE.as_str())
            .map(ContentType::parse)
            .unwrap_or_default();
        Entity {
            inner: Arc::new(EntityInner {
                content,
                content_type,
                headers,
            }),
            timestamp,
        }
    }

    /// Creates an entity with the given `Content-Type` header and no others.
    pub fn with_content_type<T>(content: T, content_type: &str, timestamp: DateTime<Utc>) -> Self
    where
        T: Any + Send + Sync,
    {
        let mut headers = Headers::new();
        headers.insert("Content-Type", content_type);
        Self::new(content, headers, timestamp)
    }

    /// Creates an entity with no headers, typed as [`DEFAULT_CONTENT_TYPE`].
    pub fn binary<T>(content: T, timestamp: DateTime<Utc>) -> Self
    where
        T: Any + Send + Sync,
    {
        Self::new(content, Headers::new(), timestamp)
    }

    /// Shared, type-erased content.
    pub fn content(&self) -> &Content {
        &self.inner.content
    }

    /// Content downcast to `T`, if that is what the entity holds.
    pub fn typed_content<T: Any>(&self) -> Option<&T> {
        self.inner.content.downcast_ref::<T>()
    }

    /// Content as text.
    ///
    /// Works for `String` and `&'static str` content, and for raw [`Bytes`]
    /// that are valid UTF-8.
    pub fn text(&self) -> Option<Cow<'_, str>> {
        if let Some(text) = self.typed_content::<String>() {
            Some(Cow::Borrowed(text.as_str()))
        } else if let Some(text) = self.typed_content::<&'static str>() {
            Some(Cow::Borrowed(text))
        } else {
            self.typed_content::<Bytes>()
                .and_then(|bytes| std::str::from_utf8(bytes).ok())
                .map(Cow::Borrowed)
        }
    }

    /// Lower-cased media type, e.g. `application/json`.
    pub fn content_type(&self) -> &str {
        &self.inner.content_type.media_type
    }

    /// Charset from the `Content-Type` header, if any.
    pub fn charset(&self) -> Option<&str> {
        self.inner.content_type.charset.as_deref()
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name)
    }

    /// All headers with their original casing.
    pub fn headers(&self) -> &Headers {
        &self.inner.headers
    }

    /// The `ETag` header, if the server sent one.
    pub fn etag(&self) -> Option<&str> {
        self.header(http::header::ETAG.as_str())
    }

    /// When this data was received or created.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Copy sharing the same content and headers, stamped with `timestamp`.
    pub fn touched(&self, timestamp: DateTime<Utc>) -> Entity {
        Entity {
            inner: Arc::clone(&self.inner),
            timestamp,
        }
    }

    /// Copy with new content, keeping headers and content type.
    pub fn replacing_content<T>(&self, content: T, timestamp: DateTime<Utc>) -> Entity
    where
        T: Any + Send + Sync,
    {
        self.replacing_shared_content(Arc::new(content), timestamp)
    }

    /// Like [`replacing_content`](Self::replacing_content) for already erased content.
    pub fn replacing_shared_content(&self, content: Content, timestamp: DateTime<Utc>) -> Entity {
        Entity {
            inner: Arc::new(EntityInner {
                content,
                content_type: self.inner.content_type.clone(),
                headers: self.inner.headers.clone(),
            }),
            timestamp,
        }
    }

    /// Returns `true` if both entities share the same content allocation.
    pub fn same_content(&self, other: &Entity) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("content_type", &self.inner.content_type.media_type)
            .field("charset", &self.inner.content_type.charset)
            .field("headers", &self.inner.headers)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}
