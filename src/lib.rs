#![forbid(unsafe_code, future_incompatible)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    nonstandard_style,
    unused_qualifications,
    unused_import_braces,
    unused_extern_crates,
    trivial_casts,
    trivial_numeric_casts
)]
#![allow(clippy::doc_lazy_continuation)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! An in-process HTTP request pipeline: requests are routed to controllers
//! through an internal client, optionally behind a response cache that
//! follows HTTP freshness rules.
//!
//! The pieces, leaves first:
//!
//! - [`CacheControl`] parses and serializes `Cache-Control` directive sets
//! - [`Request`] and [`Response`] carry the messages
//! - [`InternalClient`] resolves a routed request to a [`Controller`] and
//!   turns every failure into an error response
//! - [`HttpCache`] decorates a [`Client`] with a [`CacheStore`]
//! - [`Kernel`] ties routing, caching and header callbacks together, and
//!   [`RequestContext`] tracks the initial and current request of one
//!   top-level request and its sub-requests
//!
//! ## Basic Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use http_kernel::{
//!     async_trait, ActionResult, Controller, ControllerRegistry, DispatchError,
//!     HttpCache, InternalClient, Kernel, MokaStore, Request, RequestContext,
//!     Response, Route, Router,
//! };
//!
//! struct Welcome {
//!     request: Arc<Request>,
//!     response: Option<Response>,
//! }
//!
//! #[async_trait]
//! impl Controller for Welcome {
//!     fn request(&self) -> &Arc<Request> {
//!         &self.request
//!     }
//!
//!     fn take_response(&mut self) -> Option<Response> {
//!         self.response.take()
//!     }
//!
//!     async fn action(&mut self, _cx: &RequestContext, name: &str) -> ActionResult {
//!         match (name, self.response.as_mut()) {
//!             ("index", Some(response)) => {
//!                 response.set_body("hello, world!");
//!                 response.set_header("cache-control", "max-age=60")?;
//!                 Ok(())
//!             }
//!             _ => Err(DispatchError::not_found(&self.request)),
//!         }
//!     }
//! }
//!
//! # async fn run() -> http_kernel::Result<()> {
//! let mut registry = ControllerRegistry::new();
//! registry.register("", "welcome", |request, response| -> Box<dyn Controller> {
//!     Box::new(Welcome { request, response: Some(response) })
//! });
//!
//! let kernel = Kernel::builder(InternalClient::new(registry))
//!     .router(Router::new().route(Route::new("default").pattern("/{controller}")?))
//!     .cache(HttpCache::new(Arc::new(MokaStore::default())))
//!     .build();
//!
//! let response = kernel.handle(Request::factory("/welcome")).await?;
//! assert_eq!(response.body(), b"hello, world!");
//! assert_eq!(response.header("x-cache-status"), Some("MISS"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Cache Keys
//!
//! The default key is a SHA-1 fingerprint of the uri, query, header values
//! and body. Any `Fn(&Request) -> String` can replace it:
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use http_kernel::{HttpCacheOptions, Request};
//!
//! let options = HttpCacheOptions {
//!     cache_key: Some(Arc::new(|request: &Request| {
//!         format!("{}:{}", request.method(), request.uri())
//!     })),
//!     ..Default::default()
//! };
//! ```
//!
//! ## Configuration
//!
//! [`HttpCache::from_config`] builds a cache from a serde-friendly record
//! and fails fast on unknown key generators or unusable drivers.
//!
//! ## Features
//!
//! - `manager-moka` (default): enable [moka](https://github.com/moka-rs/moka),
//! an in-memory store, as [`MokaStore`].
//! - `manager-cacache` (default): enable [cacache](https://github.com/zkat/cacache-rs),
//! a disk store, as [`CacacheStore`].
mod client;
mod context;
mod controller;
mod error;
mod header;
mod kernel;
mod managers;
mod request;
mod response;
mod router;

use std::{
    fmt,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use http::{
    header::{CACHE_CONTROL, DATE, EXPIRES, PRAGMA},
    HeaderName, HeaderValue,
};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

pub use async_trait::async_trait;
pub use client::{Client, InternalClient};
pub use context::RequestContext;
pub use controller::{
    qualified_name, ActionResult, Controller, ControllerEntry,
    ControllerFactory, ControllerRegistry,
};
pub use error::{
    BadHeader, BadMethod, BadVersion, BoxError, ConfigError, DispatchError,
    HttpError, RecursionError, Result,
};
pub use header::CacheControl;
pub use kernel::{
    on_header_location, ClientOptions, HeaderCallback, Kernel, KernelBuilder,
};
pub use managers::CacheDriver;
pub use request::{Method, Request, RouteMatch};
pub use response::{HttpVersion, Response, StoredResponse};
pub use router::{Route, Router};

#[cfg(feature = "manager-cacache")]
pub use managers::cacache::CacacheStore;

#[cfg(feature = "manager-moka")]
pub use managers::moka::MokaStore;

/// `x-cache-status` header: HIT, MISS or SAVED
pub const CACHE_STATUS_KEY: &str = "x-cache-status";
/// `x-cache-hits` header: how often a cached response was served. Also the
/// key prefix of the hit counters in the store.
pub const CACHE_HIT_KEY: &str = "x-cache-hits";

/// Outcome of a cache lookup, written to the [`CACHE_STATUS_KEY`] header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from the cache
    Hit,
    /// Produced by the client
    Miss,
    /// The copy written to the store
    Saved,
}

impl CacheStatus {
    /// The header value
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Saved => "SAVED",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A key/value store with per-entry expiry used by [`HttpCache`].
///
/// Values are opaque bytes. Stores with a native atomic counter override
/// [`CacheStore::increment`]; the others fall back to read-increment-write,
/// which can lose updates under concurrent hits.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Reads a live entry.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// Writes an entry that expires after `ttl`, or never with `None`.
    async fn set(
        &self,
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<()>;
    /// Removes an entry. Missing entries are not an error.
    async fn delete(&self, key: &str) -> Result<()>;
    /// Atomically adds `step` to a decimal counter and returns the new value.
    ///
    /// Returns `Ok(None)` when the store has no native counters.
    async fn increment(&self, _key: &str, _step: u64) -> Result<Option<u64>> {
        Ok(None)
    }
}

/// A closure that takes a [`Request`] and returns the cache key.
pub type CacheKey = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// SHA-1 over `uri?query~header values joined by ~~body`.
///
/// ```rust
/// use http_kernel::{basic_cache_key_generator, Request};
///
/// let a = basic_cache_key_generator(&Request::factory("a?x=1"));
/// let b = basic_cache_key_generator(&Request::factory("a?x=2"));
/// assert_eq!(a.len(), 40);
/// assert_ne!(a, b);
/// ```
pub fn basic_cache_key_generator(request: &Request) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(request.query())
        .finish();
    let headers: Vec<&[u8]> =
        request.headers().values().map(HeaderValue::as_bytes).collect();

    let mut hasher = Sha1::new();
    hasher.update(request.uri().as_bytes());
    hasher.update(b"?");
    hasher.update(query.as_bytes());
    hasher.update(b"~");
    hasher.update(headers.join(&b'~'));
    hasher.update(b"~");
    hasher.update(request.body());
    hex::encode(hasher.finalize())
}

/// `METHOD:uri?query`, readable but blind to headers and body.
pub fn uri_cache_key_generator(request: &Request) -> String {
    if request.query().is_empty() {
        return format!("{}:{}", request.method(), request.uri());
    }
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(request.query())
        .finish();
    format!("{}:{}?{}", request.method(), request.uri(), query)
}

/// Looks up a key generator by its configuration name.
pub fn key_generator(name: &str) -> Option<CacheKey> {
    let generator: CacheKey = match name {
        "basic" => Arc::new(basic_cache_key_generator),
        "uri" => Arc::new(uri_cache_key_generator),
        _ => return None,
    };
    Some(generator)
}

/// Options for [`HttpCache`].
#[derive(Clone)]
pub struct HttpCacheOptions {
    /// Override the default cache key generator.
    pub cache_key: Option<CacheKey>,
    /// Cache responses marked `private` when they carry `s-maxage`.
    pub allow_private_cache: bool,
    /// Determines if the cache status headers should be added to the response.
    pub cache_status_headers: bool,
}

impl Default for HttpCacheOptions {
    fn default() -> Self {
        Self {
            cache_key: None,
            allow_private_cache: false,
            cache_status_headers: true,
        }
    }
}

impl fmt::Debug for HttpCacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCacheOptions")
            .field("cache_key", &"Fn(&Request) -> String")
            .field("allow_private_cache", &self.allow_private_cache)
            .field("cache_status_headers", &self.cache_status_headers)
            .finish()
    }
}

/// Serializable settings for [`HttpCache::from_config`].
///
/// ```rust
/// use http_kernel::{CacheDriver, HttpCacheConfig};
///
/// let config: HttpCacheConfig = serde_json::from_str(
///     r#"{"driver":{"type":"moka","capacity":64},"key_generator":"uri"}"#,
/// ).unwrap();
/// assert_eq!(config.driver, CacheDriver::Moka { capacity: 64 });
/// assert!(!config.allow_private_cache);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpCacheConfig {
    /// The store backend
    pub driver: CacheDriver,
    /// Name of the key generator, `basic` or `uri`
    pub key_generator: String,
    /// See [`HttpCacheOptions::allow_private_cache`]
    pub allow_private_cache: bool,
}

impl Default for HttpCacheConfig {
    fn default() -> Self {
        Self {
            driver: CacheDriver::default(),
            key_generator: "basic".to_string(),
            allow_private_cache: false,
        }
    }
}

/// When a response was requested and received, for age calculations.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Timing {
    /// When the client was invoked
    pub request_time: SystemTime,
    /// When the client returned
    pub response_time: SystemTime,
}

impl Timing {
    /// A request answered instantly at `time`.
    pub fn at(time: SystemTime) -> Self {
        Self { request_time: time, response_time: time }
    }
}

/// What a cache store holds for a response: the response and the unix
/// second it stops being fresh.
#[derive(Debug, Deserialize, Serialize)]
struct CacheEntry {
    expires_at: u64,
    response: StoredResponse,
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}

/// Whole seconds from `earlier` to `later`, negative when reversed.
fn seconds_between(later: SystemTime, earlier: SystemTime) -> i64 {
    match later.duration_since(earlier) {
        Ok(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_secs()).unwrap_or(i64::MAX),
    }
}

fn header_time(response: &Response, name: &HeaderName) -> Option<SystemTime> {
    response
        .header(name.as_str())
        .and_then(|value| httpdate::parse_http_date(value).ok())
}

/// Caches responses of a [`Client`] according to their freshness.
///
/// Without a store every call passes straight through.
#[derive(Clone)]
pub struct HttpCache {
    store: Option<Arc<dyn CacheStore>>,
    /// Options for the cache
    pub options: HttpCacheOptions,
}

impl fmt::Debug for HttpCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCache")
            .field("store", &self.store.as_ref().map(|_| "dyn CacheStore"))
            .field("options", &self.options)
            .finish()
    }
}

impl HttpCache {
    /// Creates a cache writing to `store` with default options.
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store: Some(store), options: HttpCacheOptions::default() }
    }

    /// Creates a cache without a store.
    pub fn passthrough() -> Self {
        Self { store: None, options: HttpCacheOptions::default() }
    }

    /// Replaces the options.
    pub fn with_options(mut self, options: HttpCacheOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds a cache from configuration.
    pub fn from_config(
        config: &HttpCacheConfig,
    ) -> std::result::Result<Self, ConfigError> {
        let cache_key = key_generator(&config.key_generator).ok_or_else(|| {
            ConfigError::UnknownKeyGenerator(config.key_generator.clone())
        })?;
        let store = config.driver.build()?;
        Ok(Self::new(store).with_options(HttpCacheOptions {
            cache_key: Some(cache_key),
            allow_private_cache: config.allow_private_cache,
            ..HttpCacheOptions::default()
        }))
    }

    /// The store, if configured
    pub fn store(&self) -> Option<&Arc<dyn CacheStore>> {
        self.store.as_ref()
    }

    /// The fingerprint of `request`.
    pub fn create_cache_key(&self, request: &Request) -> String {
        match &self.options.cache_key {
            Some(cache_key) => cache_key(request),
            None => basic_cache_key_generator(request),
        }
    }

    /// Runs `request` through `client`, serving and storing cached responses.
    ///
    /// POST, PUT and DELETE evict the entry and are answered with
    /// `Cache-Control: no-cache, must-revalidate`. A request carrying
    /// `Pragma: no-cache` neither reads nor writes the cache. Store failures
    /// are logged and treated as misses.
    pub async fn execute(
        &self,
        client: &dyn Client,
        cx: &RequestContext,
        request: Arc<Request>,
        response: Response,
    ) -> Result<Response> {
        let Some(store) = &self.store else {
            return client.execute_request(cx, request, response).await;
        };

        if request.method().is_destructive() {
            if let Err(e) = self.invalidate(&request).await {
                log::warn!("Failed to invalidate \"{}\": {e}", request.uri());
            }
            let mut response =
                client.execute_request(cx, request, response).await?;
            response.insert_header(
                CACHE_CONTROL,
                HeaderValue::from_static("no-cache, must-revalidate"),
            );
            return Ok(response);
        }

        let key = self.create_cache_key(&request);
        let bypass = pragma_no_cache(&request);

        if !bypass {
            if let Some((mut cached, remaining)) =
                self.lookup(store.as_ref(), &key).await
            {
                let hits = self.record_hit(store.as_ref(), &key, remaining).await;
                log::debug!("HIT \"{}\" ({hits} hits)", request.uri());
                self.annotate(&mut cached, CacheStatus::Hit, Some(hits));
                return Ok(cached);
            }
        }

        let request_time = SystemTime::now();
        let mut response =
            client.execute_request(cx, Arc::clone(&request), response).await?;
        let timing = Timing { request_time, response_time: SystemTime::now() };

        if !bypass {
            self.save(store.as_ref(), &key, &response, timing).await;
        }
        log::debug!("MISS \"{}\"", request.uri());
        self.annotate(&mut response, CacheStatus::Miss, None);
        Ok(response)
    }

    /// Removes the cached entry for `request`; a no-op without a store.
    pub async fn invalidate(&self, request: &Request) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let key = self.create_cache_key(request);
        store.delete(&key).await?;
        store.delete(&format!("{CACHE_HIT_KEY}{key}")).await
    }

    /// Whether `response` may be stored at all.
    pub fn is_cacheable(&self, response: &Response) -> bool {
        self.directives(response, SystemTime::now()).is_some()
    }

    /// The freshness lifetime of `response`, `None` when it must not be stored.
    pub fn cache_lifetime(
        &self,
        response: &Response,
        timing: Timing,
    ) -> Option<Duration> {
        self.cache_lifetime_at(response, timing, SystemTime::now())
    }

    /// [`HttpCache::cache_lifetime`] evaluated at `now`.
    ///
    /// Ages follow RFC 2616 section 13.2.3. `max-age` gives the lifetime,
    /// `s-maxage` overrides it for allowed private responses, and
    /// `max-stale` without `must-revalidate` extends the current age.
    /// Otherwise `Expires` is measured from `Date` (or the response time)
    /// and reduced by the current age. Lifetimes below one second are not
    /// cacheable.
    pub fn cache_lifetime_at(
        &self,
        response: &Response,
        timing: Timing,
        now: SystemTime,
    ) -> Option<Duration> {
        let directives = self.directives(response, now)?;

        let date = header_time(response, &DATE);
        let apparent_age = date
            .map_or(0, |date| seconds_between(timing.response_time, date).max(0));
        let corrected_received_age = match response
            .header("age")
            .and_then(|age| age.trim().parse::<i64>().ok())
        {
            Some(age) => apparent_age.max(age),
            None => apparent_age,
        };
        let response_delay =
            seconds_between(timing.response_time, timing.request_time).max(0);
        let corrected_initial_age =
            corrected_received_age.saturating_add(response_delay);
        let resident_time = seconds_between(now, timing.response_time).max(0);
        let current_age = corrected_initial_age.saturating_add(resident_time);

        let mut ttl = directives.seconds("max-age");
        if self.options.allow_private_cache && directives.contains("private") {
            if let Some(s_maxage) = directives.seconds("s-maxage") {
                ttl = Some(s_maxage);
            }
        }
        if !directives.contains("must-revalidate") {
            if let Some(max_stale) = directives.seconds("max-stale") {
                ttl = Some(current_age.saturating_add(max_stale));
            }
        }
        if ttl.is_none() {
            if let Some(expires) = header_time(response, &EXPIRES) {
                let base = date.unwrap_or(timing.response_time);
                ttl = Some(
                    seconds_between(expires, base).saturating_sub(current_age),
                );
            }
        }

        ttl.and_then(|ttl| u64::try_from(ttl).ok())
            .filter(|ttl| *ttl > 0)
            .map(Duration::from_secs)
    }

    /// The effective directives of a cacheable response.
    ///
    /// A `private` response without `s-maxage` is rejected unless private
    /// caching is allowed; with `s-maxage` its `max-age` becomes `s-maxage`.
    fn directives(
        &self,
        response: &Response,
        now: SystemTime,
    ) -> Option<CacheControl> {
        let mut directives = CacheControl::from_headers(response.headers());
        if directives.contains("no-cache") || directives.contains("no-store") {
            return None;
        }
        if directives.contains("private") && !self.options.allow_private_cache {
            let s_maxage = directives.get("s-maxage")?.to_string();
            directives.set("max-age", Some(s_maxage));
        }
        match directives.seconds("max-age") {
            Some(max_age) if max_age < 1 => return None,
            Some(_) => {}
            None => {
                if header_time(response, &EXPIRES)
                    .is_some_and(|expires| expires <= now)
                {
                    return None;
                }
            }
        }
        Some(directives)
    }

    /// The cached response and what is left of its lifetime.
    async fn lookup(
        &self,
        store: &dyn CacheStore,
        key: &str,
    ) -> Option<(Response, Duration)> {
        let bytes = match store.get(key).await {
            Ok(bytes) => bytes?,
            Err(e) => {
                log::warn!("Cache read of {key} failed: {e}");
                return None;
            }
        };
        let entry = match postcard::from_bytes::<CacheEntry>(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Cache entry {key} is unreadable: {e}");
                return None;
            }
        };
        let Some(remaining) = entry
            .expires_at
            .checked_sub(unix_now())
            .filter(|remaining| *remaining > 0)
        else {
            log::debug!("Cache entry {key} has expired");
            return None;
        };
        match Response::try_from(entry.response) {
            Ok(response) => Some((response, Duration::from_secs(remaining))),
            Err(e) => {
                log::warn!("Cache entry {key} is invalid: {e}");
                None
            }
        }
    }

    /// Bumps the hit counter of `key`.
    ///
    /// Stores without a native increment get the counter rewritten with the
    /// entry's `remaining` lifetime so that it expires along with it.
    async fn record_hit(
        &self,
        store: &dyn CacheStore,
        key: &str,
        remaining: Duration,
    ) -> u64 {
        let hit_key = format!("{CACHE_HIT_KEY}{key}");
        match store.increment(&hit_key, 1).await {
            Ok(Some(hits)) => return hits,
            Ok(None) => {}
            Err(e) => log::warn!("Cache increment of {hit_key} failed: {e}"),
        }
        let hits = match store.get(&hit_key).await {
            Ok(Some(bytes)) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                log::warn!("Cache read of {hit_key} failed: {e}");
                0
            }
        }
        .saturating_add(1);
        if let Err(e) = store
            .set(hit_key.clone(), hits.to_string().into_bytes(), Some(remaining))
            .await
        {
            log::warn!("Cache write of {hit_key} failed: {e}");
        }
        hits
    }

    async fn save(
        &self,
        store: &dyn CacheStore,
        key: &str,
        response: &Response,
        timing: Timing,
    ) {
        let Some(ttl) = self.cache_lifetime(response, timing) else {
            log::debug!("Not caching response for {key}");
            return;
        };
        let mut saved = response.clone();
        self.annotate(&mut saved, CacheStatus::Saved, None);
        let entry = CacheEntry {
            expires_at: unix_now().saturating_add(ttl.as_secs()),
            response: StoredResponse::from(&saved),
        };
        let bytes = match postcard::to_allocvec(&entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Failed to serialize response for {key}: {e}");
                return;
            }
        };
        let hit_key = format!("{CACHE_HIT_KEY}{key}");
        if let Err(e) = store.set(hit_key, b"0".to_vec(), Some(ttl)).await {
            log::warn!("Cache write of hit counter for {key} failed: {e}");
        }
        match store.set(key.to_string(), bytes, Some(ttl)).await {
            Ok(()) => log::debug!("SAVED {key} for {}s", ttl.as_secs()),
            Err(e) => log::warn!("Cache write of {key} failed: {e}"),
        }
    }

    fn annotate(
        &self,
        response: &mut Response,
        status: CacheStatus,
        hits: Option<u64>,
    ) {
        if !self.options.cache_status_headers {
            return;
        }
        response.insert_header(
            HeaderName::from_static(CACHE_STATUS_KEY),
            HeaderValue::from_static(status.as_str()),
        );
        if let Some(hits) = hits {
            response.insert_header(
                HeaderName::from_static(CACHE_HIT_KEY),
                HeaderValue::from(hits),
            );
        }
    }
}

/// `Pragma: no-cache`, in any of the request's pragma values.
fn pragma_no_cache(request: &Request) -> bool {
    request.header_all(PRAGMA.as_str()).iter().any(|value| {
        value
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("no-cache"))
    })
}
