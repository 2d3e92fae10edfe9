use http::StatusCode;
use http_kernel::{
    ActionResult, CacheStore, Client, ClientOptions, Controller,
    ControllerRegistry, DispatchError, HttpCache, HttpCacheOptions,
    InternalClient, Kernel, Method, RecursionError, Request, RequestContext,
    Response, Result, Route, Router,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

type Trail = Arc<Mutex<Vec<String>>>;

// Simple in-memory store without native counters
#[derive(Clone, Default)]
struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    ttls: Arc<Mutex<HashMap<String, Option<Duration>>>>,
}

impl MemoryStore {
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    fn ttls(&self) -> Vec<Option<Duration>> {
        self.ttls.lock().unwrap().values().copied().collect()
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(
        &self,
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.ttls.lock().unwrap().insert(key.clone(), ttl);
        self.entries.lock().unwrap().insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

// Store whose every operation fails
#[derive(Clone, Default)]
struct FailingStore {
    attempts: Arc<AtomicUsize>,
}

impl FailingStore {
    fn fail(&self, op: &str) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(format!("store unavailable: {op}").into())
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CacheStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        self.fail("get")?;
        Ok(None)
    }

    async fn set(
        &self,
        _key: String,
        _value: Vec<u8>,
        _ttl: Option<Duration>,
    ) -> Result<()> {
        self.fail("set")
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        self.fail("delete")
    }

    async fn increment(&self, _key: &str, _step: u64) -> Result<Option<u64>> {
        self.fail("increment")?;
        Ok(None)
    }
}

// Answers every request with the same cacheable body and counts calls
#[derive(Clone)]
struct Fixed {
    calls: Arc<AtomicUsize>,
    cache_control: &'static str,
}

impl Fixed {
    fn new(cache_control: &'static str) -> Self {
        Self { calls: Arc::new(AtomicUsize::new(0)), cache_control }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Client for Fixed {
    async fn execute_request(
        &self,
        _cx: &RequestContext,
        _request: Arc<Request>,
        mut response: Response,
    ) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        response.set_header("cache-control", self.cache_control)?;
        response
            .set_header("date", &httpdate::fmt_http_date(SystemTime::now()))?;
        response.set_body("fresh");
        Ok(response)
    }
}

struct Echo {
    request: Arc<Request>,
    response: Option<Response>,
    trail: Trail,
}

impl Echo {
    fn response(&mut self) -> std::result::Result<&mut Response, DispatchError> {
        self.response
            .as_mut()
            .ok_or_else(|| DispatchError::Dispatch("response taken".into()))
    }
}

#[async_trait::async_trait]
impl Controller for Echo {
    fn request(&self) -> &Arc<Request> {
        &self.request
    }

    fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }

    async fn before(&mut self, cx: &RequestContext) -> ActionResult {
        let current = cx.current().map(|r| r.uri().to_string());
        self.trail
            .lock()
            .unwrap()
            .push(format!("before {}", current.unwrap_or_default()));
        Ok(())
    }

    async fn action(&mut self, cx: &RequestContext, name: &str) -> ActionResult {
        let uri = self.request.uri().to_string();
        match name {
            "index" => {
                self.response()?.set_body(uri);
            }
            "fail" => return Err(DispatchError::internal("boom")),
            "explode" => panic!("controller exploded"),
            "empty" => self.response = None,
            "nested" => {
                let sub = cx.execute(Request::factory("echo/fail")).await?;
                let current = cx.current().map(|r| r.uri().to_string());
                self.trail
                    .lock()
                    .unwrap()
                    .push(format!("after {}", current.unwrap_or_default()));
                self.response()?.set_body(sub.status().as_str().to_string());
            }
            "move" => {
                self.response()?
                    .set_status(StatusCode::FOUND)
                    .set_header("location", "/echo/index")?;
            }
            "loop" => {
                self.response()?
                    .set_status(StatusCode::FOUND)
                    .set_header("location", "/echo/loop")?;
            }
            "form" => {
                let body = self.request.body().to_vec();
                let content_type =
                    self.request.header("content-type").unwrap_or_default().to_string();
                self.response()?
                    .set_body(body)
                    .set_header("x-content-type", &content_type)?;
            }
            _ => return Err(DispatchError::not_found(&self.request)),
        }
        Ok(())
    }
}

fn registry(trail: &Trail) -> ControllerRegistry {
    let mut registry = ControllerRegistry::new();
    let trail = Arc::clone(trail);
    registry.register(
        "",
        "echo",
        move |request, response| -> Box<dyn Controller> {
            Box::new(Echo {
                request,
                response: Some(response),
                trail: Arc::clone(&trail),
            })
        },
    );
    registry.register_abstract("", "base");
    registry
}

fn router() -> Result<Router> {
    Ok(Router::new().route(
        Route::new("default")
            .pattern("/{controller}")?
            .pattern("/{controller}/{action}")?,
    ))
}

fn kernel(trail: &Trail, expose: bool) -> Result<Arc<Kernel>> {
    Ok(Kernel::builder(
        InternalClient::new(registry(trail)).expose_errors(expose),
    )
    .router(router()?)
    .build())
}

#[tokio::test]
async fn dispatches_to_controller() -> Result<()> {
    let trail = Trail::default();
    let kernel = kernel(&trail, false)?;
    let res = kernel.handle(Request::factory("/echo")).await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.body(), b"echo");
    assert_eq!(*trail.lock().unwrap(), vec!["before echo".to_string()]);
    Ok(())
}

#[tokio::test]
async fn current_request_is_restored_after_failed_sub_request() -> Result<()> {
    let trail = Trail::default();
    let kernel = kernel(&trail, false)?;
    let cx = kernel.context();
    let res = cx.execute(Request::factory("echo/nested")).await?;
    assert_eq!(res.body(), b"500");
    assert_eq!(
        *trail.lock().unwrap(),
        vec![
            "before echo/nested".to_string(),
            "before echo/fail".to_string(),
            "after echo/nested".to_string(),
        ]
    );
    assert!(cx.current().is_none());
    assert_eq!(
        cx.initial().map(|r| r.uri().to_string()),
        Some("echo/nested".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn unknown_controller_is_not_found() -> Result<()> {
    let trail = Trail::default();
    let kernel = kernel(&trail, false)?;

    let res = kernel.handle(Request::factory("foo")).await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(res.body(), b"The requested URL foo was not found on this server.");

    let unrouted = kernel.handle(Request::factory("a/b/c/d")).await?;
    assert_eq!(unrouted.status(), StatusCode::NOT_FOUND);

    let unknown_action = kernel.handle(Request::factory("echo/missing")).await?;
    assert_eq!(unknown_action.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn missing_response_is_an_internal_error() -> Result<()> {
    let trail = Trail::default();
    let res = kernel(&trail, false)?.handle(Request::factory("echo/empty")).await?;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.body(), b"Internal Server Error");

    let exposed = kernel(&trail, true)?;
    let res = exposed.handle(Request::factory("echo/empty")).await?;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        res.body(),
        b"DispatchError [ 500 ]: Controller Controller::echo failed to return a Response"
    );

    let res = exposed.handle(Request::factory("base")).await?;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        res.body(),
        b"DispatchError [ 500 ]: Cannot create instances of abstract Controller::base"
    );

    let res = exposed.handle(Request::factory("echo/fail")).await?;
    assert_eq!(res.body(), b"InternalError [ 500 ]: boom");
    Ok(())
}

#[tokio::test]
async fn panicking_controller_is_an_internal_error() -> Result<()> {
    let trail = Trail::default();
    let kernel = kernel(&trail, true)?;
    let cx = kernel.context();
    let res = cx.execute(Request::factory("echo/explode")).await?;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        res.body(),
        b"InternalError [ 500 ]: Controller panicked: controller exploded"
    );
    assert!(cx.current().is_none());

    let hidden = self::kernel(&trail, false)?;
    let res = hidden.handle(Request::factory("echo/explode")).await?;
    assert_eq!(res.body(), b"Internal Server Error");
    Ok(())
}

#[tokio::test]
async fn controller_names_ignore_case() -> Result<()> {
    let trail = Trail::default();
    let kernel = kernel(&trail, false)?;
    let res = kernel.handle(Request::factory("Echo/index")).await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.body(), b"Echo/index");
    Ok(())
}

#[tokio::test]
async fn miss_then_hit() -> Result<()> {
    let store = MemoryStore::default();
    let client = Fixed::new("max-age=30");
    let kernel = Kernel::builder(client.clone())
        .cache(HttpCache::new(Arc::new(store.clone())))
        .build();

    let first = kernel.handle(Request::factory("a?x=1")).await?;
    assert_eq!(first.header("x-cache-status"), Some("MISS"));
    assert_eq!(first.body(), b"fresh");
    assert_eq!(client.calls(), 1);
    // the response and its hit counter
    assert_eq!(store.len(), 2);
    assert!(store.ttls().iter().all(|ttl| *ttl == Some(Duration::from_secs(30))));

    let second = kernel.handle(Request::factory("a?x=1")).await?;
    assert_eq!(second.header("x-cache-status"), Some("HIT"));
    assert_eq!(second.header("x-cache-hits"), Some("1"));
    assert_eq!(second.body(), b"fresh");
    assert_eq!(client.calls(), 1);
    // the rewritten counter still expires with its response
    assert_eq!(store.len(), 2);
    assert!(store.ttls().iter().all(|ttl| {
        ttl.is_some_and(|ttl| {
            ttl >= Duration::from_secs(1) && ttl <= Duration::from_secs(30)
        })
    }));

    let third = kernel.handle(Request::factory("a?x=1")).await?;
    assert_eq!(third.header("x-cache-hits"), Some("2"));
    assert_eq!(client.calls(), 1);

    let other = kernel.handle(Request::factory("a?x=2")).await?;
    assert_eq!(other.header("x-cache-status"), Some("MISS"));
    assert_eq!(client.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn destructive_requests_bypass_the_cache() -> Result<()> {
    let store = MemoryStore::default();
    let client = Fixed::new("max-age=30");
    let kernel = Kernel::builder(client.clone())
        .cache(HttpCache::new(Arc::new(store.clone())))
        .build();

    kernel.handle(Request::factory("a")).await?;
    assert_eq!(store.len(), 2);

    let post = kernel.handle(Request::new(Method::Post, "a")).await?;
    assert_eq!(client.calls(), 2);
    assert_eq!(post.header("cache-control"), Some("no-cache, must-revalidate"));
    assert_eq!(post.header("x-cache-status"), None);
    assert_eq!(store.len(), 0);

    let again = kernel.handle(Request::factory("a")).await?;
    assert_eq!(again.header("x-cache-status"), Some("MISS"));
    assert_eq!(client.calls(), 3);

    for method in [Method::Put, Method::Delete] {
        kernel.handle(Request::new(method, "a")).await?;
    }
    assert_eq!(store.len(), 0);
    assert_eq!(client.calls(), 5);
    Ok(())
}

#[tokio::test]
async fn store_failures_are_treated_as_misses() -> Result<()> {
    let store = FailingStore::default();
    let client = Fixed::new("max-age=30");
    let kernel = Kernel::builder(client.clone())
        .cache(HttpCache::new(Arc::new(store.clone())))
        .build();

    for calls in 1..=2 {
        let res = kernel.handle(Request::factory("a")).await?;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.header("x-cache-status"), Some("MISS"));
        assert_eq!(res.body(), b"fresh");
        assert_eq!(client.calls(), calls);
    }
    // a read, the counter write and the response write per request
    assert_eq!(store.attempts(), 6);

    let post = kernel.handle(Request::new(Method::Post, "a")).await?;
    assert_eq!(post.status(), StatusCode::OK);
    assert_eq!(post.header("cache-control"), Some("no-cache, must-revalidate"));
    assert_eq!(client.calls(), 3);
    assert_eq!(store.attempts(), 7);
    Ok(())
}

#[tokio::test]
async fn uncacheable_responses_are_not_stored() -> Result<()> {
    let store = MemoryStore::default();
    let client = Fixed::new("no-store, max-age=60");
    let kernel = Kernel::builder(client.clone())
        .cache(HttpCache::new(Arc::new(store.clone())))
        .build();

    for _ in 0..2 {
        let res = kernel.handle(Request::factory("a")).await?;
        assert_eq!(res.header("x-cache-status"), Some("MISS"));
    }
    assert_eq!(client.calls(), 2);
    assert_eq!(store.len(), 0);
    Ok(())
}

#[tokio::test]
async fn pragma_no_cache_skips_the_cache() -> Result<()> {
    let store = MemoryStore::default();
    let client = Fixed::new("max-age=30");
    // key on the uri only, so the pragma header does not change the key
    let cache = HttpCache::new(Arc::new(store.clone())).with_options(
        HttpCacheOptions {
            cache_key: Some(Arc::new(http_kernel::uri_cache_key_generator)),
            ..Default::default()
        },
    );
    let kernel = Kernel::builder(client.clone()).cache(cache).build();
    let no_cache = || -> Result<Request> {
        let mut req = Request::factory("a");
        req.set_header("pragma", "no-cache")?;
        Ok(req)
    };

    let res = kernel.handle(no_cache()?).await?;
    assert_eq!(res.header("x-cache-status"), Some("MISS"));
    assert_eq!(store.len(), 0);

    kernel.handle(Request::factory("a")).await?;
    assert_eq!(store.len(), 2);

    let res = kernel.handle(no_cache()?).await?;
    assert_eq!(res.header("x-cache-status"), Some("MISS"));
    assert_eq!(client.calls(), 3);

    let res = kernel.handle(Request::factory("a")).await?;
    assert_eq!(res.header("x-cache-status"), Some("HIT"));
    assert_eq!(client.calls(), 3);
    Ok(())
}

#[tokio::test]
async fn passthrough_cache_adds_nothing() -> Result<()> {
    let client = Fixed::new("max-age=30");
    let kernel =
        Kernel::builder(client.clone()).cache(HttpCache::passthrough()).build();
    let res = kernel.handle(Request::factory("a")).await?;
    assert_eq!(res.header("x-cache-status"), None);
    kernel.handle(Request::factory("a")).await?;
    assert_eq!(client.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn follows_location_when_enabled() -> Result<()> {
    let trail = Trail::default();
    let plain = kernel(&trail, false)?;
    let res = plain.handle(Request::factory("echo/move")).await?;
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(res.header("location"), Some("/echo/index"));

    let following = Kernel::builder(InternalClient::new(registry(&trail)))
        .router(router()?)
        .options(ClientOptions { follow: true, ..Default::default() })
        .build();
    let res = following.handle(Request::factory("echo/move")).await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.body(), b"echo/index");
    Ok(())
}

#[tokio::test]
async fn redirect_loops_hit_the_depth_limit() -> Result<()> {
    let trail = Trail::default();
    let kernel = Kernel::builder(InternalClient::new(registry(&trail)))
        .router(router()?)
        .options(ClientOptions { follow: true, ..Default::default() })
        .build();
    let err = match kernel.handle(Request::factory("echo/loop")).await {
        Ok(res) => panic!("expected a recursion error, got {}", res.status()),
        Err(err) => err,
    };
    let recursion =
        err.downcast_ref::<RecursionError>().ok_or("not a recursion error")?;
    assert_eq!(recursion.depth, 6);
    assert_eq!(recursion.max, 5);
    assert_eq!(recursion.uri, "echo/loop");
    assert_eq!(trail.lock().unwrap().len(), 5);
    Ok(())
}

#[tokio::test]
async fn post_fields_become_the_body() -> Result<()> {
    let trail = Trail::default();
    let kernel = kernel(&trail, false)?;
    let mut req = Request::new(Method::Post, "echo/form");
    req.set_post([("a", "1"), ("b", "two words")]);
    let res = kernel.handle(req).await?;
    assert_eq!(res.body(), b"a=1&b=two+words");
    assert_eq!(
        res.header("x-content-type"),
        Some("application/x-www-form-urlencoded; charset=utf-8")
    );
    Ok(())
}

#[tokio::test]
async fn custom_header_callbacks_replace_the_response() -> Result<()> {
    let trail = Trail::default();
    let kernel = Kernel::builder(InternalClient::new(registry(&trail)))
        .router(router()?)
        .header_callback(
            http::header::LOCATION,
            |_req: &Request, _res: &Response, _opts: &ClientOptions| {
                Some(Request::factory("echo/followed"))
            },
        )
        .build();
    let res = kernel.handle(Request::factory("echo/move")).await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        *trail.lock().unwrap(),
        vec!["before echo/move".to_string(), "before echo/followed".to_string()]
    );
    Ok(())
}
