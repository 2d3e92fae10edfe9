use std::{fmt, sync::Arc};

use futures::future::BoxFuture;
use http::{
    header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION, USER_AGENT},
    HeaderName, HeaderValue, StatusCode,
};
use serde::{Deserialize, Serialize};

use crate::{
    Client, HttpCache, Method, RecursionError, Request, RequestContext,
    Response, Result, Router,
};

/// Builds a follow-up request from a response header, or declines with `None`.
pub type HeaderCallback = Arc<
    dyn Fn(&Request, &Response, &ClientOptions) -> Option<Request> + Send + Sync,
>;

fn default_follow_headers() -> Vec<String> {
    vec!["authorization".to_string()]
}

fn default_max_callback_depth() -> usize {
    5
}

fn default_true() -> bool {
    true
}

/// Options controlling how the [`Kernel`] executes requests.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Follow redirects returned through the `Location` header
    pub follow: bool,
    /// Request headers copied onto followed requests
    #[serde(default = "default_follow_headers")]
    pub follow_headers: Vec<String>,
    /// Keep the original method when following a `302 Found`
    #[serde(default = "default_true")]
    pub strict_redirect: bool,
    /// How many nested header callbacks may run
    #[serde(default = "default_max_callback_depth")]
    pub max_callback_depth: usize,
    /// Advertise the crate in the `User-Agent` of executed requests
    pub expose: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            follow: false,
            follow_headers: default_follow_headers(),
            strict_redirect: true,
            max_callback_depth: default_max_callback_depth(),
            expose: false,
        }
    }
}

/// Follows redirects when [`ClientOptions::follow`] is set.
///
/// `201` and `303` are followed with GET, `301` and `307` keep the method,
/// and `302` keeps it only under [`ClientOptions::strict_redirect`]. The
/// configured follow headers are copied over, and so is the body for
/// anything but GET.
pub fn on_header_location(
    request: &Request,
    response: &Response,
    options: &ClientOptions,
) -> Option<Request> {
    if !options.follow {
        return None;
    }
    let method = match response.status() {
        StatusCode::MOVED_PERMANENTLY | StatusCode::TEMPORARY_REDIRECT => {
            request.method()
        }
        StatusCode::CREATED | StatusCode::SEE_OTHER => Method::Get,
        StatusCode::FOUND if options.strict_redirect => request.method(),
        StatusCode::FOUND => Method::Get,
        _ => return None,
    };
    let location = response.header(LOCATION.as_str())?;

    let mut follow = Request::factory(location);
    follow.set_method(method);
    for name in &options.follow_headers {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in request.headers().get_all(&name) {
            follow.append_header_value(name.clone(), value.clone());
        }
    }
    if method != Method::Get {
        follow.set_body(request.body().to_vec());
    }
    Some(follow)
}

/// Runs requests through routing, the optional cache and a [`Client`].
///
/// Always used behind an [`Arc`]; [`Kernel::context`] opens the
/// [`RequestContext`] of a top-level request.
pub struct Kernel {
    client: Arc<dyn Client>,
    cache: Option<HttpCache>,
    router: Router,
    options: ClientOptions,
    header_callbacks: Vec<(HeaderName, HeaderCallback)>,
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let callbacks: Vec<&str> =
            self.header_callbacks.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("Kernel")
            .field("client", &"dyn Client")
            .field("cache", &self.cache)
            .field("router", &self.router)
            .field("options", &self.options)
            .field("header_callbacks", &callbacks)
            .finish()
    }
}

impl Kernel {
    /// Starts building a kernel around `client`.
    pub fn builder(client: impl Client + 'static) -> KernelBuilder {
        KernelBuilder::new(Arc::new(client))
    }

    /// Opens the execution context of a new top-level request.
    pub fn context(self: &Arc<Self>) -> RequestContext {
        RequestContext::new(Arc::clone(self))
    }

    /// Executes a top-level request in a fresh context.
    pub async fn handle(self: &Arc<Self>, request: Request) -> Result<Response> {
        self.context().execute(request).await
    }

    /// The execution options
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// The response cache, if configured
    pub fn cache(&self) -> Option<&HttpCache> {
        self.cache.as_ref()
    }

    /// The router
    pub fn router(&self) -> &Router {
        &self.router
    }

    pub(crate) async fn execute(
        &self,
        cx: &RequestContext,
        request: Request,
    ) -> Result<Response> {
        self.execute_at(cx, request, 1).await
    }

    fn execute_at<'a>(
        &'a self,
        cx: &'a RequestContext,
        mut request: Request,
        depth: usize,
    ) -> BoxFuture<'a, Result<Response>> {
        Box::pin(async move {
            if depth > self.options.max_callback_depth {
                return Err(RecursionError {
                    uri: request.uri().to_string(),
                    depth,
                    max: self.options.max_callback_depth,
                }
                .into());
            }

            if !request.post().is_empty() {
                let body = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(request.post())
                    .finish();
                request.set_body(body.into_bytes());
                request.insert_header(
                    CONTENT_TYPE,
                    HeaderValue::from_static(
                        "application/x-www-form-urlencoded; charset=utf-8",
                    ),
                );
            }
            let length = HeaderValue::from(request.content_length());
            request.insert_header(CONTENT_LENGTH, length);
            if self.options.expose {
                request.insert_header(
                    USER_AGENT,
                    HeaderValue::from_static(concat!(
                        env!("CARGO_PKG_NAME"),
                        "/",
                        env!("CARGO_PKG_VERSION")
                    )),
                );
            }
            if request.route().is_none() && !self.router.process(&mut request) {
                log::debug!("No route matched \"{}\"", request.uri());
            }

            let request = Arc::new(request);
            let response = Response::new();
            let mut response = match &self.cache {
                Some(cache) => {
                    cache
                        .execute(
                            self.client.as_ref(),
                            cx,
                            Arc::clone(&request),
                            response,
                        )
                        .await?
                }
                None => {
                    self.client
                        .execute_request(cx, Arc::clone(&request), response)
                        .await?
                }
            };

            for (name, callback) in &self.header_callbacks {
                if !response.headers().contains_key(name) {
                    continue;
                }
                if let Some(next) =
                    callback(request.as_ref(), &response, &self.options)
                {
                    response = self.execute_at(cx, next, depth + 1).await?;
                    break;
                }
            }
            Ok(response)
        })
    }
}

/// Builder for a [`Kernel`].
pub struct KernelBuilder {
    client: Arc<dyn Client>,
    cache: Option<HttpCache>,
    router: Router,
    options: ClientOptions,
    header_callbacks: Vec<(HeaderName, HeaderCallback)>,
}

impl fmt::Debug for KernelBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelBuilder")
            .field("cache", &self.cache)
            .field("router", &self.router)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl KernelBuilder {
    fn new(client: Arc<dyn Client>) -> Self {
        let location: HeaderCallback = Arc::new(on_header_location);
        Self {
            client,
            cache: None,
            router: Router::new(),
            options: ClientOptions::default(),
            header_callbacks: vec![(LOCATION, location)],
        }
    }

    /// Wraps the client in a response cache.
    pub fn cache(mut self, cache: HttpCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the router used for unrouted requests.
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Sets the execution options.
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Registers a callback for a response header, replacing any previous one.
    pub fn header_callback<F>(mut self, name: HeaderName, callback: F) -> Self
    where
        F: Fn(&Request, &Response, &ClientOptions) -> Option<Request>
            + Send
            + Sync
            + 'static,
    {
        let callback: HeaderCallback = Arc::new(callback);
        self.header_callbacks.retain(|(existing, _)| *existing != name);
        self.header_callbacks.push((name, callback));
        self
    }

    /// Removes every header callback, including the default `Location` one.
    pub fn clear_header_callbacks(mut self) -> Self {
        self.header_callbacks.clear();
        self
    }

    /// Builds the kernel.
    pub fn build(self) -> Arc<Kernel> {
        Arc::new(Kernel {
            client: self.client,
            cache: self.cache,
            router: self.router,
            options: self.options,
            header_callbacks: self.header_callbacks,
        })
    }
}
