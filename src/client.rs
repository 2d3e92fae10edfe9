use std::{any::Any, fmt, panic::AssertUnwindSafe, sync::Arc, time::Instant};

use futures::FutureExt;

use crate::{
    controller::{qualified_name, ControllerEntry, ControllerRegistry},
    error::error_text,
    DispatchError, Request, RequestContext, Response, Result,
};

/// Executes a [`Request`] against some backend.
///
/// The [`Kernel`](crate::Kernel) prepares the request and hands it over,
/// optionally through an [`HttpCache`](crate::HttpCache).
#[async_trait::async_trait]
pub trait Client: Send + Sync {
    /// Produces the response for `request`, filling in `response`.
    ///
    /// An `Err` is reserved for failures the caller should see, such as a
    /// broken transport. Application errors become error responses.
    async fn execute_request(
        &self,
        cx: &RequestContext,
        request: Arc<Request>,
        response: Response,
    ) -> Result<Response>;
}

/// Dispatches requests to controllers in the same process.
///
/// A controller that panics is answered like an internal error.
#[derive(Clone, Default)]
pub struct InternalClient {
    registry: ControllerRegistry,
    expose_errors: bool,
}

impl fmt::Debug for InternalClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalClient")
            .field("registry", &self.registry)
            .field("expose_errors", &self.expose_errors)
            .finish()
    }
}

impl InternalClient {
    /// Creates a client resolving controllers from `registry`.
    pub fn new(registry: ControllerRegistry) -> Self {
        Self { registry, expose_errors: false }
    }

    /// Whether error details are written into error response bodies.
    pub fn expose_errors(mut self, expose: bool) -> Self {
        self.expose_errors = expose;
        self
    }

    /// The registry controllers are resolved from
    pub fn registry(&self) -> &ControllerRegistry {
        &self.registry
    }

    async fn dispatch(
        &self,
        cx: &RequestContext,
        request: &Arc<Request>,
        response: Response,
    ) -> std::result::Result<Response, DispatchError> {
        let Some(route) = request.route() else {
            return Err(DispatchError::not_found(request));
        };
        let name = qualified_name(&route.namespace, &route.controller);
        let factory = match self.registry.get(&name) {
            Some(ControllerEntry::Concrete(factory)) => Arc::clone(factory),
            Some(ControllerEntry::Abstract) => {
                return Err(DispatchError::Dispatch(format!(
                    "Cannot create instances of abstract {name}"
                )));
            }
            None => return Err(DispatchError::not_found(request)),
        };

        let mut controller = factory(Arc::clone(request), response);
        controller.execute(cx).await?.ok_or_else(|| {
            DispatchError::Dispatch(format!(
                "Controller {name} failed to return a Response"
            ))
        })
    }
}

#[async_trait::async_trait]
impl Client for InternalClient {
    async fn execute_request(
        &self,
        cx: &RequestContext,
        request: Arc<Request>,
        response: Response,
    ) -> Result<Response> {
        let started = Instant::now();
        let guard = cx.enter(Arc::clone(&request));
        let label = match guard.previous() {
            Some(parent) => {
                format!("\"{}\" « \"{}\"", request.uri(), parent.uri())
            }
            None => format!("\"{}\"", request.uri()),
        };

        let dispatched = AssertUnwindSafe(self.dispatch(cx, &request, response))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(DispatchError::internal(panic_message(panic.as_ref())))
            });
        let response = match dispatched {
            Ok(response) => response,
            Err(error) => {
                if matches!(
                    error,
                    DispatchError::Dispatch(_) | DispatchError::Internal(_)
                ) {
                    log::error!("{}", error_text(&error));
                }
                error.into_response(self.expose_errors)
            }
        };
        drop(guard);

        log::debug!(
            "{label} answered {} in {:?}",
            response.status().as_u16(),
            started.elapsed()
        );
        Ok(response)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("Controller panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("Controller panicked: {message}")
    } else {
        "Controller panicked".to_string()
    }
}
