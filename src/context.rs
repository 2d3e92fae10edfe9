use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{Kernel, Request, Response, Result};

#[derive(Debug, Default)]
struct Stack {
    initial: Option<Arc<Request>>,
    current: Option<Arc<Request>>,
}

/// Execution context of one top-level request.
///
/// Tracks the `initial` request and the `current` (innermost) one while
/// sub-requests are dispatched. A context is never shared between
/// unrelated top-level requests.
pub struct RequestContext {
    kernel: Arc<Kernel>,
    stack: Mutex<Stack>,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stack = self.lock();
        f.debug_struct("RequestContext")
            .field("initial", &stack.initial.as_ref().map(|r| r.uri().to_string()))
            .field("current", &stack.current.as_ref().map(|r| r.uri().to_string()))
            .finish_non_exhaustive()
    }
}

impl RequestContext {
    pub(crate) fn new(kernel: Arc<Kernel>) -> Self {
        Self { kernel, stack: Mutex::new(Stack::default()) }
    }

    /// The kernel this context executes requests with
    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// The first request dispatched in this context
    pub fn initial(&self) -> Option<Arc<Request>> {
        self.lock().initial.clone()
    }

    /// The innermost request currently being dispatched
    pub fn current(&self) -> Option<Arc<Request>> {
        self.lock().current.clone()
    }

    /// Whether `request` is the initial request of this context.
    pub fn is_initial(&self, request: &Arc<Request>) -> bool {
        self.lock().initial.as_ref().is_some_and(|i| Arc::ptr_eq(i, request))
    }

    /// Executes a request, or a sub-request when called during dispatch.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let kernel = Arc::clone(&self.kernel);
        kernel.execute(self, request).await
    }

    /// Makes `request` the current request until the guard is dropped.
    ///
    /// The previous current request is restored on drop, including when
    /// the dispatch fails or unwinds.
    pub(crate) fn enter(&self, request: Arc<Request>) -> CurrentGuard<'_> {
        let mut stack = self.lock();
        if stack.initial.is_none() {
            stack.initial = Some(Arc::clone(&request));
        }
        let previous = stack.current.replace(request);
        CurrentGuard { context: self, previous }
    }

    fn lock(&self) -> MutexGuard<'_, Stack> {
        self.stack.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Restores the previous current request when dropped.
#[derive(Debug)]
pub(crate) struct CurrentGuard<'a> {
    context: &'a RequestContext,
    previous: Option<Arc<Request>>,
}

impl CurrentGuard<'_> {
    /// The request that was current before this one
    pub(crate) fn previous(&self) -> Option<&Arc<Request>> {
        self.previous.as_ref()
    }
}

impl Drop for CurrentGuard<'_> {
    fn drop(&mut self) {
        self.context.lock().current = self.previous.take();
    }
}
