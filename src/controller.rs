//! Controllers and the registry the internal client resolves them from.

use std::{collections::HashMap, fmt, sync::Arc};

use crate::{DispatchError, Request, RequestContext, Response};

/// Result type for controller hooks.
pub type ActionResult = Result<(), DispatchError>;

/// A request handler with a before/action/after lifecycle.
///
/// Controllers are built per request from the routed [`Request`] and a fresh
/// [`Response`] that they fill in.
#[async_trait::async_trait]
pub trait Controller: Send {
    /// The request being handled
    fn request(&self) -> &Arc<Request>;

    /// Gives up the response built so far.
    ///
    /// Returning `None` makes the dispatch fail.
    fn take_response(&mut self) -> Option<Response>;

    /// Runs before the action.
    async fn before(&mut self, _cx: &RequestContext) -> ActionResult {
        Ok(())
    }

    /// Runs the named action.
    ///
    /// Unknown actions should answer with [`DispatchError::not_found`].
    async fn action(&mut self, cx: &RequestContext, name: &str) -> ActionResult;

    /// Runs after the action.
    async fn after(&mut self, _cx: &RequestContext) -> ActionResult {
        Ok(())
    }

    /// Runs the full lifecycle and returns the response.
    async fn execute(
        &mut self,
        cx: &RequestContext,
    ) -> Result<Option<Response>, DispatchError> {
        self.before(cx).await?;
        let request = Arc::clone(self.request());
        let action = request.action().unwrap_or("index");
        self.action(cx, action).await?;
        self.after(cx).await?;
        Ok(self.take_response())
    }
}

/// Builds a controller for a routed request.
pub type ControllerFactory =
    Arc<dyn Fn(Arc<Request>, Response) -> Box<dyn Controller> + Send + Sync>;

/// What a registered controller name resolves to.
#[derive(Clone)]
pub enum ControllerEntry {
    /// A controller that can be built
    Concrete(ControllerFactory),
    /// A base controller that must not be dispatched to
    Abstract,
}

impl fmt::Debug for ControllerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concrete(_) => f.write_str(
                "Concrete(Fn(Arc<Request>, Response) -> Box<dyn Controller>)",
            ),
            Self::Abstract => f.write_str("Abstract"),
        }
    }
}

/// Maps qualified controller names to their factories.
#[derive(Debug, Clone, Default)]
pub struct ControllerRegistry {
    entries: HashMap<String, ControllerEntry>,
}

impl ControllerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a controller under `namespace` and `controller`.
    pub fn register<F>(
        &mut self,
        namespace: &str,
        controller: &str,
        factory: F,
    ) -> &mut Self
    where
        F: Fn(Arc<Request>, Response) -> Box<dyn Controller>
            + Send
            + Sync
            + 'static,
    {
        self.entries.insert(
            registry_key(&qualified_name(namespace, controller)),
            ControllerEntry::Concrete(Arc::new(factory)),
        );
        self
    }

    /// Registers a name that exists but cannot be dispatched to.
    pub fn register_abstract(
        &mut self,
        namespace: &str,
        controller: &str,
    ) -> &mut Self {
        self.entries.insert(
            registry_key(&qualified_name(namespace, controller)),
            ControllerEntry::Abstract,
        );
        self
    }

    /// Looks up a qualified name, ignoring ASCII case.
    pub fn get(&self, qualified: &str) -> Option<&ControllerEntry> {
        self.entries.get(&registry_key(qualified))
    }
}

fn registry_key(qualified: &str) -> String {
    qualified.to_ascii_lowercase()
}

/// Composes `namespace::Controller::controller`.
///
/// The legacy separators `_`, `/` and `\` become `::`, so `Admin_Users`
/// resolves to `Controller::Admin::Users`.
///
/// ```rust
/// use http_kernel::qualified_name;
///
/// assert_eq!(qualified_name("", "Welcome"), "Controller::Welcome");
/// assert_eq!(qualified_name("app", "Admin_Users"), "app::Controller::Admin::Users");
/// ```
pub fn qualified_name(namespace: &str, controller: &str) -> String {
    let segments = |s: &str| -> Vec<String> {
        s.split(|c: char| matches!(c, '_' | '/' | '\\'))
            .flat_map(|part| part.split("::"))
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect()
    };
    let mut parts = segments(namespace);
    parts.push("Controller".to_string());
    parts.extend(segments(controller));
    parts.join("::")
}
