//! Ordered, named routes resolving a uri to controller metadata.

use std::{collections::HashMap, fmt};

use crate::{Request, Result, RouteMatch};

/// A named route with one or more path patterns and defaults.
///
/// Patterns use `{name}` segments and `{*name}` catch-alls. The parameters
/// `namespace`, `controller` and `action` fill the routing metadata, every
/// other parameter is kept in [`RouteMatch::params`].
pub struct Route {
    name: String,
    patterns: Vec<String>,
    matcher: matchit::Router<()>,
    namespace: String,
    controller: Option<String>,
    action: String,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("patterns", &self.patterns)
            .field("namespace", &self.namespace)
            .field("controller", &self.controller)
            .field("action", &self.action)
            .finish()
    }
}

impl Route {
    /// Creates a route without patterns.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            patterns: Vec::new(),
            matcher: matchit::Router::new(),
            namespace: String::new(),
            controller: None,
            action: "index".to_string(),
        }
    }

    /// Adds a pattern such as `/{controller}/{action}`.
    pub fn pattern(mut self, pattern: &str) -> Result<Self> {
        self.matcher.insert(pattern, ())?;
        self.patterns.push(pattern.to_string());
        Ok(self)
    }

    /// Default namespace
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Default controller
    pub fn controller(mut self, controller: impl Into<String>) -> Self {
        self.controller = Some(controller.into());
        self
    }

    /// Default action, `index` unless set
    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    /// The route name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Matches a route-relative uri.
    ///
    /// A match without a controller, from the pattern or the defaults, is
    /// not a match.
    pub fn matches(&self, uri: &str) -> Option<RouteMatch> {
        let path = format!("/{}", uri.trim_matches('/'));
        let matched = self.matcher.at(&path).ok()?;

        let mut route = RouteMatch {
            route: self.name.clone(),
            namespace: self.namespace.clone(),
            controller: self.controller.clone().unwrap_or_default(),
            action: self.action.clone(),
            params: HashMap::new(),
        };
        for (key, value) in matched.params.iter() {
            match key {
                "namespace" => route.namespace = value.to_string(),
                "controller" => route.controller = value.to_string(),
                "action" => route.action = value.to_string(),
                _ => {
                    route.params.insert(key.to_string(), value.to_string());
                }
            }
        }
        (!route.controller.is_empty()).then_some(route)
    }
}

/// Routes tried in registration order.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Creates a router without routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a route.
    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// The first route matching `uri`.
    pub fn find(&self, uri: &str) -> Option<RouteMatch> {
        self.routes.iter().find_map(|route| route.matches(uri))
    }

    /// Attaches routing metadata to `request`.
    ///
    /// Returns whether a route matched; unmatched requests stay unrouted.
    pub fn process(&self, request: &mut Request) -> bool {
        match self.find(request.uri()) {
            Some(route) => {
                log::debug!(
                    "Routed \"{}\" via {} to {}::{}",
                    request.uri(),
                    route.route,
                    route.controller,
                    route.action
                );
                request.set_route(route);
                true
            }
            None => false,
        }
    }
}
