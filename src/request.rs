use std::{collections::HashMap, fmt, str::FromStr};

use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::{error::BadMethod, BadHeader, Result};

/// The HTTP methods a request may use.
#[derive(
    Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    #[default]
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
    /// HEAD
    Head,
    /// OPTIONS
    Options,
    /// TRACE
    Trace,
    /// CONNECT
    Connect,
    /// PATCH
    Patch,
}

impl Method {
    /// Returns the upper case wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
            Self::Connect => "CONNECT",
            Self::Patch => "PATCH",
        }
    }

    /// POST, PUT and DELETE are assumed to change server state.
    pub fn is_destructive(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = BadMethod;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            "TRACE" => Self::Trace,
            "CONNECT" => Self::Connect,
            "PATCH" => Self::Patch,
            _ => return Err(BadMethod),
        })
    }
}

impl TryFrom<&http::Method> for Method {
    type Error = BadMethod;

    fn try_from(value: &http::Method) -> std::result::Result<Self, Self::Error> {
        value.as_str().parse()
    }
}

impl From<Method> for http::Method {
    fn from(value: Method) -> Self {
        match value {
            Method::Get => Self::GET,
            Method::Post => Self::POST,
            Method::Put => Self::PUT,
            Method::Delete => Self::DELETE,
            Method::Head => Self::HEAD,
            Method::Options => Self::OPTIONS,
            Method::Trace => Self::TRACE,
            Method::Connect => Self::CONNECT,
            Method::Patch => Self::PATCH,
        }
    }
}

/// Routing metadata attached to a request once a route matched it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteMatch {
    /// Name of the route that matched
    pub route: String,
    /// Namespace the controller lives in, empty for the root namespace
    pub namespace: String,
    /// Controller identifier
    pub controller: String,
    /// Action to run on the controller
    pub action: String,
    /// Remaining path parameters
    pub params: HashMap<String, String>,
}

/// An inbound request or a sub-request.
#[derive(Debug, Clone, Default)]
pub struct Request {
    method: Method,
    uri: String,
    query: Vec<(String, String)>,
    post: Vec<(String, String)>,
    headers: HeaderMap,
    body: Vec<u8>,
    route: Option<RouteMatch>,
}

impl Request {
    /// Creates a request for a route-relative `uri`.
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self { method, uri: uri.into(), ..Self::default() }
    }

    /// Creates a GET request from `uri`, splitting off its query string.
    ///
    /// ```rust
    /// use http_kernel::Request;
    ///
    /// let req = Request::factory("/a/b?x=1&y=2");
    /// assert_eq!(req.uri(), "a/b");
    /// assert_eq!(req.query_value("y"), Some("2"));
    /// ```
    pub fn factory(uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (uri, None),
        };
        let mut req = Self::new(Method::Get, path.trim_matches('/'));
        if let Some(query) = query {
            req.query = url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect();
        }
        req
    }

    /// The request method
    pub fn method(&self) -> Method {
        self.method
    }

    /// Changes the request method.
    pub fn set_method(&mut self, method: Method) -> &mut Self {
        self.method = method;
        self
    }

    /// The route-relative uri
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Query parameters in the order they were given
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// The first value of a query parameter.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Replaces the query parameters.
    pub fn set_query<K, V>(
        &mut self,
        query: impl IntoIterator<Item = (K, V)>,
    ) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query =
            query.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    /// Form fields to be encoded into the body on execution
    pub fn post(&self) -> &[(String, String)] {
        &self.post
    }

    /// Replaces the form fields.
    pub fn set_post<K, V>(
        &mut self,
        post: impl IntoIterator<Item = (K, V)>,
    ) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.post =
            post.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    /// The raw body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Replaces the body.
    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) -> &mut Self {
        self.body = body.into();
        self
    }

    /// Length of the body in bytes
    pub fn content_length(&self) -> usize {
        self.body.len()
    }

    /// All headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The first value of a header, if it is valid text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Every value of a multi-valued header.
    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    /// Sets a header, replacing previous values of that header only.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<&mut Self> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Adds a value to a header without removing existing ones.
    pub fn append_header(
        &mut self,
        name: &str,
        value: &str,
    ) -> Result<&mut Self> {
        let (name, value) = parse_header(name, value)?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Sets a typed header.
    pub fn insert_header(
        &mut self,
        name: HeaderName,
        value: HeaderValue,
    ) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    /// Adds a typed header value without removing existing ones.
    pub fn append_header_value(
        &mut self,
        name: HeaderName,
        value: HeaderValue,
    ) -> &mut Self {
        self.headers.append(name, value);
        self
    }

    /// Removes every header.
    pub fn clear_headers(&mut self) -> &mut Self {
        self.headers.clear();
        self
    }

    /// Routing metadata, `None` until a route matched
    pub fn route(&self) -> Option<&RouteMatch> {
        self.route.as_ref()
    }

    /// Attaches routing metadata.
    pub fn set_route(&mut self, route: RouteMatch) -> &mut Self {
        self.route = Some(route);
        self
    }

    /// The routed namespace
    pub fn namespace(&self) -> Option<&str> {
        self.route.as_ref().map(|r| r.namespace.as_str())
    }

    /// The routed controller
    pub fn controller(&self) -> Option<&str> {
        self.route.as_ref().map(|r| r.controller.as_str())
    }

    /// The routed action
    pub fn action(&self) -> Option<&str> {
        self.route.as_ref().map(|r| r.action.as_str())
    }

    /// A routed path parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.route
            .as_ref()
            .and_then(|r| r.params.get(name))
            .map(String::as_str)
    }
}

pub(crate) fn parse_header(
    name: &str,
    value: &str,
) -> Result<(HeaderName, HeaderValue)> {
    let name = HeaderName::from_str(name).map_err(|_| BadHeader)?;
    let value = HeaderValue::from_str(value).map_err(|_| BadHeader)?;
    Ok((name, value))
}
