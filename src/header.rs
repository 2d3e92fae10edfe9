//! `Cache-Control` directive parsing and serialization.

use std::fmt;

use http::HeaderMap;

/// A `Cache-Control` directive set.
///
/// Directive names are lower-cased, valued directives keep their raw value.
/// Insertion order is preserved so that serializing a parsed header
/// reproduces its tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    directives: Vec<(String, Option<String>)>,
}

impl CacheControl {
    /// Creates an empty directive set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a raw `Cache-Control` header value.
    ///
    /// ```rust
    /// use http_kernel::CacheControl;
    ///
    /// let cc = CacheControl::parse("max-age=60, Must-Revalidate");
    /// assert_eq!(cc.seconds("max-age"), Some(60));
    /// assert!(cc.contains("must-revalidate"));
    /// ```
    pub fn parse(value: &str) -> Self {
        let mut cc = Self::new();
        for token in value.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            match token.split_once('=') {
                Some((name, value)) => cc.set(
                    name.trim(),
                    Some(value.trim().trim_matches('"').to_string()),
                ),
                None => cc.set(token, None),
            }
        }
        cc
    }

    /// Parses every `Cache-Control` value present in `headers`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut cc = Self::new();
        for value in headers.get_all(http::header::CACHE_CONTROL) {
            if let Ok(value) = value.to_str() {
                for (name, v) in Self::parse(value).directives {
                    cc.set(&name, v);
                }
            }
        }
        cc
    }

    /// Adds a valueless directive, returning `self` for chaining.
    pub fn with(mut self, name: &str) -> Self {
        self.set(name, None);
        self
    }

    /// Adds a directive with a value, returning `self` for chaining.
    pub fn with_value(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.set(name, Some(value.to_string()));
        self
    }

    /// Sets a directive, replacing any previous value in place.
    pub fn set(&mut self, name: &str, value: Option<String>) {
        let name = name.to_ascii_lowercase();
        match self.directives.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = value,
            None => self.directives.push((name, value)),
        }
    }

    /// Removes a directive.
    pub fn remove(&mut self, name: &str) {
        self.directives.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Whether the directive is present, valued or not.
    pub fn contains(&self, name: &str) -> bool {
        self.directives.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// The raw value of a directive, `None` if it is absent or valueless.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.directives
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_deref())
    }

    /// The numeric value of a directive such as `max-age`.
    ///
    /// Values that are not integers are treated as absent.
    pub fn seconds(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|v| v.parse().ok())
    }

    /// Whether the set holds no directives.
    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    /// Iterates over the directives in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.directives.iter().map(|(n, v)| (n.as_str(), v.as_deref()))
    }
}

impl fmt::Display for CacheControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.directives.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match value {
                Some(value) => write!(f, "{name}={value}")?,
                None => f.write_str(name)?,
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for CacheControl {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}
