use std::fmt;

use http::{
    header::{CACHE_CONTROL, CONTENT_LENGTH, ETAG, IF_NONE_MATCH},
    response, HeaderMap, HeaderName, HeaderValue, StatusCode,
};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::{
    request::parse_header, BadHeader, BadVersion, BoxError, HttpError, Request,
    Result,
};

/// Represents an HTTP version
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[non_exhaustive]
pub enum HttpVersion {
    /// HTTP Version 0.9
    #[serde(rename = "HTTP/0.9")]
    Http09,
    /// HTTP Version 1.0
    #[serde(rename = "HTTP/1.0")]
    Http10,
    /// HTTP Version 1.1
    #[default]
    #[serde(rename = "HTTP/1.1")]
    Http11,
    /// HTTP Version 2.0
    #[serde(rename = "HTTP/2.0")]
    H2,
    /// HTTP Version 3.0
    #[serde(rename = "HTTP/3.0")]
    H3,
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            HttpVersion::Http09 => write!(f, "HTTP/0.9"),
            HttpVersion::Http10 => write!(f, "HTTP/1.0"),
            HttpVersion::Http11 => write!(f, "HTTP/1.1"),
            HttpVersion::H2 => write!(f, "HTTP/2.0"),
            HttpVersion::H3 => write!(f, "HTTP/3.0"),
        }
    }
}

impl TryFrom<http::Version> for HttpVersion {
    type Error = BoxError;

    fn try_from(value: http::Version) -> Result<Self> {
        Ok(match value {
            http::Version::HTTP_09 => Self::Http09,
            http::Version::HTTP_10 => Self::Http10,
            http::Version::HTTP_11 => Self::Http11,
            http::Version::HTTP_2 => Self::H2,
            http::Version::HTTP_3 => Self::H3,
            _ => return Err(Box::new(BadVersion)),
        })
    }
}

impl From<HttpVersion> for http::Version {
    fn from(value: HttpVersion) -> Self {
        match value {
            HttpVersion::Http09 => Self::HTTP_09,
            HttpVersion::Http10 => Self::HTTP_10,
            HttpVersion::Http11 => Self::HTTP_11,
            HttpVersion::H2 => Self::HTTP_2,
            HttpVersion::H3 => Self::HTTP_3,
        }
    }
}

/// An outbound HTTP message.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    protocol: HttpVersion,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    /// A `200 OK` response with no headers and an empty body.
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
            protocol: HttpVersion::Http11,
        }
    }

    /// The status code
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Sets the status code.
    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    /// The protocol version
    pub fn protocol(&self) -> HttpVersion {
        self.protocol
    }

    /// Sets the protocol version.
    pub fn set_protocol(&mut self, protocol: HttpVersion) -> &mut Self {
        self.protocol = protocol;
        self
    }

    /// The body
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

    /// Merges `headers` in, replacing the keys they contain.
    pub fn extend_headers(&mut self, headers: HeaderMap) -> &mut Self {
        self.headers.extend(headers);
        self
    }

    /// Removes a header.
    pub fn remove_header(&mut self, name: &str) -> &mut Self {
        self.headers.remove(name);
        self
    }

    /// Removes every header.
    pub fn clear_headers(&mut self) -> &mut Self {
        self.headers.clear();
        self
    }

    /// A strong ETag derived from the body.
    pub fn generate_etag(&self) -> String {
        format!("\"{}\"", hex::encode(Sha1::digest(&self.body)))
    }

    /// Tags the response with an ETag and answers conditional requests.
    ///
    /// `must-revalidate` is added to `Cache-Control`. When the request's
    /// `If-None-Match` equals the ETag, a `304 Not Modified` error carrying
    /// the ETag is returned so the caller can stop rendering.
    pub fn check_cache(
        &mut self,
        etag: Option<&str>,
        request: &Request,
    ) -> std::result::Result<&mut Self, HttpError> {
        let etag = etag.map_or_else(|| self.generate_etag(), str::to_string);
        let etag_value = HeaderValue::from_str(&etag).map_err(|_| {
            HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, BadHeader.to_string())
        })?;
        self.headers.insert(ETAG, etag_value.clone());

        let cache_control = match self.header(CACHE_CONTROL.as_str()) {
            Some(existing) => format!("{existing}, must-revalidate"),
            None => "must-revalidate".to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&cache_control) {
            self.headers.insert(CACHE_CONTROL, value);
        }

        if request.header(IF_NONE_MATCH.as_str()) == Some(etag.as_str()) {
            return Err(HttpError::new(StatusCode::NOT_MODIFIED, "")
                .with_header(ETAG, etag_value));
        }
        Ok(self)
    }

    /// Builds the head of the message for a transport.
    ///
    /// `Content-Length` is set from the body when it is missing.
    pub fn send_headers(&self) -> Result<response::Parts> {
        let mut converted = response::Builder::new()
            .status(self.status)
            .version(self.protocol.into())
            .body(())?;
        *converted.headers_mut() = self.headers.clone();
        if !converted.headers().contains_key(CONTENT_LENGTH) {
            converted
                .headers_mut()
                .insert(CONTENT_LENGTH, HeaderValue::from(self.body.len()));
        }
        Ok(converted.into_parts().0)
    }

    /// Hands the response over to a transport.
    pub fn into_http(self) -> Result<http::Response<Vec<u8>>> {
        let parts = self.send_headers()?;
        Ok(http::Response::from_parts(parts, self.body))
    }

    /// Builds a response from an `http::Response`.
    pub fn from_http(response: http::Response<Vec<u8>>) -> Result<Self> {
        let (parts, body) = response.into_parts();
        Ok(Self {
            status: parts.status,
            headers: parts.headers,
            body,
            protocol: parts.version.try_into()?,
        })
    }
}

/// The serialized form of a [`Response`] kept in a cache store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StoredResponse {
    /// HTTP response status code
    pub status: u16,
    /// HTTP response headers, in order, repeated for multi-valued headers
    pub headers: Vec<(String, Vec<u8>)>,
    /// HTTP response body
    pub body: Vec<u8>,
    /// HTTP response version
    pub version: HttpVersion,
}

impl From<&Response> for StoredResponse {
    fn from(response: &Response) -> Self {
        Self {
            status: response.status.as_u16(),
            headers: response
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect(),
            body: response.body.clone(),
            version: response.protocol,
        }
    }
}

impl TryFrom<StoredResponse> for Response {
    type Error = BoxError;

    fn try_from(stored: StoredResponse) -> Result<Self> {
        let mut headers = HeaderMap::with_capacity(stored.headers.len());
        for (name, value) in &stored.headers {
            headers.append(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_bytes(value)?,
            );
        }
        Ok(Self {
            status: StatusCode::from_u16(stored.status)?,
            headers,
            body: stored.body,
            protocol: stored.version,
        })
    }
}
