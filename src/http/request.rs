//! HTTP request model.
//!
//! `HttpRequestBuilder` accumulates the request through the pipeline stages
//! (build, interception, parameter injection) and freezes into an immutable
//! `HttpRequest` at fire time. Header/query/body maps preserve first-insertion
//! order; `add_*` overrides later values for the same key in place, `set_*`
//! replaces the whole map.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use indexmap::IndexMap;

use crate::error::RestError;
use crate::serialize::UploadSource;

/// HTTP method of a bound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpVerb {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
}

impl HttpVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
        }
    }

    /// Verbs that carry a request entity.
    pub fn supports_body(&self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Delete | Self::Patch)
    }
}

impl FromStr for HttpVerb {
    type Err = RestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "PATCH" => Ok(Self::Patch),
            other => Err(RestError::ConfigurationError(format!(
                "unknown HTTP verb: {other}"
            ))),
        }
    }
}

/// A body entry: serialized text or a raw upload that bypassed serialization.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyValue {
    Text(String),
    Raw(UploadSource),
}

/// Key under which the single unnamed body parameter is stored. An unnamed
/// body parameter becomes the whole request entity.
pub(crate) const UNNAMED_BODY_KEY: &str = "";

/// Mutable request accumulator.
#[derive(Debug, Clone, Default)]
pub struct HttpRequestBuilder {
    base_uri: Option<String>,
    verb: HttpVerb,
    encoding: Option<String>,
    connect_timeout: Option<Duration>,
    socket_timeout: Option<Duration>,
    headers: IndexMap<String, String>,
    query: IndexMap<String, String>,
    body: IndexMap<String, BodyValue>,
    query_name_by_index: HashMap<usize, String>,
    unnamed_body_writes: usize,
}

impl HttpRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base URI with the path template appended; positional `{n}` tokens are
    /// resolved later via [`Self::replace_placeholder_in_uri`].
    pub fn pointing_to(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = Some(base_uri.into());
        self
    }

    pub fn using(mut self, verb: HttpVerb) -> Self {
        self.verb = verb;
        self
    }

    pub fn encoded_as(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn timeout_connection_after(&mut self, timeout: Duration) -> &mut Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn timeout_socket_after(&mut self, timeout: Duration) -> &mut Self {
        self.socket_timeout = Some(timeout);
        self
    }

    pub fn set_verb(&mut self, verb: HttpVerb) -> &mut Self {
        self.verb = verb;
        self
    }

    /// Replace all headers.
    pub fn set_headers<I, K, V>(&mut self, headers: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers = headers
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Merge headers; later calls win for the same key, first-insertion
    /// order is kept for keys not overridden.
    pub fn add_headers<I, K, V>(&mut self, headers: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in headers {
            self.headers.insert(k.into(), v.into());
        }
        self
    }

    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn set_query_params<I, K, V>(&mut self, params: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn add_query_params<I, K, V>(&mut self, params: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in params {
            self.query.insert(k.into(), v.into());
        }
        self
    }

    pub fn add_query_param(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Add a query param while recording which argument position produced
    /// it, enabling later in-place replacement by index.
    pub fn add_query_param_at(
        &mut self,
        index: usize,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        let name = name.into();
        self.query_name_by_index.insert(index, name.clone());
        self.query.insert(name, value.into());
        self
    }

    pub fn set_body_params<I, K>(&mut self, params: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, BodyValue)>,
        K: Into<String>,
    {
        self.unnamed_body_writes = 0;
        self.body = IndexMap::new();
        for (k, v) in params {
            let k = k.into();
            if k == UNNAMED_BODY_KEY {
                self.unnamed_body_writes += 1;
            }
            self.body.insert(k, v);
        }
        self
    }

    pub fn add_body_params<I, K>(&mut self, params: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, BodyValue)>,
        K: Into<String>,
    {
        for (k, v) in params {
            let k = k.into();
            if k == UNNAMED_BODY_KEY {
                self.unnamed_body_writes += 1;
            }
            self.body.insert(k, v);
        }
        self
    }

    pub fn add_body_param(&mut self, name: impl Into<String>, value: BodyValue) -> &mut Self {
        self.add_body_params([(name.into(), value)])
    }

    /// Occupy the single unnamed body slot. The value becomes the whole
    /// request entity at fire time.
    pub fn add_unnamed_body_param(&mut self, value: BodyValue) -> &mut Self {
        self.add_body_params([(UNNAMED_BODY_KEY.to_string(), value)])
    }

    /// Resolve the positional `{index}` placeholder in the URI. Every
    /// occurrence of the token is replaced; if the index was previously
    /// routed to a named query param, that param is overwritten instead.
    pub fn replace_placeholder_in_uri(&mut self, index: usize, value: &str) -> &mut Self {
        let token = format!("{{{index}}}");
        let replaced = self
            .base_uri
            .as_ref()
            .filter(|uri| uri.contains(&token))
            .map(|uri| uri.replace(&token, value));
        if replaced.is_some() {
            self.base_uri = replaced;
            return self;
        }
        if let Some(name) = self.query_name_by_index.get(&index) {
            self.query.insert(name.clone(), value.to_string());
        }
        self
    }

    // Accessors used by interceptors (the OAuth signer in particular).

    pub fn verb(&self) -> HttpVerb {
        self.verb
    }

    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    pub fn headers(&self) -> &IndexMap<String, String> {
        &self.headers
    }

    pub fn query_params(&self) -> &IndexMap<String, String> {
        &self.query
    }

    pub fn body_params(&self) -> &IndexMap<String, BodyValue> {
        &self.body
    }

    pub fn unnamed_body_occupied(&self) -> bool {
        self.unnamed_body_writes > 0
    }

    /// Current base URI with slashes collapsed, query excluded. Placeholders
    /// may still be present before injection completes.
    pub fn path_url(&self) -> Option<String> {
        self.base_uri.as_deref().map(collapse_slashes)
    }

    /// Freeze into an immutable request.
    ///
    /// Fails when a `{…}` placeholder survives in the URI, when base URI or
    /// encoding is missing, or when the unnamed body slot was occupied more
    /// than once.
    pub fn build(self) -> Result<HttpRequest, RestError> {
        let base_uri = self.base_uri.ok_or_else(|| {
            RestError::ConfigurationError("request has no base URI".into())
        })?;
        let encoding = self.encoding.ok_or_else(|| {
            RestError::ConfigurationError("request has no encoding".into())
        })?;
        if let Some(token) = first_placeholder(&base_uri) {
            return Err(RestError::ConfigurationError(format!(
                "unresolved placeholder {token} in {base_uri}"
            )));
        }
        if self.unnamed_body_writes > 1 {
            return Err(RestError::ConfigurationError(
                "unnamed body parameter slot occupied more than once".into(),
            ));
        }

        let path_url = collapse_slashes(&base_uri);
        let url = append_query(&path_url, &self.query);

        Ok(HttpRequest {
            url,
            path_url,
            verb: self.verb,
            encoding,
            connect_timeout: self.connect_timeout,
            socket_timeout: self.socket_timeout,
            headers: self.headers,
            query: self.query,
            body: self.body,
        })
    }
}

/// Immutable, fully-resolved request handed to the `RestService`.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    url: String,
    path_url: String,
    verb: HttpVerb,
    encoding: String,
    connect_timeout: Option<Duration>,
    socket_timeout: Option<Duration>,
    headers: IndexMap<String, String>,
    query: IndexMap<String, String>,
    body: IndexMap<String, BodyValue>,
}

impl HttpRequest {
    /// Final URL including the percent-encoded query string.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// URL without the query string.
    pub fn path_url(&self) -> &str {
        &self.path_url
    }

    pub fn verb(&self) -> HttpVerb {
        self.verb
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    pub fn socket_timeout(&self) -> Option<Duration> {
        self.socket_timeout
    }

    pub fn headers(&self) -> &IndexMap<String, String> {
        &self.headers
    }

    pub fn query_params(&self) -> &IndexMap<String, String> {
        &self.query
    }

    pub fn body_params(&self) -> &IndexMap<String, BodyValue> {
        &self.body
    }

    /// The unnamed body entry, when the call declared one.
    pub fn unnamed_body(&self) -> Option<&BodyValue> {
        self.body.get(UNNAMED_BODY_KEY)
    }
}

/// First `{…}` token found in a URI, if any.
fn first_placeholder(uri: &str) -> Option<&str> {
    let start = uri.find('{')?;
    let end = uri[start..].find('}')?;
    Some(&uri[start..=start + end])
}

/// Collapse duplicate slashes (scheme separator excluded) and drop a
/// trailing slash.
fn collapse_slashes(uri: &str) -> String {
    let (scheme, rest) = match uri.find("://") {
        Some(pos) => (&uri[..pos + 3], &uri[pos + 3..]),
        None => ("", uri),
    };
    let mut collapsed = String::with_capacity(uri.len());
    collapsed.push_str(scheme);
    let mut prev_slash = false;
    for c in rest.chars() {
        if c == '/' {
            if !prev_slash {
                collapsed.push(c);
            }
            prev_slash = true;
        } else {
            prev_slash = false;
            collapsed.push(c);
        }
    }
    if collapsed.ends_with('/') && collapsed.len() > scheme.len() + 1 {
        collapsed.pop();
    }
    collapsed
}

/// `?`-joined percent-encoded query pairs in insertion order; an empty
/// value still emits `key=`.
fn append_query(path_url: &str, query: &IndexMap<String, String>) -> String {
    if query.is_empty() {
        return path_url.to_string();
    }
    let pairs: Vec<String> = query
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect();
    format!("{}?{}", path_url, pairs.join("&"))
}
