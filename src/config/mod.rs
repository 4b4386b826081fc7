//! Configuration Model
//!
//! The immutable Interface/Method/Param configuration graph consumed by the
//! dispatcher. Builders collect per-level attributes; `build()` materializes
//! the graph, resolving every attribute strictly hierarchically: an explicit
//! Param value wins over an explicit Method value, which wins over an
//! explicit Interface value, which wins over the crate default. Values are
//! never merged across levels.
//!
//! Static `{name}` placeholders in the endpoint and base path are
//! substituted once at build time; an unresolved one fails the build.
//! Positional `{0}`, `{1}`… tokens in method paths are left for per-call
//! resolution during parameter injection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;

use crate::dispatch::handlers::{ErrorDelegatorHandler, MaxAttemptsRetryHandler};
use crate::dispatch::{ErrorHandler, ResponseHandler, RetryHandler};
use crate::error::RestError;
use crate::http::request::HttpVerb;
use crate::inject::{DefaultParamInjector, ParamInjector};
use crate::interceptor::{CompositeInterceptor, NoOpInterceptor, RequestInterceptor};
use crate::serialize::{DateFormat, DefaultSerializer, ParamValue, Serializer, SerializerRegistry};

/// Where a parameter's serialized value is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    /// Replaces the positional `{n}` placeholder in the URL path.
    UrlPath,
    /// Query-string parameter; an unnamed param falls back to its
    /// positional placeholder.
    #[default]
    UrlQuery,
    Body,
    Header,
}

/// How the method's return value is produced from the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnKind {
    /// Void method: the body is ignored and the result is null.
    Void,
    /// Body passed through as text, no deserializer consulted.
    RawText,
    /// Body passed through as bytes, no deserializer consulted.
    RawBytes,
    /// Deserialize via the registry entry for the response mime type.
    #[default]
    Deserialized,
}

/// A constant parameter injected on every call of a method.
#[derive(Debug, Clone)]
pub struct StaticParam {
    pub name: String,
    pub destination: Destination,
    pub value: String,
}

// Crate defaults, the last level of attribute resolution.
pub(crate) const DEFAULT_ENCODING: &str = "utf-8";
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
pub(crate) const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolved per-parameter configuration. Index equals argument position.
pub struct ParamConfig {
    name: Option<String>,
    destination: Destination,
    serializer: Arc<dyn Serializer>,
    injector: Arc<dyn ParamInjector>,
    default_value: Option<ParamValue>,
}

impl ParamConfig {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn destination(&self) -> Destination {
        self.destination
    }

    pub fn serializer(&self) -> &Arc<dyn Serializer> {
        &self.serializer
    }

    pub fn injector(&self) -> &Arc<dyn ParamInjector> {
        &self.injector
    }

    /// Value used when the call argument is null.
    pub fn default_value(&self) -> Option<&ParamValue> {
        self.default_value.as_ref()
    }
}

/// Resolved per-method configuration.
pub struct MethodConfig {
    name: String,
    uri_template: String,
    verb: HttpVerb,
    connect_timeout: Duration,
    socket_timeout: Duration,
    interceptor: Arc<dyn RequestInterceptor>,
    response_handler: Option<Arc<dyn ResponseHandler>>,
    error_handler: Arc<dyn ErrorHandler>,
    retry_handler: Arc<dyn RetryHandler>,
    return_kind: ReturnKind,
    params: Vec<Arc<ParamConfig>>,
    extra_params: Vec<StaticParam>,
}

impl MethodConfig {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Endpoint + base path + method path, positional placeholders intact.
    pub fn uri_template(&self) -> &str {
        &self.uri_template
    }

    pub fn verb(&self) -> HttpVerb {
        self.verb
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn socket_timeout(&self) -> Duration {
        self.socket_timeout
    }

    pub fn interceptor(&self) -> &Arc<dyn RequestInterceptor> {
        &self.interceptor
    }

    pub fn response_handler(&self) -> Option<&Arc<dyn ResponseHandler>> {
        self.response_handler.as_ref()
    }

    pub fn error_handler(&self) -> &Arc<dyn ErrorHandler> {
        &self.error_handler
    }

    pub fn retry_handler(&self) -> &Arc<dyn RetryHandler> {
        &self.retry_handler
    }

    pub fn return_kind(&self) -> ReturnKind {
        self.return_kind
    }

    pub fn params(&self) -> &[Arc<ParamConfig>] {
        &self.params
    }

    pub fn extra_params(&self) -> &[StaticParam] {
        &self.extra_params
    }
}

/// Resolved interface configuration: the root of the immutable graph.
pub struct InterfaceConfig {
    name: String,
    encoding: String,
    methods: IndexMap<String, Arc<MethodConfig>>,
}

impl std::fmt::Debug for InterfaceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceConfig")
            .field("name", &self.name)
            .field("encoding", &self.encoding)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl InterfaceConfig {
    pub fn builder(name: impl Into<String>, endpoint: impl Into<String>) -> InterfaceConfigBuilder {
        InterfaceConfigBuilder::new(name, endpoint)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn method(&self, identity: &str) -> Option<&Arc<MethodConfig>> {
        self.methods.get(identity)
    }

    pub fn methods(&self) -> impl Iterator<Item = &Arc<MethodConfig>> {
        self.methods.values()
    }
}

/// Attributes overridable at more than one level. All fields are optional;
/// `None` means "fall through to the next level".
#[derive(Clone, Default)]
struct LevelAttrs {
    verb: Option<HttpVerb>,
    connect_timeout: Option<Duration>,
    socket_timeout: Option<Duration>,
    retry_handler: Option<Arc<dyn RetryHandler>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    response_handler: Option<Arc<dyn ResponseHandler>>,
    destination: Option<Destination>,
    serializer: Option<Arc<dyn Serializer>>,
    injector: Option<Arc<dyn ParamInjector>>,
    date_format: Option<DateFormat>,
    bool_tokens: Option<(String, String)>,
    list_separator: Option<String>,
}

/// First explicit value walking from the most specific level down.
fn pick<T: Clone>(levels: &[&Option<T>]) -> Option<T> {
    levels.iter().find_map(|level| (*level).clone())
}

/// Builder for the interface level. Also carries defaults for method- and
/// param-level attributes, consulted when lower levels leave them unset.
pub struct InterfaceConfigBuilder {
    name: String,
    endpoint: String,
    base_path: String,
    encoding: Option<String>,
    placeholders: HashMap<String, String>,
    interceptor: Option<Arc<dyn RequestInterceptor>>,
    extra_params: Vec<StaticParam>,
    serializers: Option<SerializerRegistry>,
    attrs: LevelAttrs,
    methods: Vec<MethodConfigBuilder>,
}

impl InterfaceConfigBuilder {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            base_path: String::new(),
            encoding: None,
            placeholders: HashMap::new(),
            interceptor: None,
            extra_params: Vec::new(),
            serializers: None,
            attrs: LevelAttrs::default(),
            methods: Vec::new(),
        }
    }

    /// Per-kind serializer bindings consulted before the default cascade
    /// for params with no explicit serializer.
    pub fn serializer_registry(mut self, registry: SerializerRegistry) -> Self {
        self.serializers = Some(registry);
        self
    }

    pub fn base_path(mut self, path: impl Into<String>) -> Self {
        self.base_path = path.into();
        self
    }

    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Static value for a `{name}` placeholder in the endpoint or base path.
    pub fn placeholder(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.placeholders.insert(name.into(), value.into());
        self
    }

    /// Interface-wide interceptor, composed before each method's own.
    pub fn interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Constant parameter attached to every method of the interface.
    pub fn extra_param(
        mut self,
        name: impl Into<String>,
        destination: Destination,
        value: impl Into<String>,
    ) -> Self {
        self.extra_params.push(StaticParam {
            name: name.into(),
            destination,
            value: value.into(),
        });
        self
    }

    pub fn default_verb(mut self, verb: HttpVerb) -> Self {
        self.attrs.verb = Some(verb);
        self
    }

    pub fn default_connect_timeout(mut self, timeout: Duration) -> Self {
        self.attrs.connect_timeout = Some(timeout);
        self
    }

    pub fn default_socket_timeout(mut self, timeout: Duration) -> Self {
        self.attrs.socket_timeout = Some(timeout);
        self
    }

    pub fn default_retry_handler(mut self, handler: Arc<dyn RetryHandler>) -> Self {
        self.attrs.retry_handler = Some(handler);
        self
    }

    pub fn default_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.attrs.error_handler = Some(handler);
        self
    }

    pub fn default_response_handler(mut self, handler: Arc<dyn ResponseHandler>) -> Self {
        self.attrs.response_handler = Some(handler);
        self
    }

    pub fn default_destination(mut self, destination: Destination) -> Self {
        self.attrs.destination = Some(destination);
        self
    }

    pub fn default_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.attrs.serializer = Some(serializer);
        self
    }

    pub fn default_injector(mut self, injector: Arc<dyn ParamInjector>) -> Self {
        self.attrs.injector = Some(injector);
        self
    }

    pub fn default_date_format(mut self, format: DateFormat) -> Self {
        self.attrs.date_format = Some(format);
        self
    }

    pub fn default_bool_tokens(
        mut self,
        truthy: impl Into<String>,
        falsy: impl Into<String>,
    ) -> Self {
        self.attrs.bool_tokens = Some((truthy.into(), falsy.into()));
        self
    }

    pub fn default_list_separator(mut self, separator: impl Into<String>) -> Self {
        self.attrs.list_separator = Some(separator.into());
        self
    }

    pub fn method(mut self, method: MethodConfigBuilder) -> Self {
        self.methods.push(method);
        self
    }

    /// Materialize the immutable graph, resolving every attribute
    /// Param → Method → Interface → crate default.
    pub fn build(mut self) -> Result<Arc<InterfaceConfig>, RestError> {
        let endpoint = substitute_static(&self.endpoint, &self.placeholders)?;
        let base_path = substitute_static(&self.base_path, &self.placeholders)?;
        reject_leftover_tokens("endpoint", &endpoint)?;
        reject_leftover_tokens("base path", &base_path)?;

        let encoding = self
            .encoding
            .clone()
            .unwrap_or_else(|| DEFAULT_ENCODING.to_string());

        let method_builders = std::mem::take(&mut self.methods);
        let mut methods = IndexMap::with_capacity(method_builders.len());
        for method in method_builders {
            let built = method.build(&self)?;
            let name = built.name.clone();
            if methods.insert(name.clone(), Arc::new(built)).is_some() {
                return Err(RestError::ConfigurationError(format!(
                    "duplicate method identity: {name}"
                )));
            }
        }

        Ok(Arc::new(InterfaceConfig {
            name: self.name,
            encoding,
            methods,
        }))
    }

    fn resolved_endpoint(&self) -> Result<String, RestError> {
        let endpoint = substitute_static(&self.endpoint, &self.placeholders)?;
        let base_path = substitute_static(&self.base_path, &self.placeholders)?;
        Ok(join_uri(&endpoint, &base_path))
    }
}

/// Builder for one method of the interface.
pub struct MethodConfigBuilder {
    name: String,
    path: String,
    interceptor: Option<Arc<dyn RequestInterceptor>>,
    return_kind: ReturnKind,
    extra_params: Vec<StaticParam>,
    attrs: LevelAttrs,
    params: Vec<ParamConfigBuilder>,
}

impl MethodConfigBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: String::new(),
            interceptor: None,
            return_kind: ReturnKind::default(),
            extra_params: Vec::new(),
            attrs: LevelAttrs::default(),
            params: Vec::new(),
        }
    }

    /// Path template appended to the endpoint; may embed positional `{n}`
    /// placeholders consumed from the argument list.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn verb(mut self, verb: HttpVerb) -> Self {
        self.attrs.verb = Some(verb);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.attrs.connect_timeout = Some(timeout);
        self
    }

    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.attrs.socket_timeout = Some(timeout);
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    pub fn retry_handler(mut self, handler: Arc<dyn RetryHandler>) -> Self {
        self.attrs.retry_handler = Some(handler);
        self
    }

    pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.attrs.error_handler = Some(handler);
        self
    }

    pub fn response_handler(mut self, handler: Arc<dyn ResponseHandler>) -> Self {
        self.attrs.response_handler = Some(handler);
        self
    }

    pub fn return_kind(mut self, kind: ReturnKind) -> Self {
        self.return_kind = kind;
        self
    }

    pub fn default_destination(mut self, destination: Destination) -> Self {
        self.attrs.destination = Some(destination);
        self
    }

    pub fn default_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.attrs.serializer = Some(serializer);
        self
    }

    pub fn default_injector(mut self, injector: Arc<dyn ParamInjector>) -> Self {
        self.attrs.injector = Some(injector);
        self
    }

    pub fn default_date_format(mut self, format: DateFormat) -> Self {
        self.attrs.date_format = Some(format);
        self
    }

    pub fn default_bool_tokens(
        mut self,
        truthy: impl Into<String>,
        falsy: impl Into<String>,
    ) -> Self {
        self.attrs.bool_tokens = Some((truthy.into(), falsy.into()));
        self
    }

    pub fn default_list_separator(mut self, separator: impl Into<String>) -> Self {
        self.attrs.list_separator = Some(separator.into());
        self
    }

    /// Constant parameter attached to every call of this method.
    pub fn extra_param(
        mut self,
        name: impl Into<String>,
        destination: Destination,
        value: impl Into<String>,
    ) -> Self {
        self.extra_params.push(StaticParam {
            name: name.into(),
            destination,
            value: value.into(),
        });
        self
    }

    /// Append a parameter; its index is its argument position.
    pub fn param(mut self, param: ParamConfigBuilder) -> Self {
        self.params.push(param);
        self
    }

    fn build(self, interface: &InterfaceConfigBuilder) -> Result<MethodConfig, RestError> {
        let path = substitute_static(&self.path, &interface.placeholders)?;
        reject_leftover_named_tokens("method path", &path)?;

        let endpoint = interface.resolved_endpoint()?;
        let uri_template = join_uri(&endpoint, &path);

        let verb = pick(&[&self.attrs.verb, &interface.attrs.verb]).unwrap_or_default();
        let connect_timeout = pick(&[&self.attrs.connect_timeout,
            &interface.attrs.connect_timeout,
        ])
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let socket_timeout = pick(&[&self.attrs.socket_timeout,
            &interface.attrs.socket_timeout,
        ])
        .unwrap_or(DEFAULT_SOCKET_TIMEOUT);

        let retry_handler = pick(&[&self.attrs.retry_handler,
            &interface.attrs.retry_handler,
        ])
        .unwrap_or_else(|| Arc::new(MaxAttemptsRetryHandler::new(0)) as Arc<dyn RetryHandler>);
        let error_handler = pick(&[&self.attrs.error_handler,
            &interface.attrs.error_handler,
        ])
        .unwrap_or_else(|| Arc::new(ErrorDelegatorHandler) as Arc<dyn ErrorHandler>);
        let response_handler = pick(&[&self.attrs.response_handler,
            &interface.attrs.response_handler,
        ]);

        let interceptor = compose_interceptors(&interface.interceptor, &self.interceptor);

        for extra in interface.extra_params.iter().chain(&self.extra_params) {
            if extra.destination == Destination::UrlPath {
                return Err(RestError::ConfigurationError(format!(
                    "extra param {} cannot target the URL path",
                    extra.name
                )));
            }
        }
        let extra_params: Vec<StaticParam> = interface
            .extra_params
            .iter()
            .cloned()
            .chain(self.extra_params)
            .collect();

        let mut params = Vec::with_capacity(self.params.len());
        for param in self.params {
            params.push(Arc::new(param.build(&self.attrs, interface)?));
        }

        Ok(MethodConfig {
            name: self.name,
            uri_template,
            verb,
            connect_timeout,
            socket_timeout,
            interceptor,
            response_handler,
            error_handler,
            retry_handler,
            return_kind: self.return_kind,
            params,
            extra_params,
        })
    }
}

/// Builder for one parameter of a method.
#[derive(Default)]
pub struct ParamConfigBuilder {
    name: Option<String>,
    default_value: Option<ParamValue>,
    attrs: LevelAttrs,
}

impl ParamConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn destination(mut self, destination: Destination) -> Self {
        self.attrs.destination = Some(destination);
        self
    }

    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.attrs.serializer = Some(serializer);
        self
    }

    pub fn injector(mut self, injector: Arc<dyn ParamInjector>) -> Self {
        self.attrs.injector = Some(injector);
        self
    }

    /// Value injected when the call argument is null.
    pub fn default_value(mut self, value: ParamValue) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn date_format(mut self, format: DateFormat) -> Self {
        self.attrs.date_format = Some(format);
        self
    }

    pub fn bool_tokens(mut self, truthy: impl Into<String>, falsy: impl Into<String>) -> Self {
        self.attrs.bool_tokens = Some((truthy.into(), falsy.into()));
        self
    }

    pub fn list_separator(mut self, separator: impl Into<String>) -> Self {
        self.attrs.list_separator = Some(separator.into());
        self
    }

    fn build(
        self,
        method: &LevelAttrs,
        interface: &InterfaceConfigBuilder,
    ) -> Result<ParamConfig, RestError> {
        let destination = pick(&[&self.attrs.destination,
            &method.destination,
            &interface.attrs.destination,
        ])
        .unwrap_or_default();

        if destination == Destination::Header && self.name.is_none() {
            return Err(RestError::ConfigurationError(
                "header param requires a name".into(),
            ));
        }

        let serializer = pick(&[&self.attrs.serializer,
            &method.serializer,
            &interface.attrs.serializer,
        ])
        .unwrap_or_else(|| {
            let date_format = pick(&[&self.attrs.date_format,
                &method.date_format,
                &interface.attrs.date_format,
            ])
            .unwrap_or_default();
            let (bool_true, bool_false) = pick(&[&self.attrs.bool_tokens,
                &method.bool_tokens,
                &interface.attrs.bool_tokens,
            ])
            .unwrap_or_else(|| ("true".into(), "false".into()));
            let separator = pick(&[&self.attrs.list_separator,
                &method.list_separator,
                &interface.attrs.list_separator,
            ])
            .unwrap_or_else(|| ",".into());
            let fallback = DefaultSerializer::new()
                .with_date_format(date_format)
                .with_bool_tokens(bool_true, bool_false)
                .with_list_separator(separator);
            // Exact-kind registry bindings take precedence over the
            // fallback cascade when a registry is configured.
            match &interface.serializers {
                Some(registry) => {
                    Arc::new(registry.clone().with_fallback(fallback)) as Arc<dyn Serializer>
                }
                None => Arc::new(fallback) as Arc<dyn Serializer>,
            }
        });

        let injector = pick(&[&self.attrs.injector,
            &method.injector,
            &interface.attrs.injector,
        ])
        .unwrap_or_else(|| Arc::new(DefaultParamInjector) as Arc<dyn ParamInjector>);

        Ok(ParamConfig {
            name: self.name,
            destination,
            serializer,
            injector,
            default_value: self.default_value,
        })
    }
}

/// Join URI segments without doubling the separating slash.
fn join_uri(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn compose_interceptors(
    interface: &Option<Arc<dyn RequestInterceptor>>,
    method: &Option<Arc<dyn RequestInterceptor>>,
) -> Arc<dyn RequestInterceptor> {
    match (interface, method) {
        (None, None) => Arc::new(NoOpInterceptor),
        (Some(i), None) => i.clone(),
        (None, Some(m)) => m.clone(),
        (Some(i), Some(m)) => Arc::new(CompositeInterceptor::of(vec![i.clone(), m.clone()])),
    }
}

/// Substitute `{name}` tokens from the static placeholder map. Positional
/// (all-digit) tokens are left untouched. A named token with no mapping is
/// left in place for the caller-side leftover check.
fn substitute_static(template: &str, placeholders: &HashMap<String, String>) -> Result<String, RestError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start..];
        match after.find('}') {
            Some(end) => {
                let token = &after[1..end];
                if token.chars().all(|c| c.is_ascii_digit()) && !token.is_empty() {
                    out.push_str(&after[..=end]);
                } else if let Some(value) = placeholders.get(token) {
                    out.push_str(value);
                } else {
                    out.push_str(&after[..=end]);
                }
                rest = &after[end + 1..];
            }
            None => {
                return Err(RestError::ConfigurationError(format!(
                    "unterminated placeholder in template: {template}"
                )));
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn reject_leftover_tokens(what: &str, value: &str) -> Result<(), RestError> {
    if let Some(start) = value.find('{') {
        let token = &value[start..=value[start..].find('}').map(|e| start + e).unwrap_or(start)];
        return Err(RestError::ConfigurationError(format!(
            "unresolved placeholder {token} in {what}: {value}"
        )));
    }
    Ok(())
}

/// Method paths may keep positional tokens; named ones must have resolved.
fn reject_leftover_named_tokens(what: &str, value: &str) -> Result<(), RestError> {
    let mut rest = value;
    while let Some(start) = rest.find('{') {
        let after = &rest[start..];
        let Some(end) = after.find('}') else {
            return Err(RestError::ConfigurationError(format!(
                "unterminated placeholder in {what}: {value}"
            )));
        };
        let token = &after[1..end];
        if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit()) {
            return Err(RestError::ConfigurationError(format!(
                "unresolved placeholder {{{token}}} in {what}: {value}"
            )));
        }
        rest = &after[end + 1..];
    }
    Ok(())
}
