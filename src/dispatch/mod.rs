//! Invocation Dispatcher
//!
//! The execution state machine behind every bound call:
//!
//! `BUILD → BEFORE_INTERCEPT → INJECT_PARAMS → AFTER_INTERCEPT → FIRE →
//! HANDLE_RESPONSE`
//!
//! A veto from either interceptor hook cancels the call with a null result.
//! Any error past BUILD is offered to the method's retry handler; a granted
//! retry restarts the whole pipeline at BUILD with the next attempt number,
//! and retry-handler side effects (such as a credential refresh) complete
//! before the restart. When retries are exhausted the method's error handler
//! decides between rethrowing and substituting a value. BUILD-stage
//! configuration errors are fatal and bypass both handlers.

pub mod handlers;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Destination, InterfaceConfig, MethodConfig, StaticParam};
use crate::deserialize::DeserializerRegistry;
use crate::error::RestError;
use crate::http::request::{BodyValue, HttpRequestBuilder};
use crate::http::response::HttpResponse;
use crate::http::service::RestService;
use crate::inject::InjectionContext;
use crate::interceptor::RequestContext;
use crate::serialize::ParamValue;

use self::handlers::DefaultResponseHandler;

/// Result of a bound call.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnValue {
    /// Void method, vetoed call, or substituted default.
    Null,
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl ReturnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }
}

/// Decides whether the pipeline re-runs after an error.
///
/// Implementations may mutate shared state before signalling a retry (e.g.
/// refreshing a credential); the side effect must complete before `Ok(true)`
/// is returned so the next attempt observes it.
#[async_trait]
pub trait RetryHandler: Send + Sync {
    async fn retry(
        &self,
        ctx: &RequestContext,
        error: &RestError,
        attempt: u32,
    ) -> Result<bool, RestError>;
}

/// Single authority on what exhausted errors become: rethrown, swallowed
/// with a substitute, or mapped to a default.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(&self, ctx: &RequestContext, error: RestError)
    -> Result<ReturnValue, RestError>;
}

/// Produces the method's return value from a 2xx response.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    async fn on_response(
        &self,
        ctx: &RequestContext,
        response: HttpResponse,
    ) -> Result<ReturnValue, RestError>;
}

enum AttemptOutcome {
    Completed(ReturnValue),
    Cancelled,
}

/// Drives bound calls against one interface configuration.
pub struct InvocationDispatcher {
    config: Arc<InterfaceConfig>,
    service: Arc<dyn RestService>,
    default_response_handler: Arc<dyn ResponseHandler>,
}

impl InvocationDispatcher {
    pub fn new(config: Arc<InterfaceConfig>, service: Arc<dyn RestService>) -> Self {
        Self::with_deserializers(config, service, Arc::new(DeserializerRegistry::default()))
    }

    pub fn with_deserializers(
        config: Arc<InterfaceConfig>,
        service: Arc<dyn RestService>,
        deserializers: Arc<DeserializerRegistry>,
    ) -> Self {
        Self {
            config,
            service,
            default_response_handler: Arc::new(DefaultResponseHandler::new(deserializers)),
        }
    }

    /// Single entry point: execute the method identified by `method` with
    /// the given positional arguments.
    pub async fn invoke(
        &self,
        method: &str,
        args: &[ParamValue],
    ) -> Result<ReturnValue, RestError> {
        let method_config = self.config.method(method).ok_or_else(|| {
            RestError::ConfigurationError(format!(
                "unknown method {method} on interface {}",
                self.config.name()
            ))
        })?;
        if args.len() != method_config.params().len() {
            return Err(RestError::ConfigurationError(format!(
                "method {method} takes {} arguments, got {}",
                method_config.params().len(),
                args.len()
            )));
        }

        let request_id = uuid::Uuid::new_v4().simple().to_string();
        let mut attempt: u32 = 0;
        loop {
            let ctx = RequestContext {
                interface_id: self.config.name().to_string(),
                method_id: method.to_string(),
                request_id: request_id.clone(),
                attempt,
                return_kind: method_config.return_kind(),
            };

            // BUILD: configuration failures here are fatal, never retried.
            let builder = self.build_base_request(method_config)?;

            match self.run_attempt(&ctx, method_config, args, builder).await {
                Ok(AttemptOutcome::Completed(value)) => return Ok(value),
                Ok(AttemptOutcome::Cancelled) => {
                    tracing::debug!(
                        target: "restbind::dispatch",
                        method = %ctx.method_id,
                        request_id = %ctx.request_id,
                        "call vetoed by interceptor"
                    );
                    return Ok(ReturnValue::Null);
                }
                Err(error) => {
                    tracing::debug!(
                        target: "restbind::dispatch",
                        method = %ctx.method_id,
                        request_id = %ctx.request_id,
                        attempt,
                        error = %error,
                        "attempt failed"
                    );
                    let verdict = method_config.retry_handler().retry(&ctx, &error, attempt).await;
                    match verdict {
                        Ok(true) => {
                            attempt += 1;
                            continue;
                        }
                        Ok(false) => {
                            return method_config.error_handler().handle(&ctx, error).await;
                        }
                        Err(retry_error) => {
                            // A failing retry handler (e.g. refresh failure)
                            // replaces the original error.
                            return method_config.error_handler().handle(&ctx, retry_error).await;
                        }
                    }
                }
            }
        }
    }

    fn build_base_request(
        &self,
        method: &MethodConfig,
    ) -> Result<HttpRequestBuilder, RestError> {
        let mut builder = HttpRequestBuilder::new()
            .pointing_to(method.uri_template())
            .using(method.verb())
            .encoded_as(self.config.encoding());
        builder.timeout_connection_after(method.connect_timeout());
        builder.timeout_socket_after(method.socket_timeout());
        for extra in method.extra_params() {
            apply_static_param(&mut builder, extra)?;
        }
        Ok(builder)
    }

    async fn run_attempt(
        &self,
        ctx: &RequestContext,
        method: &MethodConfig,
        args: &[ParamValue],
        mut builder: HttpRequestBuilder,
    ) -> Result<AttemptOutcome, RestError> {
        // BEFORE_INTERCEPT
        if !method.interceptor().before_params_injection(&mut builder, ctx)? {
            return Ok(AttemptOutcome::Cancelled);
        }

        // INJECT_PARAMS, in argument-index order
        for (index, (param, value)) in method.params().iter().zip(args).enumerate() {
            param.injector().inject(
                &mut builder,
                &InjectionContext {
                    param,
                    index,
                    value,
                },
            )?;
        }

        // AFTER_INTERCEPT
        if !method.interceptor().after_params_injection(&mut builder, ctx)? {
            return Ok(AttemptOutcome::Cancelled);
        }

        // FIRE
        let request = builder.build()?;
        let response = self.service.execute(request).await?;
        if !response.is_success() {
            let status = response.status();
            return Err(RestError::protocol(status, response.read_text().ok()));
        }

        // HANDLE_RESPONSE
        let handler = method
            .response_handler()
            .unwrap_or(&self.default_response_handler);
        let value = handler.on_response(ctx, response).await?;
        Ok(AttemptOutcome::Completed(value))
    }
}

fn apply_static_param(
    builder: &mut HttpRequestBuilder,
    extra: &StaticParam,
) -> Result<(), RestError> {
    match extra.destination {
        Destination::UrlQuery => {
            builder.add_query_param(extra.name.as_str(), extra.value.as_str());
        }
        Destination::Body => {
            builder.add_body_param(extra.name.as_str(), BodyValue::Text(extra.value.clone()));
        }
        Destination::Header => {
            builder.add_header(extra.name.as_str(), extra.value.as_str());
        }
        // Rejected when the configuration graph is built.
        Destination::UrlPath => {
            return Err(RestError::ConfigurationError(format!(
                "extra param {} cannot target the URL path",
                extra.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        Destination, InterfaceConfig, MethodConfigBuilder, ParamConfigBuilder, ReturnKind,
    };
    use crate::http::request::{HttpRequest, HttpVerb};
    use crate::interceptor::RequestInterceptor;
    use super::handlers::{MaxAttemptsRetryHandler, SubstituteErrorHandler};
    use indexmap::IndexMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted transport: pops one (status, body) per call and records the
    /// requests it saw.
    struct ScriptedService {
        script: Mutex<Vec<(u16, &'static str)>>,
        seen: Mutex<Vec<HttpRequest>>,
        calls: AtomicU32,
    }

    impl ScriptedService {
        fn new(mut script: Vec<(u16, &'static str)>) -> Arc<Self> {
            script.reverse();
            Arc::new(Self {
                script: Mutex::new(script),
                seen: Mutex::new(Vec::new()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RestService for ScriptedService {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, RestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request);
            let (status, body) = self
                .script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or((200, "{\"ok\":true}"));
            let mut headers = IndexMap::new();
            headers.insert("Content-Type".to_string(), "application/json".to_string());
            Ok(HttpResponse::new(status, headers, body.as_bytes().to_vec()))
        }
    }

    fn dispatcher_for(
        interface: Arc<InterfaceConfig>,
        service: Arc<ScriptedService>,
    ) -> InvocationDispatcher {
        InvocationDispatcher::new(interface, service)
    }

    #[tokio::test]
    async fn full_pipeline_resolves_url_and_deserializes() {
        let interface = InterfaceConfig::builder("api", "http://api.example.com")
            .method(
                MethodConfigBuilder::new("get_item")
                    .path("/items/{0}")
                    .param(ParamConfigBuilder::new())
                    .param(ParamConfigBuilder::named("full")),
            )
            .build()
            .unwrap();
        let service = ScriptedService::new(vec![(200, "{\"id\": 9}")]);
        let dispatcher = dispatcher_for(interface, service.clone());

        let result = dispatcher
            .invoke(
                "get_item",
                &[ParamValue::Int(9), ParamValue::Bool(true)],
            )
            .await
            .unwrap();

        assert_eq!(result.as_json().unwrap()["id"], 9);
        let seen = service.seen.lock().unwrap();
        assert_eq!(seen[0].url(), "http://api.example.com/items/9?full=true");
    }

    #[tokio::test]
    async fn unknown_method_is_a_configuration_error() {
        let interface = InterfaceConfig::builder("api", "http://api.example.com")
            .build()
            .unwrap();
        let service = ScriptedService::new(vec![]);
        let dispatcher = dispatcher_for(interface, service.clone());

        let err = dispatcher.invoke("missing", &[]).await.unwrap_err();
        assert!(matches!(err, RestError::ConfigurationError(_)));
        assert_eq!(service.calls(), 0);
    }

    #[tokio::test]
    async fn argument_count_mismatch_is_rejected() {
        let interface = InterfaceConfig::builder("api", "http://api.example.com")
            .method(MethodConfigBuilder::new("m").param(ParamConfigBuilder::named("a")))
            .build()
            .unwrap();
        let dispatcher = dispatcher_for(interface, ScriptedService::new(vec![]));
        let err = dispatcher.invoke("m", &[]).await.unwrap_err();
        assert!(matches!(err, RestError::ConfigurationError(_)));
    }

    struct Veto;

    impl RequestInterceptor for Veto {
        fn before_params_injection(
            &self,
            _builder: &mut HttpRequestBuilder,
            _ctx: &RequestContext,
        ) -> Result<bool, RestError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn veto_cancels_without_firing_or_error() {
        let interface = InterfaceConfig::builder("api", "http://api.example.com")
            .method(MethodConfigBuilder::new("m").interceptor(Arc::new(Veto)))
            .build()
            .unwrap();
        let service = ScriptedService::new(vec![]);
        let dispatcher = dispatcher_for(interface, service.clone());

        let result = dispatcher.invoke("m", &[]).await.unwrap();
        assert!(result.is_null());
        assert_eq!(service.calls(), 0);
    }

    #[tokio::test]
    async fn retry_reruns_pipeline_until_budget_exhausted() {
        let interface = InterfaceConfig::builder("api", "http://api.example.com")
            .method(
                MethodConfigBuilder::new("m")
                    .retry_handler(Arc::new(MaxAttemptsRetryHandler::new(2))),
            )
            .build()
            .unwrap();
        let service = ScriptedService::new(vec![
            (500, "boom"),
            (500, "boom"),
            (500, "boom"),
        ]);
        let dispatcher = dispatcher_for(interface, service.clone());

        let err = dispatcher.invoke("m", &[]).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        // 1 initial + 2 retries
        assert_eq!(service.calls(), 3);
    }

    #[tokio::test]
    async fn retry_stops_early_on_success() {
        let interface = InterfaceConfig::builder("api", "http://api.example.com")
            .method(
                MethodConfigBuilder::new("m")
                    .retry_handler(Arc::new(MaxAttemptsRetryHandler::new(5))),
            )
            .build()
            .unwrap();
        let service = ScriptedService::new(vec![(500, "boom"), (200, "{\"ok\":true}")]);
        let dispatcher = dispatcher_for(interface, service.clone());

        let result = dispatcher.invoke("m", &[]).await.unwrap();
        assert_eq!(result.as_json().unwrap()["ok"], true);
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test]
    async fn error_handler_substitutes_value_after_exhaustion() {
        let interface = InterfaceConfig::builder("api", "http://api.example.com")
            .method(
                MethodConfigBuilder::new("m")
                    .error_handler(Arc::new(SubstituteErrorHandler::new(ReturnValue::Text(
                        "fallback".into(),
                    )))),
            )
            .build()
            .unwrap();
        let service = ScriptedService::new(vec![(502, "bad gateway")]);
        let dispatcher = dispatcher_for(interface, service.clone());

        let result = dispatcher.invoke("m", &[]).await.unwrap();
        assert_eq!(result.as_text(), Some("fallback"));
    }

    #[tokio::test]
    async fn protocol_error_carries_body_snapshot() {
        let interface = InterfaceConfig::builder("api", "http://api.example.com")
            .method(MethodConfigBuilder::new("m"))
            .build()
            .unwrap();
        let service = ScriptedService::new(vec![(404, "{\"error\":\"gone\"}")]);
        let dispatcher = dispatcher_for(interface, service.clone());

        let err = dispatcher.invoke("m", &[]).await.unwrap_err();
        match err {
            RestError::ProtocolError { status, body, .. } => {
                assert_eq!(status, 404);
                assert_eq!(body.as_deref(), Some("{\"error\":\"gone\"}"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn extra_params_ride_along_on_every_call() {
        let interface = InterfaceConfig::builder("api", "http://api.example.com")
            .extra_param("api_key", Destination::UrlQuery, "k123")
            .method(
                MethodConfigBuilder::new("m")
                    .extra_param("X-Client", Destination::Header, "restbind"),
            )
            .build()
            .unwrap();
        let service = ScriptedService::new(vec![(200, "{}")]);
        let dispatcher = dispatcher_for(interface, service.clone());

        dispatcher.invoke("m", &[]).await.unwrap();
        let seen = service.seen.lock().unwrap();
        assert_eq!(seen[0].url(), "http://api.example.com?api_key=k123");
        assert_eq!(seen[0].headers().get("X-Client").unwrap(), "restbind");
    }

    #[tokio::test]
    async fn void_return_kind_ignores_body() {
        let interface = InterfaceConfig::builder("api", "http://api.example.com")
            .method(MethodConfigBuilder::new("m").return_kind(ReturnKind::Void))
            .build()
            .unwrap();
        let service = ScriptedService::new(vec![(200, "ignored")]);
        let dispatcher = dispatcher_for(interface, service.clone());

        assert!(dispatcher.invoke("m", &[]).await.unwrap().is_null());
    }

    #[tokio::test]
    async fn raw_text_return_kind_passes_body_through() {
        let interface = InterfaceConfig::builder("api", "http://api.example.com")
            .method(MethodConfigBuilder::new("m").return_kind(ReturnKind::RawText))
            .build()
            .unwrap();
        let service = ScriptedService::new(vec![(200, "not json at all")]);
        let dispatcher = dispatcher_for(interface, service.clone());

        let result = dispatcher.invoke("m", &[]).await.unwrap();
        assert_eq!(result.as_text(), Some("not json at all"));
    }

    #[tokio::test]
    async fn verb_resolves_from_interface_default() {
        let interface = InterfaceConfig::builder("api", "http://api.example.com")
            .default_verb(HttpVerb::Post)
            .method(MethodConfigBuilder::new("m"))
            .method(MethodConfigBuilder::new("g").verb(HttpVerb::Get))
            .build()
            .unwrap();
        let service = ScriptedService::new(vec![(200, "{}"), (200, "{}")]);
        let dispatcher = dispatcher_for(interface, service.clone());

        dispatcher.invoke("m", &[]).await.unwrap();
        dispatcher.invoke("g", &[]).await.unwrap();
        let seen = service.seen.lock().unwrap();
        assert_eq!(seen[0].verb(), HttpVerb::Post);
        assert_eq!(seen[1].verb(), HttpVerb::Get);
    }
}
