//! Request Interceptors
//!
//! Interceptors observe and mutate the in-progress request builder around
//! parameter injection, and may veto the call. Both hooks default to no-ops
//! returning `true`, so implementors override only the side they need.
//! A composite runs its children in registration order and short-circuits on
//! the first `false`: the call is cancelled without an error.

use std::sync::Arc;

use crate::config::ReturnKind;
use crate::error::RestError;
use crate::http::request::HttpRequestBuilder;

/// Context describing the in-flight call, passed to every hook.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub interface_id: String,
    pub method_id: String,
    /// Unique per logical call, stable across retry attempts.
    pub request_id: String,
    /// Zero-based attempt number.
    pub attempt: u32,
    pub return_kind: ReturnKind,
}

/// Before/after hooks around parameter injection.
///
/// Returning `Ok(false)` from either hook vetoes the call: no request is
/// fired and the dispatcher reports a null result, not an error.
pub trait RequestInterceptor: Send + Sync {
    fn before_params_injection(
        &self,
        _builder: &mut HttpRequestBuilder,
        _ctx: &RequestContext,
    ) -> Result<bool, RestError> {
        Ok(true)
    }

    fn after_params_injection(
        &self,
        _builder: &mut HttpRequestBuilder,
        _ctx: &RequestContext,
    ) -> Result<bool, RestError> {
        Ok(true)
    }
}

/// Interceptor that never touches the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpInterceptor;

impl RequestInterceptor for NoOpInterceptor {}

/// Ordered veto chain over child interceptors.
#[derive(Clone, Default)]
pub struct CompositeInterceptor {
    children: Vec<Arc<dyn RequestInterceptor>>,
}

impl CompositeInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(children: Vec<Arc<dyn RequestInterceptor>>) -> Self {
        Self { children }
    }

    pub fn push(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.children.push(interceptor);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl RequestInterceptor for CompositeInterceptor {
    fn before_params_injection(
        &self,
        builder: &mut HttpRequestBuilder,
        ctx: &RequestContext,
    ) -> Result<bool, RestError> {
        for child in &self.children {
            if !child.before_params_injection(builder, ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn after_params_injection(
        &self,
        builder: &mut HttpRequestBuilder,
        ctx: &RequestContext,
    ) -> Result<bool, RestError> {
        for child in &self.children {
            if !child.after_params_injection(builder, ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Logs request lifecycle via `tracing`, no sensitive data.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingInterceptor;

impl RequestInterceptor for LoggingInterceptor {
    fn before_params_injection(
        &self,
        builder: &mut HttpRequestBuilder,
        ctx: &RequestContext,
    ) -> Result<bool, RestError> {
        tracing::debug!(
            target: "restbind::interceptor",
            method = %ctx.method_id,
            request_id = %ctx.request_id,
            attempt = ctx.attempt,
            verb = builder.verb().as_str(),
            "before params injection"
        );
        Ok(true)
    }

    fn after_params_injection(
        &self,
        builder: &mut HttpRequestBuilder,
        ctx: &RequestContext,
    ) -> Result<bool, RestError> {
        tracing::debug!(
            target: "restbind::interceptor",
            method = %ctx.method_id,
            request_id = %ctx.request_id,
            url = builder.path_url().as_deref().unwrap_or(""),
            "after params injection"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ctx() -> RequestContext {
        RequestContext {
            interface_id: "api".into(),
            method_id: "get_user".into(),
            request_id: "r1".into(),
            attempt: 0,
            return_kind: ReturnKind::Deserialized,
        }
    }

    struct Counting {
        calls: Arc<AtomicU32>,
        verdict: bool,
    }

    impl RequestInterceptor for Counting {
        fn before_params_injection(
            &self,
            _builder: &mut HttpRequestBuilder,
            _ctx: &RequestContext,
        ) -> Result<bool, RestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.verdict)
        }
    }

    #[test]
    fn composite_short_circuits_on_first_veto() {
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));
        let chain = CompositeInterceptor::new()
            .push(Arc::new(Counting {
                calls: first.clone(),
                verdict: false,
            }))
            .push(Arc::new(Counting {
                calls: second.clone(),
                verdict: true,
            }));

        let mut builder = HttpRequestBuilder::new();
        let cont = chain.before_params_injection(&mut builder, &ctx()).unwrap();
        assert!(!cont);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn composite_runs_all_children_when_none_veto() {
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));
        let chain = CompositeInterceptor::new()
            .push(Arc::new(Counting {
                calls: first.clone(),
                verdict: true,
            }))
            .push(Arc::new(Counting {
                calls: second.clone(),
                verdict: true,
            }));

        let mut builder = HttpRequestBuilder::new();
        let cont = chain.before_params_injection(&mut builder, &ctx()).unwrap();
        assert!(cont);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_hooks_are_pass_through() {
        let mut builder = HttpRequestBuilder::new();
        assert!(NoOpInterceptor.before_params_injection(&mut builder, &ctx()).unwrap());
        assert!(NoOpInterceptor.after_params_injection(&mut builder, &ctx()).unwrap());
    }
}
