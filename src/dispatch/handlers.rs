//! Stock error, retry, and response handlers.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ReturnKind;
use crate::deserialize::DeserializerRegistry;
use crate::error::RestError;
use crate::http::response::HttpResponse;
use crate::interceptor::RequestContext;
use crate::oauth::AccessTokenRefresher;

use super::{ErrorHandler, ResponseHandler, RetryHandler, ReturnValue};

/// Default error policy: rethrow the original error unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorDelegatorHandler;

#[async_trait]
impl ErrorHandler for ErrorDelegatorHandler {
    async fn handle(
        &self,
        _ctx: &RequestContext,
        error: RestError,
    ) -> Result<ReturnValue, RestError> {
        Err(error)
    }
}

/// Swallows the error and returns a substitute value instead.
#[derive(Debug, Clone)]
pub struct SubstituteErrorHandler {
    value: ReturnValue,
}

impl SubstituteErrorHandler {
    pub fn new(value: ReturnValue) -> Self {
        Self { value }
    }

    /// Substitute the type-appropriate default: a null result.
    pub fn null() -> Self {
        Self {
            value: ReturnValue::Null,
        }
    }
}

#[async_trait]
impl ErrorHandler for SubstituteErrorHandler {
    async fn handle(
        &self,
        ctx: &RequestContext,
        error: RestError,
    ) -> Result<ReturnValue, RestError> {
        tracing::debug!(
            target: "restbind::dispatch",
            method = %ctx.method_id,
            error = %error,
            "error swallowed, returning substitute value"
        );
        Ok(self.value.clone())
    }
}

/// Grants a fixed retry budget: `retry` is true for attempts `0..max`.
#[derive(Debug, Clone, Copy)]
pub struct MaxAttemptsRetryHandler {
    max: u32,
}

impl MaxAttemptsRetryHandler {
    pub fn new(max: u32) -> Self {
        Self { max }
    }
}

#[async_trait]
impl RetryHandler for MaxAttemptsRetryHandler {
    async fn retry(
        &self,
        _ctx: &RequestContext,
        _error: &RestError,
        attempt: u32,
    ) -> Result<bool, RestError> {
        Ok(attempt < self.max)
    }
}

/// Retry policy for credential-expiry flows.
///
/// On a 401 the handler refreshes the access token and grants exactly one
/// extra attempt beyond the configured budget; every other error stays
/// within the budget. The refresh completes before the retry is signalled,
/// so the next attempt signs with the replacement token.
pub struct RefreshAuthorizationRetryHandler {
    budget: u32,
    refresher: Arc<dyn AccessTokenRefresher>,
}

impl RefreshAuthorizationRetryHandler {
    pub fn new(budget: u32, refresher: Arc<dyn AccessTokenRefresher>) -> Self {
        Self { budget, refresher }
    }
}

#[async_trait]
impl RetryHandler for RefreshAuthorizationRetryHandler {
    async fn retry(
        &self,
        ctx: &RequestContext,
        error: &RestError,
        attempt: u32,
    ) -> Result<bool, RestError> {
        if error.status() == Some(401) {
            if attempt < self.budget + 1 {
                tracing::debug!(
                    target: "restbind::dispatch",
                    method = %ctx.method_id,
                    attempt,
                    "401 received, refreshing access token before retry"
                );
                self.refresher.refresh().await?;
                return Ok(true);
            }
            return Ok(false);
        }
        Ok(attempt < self.budget)
    }
}

/// Default response mapping: void methods yield null, raw return kinds pass
/// the body through untouched, everything else deserializes via the
/// registry entry for the response mime type.
pub struct DefaultResponseHandler {
    registry: Arc<DeserializerRegistry>,
}

impl DefaultResponseHandler {
    pub fn new(registry: Arc<DeserializerRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ResponseHandler for DefaultResponseHandler {
    async fn on_response(
        &self,
        ctx: &RequestContext,
        response: HttpResponse,
    ) -> Result<ReturnValue, RestError> {
        match ctx.return_kind {
            ReturnKind::Void => Ok(ReturnValue::Null),
            ReturnKind::RawText => Ok(ReturnValue::Text(response.read_text()?)),
            ReturnKind::RawBytes => Ok(ReturnValue::Bytes(response.read_bytes()?)),
            ReturnKind::Deserialized => {
                let mime = response.mime_type().to_string();
                let charset = response.charset().to_string();
                let deserializer = self.registry.resolve(&mime)?;
                let body = response.read_bytes()?;
                Ok(ReturnValue::Json(
                    deserializer.deserialize(&body, &charset).await?,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ctx() -> RequestContext {
        RequestContext {
            interface_id: "api".into(),
            method_id: "m".into(),
            request_id: "r1".into(),
            attempt: 0,
            return_kind: ReturnKind::Deserialized,
        }
    }

    struct CountingRefresher {
        calls: AtomicU32,
    }

    #[async_trait]
    impl AccessTokenRefresher for CountingRefresher {
        async fn refresh(&self) -> Result<(), RestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn max_attempts_grants_budget_then_stops() {
        let handler = MaxAttemptsRetryHandler::new(3);
        let error = RestError::TransportError("refused".into());
        for attempt in 0..3 {
            assert!(handler.retry(&ctx(), &error, attempt).await.unwrap());
        }
        assert!(!handler.retry(&ctx(), &error, 3).await.unwrap());
        assert!(!handler.retry(&ctx(), &error, 10).await.unwrap());
    }

    #[tokio::test]
    async fn zero_budget_never_retries() {
        let handler = MaxAttemptsRetryHandler::new(0);
        let error = RestError::TransportError("refused".into());
        assert!(!handler.retry(&ctx(), &error, 0).await.unwrap());
    }

    #[tokio::test]
    async fn unauthorized_gets_exactly_one_extra_attempt() {
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicU32::new(0),
        });
        let handler = RefreshAuthorizationRetryHandler::new(2, refresher.clone());

        let unauthorized = RestError::protocol(401, None);
        for attempt in 0..3 {
            assert!(handler.retry(&ctx(), &unauthorized, attempt).await.unwrap());
        }
        assert!(!handler.retry(&ctx(), &unauthorized, 3).await.unwrap());
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_statuses_stay_within_budget() {
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicU32::new(0),
        });
        let handler = RefreshAuthorizationRetryHandler::new(2, refresher.clone());

        let server_error = RestError::protocol(503, None);
        assert!(handler.retry(&ctx(), &server_error, 0).await.unwrap());
        assert!(handler.retry(&ctx(), &server_error, 1).await.unwrap());
        assert!(!handler.retry(&ctx(), &server_error, 2).await.unwrap());
        // no refresh happens for non-401 errors
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn delegator_rethrows_substitute_swallows() {
        let error = RestError::protocol(500, None);
        assert!(ErrorDelegatorHandler.handle(&ctx(), error.clone()).await.is_err());

        let substitute = SubstituteErrorHandler::new(ReturnValue::Text("fallback".into()));
        assert_eq!(
            substitute.handle(&ctx(), error).await.unwrap(),
            ReturnValue::Text("fallback".into())
        );
    }

    #[tokio::test]
    async fn response_handler_maps_return_kinds() {
        let registry = Arc::new(DeserializerRegistry::default());
        let handler = DefaultResponseHandler::new(registry);

        let response = |mime: &str, body: &[u8]| {
            let mut headers = indexmap::IndexMap::new();
            headers.insert("Content-Type".to_string(), mime.to_string());
            HttpResponse::new(200, headers, body.to_vec())
        };

        let mut void_ctx = ctx();
        void_ctx.return_kind = ReturnKind::Void;
        assert_eq!(
            handler
                .on_response(&void_ctx, response("application/json", b"{}"))
                .await
                .unwrap(),
            ReturnValue::Null
        );

        let mut raw_ctx = ctx();
        raw_ctx.return_kind = ReturnKind::RawText;
        assert_eq!(
            handler
                .on_response(&raw_ctx, response("application/json", b"{\"a\":1}"))
                .await
                .unwrap(),
            ReturnValue::Text("{\"a\":1}".into())
        );

        let json = handler
            .on_response(&ctx(), response("application/json; charset=utf-8", b"{\"a\":1}"))
            .await
            .unwrap();
        assert_eq!(json, ReturnValue::Json(serde_json::json!({"a": 1})));
    }
}
