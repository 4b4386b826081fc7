//! restbind
//!
//! Declarative REST client binding: describe a remote HTTP API as method
//! configurations (path template, verb, timeouts, serializers, interceptors,
//! error/retry policy) and turn each logical call into a fully-resolved HTTP
//! request, execute it, and map the response back to a typed result or error.
//!
//! The pipeline per call:
//!
//! 1. build the base request from the method configuration
//! 2. run `before` interceptors (any of them may veto the call)
//! 3. inject call arguments by index (path, query, body, header)
//! 4. run `after` interceptors (the OAuth 1.0 signer lives here)
//! 5. fire through the `RestService` transport
//! 6. map the response via the configured handler / deserializer registry
//!
//! Errors are offered to the method's retry handler and, once exhausted, to
//! its error handler. Configuration is an immutable graph built once through
//! the builders in [`config`]; any front end (codegen, macros, manual
//! wiring) can sit on top of [`dispatch::InvocationDispatcher::invoke`].
#![deny(unsafe_code)]

pub mod config;
pub mod deserialize;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod inject;
pub mod interceptor;
pub mod oauth;
pub mod serialize;

pub use error::RestError;

/// Commonly used types, importable in one line.
pub mod prelude {
    pub use crate::config::{
        Destination, InterfaceConfig, InterfaceConfigBuilder, MethodConfigBuilder,
        ParamConfigBuilder, ReturnKind,
    };
    pub use crate::deserialize::{Deserializer, DeserializerRegistry};
    pub use crate::dispatch::handlers::{
        DefaultResponseHandler, ErrorDelegatorHandler, MaxAttemptsRetryHandler,
        RefreshAuthorizationRetryHandler, SubstituteErrorHandler,
    };
    pub use crate::dispatch::{
        ErrorHandler, InvocationDispatcher, ResponseHandler, RetryHandler, ReturnValue,
    };
    pub use crate::error::RestError;
    pub use crate::http::{
        BodyValue, DefaultRestService, HttpRequest, HttpRequestBuilder, HttpResponse, HttpVerb,
        RestService,
    };
    pub use crate::inject::{DefaultParamInjector, ParamInjector};
    pub use crate::interceptor::{
        CompositeInterceptor, LoggingInterceptor, NoOpInterceptor, RequestContext,
        RequestInterceptor,
    };
    pub use crate::oauth::{
        AccessTokenRefresher, Consumer, OAuthInterceptor, OAuthTokenRefresher, SignDestination,
        Token, TokenHolder,
    };
    pub use crate::serialize::{
        DateFormat, DefaultSerializer, ParamValue, Serializer, SerializerRegistry, UploadSource,
    };
}
