//! HTTP Model
//!
//! Request builder/frozen request, single-use response, and the
//! `RestService` transport seam with its reqwest-backed default.

pub mod request;
pub mod response;
pub mod service;

pub use request::{BodyValue, HttpRequest, HttpRequestBuilder, HttpVerb};
pub use response::HttpResponse;
pub use service::{DefaultRestService, RestService};
