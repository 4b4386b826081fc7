//! OAuth 1.0 Request Signing
//!
//! The signer is an ordinary request interceptor running after parameter
//! injection: it collects the oauth parameter set plus all non-binary query
//! and body params, canonicalizes them, signs with HMAC-SHA1, and emits the
//! result either as an `Authorization: OAuth …` header or as `oauth_*`
//! query parameters.

pub mod token;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha1::Sha1;

use crate::error::RestError;
use crate::http::request::{BodyValue, HttpRequestBuilder, HttpVerb};
use crate::http::service::RestService;
use crate::interceptor::{RequestContext, RequestInterceptor};

pub use token::{Token, TokenHolder};

type HmacSha1 = Hmac<Sha1>;

const SIGNATURE_METHOD: &str = "HMAC-SHA1";
const OAUTH_VERSION: &str = "1.0";

/// Consumer credentials issued by the provider.
#[derive(Clone)]
pub struct Consumer {
    key: String,
    secret: SecretString,
}

impl Consumer {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: SecretString::from(secret.into()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Where the oauth parameter set is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignDestination {
    #[default]
    Header,
    Query,
}

/// Supplies the per-request timestamp and nonce. The nonce must be unique
/// per request.
pub trait NonceSource: Send + Sync {
    fn stamp(&self) -> (u64, String);
}

/// Epoch-seconds timestamp plus a time-and-random nonce.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemNonceSource;

impl NonceSource for SystemNonceSource {
    fn stamp(&self) -> (u64, String) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let nonce = format!("{}{}", now.as_millis(), rand::random::<u64>());
        (now.as_secs(), nonce)
    }
}

/// Fixed timestamp and nonce, for reproducible signatures in tests.
#[derive(Debug, Clone)]
pub struct FixedNonceSource {
    pub timestamp: u64,
    pub nonce: String,
}

impl NonceSource for FixedNonceSource {
    fn stamp(&self) -> (u64, String) {
        (self.timestamp, self.nonce.clone())
    }
}

/// OAuth 1.0 signing interceptor.
///
/// The access token is read from a [`TokenHolder`] snapshot at signing time,
/// so a refresh installs a replacement without disturbing in-flight calls.
pub struct OAuthInterceptor {
    consumer: Consumer,
    holder: Arc<TokenHolder>,
    destination: SignDestination,
    nonce_source: Arc<dyn NonceSource>,
}

impl OAuthInterceptor {
    pub fn new(consumer: Consumer, holder: Arc<TokenHolder>) -> Self {
        Self {
            consumer,
            holder,
            destination: SignDestination::default(),
            nonce_source: Arc::new(SystemNonceSource),
        }
    }

    pub fn with_destination(mut self, destination: SignDestination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_nonce_source(mut self, source: Arc<dyn NonceSource>) -> Self {
        self.nonce_source = source;
        self
    }

    fn signing_key(&self, token: &Token) -> String {
        format!(
            "{}&{}",
            percent_encode(self.consumer.secret.expose_secret()),
            percent_encode(token.secret())
        )
    }
}

impl RequestInterceptor for OAuthInterceptor {
    fn after_params_injection(
        &self,
        builder: &mut HttpRequestBuilder,
        ctx: &RequestContext,
    ) -> Result<bool, RestError> {
        let token = self.holder.current();
        let (timestamp, nonce) = self.nonce_source.stamp();

        let mut oauth_params: Vec<(String, String)> = vec![
            ("oauth_consumer_key".into(), self.consumer.key.clone()),
            ("oauth_token".into(), token.value().to_string()),
            ("oauth_signature_method".into(), SIGNATURE_METHOD.into()),
            ("oauth_timestamp".into(), timestamp.to_string()),
            ("oauth_nonce".into(), nonce),
            ("oauth_version".into(), OAUTH_VERSION.into()),
        ];

        // Signature set: oauth params plus every non-binary query/body
        // param. An unnamed entity body is not a form param and stays out.
        let mut signature_set = oauth_params.clone();
        for (k, v) in builder.query_params() {
            signature_set.push((k.clone(), v.clone()));
        }
        for (k, v) in builder.body_params() {
            if let BodyValue::Text(text) = v {
                if !k.is_empty() {
                    signature_set.push((k.clone(), text.clone()));
                }
            }
        }

        let url = builder.path_url().ok_or_else(|| {
            RestError::ConfigurationError("cannot sign a request without a base URI".into())
        })?;
        let base = signature_base_string(builder.verb(), &normalize_base_url(&url)?, &signature_set);
        let signature = sign(&self.signing_key(&token), &base)?;
        oauth_params.push(("oauth_signature".into(), signature));

        tracing::debug!(
            target: "restbind::oauth",
            request_id = %ctx.request_id,
            destination = ?self.destination,
            "request signed"
        );

        match self.destination {
            SignDestination::Header => {
                builder.add_header("Authorization", authorization_header(&oauth_params));
            }
            SignDestination::Query => {
                for (k, v) in oauth_params {
                    builder.add_query_param(k, v);
                }
            }
        }
        Ok(true)
    }
}

/// RFC 3986 percent encoding over the unreserved set, as OAuth requires.
pub(crate) fn percent_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Strip query/fragment, lowercase scheme and host, drop default ports.
fn normalize_base_url(url: &str) -> Result<String, RestError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| RestError::ConfigurationError(format!("unsignable URL {url}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| RestError::ConfigurationError(format!("unsignable URL {url}: no host")))?;
    let mut normalized = format!("{}://{}", parsed.scheme(), host.to_ascii_lowercase());
    // Url::port() already excludes scheme-default ports.
    if let Some(port) = parsed.port() {
        normalized.push_str(&format!(":{port}"));
    }
    normalized.push_str(parsed.path());
    Ok(normalized)
}

/// `UPPER(verb)&enc(url)&enc(paramString)`, pairs sorted by encoded key
/// then encoded value.
fn signature_base_string(verb: HttpVerb, base_url: &str, params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();
    let param_string = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    format!(
        "{}&{}&{}",
        verb.as_str(),
        percent_encode(base_url),
        percent_encode(&param_string)
    )
}

fn sign(key: &str, base_string: &str) -> Result<String, RestError> {
    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| RestError::InternalError(format!("HMAC key rejected: {e}")))?;
    mac.update(base_string.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// `OAuth k="v", …` with percent-encoded values, oauth params only.
fn authorization_header(params: &[(String, String)]) -> String {
    let pairs = params
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("OAuth {pairs}")
}

/// Exchanges or refreshes the access token and installs the replacement.
#[async_trait]
pub trait AccessTokenRefresher: Send + Sync {
    async fn refresh(&self) -> Result<(), RestError>;
}

/// Refresher hitting the provider's access-token endpoint, carrying the
/// current token's session handle when one is present.
pub struct OAuthTokenRefresher {
    service: Arc<dyn RestService>,
    access_token_url: String,
    consumer: Consumer,
    holder: Arc<TokenHolder>,
    nonce_source: Arc<dyn NonceSource>,
}

impl OAuthTokenRefresher {
    pub fn new(
        service: Arc<dyn RestService>,
        access_token_url: impl Into<String>,
        consumer: Consumer,
        holder: Arc<TokenHolder>,
    ) -> Self {
        Self {
            service,
            access_token_url: access_token_url.into(),
            consumer,
            holder,
            nonce_source: Arc::new(SystemNonceSource),
        }
    }

    pub fn with_nonce_source(mut self, source: Arc<dyn NonceSource>) -> Self {
        self.nonce_source = source;
        self
    }
}

#[async_trait]
impl AccessTokenRefresher for OAuthTokenRefresher {
    async fn refresh(&self) -> Result<(), RestError> {
        let mut builder = HttpRequestBuilder::new()
            .pointing_to(self.access_token_url.as_str())
            .using(HttpVerb::Get)
            .encoded_as("utf-8");
        let current = self.holder.current();
        if let Some(handle) = current.extra("oauth_session_handle") {
            builder.add_query_param("oauth_session_handle", handle);
        }

        let signer = OAuthInterceptor::new(self.consumer.clone(), self.holder.clone())
            .with_destination(SignDestination::Query)
            .with_nonce_source(self.nonce_source.clone());
        let ctx = RequestContext {
            interface_id: "oauth".into(),
            method_id: "refresh_access_token".into(),
            request_id: uuid::Uuid::new_v4().simple().to_string(),
            attempt: 0,
            return_kind: crate::config::ReturnKind::RawText,
        };
        signer.after_params_injection(&mut builder, &ctx)?;

        let response = self.service.execute(builder.build()?).await?;
        if !response.is_success() {
            let status = response.status();
            return Err(RestError::protocol(status, response.read_text().ok()));
        }

        let body = response.read_text()?;
        let mut value = None;
        let mut secret = None;
        let mut extras = Vec::new();
        for (k, v) in url::form_urlencoded::parse(body.as_bytes()) {
            match k.as_ref() {
                "oauth_token" => value = Some(v.into_owned()),
                "oauth_token_secret" => secret = Some(v.into_owned()),
                _ => extras.push((k.into_owned(), v.into_owned())),
            }
        }
        let (value, secret) = match (value, secret) {
            (Some(value), Some(secret)) => (value, secret),
            _ => {
                return Err(RestError::DeserializationError {
                    mime: "application/x-www-form-urlencoded".into(),
                    message: "access token response missing oauth_token/oauth_token_secret".into(),
                });
            }
        };

        let mut token = Token::new(value, secret);
        for (k, v) in extras {
            token = token.with_extra(k, v);
        }
        self.holder.replace(token);

        tracing::debug!(target: "restbind::oauth", "access token refreshed");
        Ok(())
    }
}
