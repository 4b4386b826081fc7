//! Transport seam.
//!
//! `RestService` is the single collaborator the dispatcher fires requests
//! through. The default implementation rides on `reqwest`; tests and
//! embedders can swap in a synthetic transport without touching the
//! pipeline.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::config::DEFAULT_CONNECT_TIMEOUT;
use crate::error::RestError;
use crate::http::request::{BodyValue, HttpRequest};
use crate::http::response::HttpResponse;
use crate::serialize::UploadSource;

/// Executes one frozen request and returns the raw response.
///
/// Transport failures surface as errors; a non-2xx status is returned as a
/// normal response and classified by the caller.
#[async_trait]
pub trait RestService: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, RestError>;
}

/// reqwest-backed `RestService`.
///
/// reqwest exposes the connect timeout on the client builder only, so
/// clients are pooled per connect timeout; the per-request socket timeout
/// uses `RequestBuilder::timeout`.
pub struct DefaultRestService {
    clients: Mutex<HashMap<u64, reqwest::Client>>,
}

impl Default for DefaultRestService {
    fn default() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }
}

impl DefaultRestService {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_for(&self, connect_timeout: Duration) -> Result<reqwest::Client, RestError> {
        let key = connect_timeout.as_millis() as u64;
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| RestError::InternalError("client pool lock poisoned".into()))?;
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| RestError::TransportError(format!("client build failed: {e}")))?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl RestService for DefaultRestService {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, RestError> {
        let connect = request.connect_timeout().unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let client = self.client_for(connect)?;

        let method = reqwest::Method::from_bytes(request.verb().as_str().as_bytes())
            .map_err(|e| RestError::InternalError(e.to_string()))?;
        let mut rb = client.request(method, request.url());

        if let Some(socket) = request.socket_timeout() {
            rb = rb.timeout(socket);
        }
        for (name, value) in request.headers() {
            rb = rb.header(name.as_str(), value.as_str());
        }
        rb = apply_body(rb, &request).await?;

        tracing::debug!(
            target: "restbind::http",
            verb = request.verb().as_str(),
            url = request.url(),
            "firing request"
        );

        let resp = rb.send().await.map_err(RestError::from)?;

        let status = resp.status().as_u16();
        let headers: IndexMap<String, String> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = resp.bytes().await.map_err(RestError::from)?.to_vec();

        tracing::debug!(
            target: "restbind::http",
            status,
            bytes = body.len(),
            "response received"
        );

        Ok(HttpResponse::new(status, headers, body))
    }
}

/// Attach the request entity.
///
/// An unnamed body param becomes the whole entity. Otherwise any raw upload
/// part switches the request to multipart; plain text params go out as a
/// urlencoded form. Verbs without an entity drop body params.
async fn apply_body(
    mut rb: reqwest::RequestBuilder,
    request: &HttpRequest,
) -> Result<reqwest::RequestBuilder, RestError> {
    let body = request.body_params();
    if body.is_empty() {
        return Ok(rb);
    }
    if !request.verb().supports_body() {
        tracing::debug!(
            target: "restbind::http",
            verb = request.verb().as_str(),
            dropped = body.len(),
            "verb carries no entity, dropping body params"
        );
        return Ok(rb);
    }

    if let Some(entity) = request.unnamed_body() {
        if body.len() > 1 {
            return Err(RestError::ConfigurationError(
                "unnamed body parameter cannot be combined with named body params".into(),
            ));
        }
        return match entity {
            BodyValue::Text(text) => Ok(rb
                .header(
                    "Content-Type",
                    format!("text/plain; charset={}", request.encoding()),
                )
                .body(text.clone())),
            BodyValue::Raw(upload) => {
                let (bytes, content_type) = upload_bytes(upload).await?;
                Ok(rb
                    .header(
                        "Content-Type",
                        content_type.unwrap_or_else(|| "application/octet-stream".into()),
                    )
                    .body(bytes))
            }
        };
    }

    let has_raw = body.values().any(|v| matches!(v, BodyValue::Raw(_)));
    if has_raw {
        let mut form = reqwest::multipart::Form::new();
        for (name, value) in body {
            form = match value {
                BodyValue::Text(text) => form.text(name.clone(), text.clone()),
                BodyValue::Raw(upload) => {
                    form.part(name.clone(), upload_part(upload).await?)
                }
            };
        }
        rb = rb.multipart(form);
    } else {
        let pairs: Vec<(String, String)> = body
            .iter()
            .map(|(k, v)| match v {
                BodyValue::Text(text) => (k.clone(), text.clone()),
                BodyValue::Raw(_) => unreachable!("raw parts handled as multipart"),
            })
            .collect();
        rb = rb.form(&pairs);
    }
    Ok(rb)
}

async fn upload_bytes(upload: &UploadSource) -> Result<(Vec<u8>, Option<String>), RestError> {
    match upload {
        UploadSource::File(path) => {
            let bytes = tokio::fs::read(path).await.map_err(|e| {
                RestError::TransportError(format!("cannot read upload {}: {e}", path.display()))
            })?;
            Ok((bytes, None))
        }
        UploadSource::Bytes {
            content,
            content_type,
            ..
        } => Ok((content.clone(), content_type.clone())),
    }
}

async fn upload_part(upload: &UploadSource) -> Result<reqwest::multipart::Part, RestError> {
    match upload {
        UploadSource::File(path) => {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".into());
            let bytes = tokio::fs::read(path).await.map_err(|e| {
                RestError::TransportError(format!("cannot read upload {}: {e}", path.display()))
            })?;
            Ok(reqwest::multipart::Part::bytes(bytes).file_name(file_name))
        }
        UploadSource::Bytes {
            file_name,
            content,
            content_type,
        } => {
            let mut part =
                reqwest::multipart::Part::bytes(content.clone()).file_name(file_name.clone());
            if let Some(ct) = content_type {
                part = part.mime_str(ct).map_err(|e| {
                    RestError::ConfigurationError(format!("invalid content type {ct}: {e}"))
                })?;
            }
            Ok(part)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::{HttpRequestBuilder, HttpVerb};

    #[test]
    fn clients_are_pooled_per_connect_timeout() {
        let service = DefaultRestService::new();
        service.client_for(Duration::from_secs(5)).unwrap();
        service.client_for(Duration::from_secs(5)).unwrap();
        service.client_for(Duration::from_secs(9)).unwrap();
        assert_eq!(service.clients.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unnamed_body_cannot_mix_with_named_params() {
        let mut builder = HttpRequestBuilder::new()
            .pointing_to("http://api.example.com/upload")
            .using(HttpVerb::Post)
            .encoded_as("utf-8");
        builder.add_unnamed_body_param(BodyValue::Text("entity".into()));
        builder.add_body_param("extra", BodyValue::Text("x".into()));
        let request = builder.build().unwrap();

        let client = reqwest::Client::new();
        let rb = client.request(reqwest::Method::POST, request.url());
        let err = apply_body(rb, &request).await.unwrap_err();
        assert!(matches!(err, RestError::ConfigurationError(_)));
    }
}
