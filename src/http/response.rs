//! HTTP response model.
//!
//! The content source is single-use: the first read (text, bytes, or reader)
//! consumes it and any later read fails with `RestError::ResponseConsumed`.
//! Failing loudly is the documented policy; a silent empty re-read would
//! hide partial-consumption bugs.

use std::io::Cursor;
use std::sync::Mutex;

use indexmap::IndexMap;

use crate::error::RestError;

/// Response produced by a `RestService` for one attempt.
#[derive(Debug)]
pub struct HttpResponse {
    status: u16,
    headers: IndexMap<String, String>,
    mime: String,
    charset: String,
    content: Mutex<Option<Vec<u8>>>,
}

impl HttpResponse {
    /// Build a response from raw transport output. The mime type and charset
    /// are extracted from a `Content-Type` header when present.
    pub fn new(status: u16, headers: IndexMap<String, String>, body: Vec<u8>) -> Self {
        let content_type = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.as_str())
            .unwrap_or("text/plain");
        let (mime, charset) = split_content_type(content_type);
        Self {
            status,
            headers,
            mime,
            charset,
            content: Mutex::new(Some(body)),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &IndexMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Mime type with parameters such as `;charset=` stripped, lowercased.
    pub fn mime_type(&self) -> &str {
        &self.mime
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    /// Consume the content as bytes.
    pub fn read_bytes(&self) -> Result<Vec<u8>, RestError> {
        self.content
            .lock()
            .map_err(|_| RestError::InternalError("response content lock poisoned".into()))?
            .take()
            .ok_or(RestError::ResponseConsumed)
    }

    /// Consume the content as text. Undecodable byte sequences are replaced
    /// rather than failing the read.
    pub fn read_text(&self) -> Result<String, RestError> {
        let bytes = self.read_bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Consume the content as an `std::io::Read` source.
    pub fn read_reader(&self) -> Result<Cursor<Vec<u8>>, RestError> {
        Ok(Cursor::new(self.read_bytes()?))
    }
}

fn split_content_type(value: &str) -> (String, String) {
    let mut parts = value.split(';');
    let mime = parts
        .next()
        .unwrap_or("text/plain")
        .trim()
        .to_ascii_lowercase();
    let charset = parts
        .filter_map(|p| {
            let p = p.trim();
            p.strip_prefix("charset=")
                .or_else(|| p.strip_prefix("CHARSET="))
        })
        .next()
        .unwrap_or("utf-8")
        .trim_matches('"')
        .to_ascii_lowercase();
    (mime, charset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with(content_type: &str, body: &[u8]) -> HttpResponse {
        let mut headers = IndexMap::new();
        headers.insert("Content-Type".to_string(), content_type.to_string());
        HttpResponse::new(200, headers, body.to_vec())
    }

    #[test]
    fn mime_and_charset_parse_from_content_type() {
        let resp = response_with("application/JSON; charset=UTF-8", b"{}");
        assert_eq!(resp.mime_type(), "application/json");
        assert_eq!(resp.charset(), "utf-8");
    }

    #[test]
    fn second_read_fails_after_full_text_read() {
        let resp = response_with("text/plain", b"hello");
        assert_eq!(resp.read_text().unwrap(), "hello");
        assert!(matches!(resp.read_text(), Err(RestError::ResponseConsumed)));
        assert!(matches!(resp.read_bytes(), Err(RestError::ResponseConsumed)));
        assert!(matches!(resp.read_reader(), Err(RestError::ResponseConsumed)));
    }

    #[test]
    fn reader_consumes_like_any_other_read() {
        let resp = response_with("text/plain", b"abc");
        let mut reader = resp.read_reader().unwrap();
        let mut out = String::new();
        std::io::Read::read_to_string(&mut reader, &mut out).unwrap();
        assert_eq!(out, "abc");
        assert!(matches!(resp.read_text(), Err(RestError::ResponseConsumed)));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let resp = response_with("text/plain", b"");
        assert!(resp.header("content-TYPE").is_some());
        assert!(resp.header("x-missing").is_none());
    }
}
