//! Response Deserialization
//!
//! A registry maps response mime types to deserializers. An entry is either
//! a ready instance or a (factory, config-map) descriptor instantiated on
//! first use and memoized per mime type; concurrent first uses may race on
//! construction but converge to a single cached instance.

pub mod pool;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;

use crate::error::RestError;

pub use pool::{DeserializerEngine, Pool, PooledDeserializer};

/// Turns a response body into a structured value.
#[async_trait]
pub trait Deserializer: Send + Sync {
    async fn deserialize(
        &self,
        body: &[u8],
        charset: &str,
    ) -> Result<serde_json::Value, RestError>;
}

impl std::fmt::Debug for dyn Deserializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Deserializer")
    }
}

/// Constructor reference for lazily-instantiated deserializers.
pub type DeserializerFactory =
    fn(&HashMap<String, String>) -> Result<Arc<dyn Deserializer>, RestError>;

enum Entry {
    Ready(Arc<dyn Deserializer>),
    Lazy {
        factory: DeserializerFactory,
        config: HashMap<String, String>,
        cell: OnceCell<Arc<dyn Deserializer>>,
    },
}

/// Mime type → deserializer bindings.
pub struct DeserializerRegistry {
    by_mime: HashMap<String, Entry>,
}

impl Default for DeserializerRegistry {
    /// JSON and plain-text bindings, the crate's stock coverage.
    fn default() -> Self {
        Self::new()
            .bind("application/json", Arc::new(JsonDeserializer))
            .bind("text/json", Arc::new(JsonDeserializer))
            .bind("text/plain", Arc::new(PlainTextDeserializer))
            .bind("text/html", Arc::new(PlainTextDeserializer))
    }
}

impl DeserializerRegistry {
    pub fn new() -> Self {
        Self {
            by_mime: HashMap::new(),
        }
    }

    /// Bind a ready instance for a mime type.
    pub fn bind(mut self, mime: impl Into<String>, deserializer: Arc<dyn Deserializer>) -> Self {
        self.by_mime
            .insert(normalize_mime(&mime.into()), Entry::Ready(deserializer));
        self
    }

    /// Bind a descriptor instantiated on first use for its mime type.
    pub fn bind_lazy(
        mut self,
        mime: impl Into<String>,
        factory: DeserializerFactory,
        config: HashMap<String, String>,
    ) -> Self {
        self.by_mime.insert(
            normalize_mime(&mime.into()),
            Entry::Lazy {
                factory,
                config,
                cell: OnceCell::new(),
            },
        );
        self
    }

    /// Resolve the deserializer for a mime type, instantiating and
    /// memoizing a lazy entry on first use.
    pub fn resolve(&self, mime: &str) -> Result<Arc<dyn Deserializer>, RestError> {
        let entry = self.by_mime.get(&normalize_mime(mime)).ok_or_else(|| {
            RestError::DeserializationError {
                mime: mime.to_string(),
                message: "no deserializer bound for mime type".into(),
            }
        })?;
        match entry {
            Entry::Ready(d) => Ok(d.clone()),
            Entry::Lazy {
                factory,
                config,
                cell,
            } => cell.get_or_try_init(|| factory(config)).cloned(),
        }
    }

    pub fn is_bound(&self, mime: &str) -> bool {
        self.by_mime.contains_key(&normalize_mime(mime))
    }
}

fn normalize_mime(mime: &str) -> String {
    mime.split(';').next().unwrap_or(mime).trim().to_ascii_lowercase()
}

/// serde_json-backed deserializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDeserializer;

#[async_trait]
impl Deserializer for JsonDeserializer {
    async fn deserialize(
        &self,
        body: &[u8],
        _charset: &str,
    ) -> Result<serde_json::Value, RestError> {
        serde_json::from_slice(body).map_err(|e| RestError::DeserializationError {
            mime: "application/json".into(),
            message: e.to_string(),
        })
    }
}

/// Passes the body through as a string value.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextDeserializer;

#[async_trait]
impl Deserializer for PlainTextDeserializer {
    async fn deserialize(
        &self,
        body: &[u8],
        _charset: &str,
    ) -> Result<serde_json::Value, RestError> {
        Ok(serde_json::Value::String(
            String::from_utf8_lossy(body).into_owned(),
        ))
    }
}
