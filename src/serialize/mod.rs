//! Parameter Serialization Module
//!
//! Turns call-argument values into the string form placed into URLs, query
//! strings, bodies, and headers. The default serializer resolves per value
//! kind: exact-kind registry lookup, then date formatting (pattern or epoch
//! granularity), then boolean tokens, then the value's natural string form.
//! Collections are flattened recursively and joined with a configurable
//! separator, dropping blank elements.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::RestError;

/// A call-argument value handed to the pipeline.
///
/// Arguments reach the dispatcher as a positional `Vec<ParamValue>`; the
/// index of each value matches its `ParamConfig` index.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Absent argument; the param's configured default applies.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(DateTime<Utc>),
    /// Nested lists are allowed and flattened on serialization.
    List(Vec<ParamValue>),
    /// Upload-capable resource, injected into the body unserialized.
    Upload(UploadSource),
}

/// Raw body content that bypasses string serialization.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadSource {
    File(PathBuf),
    Bytes {
        file_name: String,
        content: Vec<u8>,
        content_type: Option<String>,
    },
}

impl ParamValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_upload(&self) -> bool {
        matches!(self, Self::Upload(_))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Text(_) => ValueKind::Text,
            Self::Date(_) => ValueKind::Date,
            Self::List(_) => ValueKind::List,
            Self::Upload(_) => ValueKind::Upload,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Discriminant used for exact-kind serializer registry lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Text,
    Date,
    List,
    Upload,
}

/// Context handed to a serializer for one parameter occurrence.
#[derive(Debug, Clone, Copy)]
pub struct ParamContext<'a> {
    /// Configured param name, absent for positional path params.
    pub name: Option<&'a str>,
    /// Argument position of the parameter.
    pub index: usize,
    pub value: &'a ParamValue,
}

/// Converts one parameter value into its wire string form.
pub trait Serializer: Send + Sync {
    fn serialize(&self, ctx: &ParamContext<'_>) -> Result<String, RestError>;
}

/// Date rendering mode for the default serializer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateFormat {
    /// chrono strftime pattern, e.g. `%Y-%m-%dT%H:%M:%SZ`.
    Pattern(String),
    /// Fixed granularities since the Unix epoch.
    Millis,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl Default for DateFormat {
    fn default() -> Self {
        Self::Millis
    }
}

/// The crate's fallback serializer.
///
/// Resolution per leaf value: date via the configured [`DateFormat`], bool
/// via the configured tokens, everything else via its natural string form.
/// Lists recurse to arbitrary depth; blank leaf results are dropped rather
/// than emitted as empty segments.
#[derive(Debug, Clone)]
pub struct DefaultSerializer {
    date_format: DateFormat,
    bool_true: String,
    bool_false: String,
    list_separator: String,
}

impl Default for DefaultSerializer {
    fn default() -> Self {
        Self {
            date_format: DateFormat::default(),
            bool_true: "true".into(),
            bool_false: "false".into(),
            list_separator: ",".into(),
        }
    }
}

impl DefaultSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_date_format(mut self, format: DateFormat) -> Self {
        self.date_format = format;
        self
    }

    pub fn with_bool_tokens(mut self, truthy: impl Into<String>, falsy: impl Into<String>) -> Self {
        self.bool_true = truthy.into();
        self.bool_false = falsy.into();
        self
    }

    pub fn with_list_separator(mut self, separator: impl Into<String>) -> Self {
        self.list_separator = separator.into();
        self
    }

    fn serialize_date(&self, date: &DateTime<Utc>) -> String {
        match &self.date_format {
            DateFormat::Pattern(pattern) => date.format(pattern).to_string(),
            DateFormat::Millis => date.timestamp_millis().to_string(),
            DateFormat::Seconds => date.timestamp().to_string(),
            DateFormat::Minutes => (date.timestamp() / 60).to_string(),
            DateFormat::Hours => (date.timestamp() / 3600).to_string(),
            DateFormat::Days => (date.timestamp() / 86_400).to_string(),
        }
    }

    fn serialize_leaf(&self, value: &ParamValue) -> Result<String, RestError> {
        match value {
            ParamValue::Null => Ok(String::new()),
            ParamValue::Bool(b) => Ok(if *b {
                self.bool_true.clone()
            } else {
                self.bool_false.clone()
            }),
            ParamValue::Int(v) => Ok(v.to_string()),
            ParamValue::Float(v) => Ok(v.to_string()),
            ParamValue::Text(s) => Ok(s.clone()),
            ParamValue::Date(d) => Ok(self.serialize_date(d)),
            ParamValue::List(items) => {
                let mut parts = Vec::with_capacity(items.len());
                self.flatten_into(items, &mut parts)?;
                Ok(parts.join(&self.list_separator))
            }
            ParamValue::Upload(_) => Err(RestError::SerializationError(
                "upload values bypass serialization".into(),
            )),
        }
    }

    // Leaves of nested lists serialize independently; blank results are
    // dropped so separators never double up at nesting boundaries.
    fn flatten_into(&self, items: &[ParamValue], out: &mut Vec<String>) -> Result<(), RestError> {
        for item in items {
            match item {
                ParamValue::List(nested) => self.flatten_into(nested, out)?,
                leaf => {
                    let s = self.serialize_leaf(leaf)?;
                    if !s.trim().is_empty() {
                        out.push(s);
                    }
                }
            }
        }
        Ok(())
    }
}

impl Serializer for DefaultSerializer {
    fn serialize(&self, ctx: &ParamContext<'_>) -> Result<String, RestError> {
        self.serialize_leaf(ctx.value)
    }
}

/// Per-kind serializer bindings with the default cascade as fallback.
#[derive(Clone)]
pub struct SerializerRegistry {
    by_kind: HashMap<ValueKind, Arc<dyn Serializer>>,
    fallback: Arc<DefaultSerializer>,
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self {
            by_kind: HashMap::new(),
            fallback: Arc::new(DefaultSerializer::default()),
        }
    }
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(mut self, fallback: DefaultSerializer) -> Self {
        self.fallback = Arc::new(fallback);
        self
    }

    /// Bind an explicit serializer for one value kind.
    pub fn bind(mut self, kind: ValueKind, serializer: Arc<dyn Serializer>) -> Self {
        self.by_kind.insert(kind, serializer);
        self
    }

    /// Exact-kind lookup, falling back to the default cascade.
    pub fn resolve(&self, value: &ParamValue) -> Arc<dyn Serializer> {
        self.by_kind
            .get(&value.kind())
            .cloned()
            .unwrap_or_else(|| self.fallback.clone() as Arc<dyn Serializer>)
    }
}

/// The registry is itself a serializer: each value routes through its
/// exact-kind binding or the fallback cascade.
impl Serializer for SerializerRegistry {
    fn serialize(&self, ctx: &ParamContext<'_>) -> Result<String, RestError> {
        self.resolve(ctx.value).serialize(ctx)
    }
}
