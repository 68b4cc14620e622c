//! Shared types for logtail
//!
//! This crate contains data structures used across multiple logtail crates:
//! the stored [`LogRecord`], the wire-level [`StreamEvent`] pushed by the
//! server, and the request parameters sent when a stream is opened.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Source assigned to records the client synthesizes itself
pub const SYSTEM_SOURCE: &str = "system";

/// Source assigned to events that arrive without one
pub const UNKNOWN_SOURCE: &str = "unknown";

// ============================================================================
// Log Types
// ============================================================================

/// Log severity level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        Self::Debug,
        Self::Info,
        Self::Warning,
        Self::Error,
        Self::Critical,
    ];

    /// Parse log level from common formats
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "DEBUG" | "DBG" | "TRACE" | "TRC" => Some(Self::Debug),
            "INFO" | "INF" | "INFORMATION" | "NOTICE" => Some(Self::Info),
            "WARNING" | "WARN" | "WRN" => Some(Self::Warning),
            "ERROR" | "ERR" | "ERRO" => Some(Self::Error),
            "CRITICAL" | "CRIT" | "FATAL" | "PANIC" | "FTL" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a record represents
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// A log line produced by the server
    #[serde(rename = "log")]
    Entry,
    /// Session metadata; never stored in a bucket
    Connected,
    /// A stream failure, either reported by the server or synthesized locally
    Error,
}

impl RecordKind {
    /// Uppercased label used in text transcripts
    pub fn label(&self) -> &'static str {
        match self {
            Self::Entry => "LOG",
            Self::Connected => "CONNECTED",
            Self::Error => "ERROR",
        }
    }
}

/// Rendering hint derived from the message text
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Json,
    Url,
    Path,
}

impl ContentType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "url" | "link" => Some(Self::Url),
            "path" | "file" => Some(Self::Path),
            _ => None,
        }
    }
}

/// Action a log line describes, used for grouping and iconography
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTag {
    Startup,
    Shutdown,
    Success,
    Failure,
    Warning,
    Retry,
    Sync,
    Download,
    Upload,
    Delete,
    Create,
    Update,
    Search,
    Schedule,
    Auth,
    Request,
    /// Server-supplied tag with no known counterpart
    Other(String),
}

impl ActionTag {
    /// Map a server-supplied action name onto a tag; unknown names are kept verbatim
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "startup" | "start" | "boot" => Self::Startup,
            "shutdown" | "stop" => Self::Shutdown,
            "success" | "ok" | "done" | "complete" => Self::Success,
            "failure" | "fail" | "failed" | "error" => Self::Failure,
            "warning" | "warn" => Self::Warning,
            "retry" => Self::Retry,
            "sync" | "refresh" => Self::Sync,
            "download" => Self::Download,
            "upload" => Self::Upload,
            "delete" | "remove" => Self::Delete,
            "create" | "add" => Self::Create,
            "update" | "edit" => Self::Update,
            "search" | "query" => Self::Search,
            "schedule" | "cron" => Self::Schedule,
            "auth" | "login" | "logout" => Self::Auth,
            "request" | "http" => Self::Request,
            _ => Self::Other(s.trim().to_string()),
        }
    }
}

/// Value of an embedded entity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityValue {
    Bool(bool),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Text(String),
    /// Arrays, objects and nulls are carried through untouched
    Opaque(Value),
}

impl From<Value> for EntityValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Integer(i)
                } else if let Some(u) = n.as_u64() {
                    Self::Unsigned(u)
                } else if let Some(f) = n.as_f64() {
                    Self::Float(f)
                } else {
                    Self::Opaque(Value::Number(n))
                }
            }
            Value::String(s) => Self::Text(s),
            other => Self::Opaque(other),
        }
    }
}

impl fmt::Display for EntityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Unsigned(u) => write!(f, "{u}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
            Self::Opaque(v) => write!(f, "{v}"),
        }
    }
}

/// A named value embedded in a log line
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub key: String,
    pub value: EntityValue,
}

impl Entity {
    pub fn new(key: impl Into<String>, value: EntityValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    pub fn text(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, EntityValue::Text(value.into()))
    }
}

/// A single classified log record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Arrival sequence number, assigned by the buffer
    #[serde(default)]
    pub id: u64,

    #[serde(rename = "type")]
    pub kind: RecordKind,

    pub message: String,

    /// Server timestamp if the event carried one, else receipt time
    pub timestamp: DateTime<Utc>,

    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_tag: Option<ActionTag>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<Entity>,

    /// 0-100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity_score: Option<u8>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub content_types: BTreeSet<ContentType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_content: Option<Value>,

    /// Payload fields the classifier does not recognize
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, Value>,

    /// Original unparsed text
    pub raw: String,
}

impl LogRecord {
    /// Create a record with minimal fields
    pub fn new(
        kind: RecordKind,
        source: impl Into<String>,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let message = message.into();
        Self {
            id: 0,
            kind,
            raw: message.clone(),
            message,
            timestamp,
            source: source.into(),
            level: None,
            module: None,
            function: None,
            line_number: None,
            emoji: None,
            action_tag: None,
            entities: Vec::new(),
            severity_score: None,
            content_types: BTreeSet::new(),
            special_content: None,
            extras: BTreeMap::new(),
        }
    }

    /// Locally synthesized advisory record describing a stream failure
    pub fn stream_notice(message: impl Into<String>, at: DateTime<Utc>) -> Self {
        let mut record = Self::new(RecordKind::Error, SYSTEM_SOURCE, message, at);
        record.level = Some(LogLevel::Error);
        record
    }

    /// Look up an entity by key
    pub fn entity(&self, key: &str) -> Option<&EntityValue> {
        self.entities.iter().find(|e| e.key == key).map(|e| &e.value)
    }
}

// ============================================================================
// Wire Types
// ============================================================================

/// Event type tag carried by every pushed payload
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    #[default]
    Log,
    Connected,
    Error,
}

/// Timestamp as pushed by the server: a string or epoch seconds
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    Text(String),
    Epoch(f64),
}

/// One payload pushed on the stream, decoded leniently
///
/// Optional fields that are present but of the wrong type decode as `None`
/// instead of failing the whole event.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type", default)]
    pub event_type: EventType,
    #[serde(default, deserialize_with = "lenient")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub timestamp: Option<WireTimestamp>,
    #[serde(default, deserialize_with = "lenient")]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub level: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub module: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub function: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub line_number: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub emoji: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub action_type: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub entities: Option<serde_json::Map<String, Value>>,
    #[serde(default, deserialize_with = "lenient")]
    pub severity_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub content_types: Option<Vec<String>>,
    #[serde(default)]
    pub special_content: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub raw: Option<String>,
    /// Known sources, sent with `connected` events
    #[serde(default, deserialize_with = "lenient")]
    pub sources: Option<Vec<String>>,
    #[serde(flatten)]
    pub extras: BTreeMap<String, Value>,
}

impl StreamEvent {
    /// Decode a single JSON payload
    pub fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Build a plain log event with only a message (mostly for tests)
    pub fn log(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

// ============================================================================
// Request Types
// ============================================================================

/// Server-side filter parameters
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamFilters {
    /// Allow-list of sources (empty = all)
    pub sources: Vec<String>,
    /// Allow-list of levels (empty = all)
    pub levels: Vec<LogLevel>,
    pub keyword: Option<String>,
}

impl StreamFilters {
    /// Keyword with surrounding whitespace removed; blank keywords count as absent
    pub fn keyword(&self) -> Option<&str> {
        self.keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

/// Parameters for opening one stream connection
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamRequest {
    /// Bearer credential, sent as a query parameter
    pub token: Option<String>,
    pub filters: StreamFilters,
    /// Historical records requested per source; 0 = live only
    pub tail: u32,
}

impl StreamRequest {
    /// Query parameters for this request; empty values are omitted
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            pairs.push(("token", token.to_string()));
        }
        if !self.filters.sources.is_empty() {
            pairs.push(("sources", self.filters.sources.join(",")));
        }
        if !self.filters.levels.is_empty() {
            let levels: Vec<_> = self.filters.levels.iter().map(LogLevel::as_str).collect();
            pairs.push(("levels", levels.join(",")));
        }
        if let Some(keyword) = self.filters.keyword() {
            pairs.push(("keyword", keyword.to_string()));
        }
        pairs.push(("tail", self.tail.to_string()));
        pairs
    }
}

/// A view selector: one source bucket or the aggregate
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Tab {
    All,
    Source(String),
}

impl Tab {
    pub fn source(name: impl Into<String>) -> Self {
        Self::Source(name.into())
    }

    pub fn label(&self) -> &str {
        match self {
            Self::All => "all",
            Self::Source(name) => name,
        }
    }
}

impl From<&str> for Tab {
    fn from(s: &str) -> Self {
        if s == "all" {
            Self::All
        } else {
            Self::Source(s.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_level_aliases() {
        assert_eq!(LogLevel::parse("warn"), Some(LogLevel::Warning));
        assert_eq!(LogLevel::parse("FATAL"), Some(LogLevel::Critical));
        assert_eq!(LogLevel::parse(" info "), Some(LogLevel::Info));
        assert_eq!(LogLevel::parse("verbose"), None);
    }

    #[test]
    fn test_decode_wrong_typed_fields_degrade() {
        let event =
            StreamEvent::decode(r#"{"type":"log","message":"hi","line_number":"abc","level":7}"#)
                .unwrap();
        assert_eq!(event.message.as_deref(), Some("hi"));
        assert_eq!(event.line_number, None);
        assert_eq!(event.level, None);
    }

    #[test]
    fn test_decode_keeps_unknown_fields() {
        let event = StreamEvent::decode(r#"{"message":"x","pid":42}"#).unwrap();
        assert_eq!(event.event_type, EventType::Log);
        assert_eq!(event.extras.get("pid"), Some(&Value::from(42)));
        assert!(!event.extras.contains_key("message"));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        assert!(StreamEvent::decode(r#"{"type":"bogus"}"#).is_err());
        assert!(StreamEvent::decode("not json").is_err());
    }

    #[test]
    fn test_record_json_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut record = LogRecord::new(RecordKind::Entry, "api.log", "boot", ts);
        record.level = Some(LogLevel::Info);
        record.action_tag = Some(ActionTag::Other("migrate".into()));
        record.entities = vec![
            Entity::text("user", "bob"),
            Entity::new("count", EntityValue::Integer(-3)),
            Entity::new("big", EntityValue::Unsigned(u64::MAX)),
            Entity::new("ratio", EntityValue::Float(0.5)),
            Entity::new("tags", EntityValue::Opaque(serde_json::json!(["a", "b"]))),
        ];
        record.content_types.insert(ContentType::Url);
        record.extras.insert("pid".into(), Value::from(7));

        let json = serde_json::to_string(&record).unwrap();
        let back: LogRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_query_pairs_omit_empty_values() {
        let request = StreamRequest {
            token: None,
            filters: StreamFilters {
                sources: vec!["a.log".into(), "b.log".into()],
                levels: vec![LogLevel::Error],
                keyword: Some("  ".into()),
            },
            tail: 0,
        };
        assert_eq!(
            request.query_pairs(),
            vec![
                ("sources", "a.log,b.log".to_string()),
                ("levels", "ERROR".to_string()),
                ("tail", "0".to_string()),
            ]
        );
    }

    #[test]
    fn test_tab_from_str() {
        assert_eq!(Tab::from("all"), Tab::All);
        assert_eq!(Tab::from("api.log"), Tab::source("api.log"));
    }
}
