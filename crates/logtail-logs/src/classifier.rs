use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use logtail_types::{
    ActionTag, ContentType, Entity, EntityValue, EventType, LogLevel, LogRecord, RecordKind,
    StreamEvent, UNKNOWN_SOURCE, WireTimestamp,
};

static LEADING_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[?(\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?)\]?",
    )
    .unwrap()
});

static LEVEL_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(DEBUG|INFO|WARNING|WARN|ERROR|CRITICAL|FATAL)\b").unwrap()
});

static LEVEL_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)\[(debug|info|warn|warning|error|critical|fatal)\]",
        r"|\b(debug|info|warn|warning|error|critical|fatal):",
    ))
    .unwrap()
});

/// `module:function:line`, e.g. `app.api.users:get_user:42`
static LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?P<module>[A-Za-z_][\w.]*):(?P<function>[A-Za-z_<][\w<>]*):(?P<line>\d+)\b")
        .unwrap()
});

/// Python traceback frame
static TRACEBACK_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"File "(?P<path>[^"]+)", line (?P<line>\d+), in (?P<function>[\w<>]+)"#).unwrap()
});

/// `<time> - module - LEVEL - message` logging layout
static LOGGER_LAYOUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r" - (?P<module>[A-Za-z_][\w.]*) - (?:DEBUG|INFO|WARNING|ERROR|CRITICAL) - ")
        .unwrap()
});

static KEY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:^|[\s,;(\[])(?P<key>[A-Za-z_][\w.-]*)=(?:"(?P<quoted>[^"]*)"|'(?P<single>[^']*)'|(?P<bare>[^\s,;&)\]]+))"#,
    )
    .unwrap()
});

static HTTP_METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:GET|POST|PUT|PATCH|DELETE|HEAD|OPTIONS) /").unwrap()
});

static PATH_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|[\s"'(=])(?:~|\.{1,2})?(?:/[\w.-]+){2,}|\b[A-Za-z]:\\[\w\\. -]+"#).unwrap()
});

/// Emoji markers with a known meaning
const EMOJI_TAGS: &[(&str, ActionTag)] = &[
    ("🚀", ActionTag::Startup),
    ("🛑", ActionTag::Shutdown),
    ("⏹", ActionTag::Shutdown),
    ("✅", ActionTag::Success),
    ("✔", ActionTag::Success),
    ("🎉", ActionTag::Success),
    ("❌", ActionTag::Failure),
    ("✖", ActionTag::Failure),
    ("💥", ActionTag::Failure),
    ("🔥", ActionTag::Failure),
    ("⚠", ActionTag::Warning),
    ("🔁", ActionTag::Retry),
    ("🔄", ActionTag::Sync),
    ("📥", ActionTag::Download),
    ("⬇", ActionTag::Download),
    ("📤", ActionTag::Upload),
    ("⬆", ActionTag::Upload),
    ("🗑", ActionTag::Delete),
    ("➕", ActionTag::Create),
    ("✨", ActionTag::Create),
    ("✏", ActionTag::Update),
    ("📝", ActionTag::Update),
    ("🔍", ActionTag::Search),
    ("🔎", ActionTag::Search),
    ("⏰", ActionTag::Schedule),
    ("📅", ActionTag::Schedule),
    ("🔐", ActionTag::Auth),
    ("🔑", ActionTag::Auth),
    ("🔒", ActionTag::Auth),
    ("🌐", ActionTag::Request),
    ("📡", ActionTag::Request),
];

/// Keyword fallbacks, checked in order against the lowercased message
const KEYWORD_TAGS: &[(&[&str], ActionTag)] = &[
    (&["failed", "failure", "exception", "traceback"], ActionTag::Failure),
    (&["retrying", "retry"], ActionTag::Retry),
    (&["shutting down", "shutdown", "stopped"], ActionTag::Shutdown),
    (&["starting", "started", "startup", "booting"], ActionTag::Startup),
    (&["succeeded", "successfully", "completed"], ActionTag::Success),
    (&["logged in", "login", "logout", "authenticat"], ActionTag::Auth),
    (&["download"], ActionTag::Download),
    (&["upload"], ActionTag::Upload),
    (&["deleted", "deleting", "removed"], ActionTag::Delete),
    (&["created", "creating"], ActionTag::Create),
    (&["updated", "updating"], ActionTag::Update),
    (&["sync"], ActionTag::Sync),
    (&["search"], ActionTag::Search),
    (&["scheduled", "cron"], ActionTag::Schedule),
];

const EXCEPTION_MARKERS: &[&str] = &["exception", "traceback", "timeout", "timed out", "panic"];

/// Turns pushed events into classified log records
///
/// Classification is total: fields that cannot be derived are left empty.
/// Server-supplied structured fields always take precedence over anything
/// recovered from the text.
pub struct LogClassifier;

impl LogClassifier {
    /// Classify an event received at `received_at`
    pub fn classify(event: &StreamEvent, received_at: DateTime<Utc>) -> LogRecord {
        let kind = match event.event_type {
            EventType::Log => RecordKind::Entry,
            EventType::Connected => RecordKind::Connected,
            EventType::Error => RecordKind::Error,
        };

        let message = event
            .message
            .clone()
            .or_else(|| event.raw.clone())
            .unwrap_or_default();
        let raw = event.raw.clone().unwrap_or_else(|| message.clone());

        let source = event
            .source
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_SOURCE);

        let timestamp = event
            .timestamp
            .as_ref()
            .and_then(Self::wire_timestamp)
            .or_else(|| Self::leading_timestamp(&raw))
            .unwrap_or(received_at);

        let mut record = LogRecord::new(kind, source, message, timestamp);
        record.raw = raw;

        record.level = event
            .level
            .as_deref()
            .and_then(LogLevel::parse)
            .or_else(|| Self::text_level(&record.raw))
            .or((kind == RecordKind::Error).then_some(LogLevel::Error));

        Self::fill_location(&mut record, event);

        record.emoji = event
            .emoji
            .clone()
            .filter(|e| !e.trim().is_empty())
            .or_else(|| Self::leading_emoji(&record.message));

        record.action_tag = event
            .action_type
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .map(ActionTag::parse)
            .or_else(|| record.emoji.as_deref().and_then(Self::emoji_tag))
            .or_else(|| Self::keyword_tag(&record.message));

        record.entities = Self::entities(event, &record.message);

        record.severity_score = event
            .severity_score
            .filter(|s| s.is_finite())
            .map(|s| s.round().clamp(0.0, 100.0) as u8)
            .or_else(|| Some(Self::severity(&record)));

        record.content_types = Self::content_types(event, &record.message);

        record.special_content = event.special_content.clone().filter(|v| !v.is_null());
        record.extras = event.extras.clone();

        record
    }

    fn wire_timestamp(ts: &WireTimestamp) -> Option<DateTime<Utc>> {
        match ts {
            WireTimestamp::Text(s) => Self::parse_timestamp(s),
            WireTimestamp::Epoch(secs) if secs.is_finite() => {
                // Values this large are milliseconds
                let secs = if secs.abs() > 1e11 { secs / 1000.0 } else { *secs };
                let whole = secs.floor();
                let nanos = ((secs - whole) * 1e9) as u32;
                DateTime::from_timestamp(whole as i64, nanos)
            }
            WireTimestamp::Epoch(_) => None,
        }
    }

    /// Parse RFC 3339 or `YYYY-MM-DD HH:MM:SS[.,fff]` (taken as UTC)
    fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
        let s = s.trim().replace(',', ".");
        if let Ok(ts) = DateTime::parse_from_rfc3339(&s) {
            return Some(ts.with_timezone(&Utc));
        }
        let t_form = s.replacen(' ', "T", 1);
        if let Ok(ts) = DateTime::parse_from_rfc3339(&t_form) {
            return Some(ts.with_timezone(&Utc));
        }
        if let Ok(ts) = DateTime::parse_from_str(&t_form, "%Y-%m-%dT%H:%M:%S%.f%z") {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&t_form, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    fn leading_timestamp(raw: &str) -> Option<DateTime<Utc>> {
        let caps = LEADING_TIMESTAMP.captures(raw.trim_start())?;
        Self::parse_timestamp(caps.get(1)?.as_str())
    }

    fn text_level(raw: &str) -> Option<LogLevel> {
        if let Some(m) = LEVEL_TOKEN.find(raw) {
            return LogLevel::parse(m.as_str());
        }
        let caps = LEVEL_MARKER.captures(raw)?;
        caps.get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| LogLevel::parse(m.as_str()))
    }

    fn fill_location(record: &mut LogRecord, event: &StreamEvent) {
        record.module = event.module.clone().filter(|m| !m.trim().is_empty());
        record.function = event.function.clone().filter(|f| !f.trim().is_empty());
        record.line_number = event.line_number;

        if record.module.is_some() && record.function.is_some() && record.line_number.is_some() {
            return;
        }

        let raw = record.raw.as_str();
        if let Some(caps) = LOCATION.captures(raw) {
            record.module.get_or_insert_with(|| caps["module"].to_string());
            record.function.get_or_insert_with(|| caps["function"].to_string());
            if record.line_number.is_none() {
                record.line_number = caps["line"].parse().ok();
            }
        } else if let Some(caps) = TRACEBACK_FRAME.captures(raw) {
            if record.module.is_none() {
                record.module = Path::new(&caps["path"])
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned());
            }
            record.function.get_or_insert_with(|| caps["function"].to_string());
            if record.line_number.is_none() {
                record.line_number = caps["line"].parse().ok();
            }
        } else if let Some(caps) = LOGGER_LAYOUT.captures(raw) {
            record.module.get_or_insert_with(|| caps["module"].to_string());
        }
    }

    /// The pictograph (with any modifier sequence) the message starts with
    fn leading_emoji(message: &str) -> Option<String> {
        let mut chars = message.trim_start().chars().peekable();
        let first = chars.next().filter(|c| is_pictograph(*c))?;

        let mut emoji = String::from(first);
        while let Some(&c) = chars.peek() {
            match c {
                '\u{FE0F}' | '\u{1F3FB}'..='\u{1F3FF}' => {
                    emoji.push(c);
                    chars.next();
                }
                '\u{200D}' => {
                    chars.next();
                    match chars.next().filter(|n| is_pictograph(*n)) {
                        Some(next) => {
                            emoji.push('\u{200D}');
                            emoji.push(next);
                        }
                        None => break,
                    }
                }
                _ => break,
            }
        }
        Some(emoji)
    }

    fn emoji_tag(emoji: &str) -> Option<ActionTag> {
        EMOJI_TAGS
            .iter()
            .find(|(marker, _)| emoji.starts_with(marker))
            .map(|(_, tag)| tag.clone())
    }

    fn keyword_tag(message: &str) -> Option<ActionTag> {
        if HTTP_METHOD.is_match(message) {
            return Some(ActionTag::Request);
        }
        let lower = message.to_lowercase();
        KEYWORD_TAGS
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
            .map(|(_, tag)| tag.clone())
    }

    fn entities(event: &StreamEvent, message: &str) -> Vec<Entity> {
        let mut entities: Vec<Entity> = event
            .entities
            .iter()
            .flatten()
            .map(|(key, value)| Entity::new(key.clone(), EntityValue::from(value.clone())))
            .collect();

        for caps in KEY_VALUE.captures_iter(message) {
            let key = &caps["key"];
            if entities.iter().any(|e| e.key == key) {
                continue;
            }
            let value = if let Some(quoted) = caps.name("quoted").or_else(|| caps.name("single")) {
                EntityValue::Text(quoted.as_str().to_string())
            } else if let Some(bare) = caps.name("bare") {
                bare_value(bare.as_str())
            } else {
                continue;
            };
            entities.push(Entity::new(key, value));
        }

        entities
    }

    fn severity(record: &LogRecord) -> u8 {
        let base: u8 = match record.level {
            Some(LogLevel::Debug) => 10,
            Some(LogLevel::Info) => 25,
            Some(LogLevel::Warning) => 50,
            Some(LogLevel::Error) => 75,
            Some(LogLevel::Critical) => 95,
            None => 20,
        };

        let mut score = base;
        if record.action_tag == Some(ActionTag::Failure) {
            score = score.saturating_add(10);
        }
        let lower = record.message.to_lowercase();
        if EXCEPTION_MARKERS.iter().any(|m| lower.contains(m)) {
            score = score.saturating_add(10);
        }
        score.min(100)
    }

    fn content_types(event: &StreamEvent, message: &str) -> BTreeSet<ContentType> {
        let mut types: BTreeSet<ContentType> = event
            .content_types
            .iter()
            .flatten()
            .filter_map(|t| ContentType::parse(t))
            .collect();

        if message.contains('{') || message.contains('[') {
            types.insert(ContentType::Json);
        }
        if message.contains("http://") || message.contains("https://") {
            types.insert(ContentType::Url);
        }
        if PATH_LIKE.is_match(message) {
            types.insert(ContentType::Path);
        }
        types
    }
}

fn bare_value(s: &str) -> EntityValue {
    if let Ok(i) = s.parse::<i64>() {
        return EntityValue::Integer(i);
    }
    if s.contains('.') {
        if let Ok(f) = s.parse::<f64>() {
            if f.is_finite() {
                return EntityValue::Float(f);
            }
        }
    }
    match s {
        "true" => EntityValue::Bool(true),
        "false" => EntityValue::Bool(false),
        _ => EntityValue::Text(s.to_string()),
    }
}

fn is_pictograph(c: char) -> bool {
    matches!(c,
        '\u{1F300}'..='\u{1FAFF}'
        | '\u{2600}'..='\u{27BF}'
        | '\u{2B00}'..='\u{2BFF}'
        | '\u{231A}'..='\u{23FF}'
        | '\u{2190}'..='\u{21FF}'
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn decode(json: &str) -> StreamEvent {
        StreamEvent::decode(json).unwrap()
    }

    #[test]
    fn test_server_fields_win() {
        let event = decode(
            r#"{"type":"log","message":"✅ done user=bob","timestamp":"2024-01-01T00:00:00Z",
                "source":"api.log","level":"warning","module":"svc","function":"run",
                "line_number":7,"action_type":"deploy","severity_score":140,
                "entities":{"user":"alice","count":3}}"#,
        );
        let record = LogClassifier::classify(&event, now());

        assert_eq!(record.kind, RecordKind::Entry);
        assert_eq!(record.source, "api.log");
        assert_eq!(record.timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(record.level, Some(LogLevel::Warning));
        assert_eq!(record.module.as_deref(), Some("svc"));
        assert_eq!(record.line_number, Some(7));
        assert_eq!(record.action_tag, Some(ActionTag::Other("deploy".into())));
        assert_eq!(record.severity_score, Some(100));
        // server entities first, text duplicates skipped
        assert_eq!(record.entities.len(), 2);
        assert_eq!(record.entities[0], Entity::text("user", "alice"));
        assert_eq!(record.entity("count"), Some(&EntityValue::Integer(3)));
    }

    #[test]
    fn test_text_fallbacks() {
        let raw =
            "2024-03-05 10:15:30,250 - app.sync - ERROR - 🔁 sync job failed job_id=42 attempt=2.5";
        let record = LogClassifier::classify(&StreamEvent::log(raw), now());

        assert_eq!(record.source, UNKNOWN_SOURCE);
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2024, 3, 5, 10, 15, 30).unwrap()
                + chrono::Duration::milliseconds(250)
        );
        assert_eq!(record.level, Some(LogLevel::Error));
        assert_eq!(record.module.as_deref(), Some("app.sync"));
        assert_eq!(record.emoji, None);
        assert_eq!(record.action_tag, Some(ActionTag::Failure));
        assert_eq!(record.entity("job_id"), Some(&EntityValue::Integer(42)));
        assert_eq!(record.entity("attempt"), Some(&EntityValue::Float(2.5)));
        assert_eq!(record.severity_score, Some(85));
    }

    #[test]
    fn test_location_and_emoji() {
        let event = decode(
            r#"{"message":"🚀 server listening","raw":"[INFO] main:serve:12 🚀 server listening"}"#,
        );
        let record = LogClassifier::classify(&event, now());

        assert_eq!(record.message, "🚀 server listening");
        assert_eq!(record.raw, "[INFO] main:serve:12 🚀 server listening");
        assert_eq!(record.level, Some(LogLevel::Info));
        assert_eq!(record.module.as_deref(), Some("main"));
        assert_eq!(record.function.as_deref(), Some("serve"));
        assert_eq!(record.line_number, Some(12));
        assert_eq!(record.emoji.as_deref(), Some("🚀"));
        assert_eq!(record.action_tag, Some(ActionTag::Startup));
        assert_eq!(record.timestamp, now());
    }

    #[test]
    fn test_emoji_with_variation_selector() {
        let record = LogClassifier::classify(&StreamEvent::log("⚠️ disk almost full"), now());
        assert_eq!(record.emoji.as_deref(), Some("⚠\u{FE0F}"));
        assert_eq!(record.action_tag, Some(ActionTag::Warning));
    }

    #[test]
    fn test_traceback_frame() {
        let raw = r#"File "/srv/app/workers/mailer.py", line 88, in send_batch"#;
        let record = LogClassifier::classify(&StreamEvent::log(raw), now());
        assert_eq!(record.module.as_deref(), Some("mailer"));
        assert_eq!(record.function.as_deref(), Some("send_batch"));
        assert_eq!(record.line_number, Some(88));
        assert!(record.content_types.contains(&ContentType::Path));
    }

    #[test]
    fn test_content_type_hints() {
        let record = LogClassifier::classify(
            &StreamEvent::log(r#"payload {"a":1} sent to https://example.com/hook"#),
            now(),
        );
        assert!(record.content_types.contains(&ContentType::Json));
        assert!(record.content_types.contains(&ContentType::Url));
        assert!(!record.content_types.contains(&ContentType::Path));

        let record = LogClassifier::classify(&StreamEvent::log("wrote /var/log/app.log"), now());
        assert_eq!(record.content_types, BTreeSet::from([ContentType::Path]));
    }

    #[test]
    fn test_request_tag_beats_keywords() {
        let record = LogClassifier::classify(&StreamEvent::log("DELETE /api/users/4 200"), now());
        assert_eq!(record.action_tag, Some(ActionTag::Request));
    }

    #[test]
    fn test_empty_event_is_total() {
        let record = LogClassifier::classify(&StreamEvent::default(), now());
        assert_eq!(record.message, "");
        assert_eq!(record.source, UNKNOWN_SOURCE);
        assert_eq!(record.level, None);
        assert_eq!(record.severity_score, Some(20));
        assert!(record.entities.is_empty());
    }

    #[test]
    fn test_error_event_defaults_to_error_level() {
        let event = decode(r#"{"type":"error","message":"tail failed"}"#);
        let record = LogClassifier::classify(&event, now());
        assert_eq!(record.kind, RecordKind::Error);
        assert_eq!(record.level, Some(LogLevel::Error));
    }

    #[test]
    fn test_epoch_timestamp() {
        let event = decode(r#"{"message":"x","timestamp":1704067200}"#);
        let record = LogClassifier::classify(&event, now());
        assert_eq!(record.timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

        let record =
            LogClassifier::classify(&decode(r#"{"message":"x","timestamp":1704067200000}"#), now());
        assert_eq!(record.timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_garbage_timestamp_falls_back_to_receipt() {
        let record =
            LogClassifier::classify(&decode(r#"{"message":"x","timestamp":"yesterday"}"#), now());
        assert_eq!(record.timestamp, now());
    }

    #[test]
    fn test_multibyte_utf8_no_panic() {
        let line = "─────────────────────────────────── key=välue";
        let record = LogClassifier::classify(&StreamEvent::log(line), now());
        assert_eq!(record.entity("key"), Some(&EntityValue::Text("välue".into())));
    }
}
