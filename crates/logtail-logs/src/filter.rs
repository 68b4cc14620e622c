use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

use logtail_types::{LogLevel, LogRecord};

/// Compiled client-side filter for log records
#[derive(Clone, Debug)]
pub struct CompiledFilter {
    /// Text match against message or raw text (if any)
    regex: Option<Regex>,

    /// Log levels to include (empty = all)
    levels: HashSet<LogLevel>,
}

impl CompiledFilter {
    /// Filter matching everything
    pub fn all() -> Self {
        Self {
            regex: None,
            levels: HashSet::new(),
        }
    }

    /// Case-insensitive literal keyword match
    pub fn keyword(keyword: &str) -> Self {
        let keyword = keyword.trim();
        let mut filter = Self::all();
        if !keyword.is_empty() {
            // An escaped literal always compiles
            filter.regex = RegexBuilder::new(&regex::escape(keyword))
                .case_insensitive(true)
                .build()
                .ok();
        }
        filter
    }

    /// Case-insensitive regex match
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        let mut filter = Self::all();
        if !pattern.is_empty() {
            filter.regex = Some(RegexBuilder::new(pattern).case_insensitive(true).build()?);
        }
        Ok(filter)
    }

    /// Set log levels to filter by
    pub fn with_levels(mut self, levels: impl IntoIterator<Item = LogLevel>) -> Self {
        self.levels = levels.into_iter().collect();
        self
    }

    /// Check if a record matches this filter
    ///
    /// Records without a level never match a non-empty level allow-list.
    pub fn matches(&self, record: &LogRecord) -> bool {
        if !self.levels.is_empty() && !record.level.is_some_and(|l| self.levels.contains(&l)) {
            return false;
        }

        match &self.regex {
            Some(re) => re.is_match(&record.message) || re.is_match(&record.raw),
            None => true,
        }
    }

    /// Check if filter is empty (matches everything)
    pub fn is_empty(&self) -> bool {
        self.regex.is_none() && self.levels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use logtail_types::RecordKind;

    fn record(message: &str) -> LogRecord {
        LogRecord::new(RecordKind::Entry, "api.log", message, Utc::now())
    }

    #[test]
    fn test_keyword_is_literal_and_case_insensitive() {
        let filter = CompiledFilter::keyword("Timeout (db)");
        assert!(filter.matches(&record("query TIMEOUT (DB) after 30s")));
        assert!(!filter.matches(&record("timeout db")));
    }

    #[test]
    fn test_blank_keyword_matches_everything() {
        let filter = CompiledFilter::keyword("   ");
        assert!(filter.is_empty());
        assert!(filter.matches(&record("anything")));
    }

    #[test]
    fn test_keyword_matches_raw_text() {
        let mut r = record("short");
        r.raw = "2024-01-01 worker-7 short".into();
        assert!(CompiledFilter::keyword("worker-7").matches(&r));
    }

    #[test]
    fn test_level_filter() {
        let filter = CompiledFilter::all().with_levels([LogLevel::Error, LogLevel::Critical]);
        let mut r = record("x");
        assert!(!filter.matches(&r));

        r.level = Some(LogLevel::Error);
        assert!(filter.matches(&r));

        r.level = Some(LogLevel::Info);
        assert!(!filter.matches(&r));
    }

    #[test]
    fn test_keyword_and_levels_combine() {
        let filter = CompiledFilter::keyword("health").with_levels([LogLevel::Info]);
        let mut r = record("GET /health 200");
        assert!(!filter.matches(&r));
        r.level = Some(LogLevel::Info);
        assert!(filter.matches(&r));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(CompiledFilter::pattern("(unclosed").is_err());
        assert!(CompiledFilter::pattern("").unwrap().is_empty());
    }
}
