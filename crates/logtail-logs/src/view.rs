use std::collections::BTreeSet;

use chrono::{Local, TimeZone};

use logtail_types::{LogLevel, LogRecord, Tab};

use crate::buffer::{ArcLogRecord, LevelCounts, SourceBuffers};
use crate::error::Result;
use crate::filter::CompiledFilter;

/// Timestamp layout used in text transcripts, e.g. `1/1/2024, 12:00:00 AM`
const TRANSCRIPT_TIME_FORMAT: &str = "%-m/%-d/%Y, %-I:%M:%S %p";

/// One tab of the source partitioning
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TabSummary {
    pub tab: Tab,
    pub count: usize,
}

/// Read-only queries over the buffers
///
/// Nothing here mutates a bucket; every call works on a snapshot taken
/// under the buffers' read lock.
#[derive(Clone)]
pub struct LogQuery {
    buffers: SourceBuffers,
}

impl LogQuery {
    pub fn new(buffers: SourceBuffers) -> Self {
        Self { buffers }
    }

    /// Records of one tab, newest first, restricted to `levels` (if any) and
    /// to records containing `keyword` (if any)
    pub fn view(&self, tab: &Tab, levels: &[LogLevel], keyword: Option<&str>) -> Vec<ArcLogRecord> {
        let filter = keyword
            .map(CompiledFilter::keyword)
            .unwrap_or_else(CompiledFilter::all)
            .with_levels(levels.iter().copied());
        self.filtered(tab, &filter)
    }

    /// Records of one tab matching an arbitrary filter, newest first
    pub fn filtered(&self, tab: &Tab, filter: &CompiledFilter) -> Vec<ArcLogRecord> {
        let snapshot = self.buffers.snapshot(tab);
        if filter.is_empty() {
            return snapshot;
        }
        snapshot.into_iter().filter(|r| filter.matches(r)).collect()
    }

    /// Records of one tab matching a case-insensitive regex, newest first
    pub fn search(&self, tab: &Tab, pattern: &str) -> Result<Vec<ArcLogRecord>> {
        let filter = CompiledFilter::pattern(pattern)?;
        Ok(self.filtered(tab, &filter))
    }

    /// The records within `radius` positions of record `id` in the tab's
    /// newest-first view, or nothing if the record is no longer buffered
    pub fn context(&self, tab: &Tab, id: u64, radius: usize) -> Vec<ArcLogRecord> {
        let snapshot = self.buffers.snapshot(tab);
        let Some(pos) = snapshot.iter().position(|r| r.id == id) else {
            return Vec::new();
        };
        let start = pos.saturating_sub(radius);
        let end = pos.saturating_add(radius).saturating_add(1).min(snapshot.len());
        snapshot[start..end].to_vec()
    }

    /// The `all` tab followed by one tab per source holding records
    pub fn tabs(&self) -> Vec<TabSummary> {
        let mut tabs = vec![TabSummary {
            tab: Tab::All,
            count: self.buffers.len(&Tab::All),
        }];
        for source in self.buffers.sources() {
            let tab = Tab::Source(source);
            let count = self.buffers.len(&tab);
            tabs.push(TabSummary { tab, count });
        }
        tabs
    }

    pub fn len(&self, tab: &Tab) -> usize {
        self.buffers.len(tab)
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Sources with records plus sources announced by the server
    pub fn known_sources(&self) -> BTreeSet<String> {
        self.buffers.known_sources()
    }

    pub fn level_counts(&self, tab: &Tab) -> LevelCounts {
        self.buffers.level_counts(tab)
    }

    /// Transcript of the whole buffer in local time
    pub fn export_text(&self) -> String {
        self.export_text_in(&Local)
    }

    /// Transcript of the whole buffer, one `[<time>] [<KIND>] <message>` line
    /// per record, independent of any tab or filter
    pub fn export_text_in<Tz>(&self, tz: &Tz) -> String
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        self.buffers
            .snapshot(&Tab::All)
            .iter()
            .map(|r| transcript_line(r, tz))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn transcript_line<Tz>(record: &LogRecord, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!(
        "[{}] [{}] {}",
        record.timestamp.with_timezone(tz).format(TRANSCRIPT_TIME_FORMAT),
        record.kind.label(),
        record.message
    )
}
