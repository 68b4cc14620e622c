use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use logtail_types::{LogLevel, LogRecord, RecordKind, Tab};

/// Default per-source capacity
pub const DEFAULT_CAPACITY: usize = 500;

/// The aggregate bucket holds this many times the per-source capacity
pub const ALL_CAPACITY_FACTOR: usize = 3;

pub type ArcLogRecord = Arc<LogRecord>;

/// Bounded FIFO of records in arrival order
#[derive(Default)]
struct Bucket {
    records: VecDeque<ArcLogRecord>,
    capacity: usize,
}

impl Bucket {
    fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    fn push(&mut self, record: ArcLogRecord) {
        while self.records.len() >= self.capacity.max(1) {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Records ordered by timestamp descending, later arrival first on ties
    fn newest_first(&self) -> Vec<ArcLogRecord> {
        let mut records: Vec<_> = self.records.iter().cloned().collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        records
    }
}

struct Buckets {
    sources: BTreeMap<String, Bucket>,
    all: Bucket,
    /// Sources announced by the server, whether or not they have records
    announced: BTreeSet<String>,
}

impl Buckets {
    fn bucket(&self, tab: &Tab) -> Option<&Bucket> {
        match tab {
            Tab::All => Some(&self.all),
            Tab::Source(name) => self.sources.get(name),
        }
    }

    /// Rebuild the aggregate from the remaining per-source buckets
    fn rebuild_all(&mut self) {
        let mut union: Vec<ArcLogRecord> = self
            .sources
            .values()
            .flat_map(|b| b.records.iter().cloned())
            .collect();
        union.sort_by_key(|r| r.id);

        let skip = union.len().saturating_sub(self.all.capacity);
        self.all.records = union.into_iter().skip(skip).collect();
    }
}

/// Serializable form of the buffers, oldest record first in every list
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferState {
    pub buckets: BTreeMap<String, Vec<LogRecord>>,
    pub all: Vec<LogRecord>,
    pub known_sources: BTreeSet<String>,
}

impl BufferState {
    pub fn is_empty(&self) -> bool {
        self.all.is_empty() && self.buckets.values().all(Vec::is_empty)
    }
}

/// Thread-safe per-source ring buffers plus the aggregate `all` bucket
///
/// Every mutation takes the write lock once for the source bucket and the
/// aggregate together, so readers never see one updated without the other.
#[derive(Clone)]
pub struct SourceBuffers {
    inner: Arc<RwLock<Buckets>>,

    /// Per-source capacity
    capacity: usize,

    /// Next record ID
    next_id: Arc<AtomicU64>,
}

impl SourceBuffers {
    /// Create empty buffers with the given per-source capacity
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(RwLock::new(Buckets {
                sources: BTreeMap::new(),
                all: Bucket::new(capacity.saturating_mul(ALL_CAPACITY_FACTOR)),
                announced: BTreeSet::new(),
            })),
            capacity,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Rebuild buffers from persisted state, trimming to the current capacity
    pub fn from_state(state: BufferState, capacity: usize) -> Self {
        let buffers = Self::new(capacity);
        let mut max_id = 0;
        {
            let mut inner = buffers.inner.write();
            for (source, records) in state.buckets {
                let bucket = inner
                    .sources
                    .entry(source)
                    .or_insert_with(|| Bucket::new(buffers.capacity));
                for record in records {
                    max_id = max_id.max(record.id);
                    bucket.push(Arc::new(record));
                }
            }
            for record in state.all {
                max_id = max_id.max(record.id);
                inner.all.push(Arc::new(record));
            }
            inner.announced = state.known_sources;
        }
        buffers.next_id.store(max_id + 1, Ordering::SeqCst);
        buffers
    }

    /// Snapshot everything for persistence
    pub fn to_state(&self) -> BufferState {
        let inner = self.inner.read();
        let clone_all = |bucket: &Bucket| -> Vec<LogRecord> {
            bucket.records.iter().map(|r| LogRecord::clone(r)).collect()
        };
        BufferState {
            buckets: inner
                .sources
                .iter()
                .map(|(source, bucket)| (source.clone(), clone_all(bucket)))
                .collect(),
            all: clone_all(&inner.all),
            known_sources: inner.announced.clone(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn all_capacity(&self) -> usize {
        self.capacity.saturating_mul(ALL_CAPACITY_FACTOR)
    }

    /// Append a record to its source bucket and to `all`, evicting the oldest
    /// arrivals of each bucket independently
    ///
    /// `connected` records are never stored; their source is registered and
    /// `None` is returned.
    pub fn append(&self, mut record: LogRecord) -> Option<ArcLogRecord> {
        if record.kind == RecordKind::Connected {
            self.register_sources([record.source]);
            return None;
        }

        record.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = Arc::new(record);

        let mut inner = self.inner.write();
        let capacity = self.capacity;
        inner
            .sources
            .entry(record.source.clone())
            .or_insert_with(|| Bucket::new(capacity))
            .push(Arc::clone(&record));
        inner.all.push(Arc::clone(&record));

        Some(record)
    }

    /// Add sources to the known-sources registry
    pub fn register_sources<I, S>(&self, sources: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.inner.write();
        for source in sources {
            let source = source.into();
            if !source.is_empty() {
                inner.announced.insert(source);
            }
        }
    }

    /// Remove one source's records, or every record when `source` is `None`
    ///
    /// The aggregate is recomputed from what remains rather than trimmed.
    pub fn clear(&self, source: Option<&str>) {
        let mut inner = self.inner.write();
        match source {
            Some(source) => {
                inner.sources.remove(source);
                inner.rebuild_all();
            }
            None => {
                inner.sources.clear();
                inner.all.records.clear();
            }
        }
    }

    /// Read-only view of one bucket, newest first
    pub fn snapshot(&self, tab: &Tab) -> Vec<ArcLogRecord> {
        self.inner
            .read()
            .bucket(tab)
            .map(Bucket::newest_first)
            .unwrap_or_default()
    }

    /// Record count of one bucket
    pub fn len(&self, tab: &Tab) -> usize {
        self.inner
            .read()
            .bucket(tab)
            .map_or(0, |b| b.records.len())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().all.records.is_empty()
    }

    /// Sources that currently hold records, in name order
    pub fn sources(&self) -> Vec<String> {
        self.inner.read().sources.keys().cloned().collect()
    }

    /// Sources with records plus sources announced by the server
    pub fn known_sources(&self) -> BTreeSet<String> {
        let inner = self.inner.read();
        inner
            .sources
            .keys()
            .cloned()
            .chain(inner.announced.iter().cloned())
            .collect()
    }

    /// Entry count per log level for one bucket
    pub fn level_counts(&self, tab: &Tab) -> LevelCounts {
        let inner = self.inner.read();
        let mut counts = LevelCounts::default();

        for record in inner.bucket(tab).iter().flat_map(|b| b.records.iter()) {
            match record.level {
                Some(LogLevel::Debug) => counts.debug += 1,
                Some(LogLevel::Info) => counts.info += 1,
                Some(LogLevel::Warning) => counts.warning += 1,
                Some(LogLevel::Error) => counts.error += 1,
                Some(LogLevel::Critical) => counts.critical += 1,
                None => counts.unleveled += 1,
            }
        }

        counts
    }
}

/// Counts per log level
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LevelCounts {
    pub debug: usize,
    pub info: usize,
    pub warning: usize,
    pub error: usize,
    pub critical: usize,
    pub unleveled: usize,
}

impl LevelCounts {
    pub fn total(&self) -> usize {
        self.debug + self.info + self.warning + self.error + self.critical + self.unleveled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn record(source: &str, message: &str, secs: i64) -> LogRecord {
        LogRecord::new(RecordKind::Entry, source, message, at(secs))
    }

    #[test]
    fn test_capacity_evicts_oldest_arrivals() {
        let buffers = SourceBuffers::new(500);
        for i in 0..600 {
            buffers.append(record("api.log", &format!("line {i}"), i));
        }

        let bucket = buffers.snapshot(&Tab::source("api.log"));
        assert_eq!(bucket.len(), 500);
        assert!(!bucket.iter().any(|r| r.message == "line 0"));
        assert!(!bucket.iter().any(|r| r.message == "line 99"));
        assert!(bucket.iter().any(|r| r.message == "line 100"));
        assert_eq!(bucket[0].message, "line 599");

        // aggregate has its own, larger cap
        assert_eq!(buffers.len(&Tab::All), 600);
    }

    #[test]
    fn test_huge_capacity_saturates() {
        let buffers = SourceBuffers::new(usize::MAX);
        assert_eq!(buffers.all_capacity(), usize::MAX);
        buffers.append(record("api.log", "x", 0));
        assert_eq!(buffers.len(&Tab::All), 1);
    }

    #[test]
    fn test_all_capacity_is_independent() {
        let buffers = SourceBuffers::new(2);
        for (i, source) in ["a", "b", "c", "a", "b", "c", "a"].iter().enumerate() {
            buffers.append(record(source, &i.to_string(), i as i64));
        }
        assert_eq!(buffers.all_capacity(), 6);
        assert_eq!(buffers.len(&Tab::All), 6);
        assert_eq!(buffers.len(&Tab::source("a")), 2);
        let all = buffers.snapshot(&Tab::All);
        assert!(!all.iter().any(|r| r.message == "0"));
    }

    #[test]
    fn test_newest_first_with_arrival_tiebreak() {
        let buffers = SourceBuffers::new(10);
        buffers.append(record("s", "old", 1));
        buffers.append(record("s", "tie-first", 5));
        buffers.append(record("s", "tie-second", 5));
        buffers.append(record("s", "backfill", 0));

        let order: Vec<_> = buffers
            .snapshot(&Tab::source("s"))
            .iter()
            .map(|r| r.message.clone())
            .collect();
        assert_eq!(order, vec!["tie-second", "tie-first", "old", "backfill"]);
    }

    #[test]
    fn test_connected_records_are_not_stored() {
        let buffers = SourceBuffers::new(10);
        let connected = LogRecord::new(RecordKind::Connected, "worker.log", "hello", at(0));
        assert!(buffers.append(connected).is_none());
        assert!(buffers.is_empty());
        assert!(buffers.known_sources().contains("worker.log"));
    }

    #[test]
    fn test_clear_one_source_rebuilds_all() {
        let buffers = SourceBuffers::new(10);
        buffers.append(record("a", "a1", 1));
        buffers.append(record("b", "b1", 2));
        buffers.append(record("a", "a2", 3));

        buffers.clear(Some("a"));
        let all = buffers.snapshot(&Tab::All);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].message, "b1");
        assert!(buffers.snapshot(&Tab::source("a")).is_empty());

        buffers.clear(None);
        assert!(buffers.is_empty());
        assert!(buffers.sources().is_empty());
    }

    #[test]
    fn test_ids_are_sequential_and_survive_restore() {
        let buffers = SourceBuffers::new(10);
        let first = buffers.append(record("a", "x", 0)).unwrap();
        let second = buffers.append(record("a", "y", 0)).unwrap();
        assert_eq!(second.id, first.id + 1);

        let restored = SourceBuffers::from_state(buffers.to_state(), 10);
        let third = restored.append(record("a", "z", 0)).unwrap();
        assert_eq!(third.id, second.id + 1);
    }

    #[test]
    fn test_state_round_trip() {
        let buffers = SourceBuffers::new(3);
        for i in 0..5 {
            buffers.append(record(if i % 2 == 0 { "a" } else { "b" }, &i.to_string(), i));
        }
        buffers.register_sources(["idle.log"]);

        let state = buffers.to_state();
        let restored = SourceBuffers::from_state(state.clone(), 3);
        assert_eq!(restored.to_state(), state);
        assert!(restored.known_sources().contains("idle.log"));
    }

    #[test]
    fn test_restore_trims_to_smaller_capacity() {
        let buffers = SourceBuffers::new(10);
        for i in 0..8 {
            buffers.append(record("a", &i.to_string(), i));
        }
        let restored = SourceBuffers::from_state(buffers.to_state(), 2);
        let kept: Vec<_> = restored
            .snapshot(&Tab::source("a"))
            .iter()
            .map(|r| r.message.clone())
            .collect();
        assert_eq!(kept, vec!["7", "6"]);
        assert_eq!(restored.len(&Tab::All), 6);
    }

    #[test]
    fn test_level_counts() {
        let buffers = SourceBuffers::new(10);
        let mut r = record("a", "x", 0);
        r.level = Some(LogLevel::Error);
        buffers.append(r.clone());
        buffers.append(r);
        buffers.append(record("a", "y", 0));

        let counts = buffers.level_counts(&Tab::source("a"));
        assert_eq!(counts.error, 2);
        assert_eq!(counts.unleveled, 1);
        assert_eq!(counts.total(), 3);
        assert_eq!(buffers.level_counts(&Tab::source("none")).total(), 0);
    }

    proptest! {
        #[test]
        fn prop_bucket_never_exceeds_capacity(capacity in 1usize..20, n in 0usize..80) {
            let buffers = SourceBuffers::new(capacity);
            for i in 0..n {
                buffers.append(record("one", &i.to_string(), i as i64));
                prop_assert!(buffers.len(&Tab::source("one")) <= capacity);
            }

            let kept: HashSet<String> = buffers
                .snapshot(&Tab::source("one"))
                .iter()
                .map(|r| r.message.clone())
                .collect();
            let expected: HashSet<String> =
                (n.saturating_sub(capacity)..n).map(|i| i.to_string()).collect();
            prop_assert_eq!(kept, expected);
        }

        #[test]
        fn prop_clear_source_leaves_union_of_rest(
            sources in proptest::collection::vec(0usize..4, 0..40),
            cleared in 0usize..4,
        ) {
            // small enough that the union always fits in `all`
            let buffers = SourceBuffers::new(10);
            for (i, s) in sources.iter().enumerate() {
                buffers.append(record(&format!("s{s}"), &i.to_string(), (i % 7) as i64));
            }

            buffers.clear(Some(&format!("s{cleared}")));

            let mut all_ids: Vec<u64> = buffers.snapshot(&Tab::All).iter().map(|r| r.id).collect();
            let mut union_ids: Vec<u64> = buffers
                .sources()
                .iter()
                .flat_map(|s| buffers.snapshot(&Tab::source(s.as_str())))
                .map(|r| r.id)
                .collect();
            all_ids.sort_unstable();
            union_ids.sort_unstable();
            prop_assert_eq!(all_ids, union_ids);
            let cleared_source = format!("s{cleared}");
            prop_assert!(!buffers
                .snapshot(&Tab::All)
                .iter()
                .any(|r| r.source == cleared_source));
        }
    }
}
