//! Log processing for logtail
//!
//! This crate turns a push stream of log events into bounded, per-source
//! buffers that survive client restarts:
//!
//! - [`LogClassifier`] parses pushed events into [`LogRecord`]s
//! - [`SourceBuffers`] keeps one bounded bucket per source plus `all`
//! - [`SessionCache`] and [`SaveScheduler`] mirror the buffers to a
//!   [`SessionStore`] with debounced writes
//! - [`LogTail`] owns all of it together with the stream session and is
//!   the control surface for the rest of an application

mod buffer;
mod cache;
mod classifier;
mod config;
mod debounce;
mod error;
mod filter;
mod session;
mod store;
mod tail;
mod view;

pub use buffer::{
    ALL_CAPACITY_FACTOR, ArcLogRecord, BufferState, DEFAULT_CAPACITY, LevelCounts, SourceBuffers,
};
pub use cache::{HISTORY_LOADED_KEY, RECORDS_KEY, SessionCache};
pub use classifier::LogClassifier;
pub use config::TailConfig;
pub use debounce::SaveScheduler;
pub use error::{LogTailError, Result};
pub use filter::CompiledFilter;
pub use session::SessionState;
pub use store::{FileStore, MemoryStore, SessionStore};
pub use tail::LogTail;
pub use view::{LogQuery, TabSummary};

// Re-export types used in our public API
pub use logtail_types::{LogLevel, LogRecord, RecordKind, StreamFilters, Tab};
