use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::TimeZone;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use logtail_client::LogTransport;
use logtail_types::{LogLevel, StreamFilters, Tab};

use crate::buffer::{ArcLogRecord, LevelCounts, SourceBuffers};
use crate::cache::SessionCache;
use crate::config::TailConfig;
use crate::debounce::SaveScheduler;
use crate::error::{LogTailError, Result};
use crate::session::{Command, SessionState, StreamSession};
use crate::store::SessionStore;
use crate::view::{LogQuery, TabSummary};

/// Buffered records a slow subscriber may fall behind by before it lags
const RECORD_CHANNEL_CAPACITY: usize = 1024;

/// The live log tail: buffers, cache and stream session under one owner
///
/// Construction restores the cached state and spawns the session task;
/// [`LogTail::shutdown`] stops it and flushes the cache. Dropping without
/// shutting down cancels the task and flushes synchronously.
pub struct LogTail {
    query: LogQuery,
    saver: SaveScheduler,
    commands: mpsc::UnboundedSender<Command>,
    paused: Arc<AtomicBool>,
    state: watch::Receiver<SessionState>,
    records: broadcast::Sender<ArcLogRecord>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LogTail {
    /// Restore cached state and connect; must be called inside a tokio runtime
    pub fn open<T: LogTransport>(
        transport: T,
        store: Arc<dyn SessionStore>,
        config: TailConfig,
    ) -> Self {
        let load_history = config.load_history;
        Self::spawn(transport, store, config, Some(load_history))
    }

    /// Restore cached state without connecting; [`LogTail::reconnect`] starts it
    pub fn open_stopped<T: LogTransport>(
        transport: T,
        store: Arc<dyn SessionStore>,
        config: TailConfig,
    ) -> Self {
        Self::spawn(transport, store, config, None)
    }

    fn spawn<T: LogTransport>(
        transport: T,
        store: Arc<dyn SessionStore>,
        config: TailConfig,
        initial: Option<bool>,
    ) -> Self {
        let cache = SessionCache::new(store);
        let buffers = SourceBuffers::from_state(cache.restore(), config.capacity);
        let history_loaded = cache.has_history_loaded();
        info!(restored = buffers.len(&Tab::All), "log tail opened");

        let saver = SaveScheduler::spawn(
            cache,
            buffers.clone(),
            config.save_debounce(),
            config.save_max_delay(),
        );

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (records_tx, _) = broadcast::channel(RECORD_CHANNEL_CAPACITY);
        let paused = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let session = StreamSession {
            transport: Arc::new(transport),
            config: config.session_config(),
            filters: config.filters.clone(),
            buffers: buffers.clone(),
            history_loaded,
            saver: saver.clone(),
            paused: Arc::clone(&paused),
            state: state_tx,
            records: records_tx.clone(),
            commands: command_rx,
            cancel: cancel.clone(),
            failures: 0,
            stopped: false,
            retry_deferred: false,
        };
        let task = tokio::spawn(session.run(initial));

        Self {
            query: LogQuery::new(buffers),
            saver,
            commands: command_tx,
            paused,
            state: state_rx,
            records: records_tx,
            cancel,
            task: Some(task),
        }
    }

    async fn request(&self, command: impl FnOnce(oneshot::Sender<()>) -> Command) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(command(ack))
            .map_err(|_| LogTailError::ControllerGone)?;
        done.await.map_err(|_| LogTailError::ControllerGone)
    }

    // ------------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------------

    /// Keep receiving but discard incoming events
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        let _ = self.commands.send(Command::Resume);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Drop the current connection and connect again
    ///
    /// History is requested only if `load_history` is set and no backfill
    /// has been requested yet in this session.
    pub async fn reconnect(&self, load_history: bool) -> Result<()> {
        self.request(|ack| Command::Reconnect { load_history, ack })
            .await
    }

    /// Close the connection and cancel any pending reconnect; buffers and
    /// the cache are kept
    pub async fn stop(&self) -> Result<()> {
        self.request(|ack| Command::Stop { ack }).await
    }

    /// Replace the server-side filters; a keyword change reconnects
    pub async fn set_filters(&self, filters: StreamFilters) -> Result<()> {
        self.request(|ack| Command::SetFilters { filters, ack })
            .await
    }

    /// Remove every record and wipe the cache, including the history flag
    pub async fn clear(&self) -> Result<()> {
        self.request(|ack| Command::Clear { source: None, ack })
            .await
    }

    /// Remove one source's records
    pub async fn clear_source(&self, source: &str) -> Result<()> {
        let source = Some(source.to_string());
        self.request(|ack| Command::Clear { source, ack }).await
    }

    /// Stop the session task and force-flush the cache
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.saver.shutdown().await;
        info!("log tail shut down");
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Every record buffered from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ArcLogRecord> {
        self.records.subscribe()
    }

    pub fn known_sources(&self) -> BTreeSet<String> {
        self.query.known_sources()
    }

    /// A cloneable read-only handle for other readers
    pub fn query(&self) -> LogQuery {
        self.query.clone()
    }

    /// Record count of one tab
    pub fn len(&self, tab: &Tab) -> usize {
        self.query.len(tab)
    }

    pub fn is_empty(&self) -> bool {
        self.query.is_empty()
    }

    pub fn view(&self, tab: &Tab, levels: &[LogLevel], keyword: Option<&str>) -> Vec<ArcLogRecord> {
        self.query.view(tab, levels, keyword)
    }

    pub fn search(&self, tab: &Tab, pattern: &str) -> Result<Vec<ArcLogRecord>> {
        self.query.search(tab, pattern)
    }

    pub fn context(&self, tab: &Tab, id: u64, radius: usize) -> Vec<ArcLogRecord> {
        self.query.context(tab, id, radius)
    }

    pub fn tabs(&self) -> Vec<TabSummary> {
        self.query.tabs()
    }

    pub fn level_counts(&self, tab: &Tab) -> LevelCounts {
        self.query.level_counts(tab)
    }

    pub fn export_text(&self) -> String {
        self.query.export_text()
    }

    pub fn export_text_in<Tz>(&self, tz: &Tz) -> String
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        self.query.export_text_in(tz)
    }
}

impl Drop for LogTail {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.saver.abort();
        self.saver.flush_now();
    }
}
