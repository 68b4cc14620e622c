use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logtail_client::{ClientError, EventStream, LogTransport};
use logtail_types::{EventType, LogRecord, StreamEvent, StreamFilters, StreamRequest};

use crate::buffer::{ArcLogRecord, SourceBuffers};
use crate::classifier::LogClassifier;
use crate::debounce::SaveScheduler;

/// Connection state of the stream session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Stopped explicitly, gave up reconnecting, or shut down
    Closed,
}

/// Connection parameters that do not change while a session runs
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub token: Option<String>,
    /// Records requested per source on the one-time backfill
    pub history_tail: u32,
    pub retry_delay: Duration,
    /// `None` retries forever
    pub max_reconnect_attempts: Option<u32>,
}

/// Requests from the control surface to the session task
pub(crate) enum Command {
    Reconnect {
        load_history: bool,
        ack: oneshot::Sender<()>,
    },
    SetFilters {
        filters: StreamFilters,
        ack: oneshot::Sender<()>,
    },
    Clear {
        source: Option<String>,
        ack: oneshot::Sender<()>,
    },
    Stop {
        ack: oneshot::Sender<()>,
    },
    Resume,
}

/// What the session loop does next
enum Next {
    Connect { load_history: bool },
    Retry,
    Wait,
    Exit,
}

/// Single consumer of the push stream and the only writer of the buffers
pub(crate) struct StreamSession<T: LogTransport> {
    pub(crate) transport: Arc<T>,
    pub(crate) config: SessionConfig,
    pub(crate) filters: StreamFilters,
    pub(crate) buffers: SourceBuffers,
    /// Mirror of the cached history flag, read once at startup
    pub(crate) history_loaded: bool,
    pub(crate) saver: SaveScheduler,
    pub(crate) paused: Arc<AtomicBool>,
    pub(crate) state: watch::Sender<SessionState>,
    pub(crate) records: broadcast::Sender<ArcLogRecord>,
    pub(crate) commands: mpsc::UnboundedReceiver<Command>,
    pub(crate) cancel: CancellationToken,
    /// Consecutive failed connections since the last successful open
    pub(crate) failures: u32,
    /// Stopped by request (or gave up); filter changes do not restart it
    pub(crate) stopped: bool,
    /// A reconnect came due while paused
    pub(crate) retry_deferred: bool,
}

impl<T: LogTransport> StreamSession<T> {
    /// Run until cancelled, connecting immediately when `initial` is set
    pub(crate) async fn run(mut self, initial: Option<bool>) {
        let mut next = match initial {
            Some(load_history) => Next::Connect { load_history },
            None => {
                self.stopped = true;
                self.set_state(SessionState::Closed);
                Next::Wait
            }
        };

        loop {
            next = match next {
                Next::Connect { load_history } => self.connect(load_history).await,
                Next::Retry => self.wait_for_retry().await,
                Next::Wait => self.wait_for_command().await,
                Next::Exit => break,
            };
        }

        self.set_state(SessionState::Closed);
        debug!("stream session ended");
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    fn build_request(&self, load_history: bool) -> StreamRequest {
        let tail = if load_history && !self.history_loaded {
            self.config.history_tail
        } else {
            0
        };
        StreamRequest {
            token: self.config.token.clone(),
            filters: self.filters.clone(),
            tail,
        }
    }

    async fn connect(&mut self, load_history: bool) -> Next {
        let request = self.build_request(load_history);
        self.set_state(SessionState::Connecting);
        debug!(tail = request.tail, "connecting to log stream");

        let transport = Arc::clone(&self.transport);
        let cancel = self.cancel.clone();
        let open = transport.open(&request);
        tokio::pin!(open);

        let opened = loop {
            tokio::select! {
                _ = cancel.cancelled() => return Next::Exit,
                result = &mut open => break result,
                Some(command) = self.commands.recv() => {
                    if let Some(next) = self.handle_command(command).await {
                        return next;
                    }
                }
            }
        };

        match opened {
            Ok(stream) => {
                info!(tail = request.tail, "log stream connected");
                self.failures = 0;
                self.set_state(SessionState::Connected);
                if request.tail > 0 {
                    self.history_loaded = true;
                    self.saver.mark_history_loaded().await;
                }
                self.consume(stream).await
            }
            Err(e) => self.disconnected(&e.to_string()),
        }
    }

    async fn consume(&mut self, mut stream: EventStream) -> Next {
        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Next::Exit,
                Some(command) = self.commands.recv() => {
                    if let Some(next) = self.handle_command(command).await {
                        return next;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(payload)) => self.handle_payload(&payload),
                    Some(Err(e)) => return self.disconnected(&e.to_string()),
                    None => return self.disconnected(&ClientError::Closed.to_string()),
                },
            }
        }
    }

    fn handle_payload(&mut self, payload: &str) {
        let event = match StreamEvent::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping malformed log event");
                return;
            }
        };

        if event.event_type == EventType::Connected {
            if let Some(sources) = event.sources {
                debug!(count = sources.len(), "server announced log sources");
                self.buffers.register_sources(sources);
            }
            return;
        }

        if self.paused.load(Ordering::SeqCst) {
            return;
        }

        self.store(LogClassifier::classify(&event, Utc::now()));
    }

    fn store(&self, record: LogRecord) {
        if let Some(record) = self.buffers.append(record) {
            // No receivers is fine
            let _ = self.records.send(record);
            self.saver.schedule_save();
        }
    }

    /// Emit the disconnect notice and decide whether to retry
    fn disconnected(&mut self, reason: &str) -> Next {
        self.failures += 1;
        let delay = self.config.retry_delay;
        let exhausted = self
            .config
            .max_reconnect_attempts
            .is_some_and(|max| self.failures > max);

        if exhausted {
            warn!(reason, failures = self.failures, "log stream lost, giving up");
            self.store(LogRecord::stream_notice(
                format!(
                    "Log stream disconnected ({reason}); giving up after {} reconnect attempts",
                    self.failures - 1
                ),
                Utc::now(),
            ));
            self.stopped = true;
            self.set_state(SessionState::Closed);
            return Next::Wait;
        }

        warn!(reason, retry_in = ?delay, "log stream lost");
        self.store(LogRecord::stream_notice(
            format!(
                "Log stream disconnected ({reason}); reconnecting in {}s",
                delay.as_secs_f64()
            ),
            Utc::now(),
        ));
        self.set_state(SessionState::Disconnected);
        Next::Retry
    }

    async fn wait_for_retry(&mut self) -> Next {
        let cancel = self.cancel.clone();
        let timer = tokio::time::sleep(self.config.retry_delay);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Next::Exit,
                _ = &mut timer => {
                    if self.paused.load(Ordering::SeqCst) {
                        debug!("reconnect deferred until resumed");
                        self.retry_deferred = true;
                        return Next::Wait;
                    }
                    // Never re-request history on automatic reconnects
                    return Next::Connect { load_history: false };
                }
                Some(command) = self.commands.recv() => {
                    if let Some(next) = self.handle_command(command).await {
                        return next;
                    }
                }
            }
        }
    }

    async fn wait_for_command(&mut self) -> Next {
        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Next::Exit,
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let Some(next) = self.handle_command(command).await {
                            return next;
                        }
                    }
                    None => return Next::Exit,
                },
            }
        }
    }

    /// Apply a control request; `Some` abandons whatever the loop was doing
    async fn handle_command(&mut self, command: Command) -> Option<Next> {
        match command {
            Command::Reconnect { load_history, ack } => {
                self.failures = 0;
                self.stopped = false;
                self.retry_deferred = false;
                let _ = ack.send(());
                Some(Next::Connect { load_history })
            }
            Command::SetFilters { filters, ack } => {
                let keyword_changed = filters.keyword() != self.filters.keyword();
                self.filters = filters;
                let _ = ack.send(());
                if keyword_changed && !self.stopped {
                    debug!("keyword changed, reconnecting");
                    self.retry_deferred = false;
                    Some(Next::Connect {
                        load_history: false,
                    })
                } else {
                    None
                }
            }
            Command::Clear { source, ack } => {
                self.buffers.clear(source.as_deref());
                if source.is_none() {
                    self.history_loaded = false;
                    self.saver.wipe().await;
                } else {
                    self.saver.schedule_save();
                }
                let _ = ack.send(());
                None
            }
            Command::Stop { ack } => {
                self.stopped = true;
                self.retry_deferred = false;
                self.set_state(SessionState::Closed);
                let _ = ack.send(());
                Some(Next::Wait)
            }
            Command::Resume => {
                if self.retry_deferred && !self.stopped {
                    self.retry_deferred = false;
                    Some(Next::Connect {
                        load_history: false,
                    })
                } else {
                    None
                }
            }
        }
    }
}
