use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::buffer::SourceBuffers;
use crate::cache::SessionCache;

struct Shared {
    cache: SessionCache,
    buffers: SourceBuffers,
    dirty: AtomicBool,
    notify: Notify,
    /// Held for every store write so a save and a wipe never interleave
    io: Mutex<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    /// Write the current buffer state if anything changed since the last write
    fn flush(&self) {
        let _io = self.io.lock();
        if self.dirty.swap(false, Ordering::SeqCst) {
            let state = self.buffers.to_state();
            trace!(records = state.all.len(), "writing cached logs");
            self.cache.save(&state);
        }
    }

    /// Drop any pending write and delete the cached entries
    fn wipe(&self) {
        let _io = self.io.lock();
        self.dirty.store(false, Ordering::SeqCst);
        self.cache.wipe();
    }

    fn mark_history_loaded(&self) {
        let _io = self.io.lock();
        self.cache.mark_history_loaded();
    }
}

/// Run a store operation on the blocking pool and wait for it
async fn off_runtime(shared: &Arc<Shared>, op: fn(&Shared)) {
    let shared = Arc::clone(shared);
    if let Err(e) = tokio::task::spawn_blocking(move || op(shared.as_ref())).await {
        warn!(error = %e, "cache write did not complete");
    }
}

/// Debounced write-through of the buffers to the session cache
///
/// Triggers within one quiet window coalesce into a single write of the
/// latest state. A continuous burst is written at least every `max_delay`.
/// Store I/O runs on the blocking pool, serialized with [`SaveScheduler::wipe`].
#[derive(Clone)]
pub struct SaveScheduler {
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl SaveScheduler {
    /// Spawn the writer task; must be called inside a tokio runtime
    pub fn spawn(
        cache: SessionCache,
        buffers: SourceBuffers,
        delay: Duration,
        max_delay: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            cache,
            buffers,
            dirty: AtomicBool::new(false),
            notify: Notify::new(),
            io: Mutex::new(()),
            task: Mutex::new(None),
        });
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(
            Arc::clone(&shared),
            cancel.clone(),
            delay,
            max_delay.max(delay),
        ));
        *shared.task.lock() = Some(task);

        Self { shared, cancel }
    }

    /// Request a write after the next quiet window
    pub fn schedule_save(&self) {
        self.shared.dirty.store(true, Ordering::SeqCst);
        self.shared.notify.notify_one();
    }

    /// Delete the cache; waits out a write already in progress, so nothing
    /// from before the call is written afterwards
    pub async fn wipe(&self) {
        off_runtime(&self.shared, Shared::wipe).await;
    }

    pub(crate) async fn mark_history_loaded(&self) {
        off_runtime(&self.shared, Shared::mark_history_loaded).await;
    }

    /// Perform any pending write on the calling thread
    pub fn flush_now(&self) {
        self.shared.flush();
    }

    pub fn has_pending(&self) -> bool {
        self.shared.dirty.load(Ordering::SeqCst)
    }

    /// Stop the writer task and force-flush a pending write
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.shared.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        off_runtime(&self.shared, Shared::flush).await;
    }

    /// Stop the writer task without waiting for it
    pub(crate) fn abort(&self) {
        self.cancel.cancel();
    }
}

async fn run(shared: Arc<Shared>, cancel: CancellationToken, delay: Duration, max_delay: Duration) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = shared.notify.notified() => {}
        }

        let deadline = Instant::now() + max_delay;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = shared.notify.notified() => {
                    if Instant::now() >= deadline {
                        break;
                    }
                }
                _ = tokio::time::sleep(delay) => break,
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        off_runtime(&shared, Shared::flush).await;
    }
}
