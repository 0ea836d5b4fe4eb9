//! Running slot and progress state / 运行槽位与进度状态

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Index building progress / 索引构建进度
#[derive(Debug, Clone, Serialize)]
pub struct IndexProgress {
    pub is_running: bool,
    pub is_done: bool,
    /// Datasets indexed by the current (or last) job / 已索引的数据集数
    pub dataset_count: u64,
    pub error: Option<String>,
    pub last_done_time: Option<i64>,
}

impl Default for IndexProgress {
    fn default() -> Self {
        Self {
            is_running: false,
            is_done: true,
            dataset_count: 0,
            error: None,
            last_done_time: None,
        }
    }
}

/// Index state management / 索引状态管理
///
/// `running` counts jobs holding the slot. It only moves through
/// [`IndexState::try_acquire`] (0 -> 1 compare-and-swap) and the drop of the
/// returned [`SlotGuard`], so it is either 0 or 1.
pub struct IndexState {
    running: AtomicUsize,
    dataset_count: AtomicU64,
    progress: RwLock<IndexProgress>,
    released: Notify,
}

impl IndexState {
    pub fn new() -> Self {
        Self {
            running: AtomicUsize::new(0),
            dataset_count: AtomicU64::new(0),
            progress: RwLock::new(IndexProgress::default()),
            released: Notify::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) > 0
    }

    pub fn running_count(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Take the slot if and only if it is free / 槽位空闲时占用
    pub fn try_acquire(self: &Arc<Self>) -> Option<SlotGuard> {
        self.running
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| SlotGuard {
                state: Arc::clone(self),
            })
    }

    /// Wait for the slot / 等待槽位
    ///
    /// Retries on every release notification and at least every `poll`.
    /// Returns `None` once `cancel` fires; the slot is not taken then.
    pub async fn acquire(
        self: &Arc<Self>,
        poll: Duration,
        cancel: &CancellationToken,
    ) -> Option<SlotGuard> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            // Register for the release notification before checking the slot
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(guard) = self.try_acquire() {
                return Some(guard);
            }

            tracing::debug!("Index slot busy, waiting up to {:?}", poll);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = &mut released => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    /// Resolve once no job holds the slot / 等待空闲
    pub async fn wait_idle(&self, poll: Duration) {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if !self.is_running() {
                return;
            }

            tokio::select! {
                _ = &mut released => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    pub fn start(&self) {
        self.dataset_count.store(0, Ordering::SeqCst);
        let mut progress = self.progress.write();
        progress.is_running = true;
        progress.is_done = false;
        progress.dataset_count = 0;
        progress.error = None;
    }

    pub fn increment(&self) {
        let count = self.dataset_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.progress.write().dataset_count = count;
    }

    pub fn finish(&self, error: Option<String>) {
        let mut progress = self.progress.write();
        progress.is_running = false;
        progress.is_done = error.is_none();
        progress.error = error;
        progress.last_done_time = Some(chrono::Utc::now().timestamp());
    }

    pub fn get_progress(&self) -> IndexProgress {
        self.progress.read().clone()
    }

    fn release(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.released.notify_waiters();
    }
}

impl Default for IndexState {
    fn default() -> Self {
        Self::new()
    }
}

/// Held for the duration of a job; dropping it frees the slot / 槽位守卫
pub struct SlotGuard {
    state: Arc<IndexState>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.state.release();
    }
}
