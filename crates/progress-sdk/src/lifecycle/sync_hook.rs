//! 进度同步生命周期 Hook
//!
//! 后台：保存播放状态并立即同步。
//! 前台：队列里还有积压时安排一次节流同步。
//! 退出：停止追踪、保存播放状态，并通过退出专用的批量接口做一次有界写入。

use crate::error::Result;
use crate::lifecycle::LifecycleHook;
use crate::playback_store::PlaybackStateStore;
use crate::storage::queue::{FlushOutcome, ProgressSyncQueue};
use crate::tracker::ProgressTracker;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub struct SyncLifecycleHook {
    queue: ProgressSyncQueue,
    store: PlaybackStateStore,
    tracker: Arc<ProgressTracker>,
}

impl SyncLifecycleHook {
    pub fn new(queue: ProgressSyncQueue, store: PlaybackStateStore, tracker: Arc<ProgressTracker>) -> Self {
        Self { queue, store, tracker }
    }

    fn persist_store(&self) {
        if let Err(e) = self.store.persist_now() {
            warn!("[Sync Hook] ⚠️ 播放状态保存失败: {}", e);
        }
    }
}

#[async_trait]
impl LifecycleHook for SyncLifecycleHook {
    async fn on_background(&self) -> Result<()> {
        self.persist_store();
        match self.queue.force_flush().await {
            FlushOutcome::Completed { succeeded, failed } => {
                info!("[Sync Hook] 切到后台，已同步 {} 条，{} 条待重试", succeeded, failed);
            }
            outcome => info!("[Sync Hook] 切到后台: {:?}", outcome),
        }
        Ok(())
    }

    async fn on_foreground(&self) -> Result<()> {
        if self.queue.pending_len() > 0 {
            info!("[Sync Hook] 回到前台，{} 条进度待同步", self.queue.pending_len());
            self.queue.schedule_flush();
        }
        Ok(())
    }

    async fn on_teardown(&self) -> Result<()> {
        self.tracker.stop();
        self.persist_store();
        let written = self.queue.flush_on_teardown().await?;
        info!("[Sync Hook] ✅ 退出前写入 {} 条进度", written);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ChapterCompletionCoordinator;
    use crate::events::EventManager;
    use crate::http_client::RecordingRemote;
    use crate::identity::{IdentityResolver, StaticIdentityProvider, UserIdentity};
    use crate::lifecycle::LifecycleManager;
    use crate::network::{NetworkMonitor, NetworkStatus};
    use crate::playback_store::StoreConfig;
    use crate::storage::queue::QueueConfig;
    use crate::storage::MemoryStorage;
    use crate::tracker::{PlaybackTick, TrackerConfig, TrackingTarget};

    #[tokio::test(start_paused = true)]
    async fn test_teardown_writes_latest_progress() {
        let storage = Arc::new(MemoryStorage::new());
        let remote = Arc::new(RecordingRemote::new());
        let network = Arc::new(NetworkMonitor::new(NetworkStatus::Offline));
        let events = Arc::new(EventManager::new(16));
        let queue = ProgressSyncQueue::new(
            QueueConfig::default(),
            storage.clone(),
            remote.clone(),
            network.clone(),
            Some(events.clone()),
        );
        let store = PlaybackStateStore::new(StoreConfig::default(), storage.clone());
        let tracker = Arc::new(ProgressTracker::new(
            TrackerConfig::default(),
            Arc::new(IdentityResolver::new(Arc::new(StaticIdentityProvider::new(
                UserIdentity::Authenticated("user-1".into()),
            )))),
            store.clone(),
            queue.clone(),
            Arc::new(ChapterCompletionCoordinator::new(events)),
            storage.clone(),
            Arc::new(EventManager::new(16)),
        ));

        let mut manager = LifecycleManager::new();
        manager.register_hook(Arc::new(SyncLifecycleHook::new(
            queue.clone(),
            store.clone(),
            tracker.clone(),
        )));

        tracker
            .start(TrackingTarget::new("rust-101", "vid-1").with_chapter("ch-1"))
            .unwrap();
        tracker.on_progress(PlaybackTick::new(0.0, 0.0)).unwrap();
        tracker.on_progress(PlaybackTick::new(0.02, 12.0)).unwrap();

        network.set_status(NetworkStatus::Online);
        manager.notify_teardown().await.unwrap();

        assert!(!tracker.is_tracking());
        let batches = remote.teardown_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].played_seconds, 12.0);
        assert_eq!(queue.pending_len(), 0);
        assert!(storage.write_count() > 0);
    }
}
