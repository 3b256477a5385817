//! 章节完成协调器
//!
//! 每个（课程、章节）一个状态机：`Untouched → LocallyCompleted → Synced`。
//! 进入 `LocallyCompleted` 时发出一次失效广播，广播不阻塞状态迁移。

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::events::{event_builders, EventManager};
use crate::storage::queue::ProgressSyncQueue;

/// 章节完成状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionState {
    Untouched,
    LocallyCompleted,
    Synced,
}

type ChapterKey = (String, String);

#[derive(Debug)]
pub struct ChapterCompletionCoordinator {
    states: RwLock<HashMap<ChapterKey, CompletionState>>,
    events: Arc<EventManager>,
}

impl ChapterCompletionCoordinator {
    pub fn new(events: Arc<EventManager>) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// 查询状态，未出现过的章节为 `Untouched`
    pub fn state(&self, course_id: &str, chapter_id: &str) -> CompletionState {
        self.states
            .read()
            .get(&(course_id.to_string(), chapter_id.to_string()))
            .copied()
            .unwrap_or(CompletionState::Untouched)
    }

    /// `Untouched → LocallyCompleted`
    ///
    /// 返回是否发生了迁移；已完成或已同步时为 no-op。
    pub fn mark_locally_completed(&self, course_id: &str, chapter_id: &str) -> bool {
        {
            let mut states = self.states.write();
            let state = states
                .entry((course_id.to_string(), chapter_id.to_string()))
                .or_insert(CompletionState::Untouched);
            if *state != CompletionState::Untouched {
                debug!("章节已完成，忽略重复触发: {}/{}", course_id, chapter_id);
                return false;
            }
            *state = CompletionState::LocallyCompleted;
        }

        info!("🎓 章节完成: {}/{}", course_id, chapter_id);
        self.events
            .emit(event_builders::chapter_completed(course_id, chapter_id, true));
        true
    }

    /// 完成条目被远端确认：`→ Synced`
    pub fn mark_synced(&self, course_id: &str, chapter_id: &str) -> bool {
        let mut states = self.states.write();
        let state = states
            .entry((course_id.to_string(), chapter_id.to_string()))
            .or_insert(CompletionState::Untouched);
        if *state == CompletionState::Synced {
            return false;
        }
        debug!("☁️ 章节完成已同步: {}/{}", course_id, chapter_id);
        *state = CompletionState::Synced;
        true
    }

    /// 服务端已知的完成章节直接记为 `Synced`，不广播
    pub fn seed_synced<I, S>(&self, course_id: &str, chapter_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut states = self.states.write();
        for chapter_id in chapter_ids {
            states.insert(
                (course_id.to_string(), chapter_id.into()),
                CompletionState::Synced,
            );
        }
    }

    /// 从本地持久化状态恢复已完成章节，只补 `Untouched`，不广播
    pub fn restore_local<I, S>(&self, course_id: &str, chapter_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut states = self.states.write();
        for chapter_id in chapter_ids {
            states
                .entry((course_id.to_string(), chapter_id.into()))
                .or_insert(CompletionState::LocallyCompleted);
        }
    }

    /// 订阅队列确认：完成条目被确认时迁移到 `Synced`
    pub fn bind_queue(self: &Arc<Self>, queue: &ProgressSyncQueue) {
        let coordinator: Weak<Self> = Arc::downgrade(self);
        queue.on_acknowledged(move |entry| {
            if !entry.completed {
                return;
            }
            if let Some(coordinator) = coordinator.upgrade() {
                coordinator.mark_synced(&entry.key.course_id, &entry.key.chapter_id);
            }
        });
    }

    /// 清空所有状态（用户重置）
    pub fn reset(&self) {
        self.states.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SDKEvent;
    use crate::http_client::RecordingRemote;
    use crate::network::{NetworkMonitor, NetworkStatus};
    use crate::storage::queue::{ProgressKey, ProgressUpdate, QueueConfig};
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn test_completion_is_idempotent() {
        let events = Arc::new(EventManager::new(16));
        let mut receiver = events.subscribe();
        let coordinator = ChapterCompletionCoordinator::new(events.clone());

        assert!(coordinator.mark_locally_completed("rust-101", "ch-1"));
        assert!(!coordinator.mark_locally_completed("rust-101", "ch-1"));
        assert_eq!(
            coordinator.state("rust-101", "ch-1"),
            CompletionState::LocallyCompleted
        );

        match receiver.try_recv().unwrap() {
            SDKEvent::ChapterCompleted {
                course_id,
                chapter_id,
                requires_refetch,
                ..
            } => {
                assert_eq!(course_id, "rust-101");
                assert_eq!(chapter_id, "ch-1");
                assert!(requires_refetch);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_seeded_chapters_do_not_broadcast() {
        let events = Arc::new(EventManager::new(16));
        let coordinator = ChapterCompletionCoordinator::new(events.clone());
        coordinator.seed_synced("rust-101", ["ch-1", "ch-2"]);

        assert_eq!(coordinator.state("rust-101", "ch-2"), CompletionState::Synced);
        assert!(!coordinator.mark_locally_completed("rust-101", "ch-1"));
        assert_eq!(events.get_stats().total_events, 0);
        assert_eq!(coordinator.state("rust-101", "ch-3"), CompletionState::Untouched);

        coordinator.restore_local("rust-101", ["ch-1", "ch-3"]);
        assert_eq!(coordinator.state("rust-101", "ch-1"), CompletionState::Synced);
        assert_eq!(
            coordinator.state("rust-101", "ch-3"),
            CompletionState::LocallyCompleted
        );
        assert_eq!(events.get_stats().total_events, 0);
    }

    #[tokio::test]
    async fn test_queue_ack_moves_to_synced() {
        let events = Arc::new(EventManager::new(16));
        let coordinator = Arc::new(ChapterCompletionCoordinator::new(events.clone()));
        let network = Arc::new(NetworkMonitor::new(NetworkStatus::Offline));
        let queue = ProgressSyncQueue::new(
            QueueConfig::default(),
            Arc::new(MemoryStorage::new()),
            Arc::new(RecordingRemote::new()),
            network.clone(),
            Some(events),
        );
        coordinator.bind_queue(&queue);

        coordinator.mark_locally_completed("rust-101", "ch-1");
        queue.enqueue(
            ProgressUpdate::new(ProgressKey::new("rust-101", "ch-1", "vid-1"))
                .with_progress(1.0)
                .with_completed(true),
        );
        queue.enqueue(
            ProgressUpdate::new(ProgressKey::new("rust-101", "ch-2", "vid-2")).with_progress(0.4),
        );

        network.set_status(NetworkStatus::Online);
        queue.force_flush().await;

        assert_eq!(coordinator.state("rust-101", "ch-1"), CompletionState::Synced);
        assert_eq!(coordinator.state("rust-101", "ch-2"), CompletionState::Untouched);
    }
}
