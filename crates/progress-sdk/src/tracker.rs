//! 进度追踪编排层
//!
//! 把播放器回调绑定到播放状态存储、里程碑检测、章节完成协调器和同步队列：
//!
//! ```text
//! 播放器 ──on_progress──▶ ProgressTracker ──▶ PlaybackStateStore
//!                              │                MilestoneSet
//!                              │                单视频断点快照（本地存储）
//!                              ├─ ≥ 阈值 ──▶ ChapterCompletionCoordinator
//!                              └─ 里程碑 / 兜底 ──▶ ProgressSyncQueue ──▶ 远端
//! ```
//!
//! 配置问题（缺少 ID、身份未知）以 `TrackingError` 返回，本次调用不追踪，
//! 每种问题只记录一次日志。

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::completion::ChapterCompletionCoordinator;
use crate::error::TrackingError;
use crate::events::{event_builders, EventManager};
use crate::identity::{IdentityResolver, ResolvedIdentity};
use crate::milestone::MilestoneSet;
use crate::playback_store::PlaybackStateStore;
use crate::storage::queue::{ProgressKey, ProgressSyncQueue, ProgressUpdate};
use crate::storage::{keys, load_json, save_json, LocalStorage};
use crate::throttle::ReentrancyGuard;
use crate::utils::{now_utc_millis, TimeFormatter};

/// 追踪配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// 章节完成阈值（百分比）
    pub completion_threshold: f64,
    /// 兜底同步：距上次同步的最长间隔（毫秒）
    pub fallback_sync_interval_ms: u64,
    /// 兜底同步：与上次发送值相比的最小变化（比例）
    pub fallback_progress_delta: f64,
    /// 章节完成的重入锁窗口（毫秒）
    pub completion_lock_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            completion_threshold: 95.0,
            fallback_sync_interval_ms: 30_000,
            fallback_progress_delta: 0.05,
            completion_lock_ms: 3_000,
        }
    }
}

/// 要追踪的视频
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingTarget {
    pub course_id: String,
    pub chapter_id: Option<String>,
    pub video_id: String,
    /// 已知时长（秒），未知时从回调推算
    pub duration: Option<f64>,
}

impl TrackingTarget {
    pub fn new(course_id: impl Into<String>, video_id: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            chapter_id: None,
            video_id: video_id.into(),
            duration: None,
        }
    }

    pub fn with_chapter(mut self, chapter_id: impl Into<String>) -> Self {
        self.chapter_id = Some(chapter_id.into());
        self
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// 播放器的一次进度回调
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackTick {
    pub played_fraction: f64,
    pub played_seconds: f64,
    pub loaded_fraction: f64,
}

impl PlaybackTick {
    pub fn new(played_fraction: f64, played_seconds: f64) -> Self {
        Self {
            played_fraction,
            played_seconds,
            loaded_fraction: played_fraction,
        }
    }
}

/// 单视频断点快照（独立于同步队列）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeSnapshot {
    /// 播放比例 0.0 - 1.0
    pub time: f64,
    pub played_seconds: f64,
    pub duration: f64,
    pub last_updated: i64,
}

/// 一次回调的处理结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    /// 播放状态存储是否接受了这次更新
    pub accepted: bool,
    /// 本次新触达的里程碑
    pub milestones: Vec<u8>,
    /// 本次是否触发了章节完成
    pub completed: bool,
    /// 本次是否入队同步
    pub enqueued: bool,
}

pub type MilestoneCallback = Arc<dyn Fn(u8) + Send + Sync>;

#[derive(Debug)]
struct Session {
    target: TrackingTarget,
    identity: ResolvedIdentity,
    milestones: MilestoneSet,
    duration: f64,
    last_sync_at: Option<Instant>,
    last_sent_fraction: Option<f64>,
    last_tick: Option<PlaybackTick>,
    completion_fired: bool,
}

impl Session {
    fn key(&self) -> Option<ProgressKey> {
        self.target.chapter_id.as_ref().map(|chapter_id| {
            ProgressKey::new(
                self.target.course_id.clone(),
                chapter_id.clone(),
                self.target.video_id.clone(),
            )
        })
    }

    fn snapshot_key(&self) -> String {
        keys::scoped(keys::VIDEO_PROGRESS_SCOPE, &self.identity.id, &self.target.video_id)
    }
}

/// 完成协议需要的上下文（在会话锁外执行）
struct CompletionContext {
    course_id: String,
    chapter_id: String,
    video_id: String,
    user_id: String,
    played_seconds: f64,
    duration: f64,
}

pub struct ProgressTracker {
    config: TrackerConfig,
    identity: Arc<IdentityResolver>,
    store: PlaybackStateStore,
    queue: ProgressSyncQueue,
    coordinator: Arc<ChapterCompletionCoordinator>,
    storage: Arc<dyn LocalStorage>,
    events: Arc<EventManager>,
    completion_lock: ReentrancyGuard,
    session: Mutex<Option<Session>>,
    reported: Mutex<HashSet<&'static str>>,
    milestone_callback: RwLock<Option<MilestoneCallback>>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("config", &self.config)
            .field("session", &*self.session.lock())
            .finish()
    }
}

impl ProgressTracker {
    pub fn new(
        config: TrackerConfig,
        identity: Arc<IdentityResolver>,
        store: PlaybackStateStore,
        queue: ProgressSyncQueue,
        coordinator: Arc<ChapterCompletionCoordinator>,
        storage: Arc<dyn LocalStorage>,
        events: Arc<EventManager>,
    ) -> Self {
        let completion_lock = ReentrancyGuard::new(Duration::from_millis(config.completion_lock_ms));
        Self {
            config,
            identity,
            store,
            queue,
            coordinator,
            storage,
            events,
            completion_lock,
            session: Mutex::new(None),
            reported: Mutex::new(HashSet::new()),
            milestone_callback: RwLock::new(None),
        }
    }

    /// 设置里程碑回调（参数为百分比）
    pub fn on_milestone<F>(&self, callback: F)
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        *self.milestone_callback.write() = Some(Arc::new(callback));
    }

    /// 开始追踪一个视频，返回该视频的断点快照（如果有）
    pub fn start(&self, target: TrackingTarget) -> Result<Option<ResumeSnapshot>, TrackingError> {
        if target.course_id.trim().is_empty() {
            return Err(self.report(TrackingError::MissingCourseId));
        }
        if target.video_id.trim().is_empty() {
            return Err(self.report(TrackingError::MissingVideoId));
        }
        let identity = self.identity.resolve().map_err(|e| self.report(e))?;

        let mut milestones = MilestoneSet::new();
        milestones.reset_for(&format!("{}:{}", target.course_id, target.video_id));

        let session = Session {
            duration: target.duration.unwrap_or(0.0).max(0.0),
            target,
            identity,
            milestones,
            last_sync_at: None,
            last_sent_fraction: None,
            last_tick: None,
            completion_fired: false,
        };

        let resume = match load_json::<ResumeSnapshot>(self.storage.as_ref(), &session.snapshot_key()) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("⚠️ 断点快照损坏，忽略: {}", e);
                None
            }
        };

        if let Some(snapshot) = &resume {
            debug!(
                "⏯️ 断点位置 {}",
                TimeFormatter::format_playback_position(snapshot.played_seconds)
            );
        }
        self.store
            .set_current_video(&session.target.video_id, Some(&session.target.course_id));
        info!(
            "▶️ 开始追踪: {}/{} (identity guest={})",
            session.target.course_id, session.target.video_id, session.identity.is_guest
        );
        *self.session.lock() = Some(session);
        Ok(resume)
    }

    /// 处理一次播放进度回调
    pub fn on_progress(&self, tick: PlaybackTick) -> Result<TickOutcome, TrackingError> {
        let fraction = if tick.played_fraction.is_finite() {
            tick.played_fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let played_seconds = tick.played_seconds.max(0.0);
        let percent = fraction * 100.0;
        let now = Instant::now();

        let mut session_guard = self.session.lock();
        let session = match session_guard.as_mut() {
            Some(session) => session,
            None => return Err(self.report(TrackingError::NotTracking)),
        };

        if session.target.duration.is_none() && fraction > 0.0 {
            session.duration = played_seconds / fraction;
        }
        session.last_tick = Some(tick);

        let course_id = session.target.course_id.clone();
        let video_id = session.target.video_id.clone();
        let chapter_id = session.target.chapter_id.clone();
        let duration = session.duration;
        let snapshot_key = session.snapshot_key();
        let user_id = session.identity.id.clone();

        let milestones = session.milestones.detect(percent);

        let mut completion = None;
        let mut missing_chapter = false;
        if percent >= self.config.completion_threshold && !session.completion_fired {
            match &chapter_id {
                Some(chapter_id) => {
                    session.completion_fired = true;
                    completion = Some(CompletionContext {
                        course_id: course_id.clone(),
                        chapter_id: chapter_id.clone(),
                        video_id: video_id.clone(),
                        user_id: user_id.clone(),
                        played_seconds,
                        duration,
                    });
                }
                None => missing_chapter = true,
            }
        }

        let fallback_due = match (session.last_sync_at, session.last_sent_fraction) {
            (Some(last_sync), Some(last_sent)) => {
                now.saturating_duration_since(last_sync)
                    >= Duration::from_millis(self.config.fallback_sync_interval_ms)
                    || (fraction - last_sent).abs() >= self.config.fallback_progress_delta
            }
            _ => true,
        };
        let sync_key = session.key();
        let should_sync = sync_key.is_some() && (!milestones.is_empty() || fallback_due);
        if should_sync {
            session.last_sync_at = Some(now);
            session.last_sent_fraction = Some(fraction);
        }
        drop(session_guard);

        let accepted = self
            .store
            .update_progress(&video_id, fraction, played_seconds, duration);

        let snapshot = ResumeSnapshot {
            time: fraction,
            played_seconds,
            duration,
            last_updated: now_utc_millis(),
        };
        if let Err(e) = save_json(self.storage.as_ref(), &snapshot_key, &snapshot) {
            warn!("⚠️ 断点快照写入失败: {}", e);
        }

        if !milestones.is_empty() {
            let callback = self.milestone_callback.read().clone();
            for milestone in &milestones {
                debug!("🏁 里程碑 {}%: {}/{}", milestone, course_id, video_id);
                if let Some(callback) = &callback {
                    callback(*milestone);
                }
                self.events.emit(event_builders::milestone_reached(
                    &course_id,
                    chapter_id.as_deref(),
                    &video_id,
                    *milestone,
                ));
            }
        }

        if missing_chapter {
            self.report(TrackingError::MissingChapterId);
        }

        let mut enqueued = false;
        if let Some(key) = sync_key.filter(|_| should_sync) {
            self.queue.enqueue(
                ProgressUpdate::new(key)
                    .with_progress(fraction)
                    .with_played_seconds(played_seconds)
                    .with_duration(duration)
                    .with_user_id(user_id),
            );
            enqueued = true;
        }

        let completed = match completion {
            Some(context) => self.complete_chapter(context),
            None => false,
        };

        Ok(TickOutcome {
            accepted,
            milestones,
            completed,
            enqueued: enqueued || completed,
        })
    }

    /// 播放结束
    pub fn on_ended(&self) -> Result<bool, TrackingError> {
        debug!("⏹️ 播放结束");
        self.mark_complete()
    }

    /// 显式标记当前章节完成
    pub fn mark_complete(&self) -> Result<bool, TrackingError> {
        let context = {
            let mut session_guard = self.session.lock();
            let session = match session_guard.as_mut() {
                Some(session) => session,
                None => return Err(self.report(TrackingError::NotTracking)),
            };
            let chapter_id = match &session.target.chapter_id {
                Some(chapter_id) => chapter_id.clone(),
                None => return Err(self.report(TrackingError::MissingChapterId)),
            };
            session.completion_fired = true;
            let duration = session.duration;
            let played_seconds = session
                .last_tick
                .map(|tick| tick.played_seconds)
                .unwrap_or(duration)
                .max(duration);
            CompletionContext {
                course_id: session.target.course_id.clone(),
                chapter_id,
                video_id: session.target.video_id.clone(),
                user_id: session.identity.id.clone(),
                played_seconds,
                duration,
            }
        };
        Ok(self.complete_chapter(context))
    }

    /// 停止追踪，未发送的最新进度入队
    pub fn stop(&self) {
        let session = match self.session.lock().take() {
            Some(session) => session,
            None => return,
        };
        if let (Some(key), Some(tick)) = (session.key(), session.last_tick) {
            let fraction = tick.played_fraction.clamp(0.0, 1.0);
            if session.last_sent_fraction != Some(fraction) {
                self.queue.enqueue(
                    ProgressUpdate::new(key)
                        .with_progress(fraction)
                        .with_played_seconds(tick.played_seconds.max(0.0))
                        .with_duration(session.duration)
                        .with_user_id(session.identity.id.clone()),
                );
            }
        }
        info!("⏸️ 停止追踪: {}/{}", session.target.course_id, session.target.video_id);
    }

    pub fn is_tracking(&self) -> bool {
        self.session.lock().is_some()
    }

    pub fn current_target(&self) -> Option<TrackingTarget> {
        self.session.lock().as_ref().map(|s| s.target.clone())
    }

    /// 已经报告过的配置问题
    pub fn reported_conditions(&self) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = self.reported.lock().iter().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// 章节完成协议：重入锁 → 本地状态 → 协调器 → 入队完成条目 → 立即同步
    fn complete_chapter(&self, context: CompletionContext) -> bool {
        let lock_key = format!("{}:{}", context.course_id, context.chapter_id);
        if !self.completion_lock.try_acquire(&lock_key) {
            return false;
        }

        self.store
            .mark_chapter_completed(&context.course_id, &context.chapter_id);
        if !self
            .coordinator
            .mark_locally_completed(&context.course_id, &context.chapter_id)
        {
            return false;
        }

        self.queue.enqueue(
            ProgressUpdate::new(ProgressKey::new(
                context.course_id,
                context.chapter_id,
                context.video_id,
            ))
            .with_progress(1.0)
            .with_played_seconds(context.played_seconds)
            .with_duration(context.duration)
            .with_completed(true)
            .with_user_id(context.user_id),
        );

        if let Ok(handle) = Handle::try_current() {
            let queue = self.queue.clone();
            handle.spawn(async move {
                queue.force_flush().await;
            });
        }
        true
    }

    /// 每种配置问题只记录一次
    fn report(&self, error: TrackingError) -> TrackingError {
        if self.reported.lock().insert(error.kind()) {
            warn!("⚠️ 追踪已跳过: {}", error);
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionState;
    use crate::http_client::RecordingRemote;
    use crate::identity::{StaticIdentityProvider, UserIdentity};
    use crate::network::{NetworkMonitor, NetworkStatus};
    use crate::playback_store::StoreConfig;
    use crate::storage::queue::QueueConfig;
    use crate::storage::MemoryStorage;

    struct Harness {
        storage: Arc<MemoryStorage>,
        provider: Arc<StaticIdentityProvider>,
        events: Arc<EventManager>,
        queue: ProgressSyncQueue,
        store: PlaybackStateStore,
        coordinator: Arc<ChapterCompletionCoordinator>,
        tracker: ProgressTracker,
    }

    fn harness_with(storage: Arc<MemoryStorage>, identity: UserIdentity) -> Harness {
        let provider = Arc::new(StaticIdentityProvider::new(identity));
        let resolver = Arc::new(IdentityResolver::new(provider.clone()));
        let events = Arc::new(EventManager::new(64));
        let queue = ProgressSyncQueue::new(
            QueueConfig::default(),
            storage.clone(),
            Arc::new(RecordingRemote::new()),
            Arc::new(NetworkMonitor::new(NetworkStatus::Offline)),
            Some(events.clone()),
        );
        let store = PlaybackStateStore::new(StoreConfig::default(), storage.clone());
        let coordinator = Arc::new(ChapterCompletionCoordinator::new(events.clone()));
        let tracker = ProgressTracker::new(
            TrackerConfig::default(),
            resolver,
            store.clone(),
            queue.clone(),
            coordinator.clone(),
            storage.clone(),
            events.clone(),
        );
        Harness {
            storage,
            provider,
            events,
            queue,
            store,
            coordinator,
            tracker,
        }
    }

    fn harness() -> Harness {
        harness_with(
            Arc::new(MemoryStorage::new()),
            UserIdentity::Authenticated("user-1".into()),
        )
    }

    fn chapter_events(events: &EventManager) -> u64 {
        events
            .get_stats()
            .events_by_type
            .get("chapter_completed")
            .copied()
            .unwrap_or(0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_six_hundred_second_video() {
        let h = harness();
        let fired = Arc::new(Mutex::new(Vec::new()));
        {
            let fired = fired.clone();
            h.tracker.on_milestone(move |m| fired.lock().push(m));
        }

        h.tracker
            .start(
                TrackingTarget::new("rust-101", "vid-1")
                    .with_chapter("ch-1")
                    .with_duration(600.0),
            )
            .unwrap();

        let mut previous = 0.0;
        let mut completions = 0;
        for seconds in [0.0, 60.0, 150.0, 300.0, 450.0, 540.0, 580.0] {
            tokio::time::advance(Duration::from_secs_f64(seconds - previous)).await;
            previous = seconds;
            let outcome = h
                .tracker
                .on_progress(PlaybackTick::new(seconds / 600.0, seconds))
                .unwrap();
            if outcome.completed {
                completions += 1;
                assert_eq!(seconds, 580.0);
            }
        }

        assert_eq!(*fired.lock(), vec![10, 25, 50, 75, 90]);
        assert_eq!(completions, 1);
        assert_eq!(chapter_events(&h.events), 1);

        let pending = h.queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key.chapter_id, "ch-1");
        assert!(pending[0].completed);
        assert_eq!(pending[0].user_id, "user-1");

        assert!(h.store.is_chapter_completed("rust-101", "ch-1"));
        assert_eq!(
            h.coordinator.state("rust-101", "ch-1"),
            CompletionState::LocallyCompleted
        );

        // 越过阈值后的回调不会再次触发完成
        let outcome = h.tracker.on_progress(PlaybackTick::new(0.99, 594.0)).unwrap();
        assert!(!outcome.completed);
        assert_eq!(chapter_events(&h.events), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_sync() {
        let h = harness();
        h.tracker
            .start(TrackingTarget::new("rust-101", "vid-1").with_chapter("ch-1"))
            .unwrap();
        let enqueued = || h.queue.stats().enqueued;

        assert!(h.tracker.on_progress(PlaybackTick::new(0.0, 0.0)).unwrap().enqueued);
        assert_eq!(enqueued(), 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!h.tracker.on_progress(PlaybackTick::new(0.02, 12.0)).unwrap().enqueued);

        tokio::time::advance(Duration::from_secs(25)).await;
        assert!(h.tracker.on_progress(PlaybackTick::new(0.03, 18.0)).unwrap().enqueued);

        // 里程碑总是入队
        let outcome = h.tracker.on_progress(PlaybackTick::new(0.09, 54.0)).unwrap();
        assert_eq!(outcome.milestones, vec![10]);
        assert!(outcome.enqueued);

        assert!(!h.tracker.on_progress(PlaybackTick::new(0.13, 78.0)).unwrap().enqueued);
        assert!(h.tracker.on_progress(PlaybackTick::new(0.15, 90.0)).unwrap().enqueued);
        assert_eq!(enqueued(), 4);
        assert_eq!(h.queue.pending_len(), 1);
    }

    #[test]
    fn test_configuration_errors_disable_tracking() {
        let h = harness();
        assert_eq!(
            h.tracker.start(TrackingTarget::new("", "vid-1")),
            Err(TrackingError::MissingCourseId)
        );
        assert_eq!(
            h.tracker.start(TrackingTarget::new("", "vid-1")),
            Err(TrackingError::MissingCourseId)
        );
        assert_eq!(
            h.tracker.on_progress(PlaybackTick::new(0.5, 30.0)),
            Err(TrackingError::NotTracking)
        );

        h.provider.set(UserIdentity::Loading);
        assert_eq!(
            h.tracker.start(TrackingTarget::new("rust-101", "vid-1")),
            Err(TrackingError::MissingIdentity)
        );
        assert!(!h.tracker.is_tracking());
        assert_eq!(
            h.tracker.reported_conditions(),
            vec!["missing_course_id", "missing_identity", "not_tracking"]
        );
    }

    #[tokio::test]
    async fn test_threshold_without_chapter_is_reported() {
        let h = harness();
        h.tracker
            .start(TrackingTarget::new("rust-101", "vid-1").with_duration(600.0))
            .unwrap();

        let outcome = h.tracker.on_progress(PlaybackTick::new(0.97, 582.0)).unwrap();
        assert!(!outcome.completed);
        assert!(!outcome.enqueued);
        assert_eq!(h.tracker.mark_complete(), Err(TrackingError::MissingChapterId));
        assert_eq!(h.tracker.reported_conditions(), vec!["missing_chapter_id"]);
        assert_eq!(h.queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_mark_complete_is_idempotent() {
        let h = harness();
        h.tracker
            .start(
                TrackingTarget::new("rust-101", "vid-1")
                    .with_chapter("ch-1")
                    .with_duration(600.0),
            )
            .unwrap();

        assert_eq!(h.tracker.mark_complete(), Ok(true));
        assert_eq!(h.tracker.mark_complete(), Ok(false));
        assert_eq!(h.tracker.on_ended(), Ok(false));
        assert_eq!(chapter_events(&h.events), 1);

        let pending = h.queue.pending();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].completed);
        assert_eq!(pending[0].played_seconds, 600.0);
    }

    #[tokio::test]
    async fn test_guest_resume_snapshot() {
        let storage = Arc::new(MemoryStorage::new());
        let h = harness_with(storage.clone(), UserIdentity::Anonymous);
        let target = TrackingTarget::new("rust-101", "vid-1").with_chapter("ch-1");

        assert_eq!(h.tracker.start(target.clone()).unwrap(), None);
        h.tracker.on_progress(PlaybackTick::new(0.4, 240.0)).unwrap();

        let keys = h
            .storage
            .keys_with_prefix(keys::VIDEO_PROGRESS_SCOPE)
            .unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with("video-progress-guest_"));
        assert!(keys[0].ends_with("-vid-1"));

        // 同一会话内重新开始同一个视频
        h.tracker.stop();
        let resume = h.tracker.start(target).unwrap().unwrap();
        assert_eq!(resume.played_seconds, 240.0);
        assert_eq!(resume.duration, 600.0);
    }

    #[tokio::test]
    async fn test_video_change_resets_milestones() {
        let h = harness();
        let fired = Arc::new(Mutex::new(Vec::new()));
        {
            let fired = fired.clone();
            h.tracker.on_milestone(move |m| fired.lock().push(m));
        }

        h.tracker
            .start(TrackingTarget::new("rust-101", "vid-1").with_chapter("ch-1"))
            .unwrap();
        h.tracker.on_progress(PlaybackTick::new(0.5, 300.0)).unwrap();
        h.tracker.on_progress(PlaybackTick::new(0.5, 300.0)).unwrap();

        h.tracker
            .start(TrackingTarget::new("rust-101", "vid-2").with_chapter("ch-2"))
            .unwrap();
        h.tracker.on_progress(PlaybackTick::new(0.51, 306.0)).unwrap();

        assert_eq!(*fired.lock(), vec![50, 50]);
        assert_eq!(h.store.current_video(), Some(("vid-2".into(), Some("rust-101".into()))));
    }
}
