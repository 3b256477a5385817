//! 播放状态存储
//!
//! 会话级的响应式状态：每个视频的播放进度、每门课程的已完成章节、
//! 书签、观看历史。先修改再发布，订阅者通过回调或 broadcast 通道观察变化。
//!
//! 只有持久化子集（`PersistedPlaybackState`）会写入本地存储，
//! 写入经过防抖，失败只记录日志，内存状态在本会话内始终有效。

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::storage::{keys, load_json, save_json, LocalStorage};
use crate::throttle::Debouncer;
use crate::utils::now_utc_millis;

/// 书签时间的容差（秒）
pub const BOOKMARK_TOLERANCE_SECS: f64 = 1.0;

const PERSIST_VERSION: u32 = 1;

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// 同一视频两次进度更新之间的最短间隔（毫秒）
    pub min_update_interval_ms: u64,
    /// 不满足时间间隔时，播放比例至少变化多少才接受
    pub min_progress_delta: f64,
    /// 每门课程保留的观看历史条数
    pub history_limit: usize,
    /// 持久化防抖（毫秒）
    pub persist_debounce_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            min_update_interval_ms: 5_000,
            min_progress_delta: 0.05,
            history_limit: 50,
            persist_debounce_ms: 1_000,
        }
    }
}

/// 单个视频的播放进度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoProgress {
    pub video_id: String,
    pub course_id: Option<String>,
    /// 播放比例 0.0 - 1.0
    pub played: f64,
    pub played_seconds: f64,
    /// 本视频播放到过的最远位置
    pub furthest_seconds: f64,
    pub duration: f64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub time: f64,
    pub title: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchHistoryEntry {
    pub video_id: String,
    pub played: f64,
    pub played_seconds: f64,
    pub watched_at: i64,
}

/// 续播位置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumePoint {
    pub video_id: String,
    pub time: f64,
}

/// 课程级进度
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourseProgressState {
    /// 只增不减
    pub completed_chapter_ids: BTreeSet<String>,
    pub last_accessed_at: Option<i64>,
    pub last_watched_video_id: Option<String>,
    pub resume_point: Option<ResumePoint>,
    pub watch_history: VecDeque<WatchHistoryEntry>,
    pub last_synced_at: Option<i64>,
    pub certificate_prompt_dismissed: bool,
}

/// 完整的内存状态
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackState {
    pub current_video_id: Option<String>,
    pub current_course_id: Option<String>,
    pub videos: HashMap<String, VideoProgress>,
    pub courses: HashMap<String, CourseProgressState>,
    pub bookmarks: HashMap<String, Vec<Bookmark>>,
}

/// 持久化子集（不含当前视频等临时字段）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedPlaybackState {
    pub version: u32,
    pub videos: HashMap<String, VideoProgress>,
    pub courses: HashMap<String, CourseProgressState>,
    pub bookmarks: HashMap<String, Vec<Bookmark>>,
}

/// 从完整状态提取持久化子集
pub fn persisted_subset(state: &PlaybackState) -> PersistedPlaybackState {
    PersistedPlaybackState {
        version: PERSIST_VERSION,
        videos: state.videos.clone(),
        courses: state.courses.clone(),
        bookmarks: state.bookmarks.clone(),
    }
}

/// 由持久化子集重建状态
pub fn hydrate(subset: PersistedPlaybackState) -> PlaybackState {
    let mut bookmarks = subset.bookmarks;
    for list in bookmarks.values_mut() {
        list.sort_by(|a, b| a.time.total_cmp(&b.time));
    }
    PlaybackState {
        current_video_id: None,
        current_course_id: None,
        videos: subset.videos,
        courses: subset.courses,
        bookmarks,
    }
}

/// 状态变化通知
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    CurrentVideoChanged {
        video_id: String,
        course_id: Option<String>,
    },
    ProgressUpdated {
        video_id: String,
        played: f64,
    },
    ChapterCompleted {
        course_id: String,
        chapter_id: String,
    },
    BookmarksChanged {
        video_id: String,
    },
    CourseMerged {
        course_id: String,
        added: usize,
    },
    CertificatePromptDismissed {
        course_id: String,
    },
    Reset,
}

pub type StoreListener = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

struct StoreInner {
    config: StoreConfig,
    state: RwLock<PlaybackState>,
    /// 每个视频上一次被接受的更新时刻（不持久化）
    last_accepted: Mutex<HashMap<String, Instant>>,
    storage: Arc<dyn LocalStorage>,
    listeners: RwLock<Vec<(u64, StoreListener)>>,
    next_listener_id: AtomicU64,
    channel: broadcast::Sender<StoreEvent>,
    debouncer: Debouncer,
    persist_failures: AtomicU64,
}

impl StoreInner {
    fn save(&self) -> Result<()> {
        let subset = persisted_subset(&self.state.read());
        match save_json(self.storage.as_ref(), keys::PLAYBACK_STATE, &subset) {
            Ok(()) => {
                debug!("💾 播放状态已保存");
                Ok(())
            }
            Err(e) => {
                self.persist_failures.fetch_add(1, Ordering::SeqCst);
                warn!("⚠️ 播放状态保存失败（内存状态仍有效）: {}", e);
                Err(e)
            }
        }
    }

    fn unsubscribe(&self, id: u64) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }
}

/// 订阅句柄，drop 时自动取消订阅
pub struct Subscription {
    id: u64,
    store: Weak<StoreInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// 播放状态存储
#[derive(Clone)]
pub struct PlaybackStateStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for PlaybackStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("PlaybackStateStore")
            .field("current_video_id", &state.current_video_id)
            .field("videos", &state.videos.len())
            .field("courses", &state.courses.len())
            .finish()
    }
}

impl PlaybackStateStore {
    /// 创建存储并从持久化子集恢复
    pub fn new(config: StoreConfig, storage: Arc<dyn LocalStorage>) -> Self {
        let state = match load_json::<PersistedPlaybackState>(storage.as_ref(), keys::PLAYBACK_STATE) {
            Ok(Some(subset)) => {
                info!(
                    "♻️ 恢复播放状态: {} 个视频, {} 门课程",
                    subset.videos.len(),
                    subset.courses.len()
                );
                hydrate(subset)
            }
            Ok(None) => PlaybackState::default(),
            Err(e) => {
                warn!("⚠️ 播放状态快照损坏，使用空状态: {}", e);
                PlaybackState::default()
            }
        };

        let (channel, _) = broadcast::channel(64);
        let debouncer = Debouncer::new(Duration::from_millis(config.persist_debounce_ms));
        Self {
            inner: Arc::new(StoreInner {
                config,
                state: RwLock::new(state),
                last_accepted: Mutex::new(HashMap::new()),
                storage,
                listeners: RwLock::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
                channel,
                debouncer,
                persist_failures: AtomicU64::new(0),
            }),
        }
    }

    // ========== 订阅 ==========

    /// 注册回调，返回的句柄 drop 时取消订阅
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.inner.listeners.write().push((id, Arc::new(listener)));
        Subscription {
            id,
            store: Arc::downgrade(&self.inner),
        }
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        self.inner.unsubscribe(id)
    }

    pub fn subscribe_channel(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.channel.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    fn publish(&self, event: StoreEvent) {
        let listeners: Vec<StoreListener> = self
            .inner
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&event);
        }
        let _ = self.inner.channel.send(event);
    }

    // ========== 持久化 ==========

    /// 安排一次防抖保存；没有运行时时直接保存
    fn schedule_save(&self) {
        let weak = Arc::downgrade(&self.inner);
        let scheduled = self.inner.debouncer.call(move || {
            if let Some(inner) = weak.upgrade() {
                let _ = inner.save();
            }
        });
        if !scheduled {
            let _ = self.inner.save();
        }
    }

    /// 立即保存（退出前调用）
    pub fn persist_now(&self) -> Result<()> {
        self.inner.debouncer.cancel();
        self.inner.save()
    }

    pub fn persist_failures(&self) -> u64 {
        self.inner.persist_failures.load(Ordering::SeqCst)
    }

    /// 当前状态的副本
    pub fn snapshot(&self) -> PlaybackState {
        self.inner.state.read().clone()
    }

    // ========== 变更 ==========

    /// 切换当前视频，未变化时不做任何事
    pub fn set_current_video(&self, video_id: &str, course_id: Option<&str>) -> bool {
        {
            let mut state = self.inner.state.write();
            if state.current_video_id.as_deref() == Some(video_id)
                && state.current_course_id.as_deref() == course_id
            {
                return false;
            }
            state.current_video_id = Some(video_id.to_string());
            state.current_course_id = course_id.map(str::to_string);
        }
        debug!("🎬 当前视频: {} ({:?})", video_id, course_id);
        self.publish(StoreEvent::CurrentVideoChanged {
            video_id: video_id.to_string(),
            course_id: course_id.map(str::to_string),
        });
        true
    }

    /// 更新播放进度
    ///
    /// 距离该视频上次被接受的更新不足 5 秒且播放比例变化不足 5% 时忽略。
    /// 返回是否被接受。
    pub fn update_progress(&self, video_id: &str, played: f64, played_seconds: f64, duration: f64) -> bool {
        let played = if played.is_finite() { played.clamp(0.0, 1.0) } else { 0.0 };
        let played_seconds = played_seconds.max(0.0);
        let now = Instant::now();
        let min_interval = Duration::from_millis(self.inner.config.min_update_interval_ms);

        {
            let mut state = self.inner.state.write();
            let mut last_accepted = self.inner.last_accepted.lock();

            if let (Some(previous), Some(accepted_at)) =
                (state.videos.get(video_id), last_accepted.get(video_id))
            {
                let elapsed = now.saturating_duration_since(*accepted_at);
                let delta = (played - previous.played).abs();
                if elapsed < min_interval && delta < self.inner.config.min_progress_delta {
                    return false;
                }
            }
            last_accepted.insert(video_id.to_string(), now);
            drop(last_accepted);

            let course_id = match state.videos.get(video_id).and_then(|v| v.course_id.clone()) {
                Some(course_id) => Some(course_id),
                None if state.current_video_id.as_deref() == Some(video_id) => {
                    state.current_course_id.clone()
                }
                None => None,
            };

            let timestamp = now_utc_millis();
            let furthest = state
                .videos
                .get(video_id)
                .map(|v| v.furthest_seconds)
                .unwrap_or(0.0)
                .max(played_seconds);
            state.videos.insert(
                video_id.to_string(),
                VideoProgress {
                    video_id: video_id.to_string(),
                    course_id: course_id.clone(),
                    played,
                    played_seconds,
                    furthest_seconds: furthest,
                    duration: duration.max(0.0),
                    updated_at: timestamp,
                },
            );

            match course_id {
                Some(course_id) => {
                    let limit = self.inner.config.history_limit;
                    let course = state.courses.entry(course_id).or_default();
                    course.last_accessed_at = Some(timestamp);
                    course.last_watched_video_id = Some(video_id.to_string());
                    course.resume_point = Some(ResumePoint {
                        video_id: video_id.to_string(),
                        time: played_seconds,
                    });
                    course.watch_history.push_back(WatchHistoryEntry {
                        video_id: video_id.to_string(),
                        played,
                        played_seconds,
                        watched_at: timestamp,
                    });
                    while course.watch_history.len() > limit {
                        course.watch_history.pop_front();
                    }
                }
                None => debug!("视频 {} 没有关联课程，跳过观看历史", video_id),
            }
        }

        self.schedule_save();
        self.publish(StoreEvent::ProgressUpdated {
            video_id: video_id.to_string(),
            played,
        });
        true
    }

    /// 标记章节完成；已完成时为 no-op
    pub fn mark_chapter_completed(&self, course_id: &str, chapter_id: &str) -> bool {
        {
            let mut state = self.inner.state.write();
            let resume = state.current_video_id.as_ref().and_then(|video_id| {
                state.videos.get(video_id).map(|progress| ResumePoint {
                    video_id: video_id.clone(),
                    time: progress.played_seconds,
                })
            });

            let course = state.courses.entry(course_id.to_string()).or_default();
            if course.completed_chapter_ids.contains(chapter_id) {
                return false;
            }
            course.completed_chapter_ids.insert(chapter_id.to_string());
            course.last_accessed_at = Some(now_utc_millis());
            if let Some(resume) = resume {
                course.resume_point = Some(resume);
            }
        }

        info!("✅ 本地记录章节完成: {}/{}", course_id, chapter_id);
        self.schedule_save();
        self.publish(StoreEvent::ChapterCompleted {
            course_id: course_id.to_string(),
            chapter_id: chapter_id.to_string(),
        });
        true
    }

    /// 添加书签；±1 秒内已有书签时忽略
    pub fn add_bookmark(&self, video_id: &str, time: f64, title: &str) -> bool {
        if !time.is_finite() || time < 0.0 {
            return false;
        }
        {
            let mut state = self.inner.state.write();
            let list = state.bookmarks.entry(video_id.to_string()).or_default();
            if list
                .iter()
                .any(|b| (b.time - time).abs() <= BOOKMARK_TOLERANCE_SECS)
            {
                return false;
            }
            let position = list.partition_point(|b| b.time < time);
            list.insert(
                position,
                Bookmark {
                    time,
                    title: title.to_string(),
                    created_at: now_utc_millis(),
                },
            );
        }
        self.schedule_save();
        self.publish(StoreEvent::BookmarksChanged {
            video_id: video_id.to_string(),
        });
        true
    }

    /// 删除 ±1 秒内的书签，返回删除条数
    pub fn remove_bookmark(&self, video_id: &str, time: f64) -> usize {
        let removed = {
            let mut state = self.inner.state.write();
            match state.bookmarks.get_mut(video_id) {
                Some(list) => {
                    let before = list.len();
                    list.retain(|b| (b.time - time).abs() > BOOKMARK_TOLERANCE_SECS);
                    let removed = before - list.len();
                    if list.is_empty() {
                        state.bookmarks.remove(video_id);
                    }
                    removed
                }
                None => 0,
            }
        };
        if removed > 0 {
            self.schedule_save();
            self.publish(StoreEvent::BookmarksChanged {
                video_id: video_id.to_string(),
            });
        }
        removed
    }

    /// 与服务端完成列表合并：取并集，永不删除本地已知的完成
    ///
    /// 返回新增的章节数。
    pub fn sync_with_api_data<I, S>(&self, course_id: &str, server_completed_ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let added = {
            let mut state = self.inner.state.write();
            let course = state.courses.entry(course_id.to_string()).or_default();
            let mut added = 0;
            for id in server_completed_ids {
                let id = id.as_ref().trim();
                if id.is_empty() {
                    continue;
                }
                if course.completed_chapter_ids.insert(id.to_string()) {
                    added += 1;
                }
            }
            course.last_synced_at = Some(now_utc_millis());
            added
        };

        info!("🔀 合并服务端完成列表: {} 新增 {}", course_id, added);
        self.schedule_save();
        self.publish(StoreEvent::CourseMerged {
            course_id: course_id.to_string(),
            added,
        });
        added
    }

    pub fn dismiss_certificate_prompt(&self, course_id: &str) {
        {
            let mut state = self.inner.state.write();
            let course = state.courses.entry(course_id.to_string()).or_default();
            if course.certificate_prompt_dismissed {
                return;
            }
            course.certificate_prompt_dismissed = true;
        }
        self.schedule_save();
        self.publish(StoreEvent::CertificatePromptDismissed {
            course_id: course_id.to_string(),
        });
    }

    /// 清空内存与本地存储
    pub fn reset(&self) {
        self.inner.debouncer.cancel();
        *self.inner.state.write() = PlaybackState::default();
        self.inner.last_accepted.lock().clear();
        if let Err(e) = self.inner.storage.remove(keys::PLAYBACK_STATE) {
            warn!("⚠️ 清除播放状态失败: {}", e);
        }
        info!("🧹 播放状态已重置");
        self.publish(StoreEvent::Reset);
    }

    // ========== 查询 ==========

    pub fn current_video(&self) -> Option<(String, Option<String>)> {
        let state = self.inner.state.read();
        state
            .current_video_id
            .clone()
            .map(|video_id| (video_id, state.current_course_id.clone()))
    }

    pub fn current_progress(&self, video_id: &str) -> Option<VideoProgress> {
        self.inner.state.read().videos.get(video_id).cloned()
    }

    pub fn completed_chapters(&self, course_id: &str) -> BTreeSet<String> {
        self.inner
            .state
            .read()
            .courses
            .get(course_id)
            .map(|c| c.completed_chapter_ids.clone())
            .unwrap_or_default()
    }

    pub fn is_chapter_completed(&self, course_id: &str, chapter_id: &str) -> bool {
        self.inner
            .state
            .read()
            .courses
            .get(course_id)
            .map(|c| c.completed_chapter_ids.contains(chapter_id))
            .unwrap_or(false)
    }

    pub fn bookmarks(&self, video_id: &str) -> Vec<Bookmark> {
        self.inner
            .state
            .read()
            .bookmarks
            .get(video_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn resume_point(&self, course_id: &str) -> Option<ResumePoint> {
        self.inner
            .state
            .read()
            .courses
            .get(course_id)
            .and_then(|c| c.resume_point.clone())
    }

    pub fn watch_history(&self, course_id: &str) -> Vec<WatchHistoryEntry> {
        self.inner
            .state
            .read()
            .courses
            .get(course_id)
            .map(|c| c.watch_history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 课程完成百分比（0 - 100）
    pub fn course_completion_percent(&self, course_id: &str, total_chapters: usize) -> f64 {
        if total_chapters == 0 {
            return 0.0;
        }
        let completed = self.completed_chapters(course_id).len().min(total_chapters);
        completed as f64 * 100.0 / total_chapters as f64
    }

    /// 所有章节完成且用户未关闭提示时返回 true
    pub fn needs_certificate_prompt(&self, course_id: &str, total_chapters: usize) -> bool {
        if total_chapters == 0 {
            return false;
        }
        let state = self.inner.state.read();
        match state.courses.get(course_id) {
            Some(course) => {
                !course.certificate_prompt_dismissed
                    && course.completed_chapter_ids.len() >= total_chapters
            }
            None => false,
        }
    }
}
