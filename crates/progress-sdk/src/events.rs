//! 事件系统模块 - SDK 对外广播的事件
//!
//! 功能包括：
//! - 章节完成 / 缓存失效广播（课程总进度等聚合视图据此重新计算）
//! - 里程碑触达事件
//! - 进度同步成功 / 失败事件
//! - 网络状态变化事件
//! - 事件广播和订阅机制
//!
//! `emit` 是同步且非阻塞的：广播通道满或无订阅者都不会阻塞调用方。

use crate::network::NetworkStatus;
use crate::utils::now_utc_millis;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// SDK 事件类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SDKEvent {
    /// 章节完成（缓存失效广播）
    ChapterCompleted {
        course_id: String,
        chapter_id: String,
        /// 聚合视图是否需要重新拉取服务端数据
        requires_refetch: bool,
        timestamp: i64,
    },
    /// 里程碑触达
    MilestoneReached {
        course_id: String,
        chapter_id: Option<String>,
        video_id: String,
        milestone: u8,
        timestamp: i64,
    },
    /// 单条进度同步成功
    ProgressSynced {
        course_id: String,
        chapter_id: String,
        video_id: String,
        completed: bool,
        timestamp: i64,
    },
    /// 单条进度同步失败（条目保留在队列中，下一轮重试）
    SyncFailed {
        course_id: String,
        chapter_id: String,
        video_id: String,
        error: String,
        timestamp: i64,
    },
    /// 服务端完成列表合并进本地
    CourseProgressMerged {
        course_id: String,
        added: usize,
        total_completed: usize,
        timestamp: i64,
    },
    /// 网络状态变更
    NetworkStatusChanged {
        old_status: NetworkStatus,
        new_status: NetworkStatus,
        timestamp: i64,
    },
}

impl SDKEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            SDKEvent::ChapterCompleted { .. } => "chapter_completed",
            SDKEvent::MilestoneReached { .. } => "milestone_reached",
            SDKEvent::ProgressSynced { .. } => "progress_synced",
            SDKEvent::SyncFailed { .. } => "sync_failed",
            SDKEvent::CourseProgressMerged { .. } => "course_progress_merged",
            SDKEvent::NetworkStatusChanged { .. } => "network_status_changed",
        }
    }

    /// 获取事件关联的课程ID
    pub fn course_id(&self) -> Option<&str> {
        match self {
            SDKEvent::ChapterCompleted { course_id, .. }
            | SDKEvent::MilestoneReached { course_id, .. }
            | SDKEvent::ProgressSynced { course_id, .. }
            | SDKEvent::SyncFailed { course_id, .. }
            | SDKEvent::CourseProgressMerged { course_id, .. } => Some(course_id),
            SDKEvent::NetworkStatusChanged { .. } => None,
        }
    }

    /// 获取事件时间戳
    pub fn timestamp(&self) -> i64 {
        match self {
            SDKEvent::ChapterCompleted { timestamp, .. }
            | SDKEvent::MilestoneReached { timestamp, .. }
            | SDKEvent::ProgressSynced { timestamp, .. }
            | SDKEvent::SyncFailed { timestamp, .. }
            | SDKEvent::CourseProgressMerged { timestamp, .. }
            | SDKEvent::NetworkStatusChanged { timestamp, .. } => *timestamp,
        }
    }
}

/// 事件过滤器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// 事件类型过滤器
    pub event_types: Option<Vec<String>>,
    /// 课程ID过滤器
    pub course_ids: Option<Vec<String>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加事件类型过滤
    pub fn with_event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    /// 添加课程ID过滤
    pub fn with_course_ids(mut self, course_ids: Vec<String>) -> Self {
        self.course_ids = Some(course_ids);
        self
    }

    /// 检查事件是否匹配过滤器
    pub fn matches(&self, event: &SDKEvent) -> bool {
        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        if let Some(ref course_ids) = self.course_ids {
            match event.course_id() {
                Some(course_id) => {
                    if !course_ids.iter().any(|c| c == course_id) {
                        return false;
                    }
                }
                None => return false, // 事件没有课程ID但过滤器要求有
            }
        }

        true
    }
}

/// 事件监听器类型
pub type EventListener = Arc<dyn Fn(&SDKEvent) + Send + Sync>;

/// 事件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// 广播缓冲区大小
    pub buffer_size: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { buffer_size: 256 }
    }
}

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 监听器数量
    pub listener_count: usize,
    /// 最后事件时间
    pub last_event_time: Option<i64>,
}

/// 事件管理器
pub struct EventManager {
    /// 广播发送器
    sender: broadcast::Sender<SDKEvent>,
    /// 事件监听器映射
    listeners: RwLock<HashMap<String, Vec<EventListener>>>,
    /// 事件统计
    stats: RwLock<EventStats>,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("subscribers", &self.sender.receiver_count())
            .field("stats", &*self.stats.read())
            .finish()
    }
}

impl EventManager {
    /// 创建新的事件管理器
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            sender,
            listeners: RwLock::new(HashMap::new()),
            stats: RwLock::new(EventStats::default()),
        }
    }

    /// 发布事件（不阻塞）
    pub fn emit(&self, event: SDKEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write();
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 无订阅者时 send 会失败，属正常场景（无 UI 的客户端），仅打 debug
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        // 先复制出监听器再调用，监听器内可以安全地增删监听器
        let targets: Vec<EventListener> = {
            let listeners = self.listeners.read();
            listeners
                .get(event.event_type())
                .into_iter()
                .chain(listeners.get("*"))
                .flatten()
                .cloned()
                .collect()
        };
        for listener in targets {
            listener(&event);
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<SDKEvent> {
        self.sender.subscribe()
    }

    /// 订阅特定类型的事件
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredEventReceiver {
        FilteredEventReceiver::new(self.sender.subscribe(), filter)
    }

    /// 添加事件监听器，`event_type` 为 `"*"` 时监听全部事件
    pub fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&SDKEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write();
        listeners
            .entry(event_type.to_string())
            .or_default()
            .push(Arc::new(listener));

        self.stats.write().listener_count = listeners.values().map(|v| v.len()).sum();

        info!("Added listener for event type: {}", event_type);
    }

    /// 移除所有监听器
    pub fn clear_listeners(&self) {
        self.listeners.write().clear();
        self.stats.write().listener_count = 0;
        info!("Cleared all event listeners");
    }

    /// 获取事件统计
    pub fn get_stats(&self) -> EventStats {
        self.stats.read().clone()
    }

    /// 获取活跃订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// 过滤事件接收器
pub struct FilteredEventReceiver {
    receiver: broadcast::Receiver<SDKEvent>,
    filter: EventFilter,
}

impl FilteredEventReceiver {
    pub fn new(receiver: broadcast::Receiver<SDKEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// 接收下一个匹配的事件
    pub async fn recv(&mut self) -> Result<SDKEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// 尝试接收事件（非阻塞）
    pub fn try_recv(&mut self) -> Result<SDKEvent, broadcast::error::TryRecvError> {
        loop {
            let event = self.receiver.try_recv()?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// 事件生成器 - 辅助函数
pub mod event_builders {
    use super::*;

    /// 章节完成事件
    pub fn chapter_completed(course_id: &str, chapter_id: &str, requires_refetch: bool) -> SDKEvent {
        SDKEvent::ChapterCompleted {
            course_id: course_id.to_string(),
            chapter_id: chapter_id.to_string(),
            requires_refetch,
            timestamp: now_utc_millis(),
        }
    }

    /// 里程碑事件
    pub fn milestone_reached(
        course_id: &str,
        chapter_id: Option<&str>,
        video_id: &str,
        milestone: u8,
    ) -> SDKEvent {
        SDKEvent::MilestoneReached {
            course_id: course_id.to_string(),
            chapter_id: chapter_id.map(str::to_string),
            video_id: video_id.to_string(),
            milestone,
            timestamp: now_utc_millis(),
        }
    }

    /// 同步成功事件
    pub fn progress_synced(course_id: &str, chapter_id: &str, video_id: &str, completed: bool) -> SDKEvent {
        SDKEvent::ProgressSynced {
            course_id: course_id.to_string(),
            chapter_id: chapter_id.to_string(),
            video_id: video_id.to_string(),
            completed,
            timestamp: now_utc_millis(),
        }
    }

    /// 同步失败事件
    pub fn sync_failed(course_id: &str, chapter_id: &str, video_id: &str, error: String) -> SDKEvent {
        SDKEvent::SyncFailed {
            course_id: course_id.to_string(),
            chapter_id: chapter_id.to_string(),
            video_id: video_id.to_string(),
            error,
            timestamp: now_utc_millis(),
        }
    }

    /// 服务端数据合并事件
    pub fn course_progress_merged(course_id: &str, added: usize, total_completed: usize) -> SDKEvent {
        SDKEvent::CourseProgressMerged {
            course_id: course_id.to_string(),
            added,
            total_completed,
            timestamp: now_utc_millis(),
        }
    }

    /// 网络状态变更事件
    pub fn network_status_changed(old_status: NetworkStatus, new_status: NetworkStatus) -> SDKEvent {
        SDKEvent::NetworkStatusChanged {
            old_status,
            new_status,
            timestamp: now_utc_millis(),
        }
    }
}
