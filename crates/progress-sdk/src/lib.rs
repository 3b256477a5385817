//! Progress SDK - 课程视频学习进度追踪与同步
//!
//! 本 SDK 提供了客户端侧的进度追踪能力，包括：
//! - 📼 播放状态存储：观看进度、书签、续播位置、观看历史
//! - 🎯 里程碑检测：10/25/50/75/90/100% 每个视频只触发一次
//! - ✅ 章节完成：达到阈值后本地立即生效，并广播失效通知
//! - 🔁 同步队列：按（课程、章节、视频）合并，离线持久化，恢复后节流同步
//! - 🚪 生命周期：后台立即同步，退出前有界写入
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use progress_sdk::{
//!     PlaybackTick, ProgressSDK, ProgressSDKConfig, StaticIdentityProvider, TrackingTarget,
//!     UserIdentity,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProgressSDKConfig::builder()
//!         .data_dir("/path/to/data")
//!         .api_base_url("https://learn.example.com/api")
//!         .build();
//!     let identity = Arc::new(StaticIdentityProvider::new(UserIdentity::Authenticated(
//!         "user123".into(),
//!     )));
//!
//!     let sdk = ProgressSDK::initialize(config, identity).await?;
//!
//!     let tracker = sdk.tracker();
//!     tracker.start(TrackingTarget::new("rust-101", "intro").with_chapter("ch-1"))?;
//!     tracker.on_progress(PlaybackTick::new(0.5, 300.0))?;
//!
//!     sdk.shutdown().await?;
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod error;
pub mod version;
pub mod storage;
pub mod network;
pub mod events;
pub mod sdk;
pub mod utils;
pub mod throttle;
pub mod http_client;
pub mod identity;
pub mod milestone;
pub mod playback_store;
pub mod completion;
pub mod tracker;
pub mod lifecycle;

// 重新导出核心类型，方便使用
pub use error::{ProgressSDKError, Result, TrackingError};
pub use sdk::{ProgressSDK, ProgressSDKConfig, ProgressSDKConfigBuilder, StorageBackend};
pub use http_client::{HttpClientConfig, ProgressHttpClient, ProgressRemote};
pub use events::{EventManager, SDKEvent, EventFilter, EventConfig};
pub use network::{NetworkMonitor, NetworkStatus, NetworkStatusListener};
pub use storage::{KvStore, LocalStorage, MemoryStorage};
pub use storage::queue::{
    FlushOutcome, PendingUpdate, ProgressKey, ProgressPayload, ProgressSyncQueue,
    ProgressUpdate, QueueConfig, SyncFailureReason,
};
pub use playback_store::{
    Bookmark, PlaybackStateStore, ResumePoint, StoreConfig, StoreEvent, VideoProgress,
    WatchHistoryEntry,
};
pub use milestone::{check_milestone_reached, get_next_milestone, MilestoneSet, MILESTONES};
pub use completion::{ChapterCompletionCoordinator, CompletionState};
pub use identity::{IdentityProvider, IdentityResolver, StaticIdentityProvider, UserIdentity};
pub use tracker::{PlaybackTick, ProgressTracker, ResumeSnapshot, TrackerConfig, TrackingTarget};
pub use lifecycle::{LifecycleManager, LifecycleHook, SyncLifecycleHook};
pub use throttle::{Debouncer, ReentrancyGuard, Throttle};
pub use utils::TimeFormatter;
