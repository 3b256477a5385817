//! 统一 SDK 接口 - ProgressSDK 主入口
//!
//! 分层架构设计：
//! ```text
//! ProgressSDK (组合根)
//!   ├── LocalStorage (存储层：sled / 内存)
//!   ├── NetworkMonitor (网络监控层)
//!   ├── EventManager (事件系统层)
//!   ├── ProgressRemote (远端接口层)
//!   ├── ProgressSyncQueue / PlaybackStateStore (状态层)
//!   ├── ChapterCompletionCoordinator (完成协调)
//!   ├── ProgressTracker (编排层)
//!   └── LifecycleManager (生命周期)
//! ```
//!
//! 每个会话每种服务只有一个实例，全部在 `initialize` 中显式构造并注入。

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::completion::ChapterCompletionCoordinator;
use crate::error::{ProgressSDKError, Result};
use crate::events::{event_builders, EventConfig, EventManager};
use crate::http_client::{HttpClientConfig, ProgressHttpClient, ProgressRemote};
use crate::identity::{IdentityProvider, IdentityResolver};
use crate::lifecycle::{LifecycleManager, SyncLifecycleHook};
use crate::network::{NetworkMonitor, NetworkStatus, NetworkStatusListener};
use crate::playback_store::{PlaybackStateStore, StoreConfig};
use crate::storage::queue::{ProgressSyncQueue, QueueConfig};
use crate::storage::{KvStore, LocalStorage, MemoryStorage};
use crate::tracker::{ProgressTracker, TrackerConfig};

/// 本地存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageBackend {
    /// sled 持久化（`{data_dir}/kv`）
    Sled,
    /// 纯内存，进程结束即丢失
    Memory,
}

/// Progress SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSDKConfig {
    /// 数据存储目录
    pub data_dir: PathBuf,
    /// 存储命名空间（对应浏览器 profile）
    pub profile: String,
    pub storage_backend: StorageBackend,
    /// 启动时假定的网络状态，平台监听器绑定后会被覆盖
    pub initial_network_status: NetworkStatus,
    pub http_client_config: HttpClientConfig,
    pub queue_config: QueueConfig,
    pub store_config: StoreConfig,
    pub tracker_config: TrackerConfig,
    pub event_config: EventConfig,
    /// 调试模式
    pub debug_mode: bool,
}

impl Default for ProgressSDKConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./progress_data"),
            profile: "default".to_string(),
            storage_backend: StorageBackend::Sled,
            initial_network_status: NetworkStatus::Online,
            http_client_config: HttpClientConfig::default(),
            queue_config: QueueConfig::default(),
            store_config: StoreConfig::default(),
            tracker_config: TrackerConfig::default(),
            event_config: EventConfig::default(),
            debug_mode: false,
        }
    }
}

/// Progress SDK 配置构建器
pub struct ProgressSDKConfigBuilder {
    config: ProgressSDKConfig,
}

impl ProgressSDKConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ProgressSDKConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn profile<S: Into<String>>(mut self, profile: S) -> Self {
        self.config.profile = profile.into();
        self
    }

    pub fn storage_backend(mut self, backend: StorageBackend) -> Self {
        self.config.storage_backend = backend;
        self
    }

    /// 使用内存存储（测试 / 临时会话）
    pub fn in_memory(self) -> Self {
        self.storage_backend(StorageBackend::Memory)
    }

    pub fn initial_network_status(mut self, status: NetworkStatus) -> Self {
        self.config.initial_network_status = status;
        self
    }

    /// 设置进度 API 基础地址
    pub fn api_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.http_client_config.base_url = url.into();
        self
    }

    pub fn auth_token<S: Into<String>>(mut self, token: S) -> Self {
        self.config.http_client_config.auth_token = Some(token.into());
        self
    }

    pub fn http_client_config(mut self, config: HttpClientConfig) -> Self {
        self.config.http_client_config = config;
        self
    }

    pub fn queue_config(mut self, config: QueueConfig) -> Self {
        self.config.queue_config = config;
        self
    }

    pub fn store_config(mut self, config: StoreConfig) -> Self {
        self.config.store_config = config;
        self
    }

    pub fn tracker_config(mut self, config: TrackerConfig) -> Self {
        self.config.tracker_config = config;
        self
    }

    pub fn event_config(mut self, config: EventConfig) -> Self {
        self.config.event_config = config;
        self
    }

    /// 完成阈值（百分比）
    pub fn completion_threshold(mut self, percent: f64) -> Self {
        self.config.tracker_config.completion_threshold = percent;
        self
    }

    /// flush 节流间隔（毫秒）
    pub fn flush_interval_ms(mut self, interval: u64) -> Self {
        self.config.queue_config.flush_interval_ms = interval;
        self
    }

    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.config.debug_mode = enabled;
        self
    }

    pub fn build(self) -> ProgressSDKConfig {
        self.config
    }
}

impl Default for ProgressSDKConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSDKConfig {
    pub fn builder() -> ProgressSDKConfigBuilder {
        ProgressSDKConfigBuilder::new()
    }
}

/// 统一 SDK 主接口
pub struct ProgressSDK {
    config: ProgressSDKConfig,
    storage: Arc<dyn LocalStorage>,
    /// sled 后端时持有，用于关闭前刷盘
    kv: Option<Arc<KvStore>>,
    network: Arc<NetworkMonitor>,
    event_manager: Arc<EventManager>,
    remote: Arc<dyn ProgressRemote>,
    identity: Arc<IdentityResolver>,
    queue: ProgressSyncQueue,
    store: PlaybackStateStore,
    coordinator: Arc<ChapterCompletionCoordinator>,
    tracker: Arc<ProgressTracker>,
    lifecycle_manager: Arc<tokio::sync::RwLock<LifecycleManager>>,
    shutdown_token: CancellationToken,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    initialized: AtomicBool,
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for ProgressSDK {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSDK")
            .field("profile", &self.config.profile)
            .field("storage_backend", &self.config.storage_backend)
            .field("network", &self.network.get_status())
            .field("queue", &self.queue)
            .finish()
    }
}

impl ProgressSDK {
    /// 异步初始化 SDK，使用 HTTP 远端
    pub async fn initialize(
        config: ProgressSDKConfig,
        identity_provider: Arc<dyn IdentityProvider>,
    ) -> Result<Arc<Self>> {
        let remote = Arc::new(ProgressHttpClient::new(&config.http_client_config)?);
        Self::initialize_with_remote(config, identity_provider, remote).await
    }

    /// 异步初始化 SDK，使用自定义远端
    ///
    /// 分层初始化顺序：
    /// 1. 存储层 → 2. 网络层 → 3. 事件层 → 4. 状态层 → 5. 编排层 → 6. 生命周期
    pub async fn initialize_with_remote(
        config: ProgressSDKConfig,
        identity_provider: Arc<dyn IdentityProvider>,
        remote: Arc<dyn ProgressRemote>,
    ) -> Result<Arc<Self>> {
        info!(
            "正在初始化 ProgressSDK {} (git {}, 构建于 {}) ...",
            crate::version::SDK_VERSION,
            crate::version::GIT_SHA,
            crate::version::BUILD_TIME
        );
        Self::validate_config(&config)?;

        // === 第1层：本地存储 ===
        let (storage, kv): (Arc<dyn LocalStorage>, Option<Arc<KvStore>>) = match config.storage_backend {
            StorageBackend::Sled => {
                let kv = Arc::new(KvStore::new(&config.data_dir, &config.profile).await?);
                (kv.clone() as Arc<dyn LocalStorage>, Some(kv))
            }
            StorageBackend::Memory => {
                info!("ℹ️ 使用内存存储，进度不会跨进程保留");
                (Arc::new(MemoryStorage::new()) as Arc<dyn LocalStorage>, None)
            }
        };

        // === 第2层：网络监控 ===
        let network = Arc::new(NetworkMonitor::new(config.initial_network_status));

        // === 第3层：事件管理器 ===
        let event_manager = Arc::new(EventManager::new(config.event_config.buffer_size));

        // === 第4层：同步队列与播放状态 ===
        let queue = ProgressSyncQueue::new(
            config.queue_config.clone(),
            storage.clone(),
            remote.clone(),
            network.clone(),
            Some(event_manager.clone()),
        );
        let store = PlaybackStateStore::new(config.store_config.clone(), storage.clone());

        // === 第5层：完成协调与编排 ===
        let coordinator = Arc::new(ChapterCompletionCoordinator::new(event_manager.clone()));
        coordinator.bind_queue(&queue);
        for (course_id, course) in store.snapshot().courses {
            coordinator.restore_local(&course_id, course.completed_chapter_ids);
        }

        let identity = Arc::new(IdentityResolver::new(identity_provider));
        let tracker = Arc::new(ProgressTracker::new(
            config.tracker_config.clone(),
            identity.clone(),
            store.clone(),
            queue.clone(),
            coordinator.clone(),
            storage.clone(),
            event_manager.clone(),
        ));

        // === 第6层：生命周期 ===
        let mut lifecycle = LifecycleManager::new();
        lifecycle.register_hook(Arc::new(SyncLifecycleHook::new(
            queue.clone(),
            store.clone(),
            tracker.clone(),
        )));
        let lifecycle_manager = Arc::new(tokio::sync::RwLock::new(lifecycle));

        let shutdown_token = CancellationToken::new();
        let mut background_tasks = vec![queue.start_network_watch()];
        background_tasks.push(Self::spawn_network_forwarder(
            &network,
            event_manager.clone(),
            shutdown_token.clone(),
        ));

        let sdk = Arc::new(Self {
            config,
            storage,
            kv,
            network,
            event_manager,
            remote,
            identity,
            queue,
            store,
            coordinator,
            tracker,
            lifecycle_manager,
            shutdown_token,
            background_tasks: Mutex::new(background_tasks),
            initialized: AtomicBool::new(true),
            shutting_down: AtomicBool::new(false),
        });

        // 恢复的积压条目在线时立即同步
        if sdk.network.is_online() && sdk.queue.pending_len() > 0 {
            info!("♻️ 启动时有 {} 条待同步进度", sdk.queue.pending_len());
            sdk.queue.schedule_flush();
        }

        info!("✅ ProgressSDK 初始化完成");
        Ok(sdk)
    }

    /// 验证配置
    fn validate_config(config: &ProgressSDKConfig) -> Result<()> {
        if config.storage_backend == StorageBackend::Sled && config.data_dir.as_os_str().is_empty() {
            return Err(ProgressSDKError::Config("数据目录不能为空".to_string()));
        }
        if config.profile.trim().is_empty() {
            return Err(ProgressSDKError::Config("profile 不能为空".to_string()));
        }
        let threshold = config.tracker_config.completion_threshold;
        if !(threshold > 0.0 && threshold <= 100.0) {
            return Err(ProgressSDKError::Config(format!(
                "完成阈值必须在 (0, 100] 之间: {}",
                threshold
            )));
        }
        if config.queue_config.flush_interval_ms == 0 {
            return Err(ProgressSDKError::Config("flush 间隔不能为 0".to_string()));
        }
        Ok(())
    }

    fn spawn_network_forwarder(
        network: &Arc<NetworkMonitor>,
        events: Arc<EventManager>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let mut receiver = network.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = receiver.recv() => match event {
                        Ok(event) => events.emit(event_builders::network_status_changed(
                            event.old_status,
                            event.new_status,
                        )),
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        })
    }

    // ========== 访问器 ==========

    pub fn config(&self) -> &ProgressSDKConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    pub fn store(&self) -> &PlaybackStateStore {
        &self.store
    }

    pub fn queue(&self) -> &ProgressSyncQueue {
        &self.queue
    }

    pub fn coordinator(&self) -> &Arc<ChapterCompletionCoordinator> {
        &self.coordinator
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.event_manager
    }

    pub fn network(&self) -> &Arc<NetworkMonitor> {
        &self.network
    }

    pub fn storage(&self) -> &Arc<dyn LocalStorage> {
        &self.storage
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn check_initialized(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(ProgressSDKError::ShuttingDown("SDK 正在关闭".to_string()));
        }
        if !self.is_initialized() {
            return Err(ProgressSDKError::NotInitialized("SDK 未初始化".to_string()));
        }
        Ok(())
    }

    // ========== 网络 ==========

    /// 绑定平台网络监听器
    pub async fn attach_network_listener(&self, listener: Arc<dyn NetworkStatusListener>) -> Result<()> {
        self.check_initialized()?;
        self.network.attach(listener).await
    }

    /// 手动设置网络状态（平台层直接推送时使用）
    pub fn set_network_status(&self, status: NetworkStatus) {
        self.network.set_status(status);
    }

    // ========== 服务端合并 ==========

    /// 拉取服务端已完成章节并与本地合并，返回本地新增的章节数
    #[instrument(skip(self))]
    pub async fn sync_course_from_server(&self, course_id: &str) -> Result<usize> {
        self.check_initialized()?;
        if course_id.trim().is_empty() {
            return Err(ProgressSDKError::InvalidArgument("course_id 不能为空".to_string()));
        }
        let identity = self
            .identity
            .resolve()
            .map_err(|e| ProgressSDKError::InvalidArgument(e.to_string()))?;

        let server_ids = self
            .remote
            .fetch_completed_chapters(course_id, &identity.id)
            .await?;
        let added = self.store.sync_with_api_data(course_id, &server_ids);
        self.coordinator.seed_synced(course_id, server_ids.iter().cloned());

        let total = self.store.completed_chapters(course_id).len();
        self.event_manager
            .emit(event_builders::course_progress_merged(course_id, added, total));
        debug!("课程 {} 合并完成: 新增 {}, 共 {}", course_id, added, total);
        Ok(added)
    }

    // ========== 生命周期 ==========

    pub async fn enter_background(&self) -> Result<()> {
        self.check_initialized()?;
        info!("应用进入后台");
        self.lifecycle_manager.read().await.notify_background().await
    }

    pub async fn enter_foreground(&self) -> Result<()> {
        self.check_initialized()?;
        info!("应用进入前台");
        self.lifecycle_manager.read().await.notify_foreground().await
    }

    /// 清空本用户的全部本地进度（显式重置）
    pub fn reset_local_progress(&self) {
        self.store.reset();
        self.coordinator.reset();
        info!("🧹 本地进度已重置");
    }

    /// 异步关闭 SDK：退出 Hook（有界写入）→ 停止后台任务 → 刷盘
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("正在关闭 ProgressSDK...");

        if let Err(e) = self.lifecycle_manager.read().await.notify_teardown().await {
            warn!("⚠️ 退出写入未完成，进度保留在本地快照: {}", e);
        }

        self.queue.shutdown();
        self.shutdown_token.cancel();
        let tasks: Vec<JoinHandle<()>> = self.background_tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                debug!("后台任务退出异常: {}", e);
            }
        }

        if let Some(kv) = &self.kv {
            kv.flush()?;
        }

        self.initialized.store(false, Ordering::SeqCst);
        info!("ProgressSDK 关闭完成");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionState;
    use crate::events::SDKEvent;
    use crate::http_client::RecordingRemote;
    use crate::identity::{StaticIdentityProvider, UserIdentity};
    use crate::tracker::{PlaybackTick, TrackingTarget};
    use std::time::Duration;

    fn provider() -> Arc<StaticIdentityProvider> {
        Arc::new(StaticIdentityProvider::new(UserIdentity::Authenticated("user-1".into())))
    }

    #[test]
    fn test_config_builder() {
        let config = ProgressSDKConfig::builder()
            .data_dir("/tmp/progress")
            .profile("work")
            .api_base_url("https://api.example.com")
            .completion_threshold(90.0)
            .flush_interval_ms(5_000)
            .in_memory()
            .build();

        assert_eq!(config.profile, "work");
        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert_eq!(config.tracker_config.completion_threshold, 90.0);
        assert_eq!(config.queue_config.flush_interval_ms, 5_000);
        assert_eq!(config.store_config.history_limit, 50);
        assert_eq!(config.queue_config.teardown_timeout_ms, 2_000);

        let json = serde_json::to_string(&config).unwrap();
        let parsed: ProgressSDKConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.http_client_config.base_url, "https://api.example.com");
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = ProgressSDKConfig::builder()
            .in_memory()
            .completion_threshold(120.0)
            .build();
        let result =
            ProgressSDK::initialize_with_remote(config, provider(), Arc::new(RecordingRemote::new())).await;
        assert!(matches!(result, Err(ProgressSDKError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_flows_to_remote_and_back() {
        let remote = Arc::new(RecordingRemote::new());
        let sdk = ProgressSDK::initialize_with_remote(
            ProgressSDKConfig::builder().in_memory().build(),
            provider(),
            remote.clone(),
        )
        .await
        .unwrap();
        let mut events = sdk.events().subscribe();

        let tracker = sdk.tracker();
        tracker
            .start(
                TrackingTarget::new("rust-101", "vid-1")
                    .with_chapter("ch-1")
                    .with_duration(600.0),
            )
            .unwrap();
        tracker.on_progress(PlaybackTick::new(0.97, 582.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let sent = remote.sent();
        assert!(sent.iter().any(|p| p.chapter_id == "ch-1" && p.completed));
        assert_eq!(sdk.queue().pending_len(), 0);
        assert_eq!(
            sdk.coordinator().state("rust-101", "ch-1"),
            CompletionState::Synced
        );

        let mut saw_completion = false;
        while let Ok(event) = events.try_recv() {
            if let SDKEvent::ChapterCompleted { chapter_id, .. } = event {
                assert_eq!(chapter_id, "ch-1");
                saw_completion = true;
            }
        }
        assert!(saw_completion);

        remote.set_completed("rust-101", &["ch-2", "ch-3"]);
        assert_eq!(sdk.sync_course_from_server("rust-101").await.unwrap(), 2);
        assert_eq!(sdk.store().completed_chapters("rust-101").len(), 3);
        assert_eq!(
            sdk.coordinator().state("rust-101", "ch-2"),
            CompletionState::Synced
        );

        sdk.shutdown().await.unwrap();
        assert!(!sdk.is_initialized());
        assert!(matches!(
            sdk.enter_background().await,
            Err(ProgressSDKError::ShuttingDown(_))
        ));
    }

    #[tokio::test]
    async fn test_offline_progress_survives_restart_with_sled() {
        let dir = tempfile::TempDir::new().unwrap();
        let remote = Arc::new(RecordingRemote::new());
        let config = ProgressSDKConfig::builder()
            .data_dir(dir.path())
            .initial_network_status(NetworkStatus::Offline)
            .build();

        {
            let sdk = ProgressSDK::initialize_with_remote(config.clone(), provider(), remote.clone())
                .await
                .unwrap();
            sdk.tracker()
                .start(TrackingTarget::new("rust-101", "vid-1").with_chapter("ch-1"))
                .unwrap();
            sdk.tracker().on_progress(PlaybackTick::new(0.3, 180.0)).unwrap();
            sdk.tracker().mark_complete().unwrap();
            sdk.shutdown().await.unwrap();
        }
        assert_eq!(remote.sent_count(), 0);

        let sdk = ProgressSDK::initialize_with_remote(config, provider(), remote.clone())
            .await
            .unwrap();
        assert_eq!(sdk.queue().pending_len(), 1);
        assert!(sdk.store().is_chapter_completed("rust-101", "ch-1"));
        assert_eq!(
            sdk.coordinator().state("rust-101", "ch-1"),
            CompletionState::LocallyCompleted
        );

        sdk.set_network_status(NetworkStatus::Online);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(remote.sent_count(), 1);
        assert!(remote.sent()[0].completed);
        assert_eq!(sdk.queue().pending_len(), 0);
        sdk.shutdown().await.unwrap();
    }
}
