//! 进度同步队列（write-behind）
//!
//! 每个复合键（课程、章节、视频）在队列中最多占一个槽位，后写覆盖前写。
//! 每次入队都会把整个队列同步写入本地存储作为崩溃恢复快照，
//! 在线时通过节流器安排 flush，离线时只积累不发送。
//!
//! 投递语义为至少一次：确认成功的条目从队列和快照中删除，
//! 失败的条目原样保留，等待下一个节流窗口。

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{ProgressSDKError, Result};
use crate::events::{event_builders, EventManager};
use crate::http_client::ProgressRemote;
use crate::network::{NetworkMonitor, NetworkStatus};
use crate::storage::{keys, load_json, save_json, LocalStorage};
use crate::throttle::Throttle;

pub mod failure;
pub mod pending;

pub use failure::SyncFailureReason;
pub use pending::{PendingUpdate, ProgressKey, ProgressPayload, ProgressUpdate};

/// 队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// flush 节流间隔（毫秒）
    pub flush_interval_ms: u64,
    /// 退出前批量写入的最长等待（毫秒）
    pub teardown_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 10_000,
            teardown_timeout_ms: 2_000,
        }
    }
}

/// 一次 flush 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// 已发送，`succeeded` 条被确认，`failed` 条保留
    Completed { succeeded: usize, failed: usize },
    /// 已有 flush 在进行中
    AlreadyRunning,
    /// 离线，跳过
    Offline,
    /// 队列为空
    Empty,
}

/// 队列统计信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub enqueued: u64,
    /// 入队时命中已有槽位的次数
    pub coalesced: u64,
    pub flushes: u64,
    pub acknowledged: u64,
    pub failed_writes: u64,
    pub persist_failures: u64,
    pub teardown_flushes: u64,
}

/// 确认回调
pub type AckObserver = Arc<dyn Fn(&PendingUpdate) + Send + Sync>;

struct QueueInner {
    config: QueueConfig,
    entries: Mutex<BTreeMap<ProgressKey, PendingUpdate>>,
    storage: Arc<dyn LocalStorage>,
    remote: Arc<dyn ProgressRemote>,
    network: Arc<NetworkMonitor>,
    events: Option<Arc<EventManager>>,
    throttle: Throttle,
    in_flight: AtomicBool,
    revision: AtomicU64,
    observers: RwLock<Vec<AckObserver>>,
    stats: Mutex<QueueStats>,
    shutdown: CancellationToken,
}

/// flush 结束时（包括 panic / 取消）复位 in-flight 标记
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// 进度同步队列
///
/// 克隆开销很小，所有克隆共享同一个队列。
#[derive(Clone)]
pub struct ProgressSyncQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for ProgressSyncQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSyncQueue")
            .field("pending", &self.pending_len())
            .field("in_flight", &self.is_flushing())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl ProgressSyncQueue {
    /// 创建队列并从本地快照恢复未确认的条目
    pub fn new(
        config: QueueConfig,
        storage: Arc<dyn LocalStorage>,
        remote: Arc<dyn ProgressRemote>,
        network: Arc<NetworkMonitor>,
        events: Option<Arc<EventManager>>,
    ) -> Self {
        let throttle = Throttle::new(Duration::from_millis(config.flush_interval_ms));
        let queue = Self {
            inner: Arc::new(QueueInner {
                config,
                entries: Mutex::new(BTreeMap::new()),
                storage,
                remote,
                network,
                events,
                throttle,
                in_flight: AtomicBool::new(false),
                revision: AtomicU64::new(1),
                observers: RwLock::new(Vec::new()),
                stats: Mutex::new(QueueStats::default()),
                shutdown: CancellationToken::new(),
            }),
        };
        queue.restore();
        queue
    }

    /// 从快照恢复；快照损坏时按空队列处理
    fn restore(&self) {
        let snapshot: Vec<PendingUpdate> =
            match load_json(self.inner.storage.as_ref(), keys::SYNC_QUEUE) {
                Ok(Some(entries)) => entries,
                Ok(None) => return,
                Err(e) => {
                    warn!("⚠️ 同步队列快照损坏，按空队列处理: {}", e);
                    return;
                }
            };

        let max_revision = snapshot.iter().map(|e| e.revision).max().unwrap_or(0);
        self.inner.revision.store(max_revision + 1, Ordering::SeqCst);

        let mut entries = self.inner.entries.lock();
        for entry in snapshot {
            entries.insert(entry.key.clone(), entry);
        }
        info!("♻️ 从快照恢复 {} 条待同步进度", entries.len());
    }

    /// 入队（按复合键 upsert）
    ///
    /// 同步写入快照；只有在线时才安排节流 flush。
    pub fn enqueue(&self, update: ProgressUpdate) {
        let revision = self.inner.revision.fetch_add(1, Ordering::SeqCst);
        {
            let mut entries = self.inner.entries.lock();
            let mut stats = self.inner.stats.lock();
            stats.enqueued += 1;
            match entries.get_mut(&update.key) {
                Some(existing) => {
                    stats.coalesced += 1;
                    existing.merge(update, revision);
                }
                None => {
                    debug!("➕ 新的待同步条目: {}", update.key);
                    let entry = PendingUpdate::from_update(update, revision);
                    entries.insert(entry.key.clone(), entry);
                }
            }
            drop(stats);
            self.persist_locked(&entries);
        }

        if self.inner.network.is_online() {
            self.schedule_flush();
        }
    }

    /// 安排一次节流 flush，窗口内已有待执行的 flush 时合并
    pub fn schedule_flush(&self) -> bool {
        if self.inner.shutdown.is_cancelled() {
            return false;
        }
        let queue = self.clone();
        self.inner.throttle.schedule(move || async move {
            queue.flush().await;
        })
    }

    /// 发送所有条目（并行），确认的删除，失败的保留
    #[instrument(skip(self))]
    pub async fn flush(&self) -> FlushOutcome {
        if !self.inner.network.is_online() {
            debug!("📴 离线，跳过 flush");
            return FlushOutcome::Offline;
        }
        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("⏳ 已有 flush 在进行中");
            return FlushOutcome::AlreadyRunning;
        }
        let _guard = InFlightGuard(&self.inner.in_flight);

        let batch: Vec<PendingUpdate> = self.inner.entries.lock().values().cloned().collect();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        info!("🔄 开始同步 {} 条进度", batch.len());
        self.inner.stats.lock().flushes += 1;

        let remote = self.inner.remote.clone();
        let results = futures::future::join_all(batch.iter().map(|entry| {
            let remote = remote.clone();
            let payload = entry.to_payload();
            async move { remote.send_progress(&payload).await }
        }))
        .await;

        let mut acknowledged = Vec::new();
        let mut failed = 0usize;
        for (entry, result) in batch.into_iter().zip(results) {
            match result {
                Ok(()) => acknowledged.push(entry),
                Err(e) => {
                    failed += 1;
                    self.report_failure(&entry, &e);
                }
            }
        }

        let succeeded = acknowledged.len();
        self.settle_acknowledged(acknowledged);
        self.inner.stats.lock().failed_writes += failed as u64;

        if failed > 0 {
            info!("✅ 同步完成: 成功 {}, 失败 {}（等待下一轮）", succeeded, failed);
        } else {
            info!("✅ 同步完成: 成功 {}", succeeded);
        }

        // 失败条目与 flush 期间新写入的条目由下一个节流窗口处理
        let remaining = self.pending_len();
        if remaining > 0 && self.inner.network.is_online() {
            debug!("剩余 {} 条，安排下一轮同步", remaining);
            self.schedule_flush();
        }

        FlushOutcome::Completed { succeeded, failed }
    }

    /// 绕过节流立即 flush
    pub async fn force_flush(&self) -> FlushOutcome {
        self.inner.throttle.cancel();
        self.inner.throttle.mark_run();
        self.flush().await
    }

    /// 处理网络状态变化：上线立即 flush，离线暂停
    pub async fn on_network_status(&self, status: NetworkStatus) -> Option<FlushOutcome> {
        match status {
            NetworkStatus::Online => {
                info!("🌐 网络恢复，立即同步");
                Some(self.force_flush().await)
            }
            NetworkStatus::Offline => {
                if self.inner.throttle.cancel() {
                    debug!("📴 网络断开，取消待执行的 flush");
                }
                None
            }
        }
    }

    /// 监听网络监控器，直到 `shutdown`
    pub fn start_network_watch(&self) -> JoinHandle<()> {
        let queue = self.clone();
        let mut receiver = self.inner.network.subscribe();
        let token = self.inner.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = receiver.recv() => match event {
                        Ok(event) => {
                            queue.on_network_status(event.new_status).await;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("网络事件积压，跳过 {} 条", skipped);
                            let status = queue.inner.network.get_status();
                            queue.on_network_status(status).await;
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
            debug!("网络监听任务退出");
        })
    }

    /// 退出前的一次有界批量写入
    ///
    /// 返回被确认的条目数。超时或失败时条目保留在快照中，下次启动恢复。
    #[instrument(skip(self))]
    pub async fn flush_on_teardown(&self) -> Result<usize> {
        self.inner.throttle.cancel();

        if !self.inner.network.is_online() {
            info!("📴 离线退出，{} 条进度留在本地快照", self.pending_len());
            return Ok(0);
        }

        let batch: Vec<PendingUpdate> = self.inner.entries.lock().values().cloned().collect();
        if batch.is_empty() {
            return Ok(0);
        }

        let payloads: Vec<ProgressPayload> = batch.iter().map(PendingUpdate::to_payload).collect();
        let bound = Duration::from_millis(self.inner.config.teardown_timeout_ms);
        self.inner.stats.lock().teardown_flushes += 1;

        match tokio::time::timeout(bound, self.inner.remote.send_on_teardown(&payloads)).await {
            Ok(Ok(())) => {
                let count = batch.len();
                self.settle_acknowledged(batch);
                info!("✅ 退出前已写入 {} 条进度", count);
                Ok(count)
            }
            Ok(Err(e)) => {
                warn!("⚠️ 退出前写入失败，条目保留在快照: {}", e);
                Err(e)
            }
            Err(_) => {
                warn!("⚠️ 退出前写入超时（{}ms），条目保留在快照", bound.as_millis());
                Err(ProgressSDKError::Timeout(format!(
                    "teardown flush exceeded {}ms",
                    bound.as_millis()
                )))
            }
        }
    }

    /// 注册确认回调
    pub fn on_acknowledged<F>(&self, observer: F)
    where
        F: Fn(&PendingUpdate) + Send + Sync + 'static,
    {
        self.inner.observers.write().push(Arc::new(observer));
    }

    pub fn pending(&self) -> Vec<PendingUpdate> {
        self.inner.entries.lock().values().cloned().collect()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_flushing(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.stats.lock().clone()
    }

    /// 停止后台任务，取消待执行的 flush
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.throttle.cancel();
    }

    /// 删除已确认的条目（flush 期间被再次写入的保留），持久化并通知
    fn settle_acknowledged(&self, acknowledged: Vec<PendingUpdate>) {
        if acknowledged.is_empty() {
            return;
        }
        {
            let mut entries = self.inner.entries.lock();
            for entry in &acknowledged {
                let unchanged = entries
                    .get(&entry.key)
                    .map(|current| current.revision == entry.revision)
                    .unwrap_or(false);
                if unchanged {
                    entries.remove(&entry.key);
                } else {
                    debug!("🔁 条目在发送期间被更新，保留: {}", entry.key);
                }
            }
            self.persist_locked(&entries);
        }
        self.inner.stats.lock().acknowledged += acknowledged.len() as u64;

        let observers: Vec<AckObserver> = self.inner.observers.read().clone();
        for entry in &acknowledged {
            for observer in &observers {
                observer(entry);
            }
            if let Some(events) = &self.inner.events {
                events.emit(event_builders::progress_synced(
                    &entry.key.course_id,
                    &entry.key.chapter_id,
                    &entry.key.video_id,
                    entry.completed,
                ));
            }
        }
    }

    fn report_failure(&self, entry: &PendingUpdate, err: &ProgressSDKError) {
        let reason = SyncFailureReason::from(err);
        if reason.is_transient() {
            warn!("⚠️ 同步失败 {}: {}", entry.key, reason);
        } else {
            error!("❌ 同步被拒绝 {}: {} ({})", entry.key, reason, err);
        }
        if let Some(events) = &self.inner.events {
            events.emit(event_builders::sync_failed(
                &entry.key.course_id,
                &entry.key.chapter_id,
                &entry.key.video_id,
                reason.to_string(),
            ));
        }
    }

    /// 写入整队快照；失败只记录，内存状态仍然有效
    fn persist_locked(&self, entries: &BTreeMap<ProgressKey, PendingUpdate>) {
        let result = if entries.is_empty() {
            self.inner.storage.remove(keys::SYNC_QUEUE).map(|_| ())
        } else {
            let snapshot: Vec<&PendingUpdate> = entries.values().collect();
            save_json(self.inner.storage.as_ref(), keys::SYNC_QUEUE, &snapshot)
        };
        if let Err(e) = result {
            self.inner.stats.lock().persist_failures += 1;
            warn!("⚠️ 同步队列快照写入失败（内存状态仍有效）: {}", e);
        }
    }
}
