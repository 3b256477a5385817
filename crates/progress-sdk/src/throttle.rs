//! 节流 / 防抖 / 重入保护
//!
//! 高频播放回调（每秒多次）与远端写入、磁盘写入之间的缓冲层：
//!
//! | 组件 | 语义 | 用途 |
//! |------|------|------|
//! | `Throttle` | 首次立即执行，之后每个窗口最多执行一次（尾调用保证） | 同步队列 flush（10s） |
//! | `Debouncer` | 最后一次调用后静默 `delay` 才执行 | 播放状态落盘 |
//! | `ReentrancyGuard` | 按 key 的时间窗口锁 | 章节完成协议（3s） |
//!
//! 所有计时基于 `tokio::time::Instant`，测试中可用暂停时钟推进。
//! 三者都持有显式状态并提供 `cancel()`，不依赖闭包捕获的可变变量。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::debug;

#[derive(Debug, Default)]
struct ThrottleState {
    /// 上一次真正执行的时间
    last_run: Option<Instant>,
    /// 已排队、尚未开始执行的任务
    pending: Option<JoinHandle<()>>,
}

/// 节流器（leading + trailing）
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    state: Arc<Mutex<ThrottleState>>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Arc::new(Mutex::new(ThrottleState::default())),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 安排一次执行
    ///
    /// 已有待执行任务时直接返回 `false`（待执行任务运行时会读取最新状态）。
    /// 没有 tokio 运行时上下文时同样返回 `false`。
    pub fn schedule<F, Fut>(&self, f: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                debug!("没有可用的 tokio 运行时，跳过节流调度");
                return false;
            }
        };

        let mut state = self.state.lock();
        if let Some(pending) = state.pending.as_ref() {
            if !pending.is_finished() {
                return false;
            }
        }

        let delay = match state.last_run {
            Some(last) => (last + self.interval).saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        };

        let shared = self.state.clone();
        let task = handle.spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            {
                // 开始执行后不再视为 pending，执行期间的新调用会排到下一个窗口
                let mut state = shared.lock();
                state.pending = None;
                state.last_run = Some(Instant::now());
            }
            f().await;
        });
        state.pending = Some(task);
        debug!("节流任务已排队，{}ms 后执行", delay.as_millis());
        true
    }

    /// 记录一次窗口外的执行（例如强制 flush），下一次调度从此刻重新计时
    pub fn mark_run(&self) {
        self.state.lock().last_run = Some(Instant::now());
    }

    /// 取消尚未开始的执行，返回是否确实取消了任务
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        match state.pending.take() {
            Some(task) if !task.is_finished() => {
                task.abort();
                true
            }
            _ => false,
        }
    }

    /// 是否有待执行任务
    pub fn is_pending(&self) -> bool {
        self.state
            .lock()
            .pending
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }
}

/// 防抖器（trailing）
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    /// 重新计时并在静默 `delay` 后执行 `f`
    ///
    /// 返回 `false` 表示当前没有 tokio 运行时，调用方应自行同步执行。
    pub fn call<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => return false,
        };
        let delay = self.delay;
        let mut pending = self.pending.lock();
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        *pending = Some(handle.spawn(async move {
            sleep(delay).await;
            f();
        }));
        true
    }

    /// 取消尚未执行的调用
    pub fn cancel(&self) -> bool {
        match self.pending.lock().take() {
            Some(task) if !task.is_finished() => {
                task.abort();
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// 按 key 的时间窗口重入锁
///
/// 获取后在 `window` 内再次获取同一个 key 会被拒绝；窗口过期后自动释放。
#[derive(Debug)]
pub struct ReentrancyGuard {
    window: Duration,
    held: Mutex<HashMap<String, Instant>>,
}

impl ReentrancyGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            held: Mutex::new(HashMap::new()),
        }
    }

    /// 尝试获取锁，成功返回 `true`
    pub fn try_acquire(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut held = self.held.lock();
        held.retain(|_, acquired_at| now.duration_since(*acquired_at) < self.window);
        if held.contains_key(key) {
            debug!("重入保护拒绝: {}", key);
            return false;
        }
        held.insert(key.to_string(), now);
        true
    }

    /// 提前释放
    pub fn release(&self, key: &str) {
        self.held.lock().remove(key);
    }

    pub fn is_held(&self, key: &str) -> bool {
        let now = Instant::now();
        self.held
            .lock()
            .get(key)
            .map(|acquired_at| now.duration_since(*acquired_at) < self.window)
            .unwrap_or(false)
    }

    pub fn cancel(&self) {
        self.held.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_throttle_leading_then_trailing() {
        let throttle = Throttle::new(Duration::from_secs(10));
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        assert!(throttle.schedule(move || async move {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        tokio::task::yield_now().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // 窗口内：排队一次，重复调用被合并
        let c = counter.clone();
        assert!(throttle.schedule(move || async move {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        let c = counter.clone();
        assert!(!throttle.schedule(move || async move {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(throttle.is_pending());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(!throttle.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_cancel() {
        let throttle = Throttle::new(Duration::from_secs(10));
        throttle.mark_run();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        throttle.schedule(move || async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(throttle.cancel());
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(!throttle.cancel());
    }

    #[test]
    fn test_throttle_without_runtime() {
        let throttle = Throttle::new(Duration::from_secs(1));
        assert!(!throttle.schedule(|| async {}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_runs_once_after_quiet_period() {
        let debouncer = Debouncer::new(Duration::from_millis(500));
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let c = counter.clone();
            debouncer.call(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reentrancy_guard_window() {
        let guard = ReentrancyGuard::new(Duration::from_secs(3));
        assert!(guard.try_acquire("course-1:ch-1"));
        assert!(!guard.try_acquire("course-1:ch-1"));
        assert!(guard.try_acquire("course-1:ch-2"));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!guard.is_held("course-1:ch-1"));
        assert!(guard.try_acquire("course-1:ch-1"));

        guard.release("course-1:ch-1");
        assert!(guard.try_acquire("course-1:ch-1"));
    }
}
