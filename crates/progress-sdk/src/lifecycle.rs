//! SDK 生命周期管理
//!
//! 管理前后台切换与退出（页面关闭、进程结束）等一级生命周期事件，
//! 统一触发各模块的状态切换。

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// 生命周期回调 Hook
///
/// 各模块通过实现此 trait 来响应生命周期变化
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// 切换到后台时调用
    async fn on_background(&self) -> Result<()>;

    /// 切换到前台时调用
    async fn on_foreground(&self) -> Result<()>;

    /// 退出前调用，实现方应在有限时间内返回
    async fn on_teardown(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Background,
    Foreground,
    Teardown,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Background => "后台切换",
            Phase::Foreground => "前台切换",
            Phase::Teardown => "退出",
        }
    }
}

/// 生命周期管理器
pub struct LifecycleManager {
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// 获取已注册的 Hook 数量
    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// 注册生命周期回调 Hook
    pub fn register_hook(&mut self, hook: Arc<dyn LifecycleHook>) {
        self.hooks.push(hook);
        info!("✅ 生命周期 Hook 已注册: 当前共 {} 个", self.hooks.len());
    }

    /// 通知所有 Hook：切换到后台
    pub async fn notify_background(&self) -> Result<()> {
        self.notify(Phase::Background).await
    }

    /// 通知所有 Hook：切换到前台
    pub async fn notify_foreground(&self) -> Result<()> {
        self.notify(Phase::Foreground).await
    }

    /// 通知所有 Hook：即将退出
    pub async fn notify_teardown(&self) -> Result<()> {
        self.notify(Phase::Teardown).await
    }

    /// 按注册顺序执行，某个 Hook 失败时记录错误并继续执行其他 Hook，最后返回第一个错误
    async fn notify(&self, phase: Phase) -> Result<()> {
        info!("🔄 通知所有模块：{}", phase.label());

        let mut first_error = None;
        let mut failures = 0usize;

        for (index, hook) in self.hooks.iter().enumerate() {
            let result = match phase {
                Phase::Background => hook.on_background().await,
                Phase::Foreground => hook.on_foreground().await,
                Phase::Teardown => hook.on_teardown().await,
            };
            if let Err(e) = result {
                warn!("⚠️ Hook #{} {}失败: {}", index, phase.label(), e);
                failures += 1;
                first_error.get_or_insert(e);
            }
        }

        if let Some(e) = first_error {
            warn!("⚠️ {} 个模块{}失败，但所有模块都已尝试执行", failures, phase.label());
            return Err(e);
        }

        info!("✅ 所有模块{}完成", phase.label());
        Ok(())
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

// 同步 Hook 模块（SDK 内部自动注册）
mod sync_hook;
pub use sync_hook::SyncLifecycleHook;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProgressSDKError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHook {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl LifecycleHook for CountingHook {
        async fn on_background(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProgressSDKError::Transport("boom".into()));
            }
            Ok(())
        }

        async fn on_foreground(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_all_hooks_run_even_if_one_fails() {
        let failing = Arc::new(CountingHook { calls: AtomicUsize::new(0), fail: true });
        let healthy = Arc::new(CountingHook { calls: AtomicUsize::new(0), fail: false });

        let mut manager = LifecycleManager::new();
        manager.register_hook(failing.clone());
        manager.register_hook(healthy.clone());
        assert_eq!(manager.hook_count(), 2);

        assert!(manager.notify_background().await.is_err());
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 1);

        manager.notify_foreground().await.unwrap();
        manager.notify_teardown().await.unwrap();
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 2);
    }
}
