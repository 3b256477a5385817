use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::error::Result;
use crate::utils::now_utc_millis;

/// 网络状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    /// 在线
    Online,
    /// 离线
    Offline,
}

impl NetworkStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, NetworkStatus::Online)
    }
}

/// 网络状态变化事件
#[derive(Debug, Clone)]
pub struct NetworkStatusEvent {
    pub old_status: NetworkStatus,
    pub new_status: NetworkStatus,
    pub timestamp: i64,
}

/// 网络状态监听器 trait（由宿主平台实现，例如浏览器 online/offline 事件桥接）
#[async_trait]
pub trait NetworkStatusListener: Send + Sync + std::fmt::Debug {
    /// 获取当前网络状态
    async fn get_current_status(&self) -> NetworkStatus;

    /// 开始监听网络状态变化
    async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatusEvent>>;

    /// 停止监听
    async fn stop_monitoring(&self);
}

/// 网络监控管理器
#[derive(Debug)]
pub struct NetworkMonitor {
    status_sender: broadcast::Sender<NetworkStatusEvent>,
    current_status: Arc<parking_lot::RwLock<NetworkStatus>>,
}

impl NetworkMonitor {
    /// 创建监控器，`initial` 为启动时的网络状态
    pub fn new(initial: NetworkStatus) -> Self {
        let (status_sender, _) = broadcast::channel(100);

        Self {
            status_sender,
            current_status: Arc::new(parking_lot::RwLock::new(initial)),
        }
    }

    /// 绑定平台监听器：先同步一次当前状态，再转发后续变化
    pub async fn attach(self: &Arc<Self>, listener: Arc<dyn NetworkStatusListener>) -> Result<()> {
        let initial = listener.get_current_status().await;
        self.set_status(initial);

        let mut receiver = listener.start_monitoring().await?;
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            while let Ok(event) = receiver.recv().await {
                monitor.set_status(event.new_status);
            }
        });

        Ok(())
    }

    /// 获取当前网络状态
    pub fn get_status(&self) -> NetworkStatus {
        *self.current_status.read()
    }

    /// 是否在线
    pub fn is_online(&self) -> bool {
        self.get_status().is_online()
    }

    /// 手动设置网络状态，状态未变化时不广播
    pub fn set_status(&self, new_status: NetworkStatus) {
        let old_status = {
            let mut status = self.current_status.write();
            let old = *status;
            *status = new_status;
            old
        };

        if old_status == new_status {
            return;
        }

        info!("📡 网络状态变化: {:?} -> {:?}", old_status, new_status);
        let event = NetworkStatusEvent {
            old_status,
            new_status,
            timestamp: now_utc_millis(),
        };
        let _ = self.status_sender.send(event);
    }

    /// 订阅网络状态变化
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkStatusEvent> {
        self.status_sender.subscribe()
    }
}

#[cfg(test)]
pub mod test_helpers {
    use super::*;

    /// 测试用：可手动切换状态的网络监听器
    #[derive(Debug)]
    pub struct DummyNetworkStatusListener {
        status: Arc<tokio::sync::RwLock<NetworkStatus>>,
        sender: broadcast::Sender<NetworkStatusEvent>,
    }

    impl DummyNetworkStatusListener {
        pub fn new(status: NetworkStatus) -> Self {
            let (sender, _) = broadcast::channel(16);
            Self {
                status: Arc::new(tokio::sync::RwLock::new(status)),
                sender,
            }
        }

        pub async fn switch(&self, new_status: NetworkStatus) {
            let old_status = {
                let mut status = self.status.write().await;
                let old = *status;
                *status = new_status;
                old
            };
            let _ = self.sender.send(NetworkStatusEvent {
                old_status,
                new_status,
                timestamp: now_utc_millis(),
            });
        }
    }

    #[async_trait::async_trait]
    impl NetworkStatusListener for DummyNetworkStatusListener {
        async fn get_current_status(&self) -> NetworkStatus {
            *self.status.read().await
        }

        async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatusEvent>> {
            Ok(self.sender.subscribe())
        }

        async fn stop_monitoring(&self) {}
    }
}

#[cfg(test)]
pub use test_helpers::DummyNetworkStatusListener;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_status_broadcasts_only_changes() {
        let monitor = NetworkMonitor::new(NetworkStatus::Online);
        let mut receiver = monitor.subscribe();

        monitor.set_status(NetworkStatus::Online);
        monitor.set_status(NetworkStatus::Offline);

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.old_status, NetworkStatus::Online);
        assert_eq!(event.new_status, NetworkStatus::Offline);
        assert!(receiver.try_recv().is_err());
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn test_attach_listener_forwards_changes() {
        let monitor = Arc::new(NetworkMonitor::new(NetworkStatus::Online));
        let listener = Arc::new(DummyNetworkStatusListener::new(NetworkStatus::Offline));
        monitor.attach(listener.clone()).await.unwrap();
        assert!(!monitor.is_online());

        let mut receiver = monitor.subscribe();
        listener.switch(NetworkStatus::Online).await;
        let event = receiver.recv().await.unwrap();
        assert_eq!(event.new_status, NetworkStatus::Online);
        assert!(monitor.is_online());
    }
}
