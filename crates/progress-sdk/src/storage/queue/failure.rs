use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProgressSDKError;

/// 同步失败原因分类
///
/// 只用于日志与事件：队列没有指数退避，所有失败条目都原样保留，
/// 由下一个节流窗口重试。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SyncFailureReason {
    /// 网络超时
    NetworkTimeout,
    /// 网络不可用
    NetworkUnavailable,
    /// 服务端错误（5xx）
    ServerError(u16),
    /// 限流（429）
    RateLimited,
    /// 客户端错误（4xx），通常意味着数据或鉴权问题
    Rejected(u16),
    /// 未知错误
    Unknown(String),
}

impl SyncFailureReason {
    /// 是否是网络层的瞬时故障
    pub fn is_transient(&self) -> bool {
        match self {
            SyncFailureReason::NetworkTimeout
            | SyncFailureReason::NetworkUnavailable
            | SyncFailureReason::RateLimited
            | SyncFailureReason::ServerError(_) => true,
            SyncFailureReason::Rejected(_) => false,
            SyncFailureReason::Unknown(_) => true, // 保守策略：未知错误按瞬时处理
        }
    }
}

impl fmt::Display for SyncFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncFailureReason::NetworkTimeout => write!(f, "network timeout"),
            SyncFailureReason::NetworkUnavailable => write!(f, "network unavailable"),
            SyncFailureReason::ServerError(code) => write!(f, "server error {}", code),
            SyncFailureReason::RateLimited => write!(f, "rate limited"),
            SyncFailureReason::Rejected(code) => write!(f, "rejected {}", code),
            SyncFailureReason::Unknown(msg) => write!(f, "{}", msg),
        }
    }
}

/// 从错误转换为失败原因
impl From<&ProgressSDKError> for SyncFailureReason {
    fn from(error: &ProgressSDKError) -> Self {
        match error {
            ProgressSDKError::Timeout(_) => SyncFailureReason::NetworkTimeout,
            ProgressSDKError::NotConnected => SyncFailureReason::NetworkUnavailable,
            ProgressSDKError::Http { status: 429, .. } => SyncFailureReason::RateLimited,
            ProgressSDKError::Http { status, .. } if *status >= 500 => {
                SyncFailureReason::ServerError(*status)
            }
            ProgressSDKError::Http { status, .. } => SyncFailureReason::Rejected(*status),
            ProgressSDKError::Transport(msg) => {
                if msg.contains("timeout") || msg.contains("timed out") {
                    SyncFailureReason::NetworkTimeout
                } else if msg.contains("unavailable") || msg.contains("connect") {
                    SyncFailureReason::NetworkUnavailable
                } else {
                    SyncFailureReason::Unknown(msg.clone())
                }
            }
            other => SyncFailureReason::Unknown(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let reason: SyncFailureReason = (&ProgressSDKError::Http {
            status: 503,
            message: "unavailable".into(),
        })
            .into();
        assert_eq!(reason, SyncFailureReason::ServerError(503));
        assert!(reason.is_transient());

        let reason: SyncFailureReason = (&ProgressSDKError::Http {
            status: 422,
            message: "bad payload".into(),
        })
            .into();
        assert_eq!(reason, SyncFailureReason::Rejected(422));
        assert!(!reason.is_transient());

        let reason: SyncFailureReason =
            (&ProgressSDKError::Transport("error trying to connect".into())).into();
        assert_eq!(reason, SyncFailureReason::NetworkUnavailable);

        let reason: SyncFailureReason = (&ProgressSDKError::Timeout("30s".into())).into();
        assert_eq!(reason.to_string(), "network timeout");
    }
}
