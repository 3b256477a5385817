use std::fmt;

#[derive(Debug)]
pub enum ProgressSDKError {
    JsonError(String),
    InvalidArgument(String),
    KvStore(String),
    Serialization(String),
    IO(String),
    /// 本地持久化写入失败（磁盘已满、配额超限等）
    Persistence(String),
    /// 无法建立连接（DNS 失败、连接被拒绝等）
    NotConnected,
    Transport(String),
    /// 服务端返回非 2xx
    Http {
        status: u16,
        message: String,
    },
    Timeout(String),
    Config(String),
    NotInitialized(String),
    ShuttingDown(String),
}

impl fmt::Display for ProgressSDKError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressSDKError::JsonError(e) => write!(f, "JSON error: {}", e),
            ProgressSDKError::InvalidArgument(e) => write!(f, "Invalid argument: {}", e),
            ProgressSDKError::KvStore(e) => write!(f, "KV store error: {}", e),
            ProgressSDKError::Serialization(e) => write!(f, "Serialization error: {}", e),
            ProgressSDKError::IO(e) => write!(f, "IO error: {}", e),
            ProgressSDKError::Persistence(e) => write!(f, "Persistence error: {}", e),
            ProgressSDKError::NotConnected => write!(f, "Not connected"),
            ProgressSDKError::Transport(e) => write!(f, "Transport error: {}", e),
            ProgressSDKError::Http { status, message } => {
                write!(f, "HTTP error [{}]: {}", status, message)
            }
            ProgressSDKError::Timeout(e) => write!(f, "Timeout: {}", e),
            ProgressSDKError::Config(e) => write!(f, "Config error: {}", e),
            ProgressSDKError::NotInitialized(e) => write!(f, "Not initialized: {}", e),
            ProgressSDKError::ShuttingDown(e) => write!(f, "Shutting down: {}", e),
        }
    }
}

impl std::error::Error for ProgressSDKError {}

impl From<serde_json::Error> for ProgressSDKError {
    fn from(error: serde_json::Error) -> Self {
        ProgressSDKError::JsonError(error.to_string())
    }
}

impl From<std::io::Error> for ProgressSDKError {
    fn from(error: std::io::Error) -> Self {
        ProgressSDKError::IO(error.to_string())
    }
}

impl From<sled::Error> for ProgressSDKError {
    fn from(error: sled::Error) -> Self {
        ProgressSDKError::KvStore(error.to_string())
    }
}

impl From<reqwest::Error> for ProgressSDKError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return ProgressSDKError::Timeout(error.to_string());
        }
        if error.is_connect() {
            return ProgressSDKError::NotConnected;
        }
        if let Some(status) = error.status() {
            return ProgressSDKError::Http {
                status: status.as_u16(),
                message: error.to_string(),
            };
        }
        ProgressSDKError::Transport(error.to_string())
    }
}

impl ProgressSDKError {
    /// 是否为网络层的瞬时错误（下一轮 flush 会自动重试）
    pub fn is_transient(&self) -> bool {
        match self {
            ProgressSDKError::Transport(_)
            | ProgressSDKError::Timeout(_)
            | ProgressSDKError::NotConnected => true,
            ProgressSDKError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// 是否为本地持久化错误
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            ProgressSDKError::Persistence(_) | ProgressSDKError::KvStore(_) | ProgressSDKError::IO(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProgressSDKError>;

/// 追踪调用的非致命配置问题
///
/// 出现时本次调用的追踪被跳过，不向调用方抛出；每种问题只记录一次日志。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TrackingError {
    #[error("course id is missing")]
    MissingCourseId,
    #[error("video id is missing")]
    MissingVideoId,
    #[error("chapter id is missing")]
    MissingChapterId,
    #[error("caller identity is not available")]
    MissingIdentity,
    #[error("no video is being tracked")]
    NotTracking,
}

impl TrackingError {
    /// 用于"只报告一次"的分类键
    pub fn kind(&self) -> &'static str {
        match self {
            TrackingError::MissingCourseId => "missing_course_id",
            TrackingError::MissingVideoId => "missing_video_id",
            TrackingError::MissingChapterId => "missing_chapter_id",
            TrackingError::MissingIdentity => "missing_identity",
            TrackingError::NotTracking => "not_tracking",
        }
    }
}
