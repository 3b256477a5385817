//! 存储模块 - 本地持久化层
//!
//! - LocalStorage: 同步键值存储抽象（对应浏览器 localStorage 的语义）
//! - KvStore: 基于 sled 的持久化实现，按 profile 隔离
//! - MemoryStorage: 纯内存实现（测试 / 临时会话）
//! - queue: 进度同步写回队列（write-behind）

use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

use crate::error::{ProgressSDKError, Result};

pub mod kv;
pub mod memory;
pub mod queue;

pub use kv::KvStore;
pub use memory::MemoryStorage;

/// 同步键值存储
///
/// 队列（整体快照）和编排层（单视频快照）使用互不相交的键写入，
/// 所有写入都是幂等的"最后写入生效"，因此实现方无需额外加锁协调。
pub trait LocalStorage: Send + Sync + Debug {
    /// 读取原始字节
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// 写入原始字节
    fn set_raw(&self, key: &str, value: &[u8]) -> Result<()>;

    /// 删除键，返回是否存在
    fn remove(&self, key: &str) -> Result<bool>;

    /// 列出指定前缀的所有键
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// 清空当前命名空间
    fn clear(&self) -> Result<()>;

    /// 统计信息
    fn stats(&self) -> Result<KvStats>;
}

/// 读取 JSON 值
pub fn load_json<V>(storage: &dyn LocalStorage, key: &str) -> Result<Option<V>>
where
    V: DeserializeOwned,
{
    match storage.get_raw(key)? {
        Some(bytes) => {
            let value = serde_json::from_slice(&bytes)
                .map_err(|e| ProgressSDKError::Serialization(format!("反序列化值失败 {}: {}", key, e)))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// 写入 JSON 值
pub fn save_json<V>(storage: &dyn LocalStorage, key: &str, value: &V) -> Result<()>
where
    V: Serialize + ?Sized,
{
    let bytes = serde_json::to_vec(value)
        .map_err(|e| ProgressSDKError::Serialization(format!("序列化值失败 {}: {}", key, e)))?;
    storage.set_raw(key, &bytes)
}

/// KV 存储统计信息
#[derive(Debug, Clone, Default)]
pub struct KvStats {
    pub key_count: u64,
    pub storage_size: u64,
}

/// 常用的键前缀常量
pub mod keys {
    /// 同步队列整体快照
    pub const SYNC_QUEUE: &str = "progress-sync-queue";
    /// 播放状态持久化子集
    pub const PLAYBACK_STATE: &str = "playback-state";
    /// 单视频断点快照前缀（完整键为 `video-progress-{identity}-{videoId}`）
    pub const VIDEO_PROGRESS_SCOPE: &str = "video-progress";

    /// 构造 `{scope}-{identity}-{videoId}` 形式的持久化键
    pub fn scoped(scope: &str, identity: &str, video_id: &str) -> String {
        format!("{}-{}-{}", scope, identity, video_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        value: u32,
    }

    #[test]
    fn test_json_helpers() {
        let storage = MemoryStorage::new();
        let sample = Sample { name: "intro".into(), value: 3 };
        save_json(&storage, "sample", &sample).unwrap();

        let loaded: Option<Sample> = load_json(&storage, "sample").unwrap();
        assert_eq!(loaded, Some(sample));

        let missing: Option<Sample> = load_json(&storage, "missing").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_corrupt_value_is_serialization_error() {
        let storage = MemoryStorage::new();
        storage.set_raw("broken", b"{not json").unwrap();
        let result: Result<Option<Sample>> = load_json(&storage, "broken");
        assert!(matches!(result, Err(ProgressSDKError::Serialization(_))));
    }

    #[test]
    fn test_scoped_key() {
        assert_eq!(
            keys::scoped(keys::VIDEO_PROGRESS_SCOPE, "user-42", "vid-1"),
            "video-progress-user-42-vid-1"
        );
    }
}
