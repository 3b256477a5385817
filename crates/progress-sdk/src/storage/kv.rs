//! KV 存储模块 - 基于 sled 的持久化键值存储
//!
//! 本模块提供：
//! - 同步读写（sled 本身即为同步 API）
//! - 按 profile 隔离的命名空间（一个 profile 对应一个 Tree）
//! - 打开数据库时对锁冲突的退避重试

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sled::{Db, Tree};
use tracing::{info, warn};

use crate::error::{ProgressSDKError, Result};
use crate::storage::{KvStats, LocalStorage};

/// KV 存储组件
#[derive(Debug)]
pub struct KvStore {
    base_path: PathBuf,
    /// 主数据库实例
    db: Arc<Db>,
    /// 当前 profile 的 Tree
    tree: Tree,
    profile: String,
}

impl KvStore {
    /// 打开（或创建）KV 存储，`profile` 决定命名空间
    pub async fn new(base_path: &Path, profile: &str) -> Result<Self> {
        let base_path = base_path.to_path_buf();
        let kv_path = base_path.join("kv");

        tokio::fs::create_dir_all(&kv_path)
            .await
            .map_err(|e| ProgressSDKError::IO(format!("创建 KV 存储目录失败: {}", e)))?;

        // 上一个实例可能刚释放文件锁，重试多次带退避
        const MAX_OPEN_RETRIES: u32 = 6;
        const RETRY_DELAY_MS: u64 = 100;
        let mut db_opt: Option<Db> = None;
        let mut last_err: Option<sled::Error> = None;
        for attempt in 0..MAX_OPEN_RETRIES {
            match sled::open(&kv_path) {
                Ok(d) => {
                    db_opt = Some(d);
                    break;
                }
                Err(e) => {
                    let msg = format!("{}", e);
                    last_err = Some(e);
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    if is_lock && attempt + 1 < MAX_OPEN_RETRIES {
                        let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                        warn!("sled 数据库被占用，{}ms 后重试 (第 {} 次)", delay_ms, attempt + 1);
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    } else {
                        break;
                    }
                }
            }
        }
        let db = db_opt.ok_or_else(|| {
            ProgressSDKError::KvStore(
                last_err
                    .map(|e| format!("打开 sled 数据库失败: {}", e))
                    .unwrap_or_else(|| "打开 sled 数据库失败".to_string()),
            )
        })?;

        let tree = Self::open_profile_tree(&db, profile)?;
        info!("✅ KV 存储已打开: {} (profile={})", kv_path.display(), profile);

        Ok(Self {
            base_path,
            db: Arc::new(db),
            tree,
            profile: profile.to_string(),
        })
    }

    fn open_profile_tree(db: &Db, profile: &str) -> Result<Tree> {
        db.open_tree(format!("profile_{}", profile))
            .map_err(|e| ProgressSDKError::KvStore(format!("打开 profile Tree 失败: {}", e)))
    }

    /// 当前 profile
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// 数据目录
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// 删除指定 profile 的全部数据
    pub fn drop_profile(&self, profile: &str) -> Result<bool> {
        self.db
            .drop_tree(format!("profile_{}", profile))
            .map_err(|e| ProgressSDKError::KvStore(format!("删除 profile Tree 失败: {}", e)))
    }

    /// 刷盘（sled 默认异步刷盘，关闭前调用确保落盘）
    pub fn flush(&self) -> Result<()> {
        self.tree
            .flush()
            .map_err(|e| ProgressSDKError::Persistence(format!("刷盘失败: {}", e)))?;
        Ok(())
    }
}

impl LocalStorage for KvStore {
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .tree
            .get(key)
            .map_err(|e| ProgressSDKError::KvStore(format!("获取键值对失败: {}", e)))?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn set_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        self.tree
            .insert(key, value)
            .map_err(|e| ProgressSDKError::Persistence(format!("设置键值对失败: {}", e)))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let removed = self
            .tree
            .remove(key)
            .map_err(|e| ProgressSDKError::Persistence(format!("删除键值对失败: {}", e)))?;
        Ok(removed.is_some())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for result in self.tree.scan_prefix(prefix.as_bytes()) {
            let (key, _) =
                result.map_err(|e| ProgressSDKError::KvStore(format!("扫描前缀失败: {}", e)))?;
            keys.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(keys)
    }

    fn clear(&self) -> Result<()> {
        self.tree
            .clear()
            .map_err(|e| ProgressSDKError::Persistence(format!("清空 Tree 失败: {}", e)))?;
        Ok(())
    }

    fn stats(&self) -> Result<KvStats> {
        let key_count = self.tree.len() as u64;
        let mut storage_size = 0u64;
        for result in self.tree.iter() {
            let (key, value) =
                result.map_err(|e| ProgressSDKError::KvStore(format!("遍历键值对失败: {}", e)))?;
            storage_size += (key.len() + value.len()) as u64;
        }
        Ok(KvStats {
            key_count,
            storage_size,
        })
    }
}
