use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::{ProgressSDKError, Result};
use crate::storage::{KvStats, LocalStorage};

/// 基于内存的键值存储
///
/// 用于测试与不需要跨进程保留数据的临时会话。
/// `set_fail_writes(true)` 可模拟配额超限等写入失败。
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
    write_count: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟写入失败（例如 quota exceeded）
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 成功写入次数
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::SeqCst)
    }

    fn check_writable(&self, key: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ProgressSDKError::Persistence(format!(
                "写入被拒绝（存储配额已满）: {}",
                key
            )));
        }
        Ok(())
    }
}

impl LocalStorage for MemoryStorage {
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        self.check_writable(key)?;
        self.entries.write().insert(key.to_string(), value.to_vec());
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        self.check_writable(key)?;
        Ok(self.entries.write().remove(key).is_some())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn clear(&self) -> Result<()> {
        self.check_writable("*")?;
        self.entries.write().clear();
        Ok(())
    }

    fn stats(&self) -> Result<KvStats> {
        let entries = self.entries.read();
        Ok(KvStats {
            key_count: entries.len() as u64,
            storage_size: entries.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum(),
        })
    }
}
