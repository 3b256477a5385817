//! 时间处理工具模块
//!
//! - **存储层**: 所有时间字段使用 UTC 毫秒时间戳（i64）
//! - **业务层**: 统一使用 `now_utc_millis()` 生成时间
//! - **节流/防抖**: 使用 `tokio::time::Instant`（可在测试中暂停/推进）

use chrono::Utc;

/// 当前 UTC 毫秒时间戳
pub fn now_utc_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 时间格式化工具
pub struct TimeFormatter;

impl TimeFormatter {
    /// 播放位置格式化，例如 `75.4` → `01:15`，`3725.0` → `1:02:05`
    pub fn format_playback_position(seconds: f64) -> String {
        let total = if seconds.is_finite() && seconds > 0.0 {
            seconds.floor() as u64
        } else {
            0
        };
        let hours = total / 3600;
        let minutes = (total % 3600) / 60;
        let secs = total % 60;
        if hours > 0 {
            format!("{}:{:02}:{:02}", hours, minutes, secs)
        } else {
            format!("{:02}:{:02}", minutes, secs)
        }
    }
}
