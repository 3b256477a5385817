use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::now_utc_millis;

/// 复合键：一个可追踪的单元（课程、章节、视频）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProgressKey {
    pub course_id: String,
    pub chapter_id: String,
    pub video_id: String,
}

impl ProgressKey {
    pub fn new(
        course_id: impl Into<String>,
        chapter_id: impl Into<String>,
        video_id: impl Into<String>,
    ) -> Self {
        Self {
            course_id: course_id.into(),
            chapter_id: chapter_id.into(),
            video_id: video_id.into(),
        }
    }
}

impl fmt::Display for ProgressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.course_id, self.chapter_id, self.video_id)
    }
}

/// 入队的一次进度更新（浅合并：只覆盖提供了值的字段）
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub key: ProgressKey,
    /// 播放比例 0.0 - 1.0
    pub progress: Option<f64>,
    pub played_seconds: Option<f64>,
    pub duration: Option<f64>,
    pub completed: Option<bool>,
    pub user_id: Option<String>,
}

impl ProgressUpdate {
    pub fn new(key: ProgressKey) -> Self {
        Self {
            key,
            progress: None,
            played_seconds: None,
            duration: None,
            completed: None,
            user_id: None,
        }
    }

    pub fn with_progress(mut self, fraction: f64) -> Self {
        self.progress = Some(fraction);
        self
    }

    pub fn with_played_seconds(mut self, seconds: f64) -> Self {
        self.played_seconds = Some(seconds);
        self
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// 队列中的一个槽位，每个复合键最多一个
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingUpdate {
    pub key: ProgressKey,
    /// 播放比例 0.0 - 1.0
    pub progress: f64,
    pub played_seconds: f64,
    pub duration: f64,
    pub completed: bool,
    pub user_id: String,
    /// 最后一次入队的时间（UTC 毫秒）
    pub updated_at: i64,
    /// 队列内单调递增的修订号，用于判断 flush 期间是否被再次写入
    pub revision: u64,
}

impl PendingUpdate {
    pub(crate) fn from_update(update: ProgressUpdate, revision: u64) -> Self {
        let completed = update.completed.unwrap_or(false);
        // 已完成条目的进度固定为 1.0
        let progress = if completed {
            1.0
        } else {
            clamp_fraction(update.progress.unwrap_or(0.0))
        };
        Self {
            key: update.key,
            progress,
            played_seconds: update.played_seconds.unwrap_or(0.0).max(0.0),
            duration: update.duration.unwrap_or(0.0).max(0.0),
            completed,
            user_id: update.user_id.unwrap_or_default(),
            updated_at: now_utc_millis(),
            revision,
        }
    }

    /// 合并一次更新：新值覆盖旧值，时间戳与修订号刷新
    ///
    /// `completed` 一旦为 true 不会被后续普通进度覆盖回 false，
    /// 且已完成条目的进度不会回退。
    pub(crate) fn merge(&mut self, update: ProgressUpdate, revision: u64) {
        if let Some(progress) = update.progress {
            let progress = clamp_fraction(progress);
            self.progress = if self.completed {
                self.progress.max(progress)
            } else {
                progress
            };
        }
        if let Some(played_seconds) = update.played_seconds {
            self.played_seconds = played_seconds.max(0.0);
        }
        if let Some(duration) = update.duration {
            self.duration = duration.max(0.0);
        }
        if let Some(completed) = update.completed {
            self.completed = self.completed || completed;
        }
        if self.completed && self.progress < 1.0 {
            self.progress = 1.0;
        }
        if let Some(user_id) = update.user_id {
            self.user_id = user_id;
        }
        self.updated_at = now_utc_millis();
        self.revision = revision;
    }

    /// 转换为远端写入格式
    pub fn to_payload(&self) -> ProgressPayload {
        ProgressPayload {
            course_id: self.key.course_id.clone(),
            chapter_id: self.key.chapter_id.clone(),
            video_id: self.key.video_id.clone(),
            progress: (self.progress * 10_000.0).round() / 100.0,
            played_seconds: self.played_seconds,
            duration: self.duration,
            completed: self.completed,
            user_id: self.user_id.clone(),
        }
    }
}

/// 远端进度接口的请求体（幂等 upsert）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub course_id: String,
    pub chapter_id: String,
    pub video_id: String,
    /// 百分比 0 - 100
    pub progress: f64,
    pub played_seconds: f64,
    pub duration: f64,
    pub completed: bool,
    pub user_id: String,
}

fn clamp_fraction(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
