//! 里程碑检测
//!
//! 无状态谓词；已触达集合由调用方持有，活动视频变化时调用方负责清空。
//! 播放回调的频率由播放器决定，常常跳过精确值，所以用 ±2% 的容差带判断。

use std::collections::BTreeSet;

/// 标准里程碑（百分比）
pub const MILESTONES: [u8; 6] = [10, 25, 50, 75, 90, 100];

/// 容差带（百分点）
pub const MILESTONE_TOLERANCE: f64 = 2.0;

/// `current` 落在 `milestone` ±2% 内且尚未触达时返回 true
pub fn check_milestone_reached(current: f64, milestone: u8, reached: &BTreeSet<u8>) -> bool {
    if !current.is_finite() || reached.contains(&milestone) {
        return false;
    }
    (current - f64::from(milestone)).abs() <= MILESTONE_TOLERANCE
}

/// 严格大于 `current` 的最小标准里程碑
pub fn get_next_milestone(current: f64) -> Option<u8> {
    MILESTONES
        .iter()
        .copied()
        .find(|milestone| f64::from(*milestone) > current)
}

/// 单个视频的已触达集合
#[derive(Debug, Clone, Default)]
pub struct MilestoneSet {
    identity: Option<String>,
    reached: BTreeSet<u8>,
}

impl MilestoneSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 切换到新的视频身份时清空，返回是否发生了切换
    pub fn reset_for(&mut self, identity: &str) -> bool {
        if self.identity.as_deref() == Some(identity) {
            return false;
        }
        self.identity = Some(identity.to_string());
        self.reached.clear();
        true
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// 检测本次新触达的里程碑（递增顺序），并记入集合
    pub fn detect(&mut self, current: f64) -> Vec<u8> {
        let fired: Vec<u8> = MILESTONES
            .iter()
            .copied()
            .filter(|milestone| check_milestone_reached(current, *milestone, &self.reached))
            .collect();
        self.reached.extend(fired.iter().copied());
        fired
    }

    pub fn contains(&self, milestone: u8) -> bool {
        self.reached.contains(&milestone)
    }

    pub fn reached(&self) -> &BTreeSet<u8> {
        &self.reached
    }

    pub fn clear(&mut self) {
        self.identity = None;
        self.reached.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerance_band() {
        let reached = BTreeSet::new();
        assert!(check_milestone_reached(8.0, 10, &reached));
        assert!(check_milestone_reached(12.0, 10, &reached));
        assert!(!check_milestone_reached(12.5, 10, &reached));
        assert!(!check_milestone_reached(f64::NAN, 10, &reached));

        let reached: BTreeSet<u8> = [10].into_iter().collect();
        assert!(!check_milestone_reached(10.0, 10, &reached));
    }

    #[test]
    fn test_next_milestone() {
        assert_eq!(get_next_milestone(0.0), Some(10));
        assert_eq!(get_next_milestone(10.0), Some(25));
        assert_eq!(get_next_milestone(89.9), Some(90));
        assert_eq!(get_next_milestone(100.0), None);
    }

    #[test]
    fn test_each_milestone_fires_once_in_order() {
        let mut set = MilestoneSet::new();
        set.reset_for("rust-101:vid-1");

        let mut fired = Vec::new();
        for fraction in [0.0, 0.09, 0.11, 0.24, 0.26, 0.5] {
            fired.extend(
                set.detect(fraction * 100.0)
                    .into_iter()
                    .filter(|m| *m == 10 || *m == 25),
            );
        }
        assert_eq!(fired, vec![10, 25]);
    }

    #[test]
    fn test_reset_on_video_change() {
        let mut set = MilestoneSet::new();
        assert!(set.reset_for("v1"));
        assert_eq!(set.detect(50.0), vec![50]);
        assert!(!set.reset_for("v1"));
        assert!(set.contains(50));

        assert!(set.reset_for("v2"));
        assert!(!set.contains(50));
        assert_eq!(set.detect(49.0), vec![50]);
    }
}
