//! Configuration History
//!
//! Rollback buffer of previously applied configurations, newest first.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::multimon::monitors_config::MonitorsConfig;

/// Entries kept before the oldest is evicted
pub const MAX_HISTORY: usize = 3;

/// Bounded most-recent-first history
#[derive(Debug, Default)]
pub struct ConfigHistory {
    entries: VecDeque<Arc<MonitorsConfig>>,
}

impl ConfigHistory {
    /// Empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a configuration, evicting the oldest past [`MAX_HISTORY`]
    pub fn push(&mut self, config: Arc<MonitorsConfig>) {
        self.entries.push_front(config);
        self.entries.truncate(MAX_HISTORY);
    }

    /// Remove and return the newest entry
    pub fn pop_previous(&mut self) -> Option<Arc<MonitorsConfig>> {
        self.entries.pop_front()
    }

    /// Newest entry
    pub fn previous(&self) -> Option<&Arc<MonitorsConfig>> {
        self.entries.front()
    }

    /// Drop `config` if it is still held, matched by identity
    pub fn remove(&mut self, config: &Arc<MonitorsConfig>) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| !Arc::ptr_eq(entry, config));
        self.entries.len() != before
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the history is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multimon::logical::LogicalMonitorConfig;
    use crate::multimon::types::{LayoutMode, MonitorConfig, MonitorModeSpec, MonitorSpec, Transform};
    use enumflags2::BitFlags;
    use proptest::prelude::*;

    fn config(width: i32) -> Arc<MonitorsConfig> {
        let lm = LogicalMonitorConfig::for_monitor(
            MonitorConfig::new(
                MonitorSpec::new("DP-1", "MetaProduct's Inc.", "MetaMonitor", "0x123456"),
                MonitorModeSpec::new(width, 1080, 60.0),
            ),
            0,
            0,
            Transform::Normal,
            1.0,
            LayoutMode::Physical,
        );
        Arc::new(MonitorsConfig::new(
            vec![lm],
            vec![],
            LayoutMode::Physical,
            BitFlags::empty(),
        ))
    }

    #[test]
    fn test_newest_first() {
        let mut history = ConfigHistory::new();
        history.push(config(1));
        history.push(config(2));

        assert_eq!(history.previous().unwrap().logical_monitor_configs[0].layout.width, 2);
        assert_eq!(history.pop_previous().unwrap().logical_monitor_configs[0].layout.width, 2);
        assert_eq!(history.pop_previous().unwrap().logical_monitor_configs[0].layout.width, 1);
        assert!(history.pop_previous().is_none());
    }

    #[test]
    fn test_evicts_oldest() {
        let mut history = ConfigHistory::new();
        for width in 1..=5 {
            history.push(config(width));
        }
        assert_eq!(history.len(), MAX_HISTORY);

        let widths: Vec<i32> = std::iter::from_fn(|| history.pop_previous())
            .map(|c| c.logical_monitor_configs[0].layout.width)
            .collect();
        assert_eq!(widths, vec![5, 4, 3]);
        assert!(history.is_empty());
    }

    #[test]
    fn test_remove_by_identity() {
        let mut history = ConfigHistory::new();
        let kept = config(1);
        let removed = config(1);
        history.push(kept.clone());
        history.push(removed.clone());

        assert!(history.remove(&removed));
        assert!(!history.remove(&removed));
        assert_eq!(history.len(), 1);
        assert!(Arc::ptr_eq(history.previous().unwrap(), &kept));
    }

    proptest! {
        #[test]
        fn prop_bounded_and_most_recent_first(pushes in 0usize..20) {
            let mut history = ConfigHistory::new();
            for width in 1..=pushes {
                history.push(config(width as i32));
                prop_assert!(history.len() <= MAX_HISTORY);
            }

            let expected: Vec<i32> = (1..=pushes as i32).rev().take(MAX_HISTORY).collect();
            let popped: Vec<i32> = std::iter::from_fn(|| history.pop_previous())
                .map(|c| c.logical_monitor_configs[0].layout.width)
                .collect();
            prop_assert_eq!(popped, expected);
        }
    }
}
