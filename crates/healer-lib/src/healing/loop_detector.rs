//! Sliding-window loop detection
//!
//! Each (component, error signature) pair keeps the timestamps of recent
//! errors. Entries older than the window are pruned on every record.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

type WindowKey = (String, String);

struct Window {
    hits: VecDeque<Instant>,
    last_touched: Instant,
}

pub struct ErrorWindows {
    windows: HashMap<WindowKey, Window>,
    window: Duration,
    threshold: usize,
    max_keys: usize,
}

impl ErrorWindows {
    pub fn new(window: Duration, threshold: usize, max_keys: usize) -> Self {
        Self {
            windows: HashMap::new(),
            window,
            threshold: threshold.max(1),
            max_keys: max_keys.max(1),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Record an error and return how many fall inside the window
    pub fn record(&mut self, component: &str, signature: &str, now: Instant) -> usize {
        let key = (component.to_string(), signature.to_string());
        if !self.windows.contains_key(&key) && self.windows.len() >= self.max_keys {
            self.evict_least_recent();
        }

        let window = self.window;
        let entry = self.windows.entry(key).or_insert_with(|| Window {
            hits: VecDeque::new(),
            last_touched: now,
        });
        entry.hits.push_back(now);
        entry.last_touched = now;
        while let Some(oldest) = entry.hits.front() {
            if now.duration_since(*oldest) > window {
                entry.hits.pop_front();
            } else {
                break;
            }
        }
        entry.hits.len()
    }

    /// Whether `count` errors in the window constitute a loop
    pub fn is_loop(&self, count: usize) -> bool {
        count >= self.threshold
    }

    /// Forget every window for a component
    pub fn clear_component(&mut self, component: &str) {
        self.windows.retain(|(c, _), _| c != component);
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    fn evict_least_recent(&mut self) {
        let oldest = self
            .windows
            .iter()
            .min_by_key(|(_, w)| w.last_touched)
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            self.windows.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_within_window() {
        let mut windows = ErrorWindows::new(Duration::from_secs(60), 3, 16);
        let start = Instant::now();

        assert_eq!(windows.record("api", "timeout", start), 1);
        assert_eq!(windows.record("api", "timeout", start + Duration::from_secs(10)), 2);
        let count = windows.record("api", "timeout", start + Duration::from_secs(20));
        assert_eq!(count, 3);
        assert!(windows.is_loop(count));
    }

    #[test]
    fn test_old_entries_pruned() {
        let mut windows = ErrorWindows::new(Duration::from_secs(60), 3, 16);
        let start = Instant::now();

        windows.record("api", "timeout", start);
        windows.record("api", "timeout", start + Duration::from_secs(30));
        let count = windows.record("api", "timeout", start + Duration::from_secs(90));
        assert_eq!(count, 2);
        assert!(!windows.is_loop(count));
    }

    #[test]
    fn test_signatures_are_independent() {
        let mut windows = ErrorWindows::new(Duration::from_secs(60), 2, 16);
        let now = Instant::now();
        windows.record("api", "timeout", now);
        assert_eq!(windows.record("api", "refused", now), 1);
        assert_eq!(windows.record("db", "timeout", now), 1);
    }

    #[test]
    fn test_key_cap_evicts_least_recently_touched() {
        let mut windows = ErrorWindows::new(Duration::from_secs(60), 3, 2);
        let start = Instant::now();
        windows.record("a", "x", start);
        windows.record("b", "x", start + Duration::from_secs(1));
        windows.record("a", "x", start + Duration::from_secs(2));
        windows.record("c", "x", start + Duration::from_secs(3));

        assert_eq!(windows.len(), 2);
        // "b" was evicted, so it starts over
        assert_eq!(windows.record("b", "x", start + Duration::from_secs(4)), 1);
    }

    #[test]
    fn test_clear_component() {
        let mut windows = ErrorWindows::new(Duration::from_secs(60), 3, 16);
        let now = Instant::now();
        windows.record("api", "timeout", now);
        windows.record("api", "refused", now);
        windows.record("db", "timeout", now);
        windows.clear_component("api");
        assert_eq!(windows.len(), 1);
    }
}
