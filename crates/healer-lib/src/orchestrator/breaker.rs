//! Per-task circuit breaker
//!
//! Failures increment a counter and successes decay it by one. The breaker
//! opens once the failure counter reaches the threshold, and closes again
//! (resetting both counters) either when the cooldown has elapsed or when
//! enough successes are observed while open.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker thresholds for a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failures required to open the breaker
    pub failure_threshold: u32,
    /// Successes while open required to close it early
    pub success_threshold: u32,
    /// Time after tripping before the breaker closes on its own
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// State change produced by recording an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    Opened,
    Closed,
}

/// Serializable view of a breaker for status reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub is_open: bool,
    pub failure_count: u32,
    pub success_count: u32,
    /// Seconds since the breaker last tripped, if it ever has
    pub tripped_secs_ago: Option<u64>,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    is_open: bool,
    failure_count: u32,
    success_count: u32,
    last_trip: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            is_open: false,
            failure_count: 0,
            success_count: 0,
            last_trip: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn success_count(&self) -> u32 {
        self.success_count
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Close the breaker if its cooldown has elapsed
    pub fn refresh(&mut self, now: Instant) -> Option<BreakerTransition> {
        if !self.is_open {
            return None;
        }
        match self.last_trip {
            Some(tripped) if now >= tripped + self.config.cooldown => {
                self.close();
                Some(BreakerTransition::Closed)
            }
            _ => None,
        }
    }

    /// Whether an execution may proceed at `now`
    pub fn allows(&mut self, now: Instant) -> (bool, Option<BreakerTransition>) {
        let transition = self.refresh(now);
        (!self.is_open, transition)
    }

    pub fn record_failure(&mut self, now: Instant) -> Option<BreakerTransition> {
        self.failure_count = self.failure_count.saturating_add(1);

        if !self.is_open && self.failure_count >= self.config.failure_threshold {
            self.is_open = true;
            self.success_count = 0;
            self.last_trip = Some(now);
            return Some(BreakerTransition::Opened);
        }
        None
    }

    pub fn record_success(&mut self) -> Option<BreakerTransition> {
        self.failure_count = self.failure_count.saturating_sub(1);
        self.success_count = self.success_count.saturating_add(1);

        if self.is_open && self.success_count >= self.config.success_threshold {
            self.close();
            return Some(BreakerTransition::Closed);
        }
        None
    }

    fn close(&mut self) {
        self.is_open = false;
        self.failure_count = 0;
        self.success_count = 0;
    }

    pub fn snapshot(&self, now: Instant) -> BreakerSnapshot {
        BreakerSnapshot {
            is_open: self.is_open,
            failure_count: self.failure_count,
            success_count: self.success_count,
            tripped_secs_ago: self
                .last_trip
                .map(|t| now.saturating_duration_since(t).as_secs()),
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
            cooldown_secs: self.config.cooldown.as_secs(),
        }
    }
}
