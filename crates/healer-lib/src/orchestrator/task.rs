//! Scheduled task definitions

use super::CircuitBreakerConfig;
use crate::error::HealerError;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// A unit of recurring work
#[async_trait]
pub trait TaskJob: Send + Sync {
    async fn run(&self) -> Result<()>;
}

/// Adapter turning an async closure into a [`TaskJob`]
pub struct FnJob<F>(F);

#[async_trait]
impl<F, Fut> TaskJob for FnJob<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn run(&self) -> Result<()> {
        (self.0)().await
    }
}

/// Wrap an async closure as a shareable job
pub fn job_fn<F, Fut>(f: F) -> Arc<dyn TaskJob>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnJob(f))
}

/// Shortest period an `Every` recurrence fires at
pub const MIN_EVERY_PERIOD: Duration = Duration::from_millis(100);

/// When a task fires
///
/// Accepts either `every <duration>` (humantime syntax, e.g. `every 30s`)
/// or a cron expression with a seconds field (e.g. `0 */5 * * * *`).
#[derive(Clone)]
pub enum Recurrence {
    Every(Duration),
    Cron(Box<cron::Schedule>),
}

impl Recurrence {
    /// Fixed-period recurrence, raised to [`MIN_EVERY_PERIOD`] if shorter
    pub fn every(period: Duration) -> Self {
        Recurrence::Every(period.max(MIN_EVERY_PERIOD))
    }

    /// Delay from `now` until the next firing
    pub fn next_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Recurrence::Every(period) => Some((*period).max(MIN_EVERY_PERIOD)),
            Recurrence::Cron(schedule) => schedule
                .after(&now)
                .next()
                .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO)),
        }
    }
}

impl FromStr for Recurrence {
    type Err = HealerError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let trimmed = expr.trim();
        let invalid = |reason: String| HealerError::InvalidRecurrence {
            expr: expr.to_string(),
            reason,
        };

        if let Some(period) = trimmed.strip_prefix("every ") {
            let period = humantime::parse_duration(period.trim()).map_err(|e| invalid(e.to_string()))?;
            if period.is_zero() {
                return Err(invalid("period must be positive".to_string()));
            }
            return Ok(Recurrence::Every(period));
        }

        cron::Schedule::from_str(trimmed)
            .map(|schedule| Recurrence::Cron(Box::new(schedule)))
            .map_err(|e| invalid(e.to_string()))
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recurrence::Every(period) => write!(f, "every {}", humantime::format_duration(*period)),
            Recurrence::Cron(schedule) => write!(f, "{}", schedule),
        }
    }
}

impl fmt::Debug for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Recurrence({})", self)
    }
}

/// CPU budget gate: the task is skipped while the trailing CPU average
/// exceeds `max_cpu_percent`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LazyConfig {
    pub max_cpu_percent: f64,
}

/// A recurring job registered with the orchestrator
#[derive(Clone)]
pub struct ScheduledTask {
    pub id: String,
    pub name: String,
    pub recurrence: Recurrence,
    pub priority: u8,
    pub breaker: CircuitBreakerConfig,
    pub lazy: Option<LazyConfig>,
    pub timeout: Option<Duration>,
    pub job: Arc<dyn TaskJob>,
}

impl ScheduledTask {
    pub fn new(id: impl Into<String>, recurrence: Recurrence, job: Arc<dyn TaskJob>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            recurrence,
            priority: 0,
            breaker: CircuitBreakerConfig::default(),
            lazy: None,
            timeout: None,
            job,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_lazy(mut self, max_cpu_percent: f64) -> Self {
        self.lazy = Some(LazyConfig { max_cpu_percent });
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("recurrence", &self.recurrence)
            .field("priority", &self.priority)
            .field("breaker", &self.breaker)
            .field("lazy", &self.lazy)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_every() {
        let r: Recurrence = "every 30s".parse().unwrap();
        assert_eq!(r.next_delay(Utc::now()), Some(Duration::from_secs(30)));

        let r: Recurrence = "every 2m".parse().unwrap();
        assert_eq!(r.next_delay(Utc::now()), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_zero_period_is_raised() {
        let r = Recurrence::every(Duration::ZERO);
        assert_eq!(r.next_delay(Utc::now()), Some(MIN_EVERY_PERIOD));

        let r = Recurrence::Every(Duration::ZERO);
        assert_eq!(r.next_delay(Utc::now()), Some(MIN_EVERY_PERIOD));
    }

    #[test]
    fn test_parse_cron() {
        let r: Recurrence = "0 */5 * * * *".parse().unwrap();
        let delay = r.next_delay(Utc::now()).unwrap();
        assert!(delay <= Duration::from_secs(300));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(
            "every soon".parse::<Recurrence>(),
            Err(HealerError::InvalidRecurrence { .. })
        ));
        assert!("every 0s".parse::<Recurrence>().is_err());
        assert!("not a cron".parse::<Recurrence>().is_err());
    }

    #[tokio::test]
    async fn test_job_fn_runs_closure() {
        let job = job_fn(|| async { Err::<(), _>(anyhow::anyhow!("boom")) });
        assert!(job.run().await.is_err());

        let job = job_fn(|| async { Ok::<(), anyhow::Error>(()) });
        assert!(job.run().await.is_ok());
    }

    #[test]
    fn test_builder_defaults() {
        let job = job_fn(|| async { Ok::<(), anyhow::Error>(()) });
        let task = ScheduledTask::new("probe", Recurrence::every(Duration::from_secs(5)), job)
            .with_priority(7)
            .with_lazy(80.0);
        assert_eq!(task.name, "probe");
        assert_eq!(task.priority, 7);
        assert_eq!(task.lazy, Some(LazyConfig { max_cpu_percent: 80.0 }));
        assert!(task.timeout.is_none());
    }
}
