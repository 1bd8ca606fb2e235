//! Recurring task orchestration
//!
//! Tasks run on their own recurrence, each guarded by a circuit breaker
//! and optionally by a CPU budget taken from the sampler history.

mod breaker;
mod scheduler;
mod task;

pub use breaker::{BreakerSnapshot, BreakerTransition, CircuitBreaker, CircuitBreakerConfig};
pub use scheduler::{FireOutcome, OrchestratorStatus, TaskOrchestrator, TaskStatus};
pub use task::{job_fn, FnJob, LazyConfig, Recurrence, ScheduledTask, TaskJob};
