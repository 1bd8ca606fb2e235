//! Task orchestrator
//!
//! Owns the registry of recurring jobs, schedules each on its own timer
//! and gates every firing through the task's circuit breaker and optional
//! CPU budget.

use super::{BreakerSnapshot, BreakerTransition, CircuitBreaker, ScheduledTask};
use crate::error::HealerError;
use crate::models::unix_now;
use crate::observability::{HealerMetrics, StructuredLogger};
use crate::sampler::SampleHistory;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of a single firing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    Succeeded,
    Failed(String),
    SkippedBreakerOpen,
    SkippedCpuBudget,
    /// The task was unregistered or replaced while it was executing
    Discarded,
    /// The firing referred to a task the orchestrator does not know
    UnknownTask,
}

#[derive(Debug, Default, Clone)]
struct TaskStats {
    runs: u64,
    failures: u64,
    skipped_breaker: u64,
    skipped_cpu: u64,
    last_run_at: Option<i64>,
    last_error: Option<String>,
}

struct TaskEntry {
    task: Arc<ScheduledTask>,
    breaker: CircuitBreaker,
    generation: u64,
    stats: TaskStats,
}

/// Status of one registered task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub id: String,
    pub name: String,
    pub recurrence: String,
    pub priority: u8,
    pub scheduled: bool,
    pub breaker: BreakerSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cpu_percent: Option<f64>,
    pub runs: u64,
    pub failures: u64,
    pub skipped_breaker: u64,
    pub skipped_cpu: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Orchestrator-wide status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    /// Rolling CPU average from recent samples
    pub cpu_average: Option<f64>,
    pub tasks: Vec<TaskStatus>,
}

/// Scheduler for recurring control-plane jobs
pub struct TaskOrchestrator {
    tasks: RwLock<HashMap<String, TaskEntry>>,
    schedules: Mutex<HashMap<String, JoinHandle<()>>>,
    running: AtomicBool,
    generation: AtomicU64,
    history: Arc<SampleHistory>,
    metrics: HealerMetrics,
    logger: StructuredLogger,
}

impl TaskOrchestrator {
    pub fn new(history: Arc<SampleHistory>, metrics: HealerMetrics, logger: StructuredLogger) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            schedules: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            history,
            metrics,
            logger,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Add or replace a task, scheduling it immediately if running
    pub async fn register_task(self: &Arc<Self>, task: ScheduledTask) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let id = task.id.clone();
        let entry = TaskEntry {
            breaker: CircuitBreaker::new(task.breaker),
            task: Arc::new(task),
            generation,
            stats: TaskStats::default(),
        };

        let replaced = self.tasks.write().await.insert(id.clone(), entry).is_some();
        if replaced {
            self.cancel_schedule(&id).await;
        }
        self.metrics.set_breaker_open(&id, false);

        info!(task = %id, replaced = replaced, "Registered task");

        if self.is_running() {
            self.schedule(&id).await;
        }
    }

    /// Remove a task
    ///
    /// The definition is removed before the schedule is cancelled so that a
    /// firing already in flight finds its task gone and discards its outcome.
    pub async fn unregister_task(&self, id: &str) -> bool {
        let removed = self.tasks.write().await.remove(id).is_some();
        self.cancel_schedule(id).await;

        if removed {
            self.metrics.set_breaker_open(id, false);
            info!(task = %id, "Unregistered task");
        }
        removed
    }

    /// Start scheduling every registered task, highest priority first
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut ids: Vec<(u8, String)> = {
            let tasks = self.tasks.read().await;
            tasks
                .values()
                .map(|e| (e.task.priority, e.task.id.clone()))
                .collect()
        };
        ids.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        info!(tasks = ids.len(), "Starting task orchestrator");
        for (_, id) in ids {
            self.schedule(&id).await;
        }
    }

    /// Cancel every pending schedule; safe to call more than once
    pub async fn shutdown(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        let mut schedules = self.schedules.lock().await;
        for (_, handle) in schedules.drain() {
            handle.abort();
        }
        if was_running {
            info!("Task orchestrator stopped");
        }
    }

    async fn schedule(self: &Arc<Self>, id: &str) {
        let (recurrence, generation) = {
            let tasks = self.tasks.read().await;
            match tasks.get(id) {
                Some(entry) => (entry.task.recurrence.clone(), entry.generation),
                None => return,
            }
        };

        let this = Arc::clone(self);
        let task_id = id.to_string();
        let handle = tokio::spawn(async move {
            loop {
                let Some(delay) = recurrence.next_delay(chrono::Utc::now()) else {
                    debug!(task = %task_id, "Recurrence exhausted");
                    break;
                };
                tokio::time::sleep(delay).await;
                this.fire(&task_id, generation).await;
            }
        });

        if let Some(previous) = self.schedules.lock().await.insert(id.to_string(), handle) {
            previous.abort();
        }
    }

    async fn cancel_schedule(&self, id: &str) {
        if let Some(handle) = self.schedules.lock().await.remove(id) {
            handle.abort();
        }
    }

    /// Fire a task now, outside its schedule
    pub async fn run_now(&self, id: &str) -> Result<FireOutcome, HealerError> {
        let generation = self
            .tasks
            .read()
            .await
            .get(id)
            .map(|e| e.generation)
            .ok_or_else(|| HealerError::UnknownTask(id.to_string()))?;
        Ok(self.fire(id, generation).await)
    }

    /// Execute one firing of a task registration
    pub async fn fire(&self, id: &str, generation: u64) -> FireOutcome {
        let task = {
            let mut tasks = self.tasks.write().await;
            let entry = match tasks.get_mut(id) {
                Some(entry) if entry.generation == generation => entry,
                _ => {
                    warn!(task = %id, "Fired for a task that is no longer registered, skipping");
                    return FireOutcome::UnknownTask;
                }
            };

            let (allowed, transition) = entry.breaker.allows(Instant::now());
            self.note_transition(id, transition, &entry.breaker);
            if !allowed {
                entry.stats.skipped_breaker += 1;
                self.metrics.inc_task_runs(id, "skipped_breaker");
                debug!(task = %id, "Circuit breaker open, skipping");
                return FireOutcome::SkippedBreakerOpen;
            }
            entry.task.clone()
        };

        if let Some(lazy) = task.lazy {
            if let Some(cpu) = self.history.cpu_average().await {
                if cpu > lazy.max_cpu_percent {
                    if let Some(entry) = self.tasks.write().await.get_mut(id) {
                        entry.stats.skipped_cpu += 1;
                    }
                    self.metrics.inc_task_runs(id, "skipped_cpu");
                    debug!(
                        task = %id,
                        cpu_average = cpu,
                        budget = lazy.max_cpu_percent,
                        "CPU above budget, deferring"
                    );
                    return FireOutcome::SkippedCpuBudget;
                }
            }
        }

        let result = Self::execute(&task).await;

        // The registration may have changed while the job ran
        let mut tasks = self.tasks.write().await;
        let entry = match tasks.get_mut(id) {
            Some(entry) if entry.generation == generation => entry,
            _ => {
                debug!(task = %id, "Task removed while executing, discarding outcome");
                return FireOutcome::Discarded;
            }
        };

        entry.stats.runs += 1;
        entry.stats.last_run_at = Some(unix_now());

        match result {
            Ok(()) => {
                let transition = entry.breaker.record_success();
                self.note_transition(id, transition, &entry.breaker);
                self.metrics.inc_task_runs(id, "success");
                FireOutcome::Succeeded
            }
            Err(error) => {
                entry.stats.failures += 1;
                entry.stats.last_error = Some(error.clone());
                let transition = entry.breaker.record_failure(Instant::now());
                self.note_transition(id, transition, &entry.breaker);
                self.metrics.inc_task_runs(id, "failure");
                warn!(task = %id, error = %error, "Task execution failed");
                FireOutcome::Failed(error)
            }
        }
    }

    /// Run the job in its own task so panics and timeouts become failures
    async fn execute(task: &Arc<ScheduledTask>) -> Result<(), String> {
        let job = task.job.clone();
        let handle = tokio::spawn(async move { job.run().await });

        let joined = match task.timeout {
            Some(limit) => {
                let abort = handle.abort_handle();
                match tokio::time::timeout(limit, handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        abort.abort();
                        return Err(format!("timed out after {:?}", limit));
                    }
                }
            }
            None => handle.await,
        };

        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(e) if e.is_panic() => Err("task panicked".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    fn note_transition(&self, id: &str, transition: Option<BreakerTransition>, breaker: &CircuitBreaker) {
        match transition {
            Some(BreakerTransition::Opened) => {
                self.metrics.set_breaker_open(id, true);
                self.logger
                    .log_breaker_transition(id, true, breaker.failure_count());
            }
            Some(BreakerTransition::Closed) => {
                self.metrics.set_breaker_open(id, false);
                self.logger.log_breaker_transition(id, false, 0);
            }
            None => {}
        }
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.tasks.read().await.contains_key(id)
    }

    /// Status of every task plus the rolling CPU average
    pub async fn status(&self) -> OrchestratorStatus {
        let now = Instant::now();
        let scheduled: Vec<String> = {
            let schedules = self.schedules.lock().await;
            schedules
                .iter()
                .filter(|(_, handle)| !handle.is_finished())
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut tasks: Vec<TaskStatus> = {
            let mut entries = self.tasks.write().await;
            entries
                .values_mut()
                .map(|entry| {
                    let transition = entry.breaker.refresh(now);
                    self.note_transition(&entry.task.id, transition, &entry.breaker);
                    TaskStatus {
                        id: entry.task.id.clone(),
                        name: entry.task.name.clone(),
                        recurrence: entry.task.recurrence.to_string(),
                        priority: entry.task.priority,
                        scheduled: scheduled.contains(&entry.task.id),
                        breaker: entry.breaker.snapshot(now),
                        max_cpu_percent: entry.task.lazy.map(|l| l.max_cpu_percent),
                        runs: entry.stats.runs,
                        failures: entry.stats.failures,
                        skipped_breaker: entry.stats.skipped_breaker,
                        skipped_cpu: entry.stats.skipped_cpu,
                        last_run_at: entry.stats.last_run_at,
                        last_error: entry.stats.last_error.clone(),
                    }
                })
                .collect()
        };
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

        OrchestratorStatus {
            running: self.is_running(),
            cpu_average: self.history.cpu_average().await,
            tasks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceSample;
    use crate::orchestrator::{job_fn, CircuitBreakerConfig, Recurrence};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn orchestrator() -> Arc<TaskOrchestrator> {
        Arc::new(TaskOrchestrator::new(
            Arc::new(SampleHistory::new(4)),
            HealerMetrics::new(),
            StructuredLogger::new("test-node"),
        ))
    }

    fn counting_task(id: &str, counter: Arc<AtomicUsize>, fail: bool) -> ScheduledTask {
        ScheduledTask::new(
            id,
            Recurrence::every(Duration::from_secs(10)),
            job_fn(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if fail {
                        anyhow::bail!("job failed");
                    }
                    Ok(())
                }
            }),
        )
        .with_breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            cooldown: Duration::from_secs(30),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_blocks_and_recovers() {
        let orch = orchestrator();
        let counter = Arc::new(AtomicUsize::new(0));
        orch.register_task(counting_task("flaky", counter.clone(), true)).await;

        for _ in 0..3 {
            assert!(matches!(orch.run_now("flaky").await.unwrap(), FireOutcome::Failed(_)));
        }
        assert_eq!(orch.run_now("flaky").await.unwrap(), FireOutcome::SkippedBreakerOpen);
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(orch.run_now("flaky").await.unwrap(), FireOutcome::SkippedBreakerOpen);

        tokio::time::advance(Duration::from_secs(1)).await;
        let status = orch.status().await;
        let breaker = &status.tasks[0].breaker;
        assert!(!breaker.is_open);
        assert_eq!(breaker.failure_count, 0);
        assert_eq!(breaker.success_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_then_two_successes_after_cooldown() {
        let orch = orchestrator();
        let fail = Arc::new(AtomicBool::new(true));
        let flag = fail.clone();
        let task = ScheduledTask::new(
            "report",
            Recurrence::every(Duration::from_secs(10)),
            job_fn(move || {
                let flag = flag.clone();
                async move {
                    if flag.load(Ordering::SeqCst) {
                        anyhow::bail!("upstream unavailable");
                    }
                    Ok(())
                }
            }),
        )
        .with_breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            cooldown: Duration::from_secs(30),
        });
        orch.register_task(task).await;

        for _ in 0..3 {
            orch.run_now("report").await.unwrap();
        }
        assert!(orch.status().await.tasks[0].breaker.is_open);
        assert_eq!(orch.run_now("report").await.unwrap(), FireOutcome::SkippedBreakerOpen);

        tokio::time::advance(Duration::from_secs(30)).await;
        fail.store(false, Ordering::SeqCst);

        assert_eq!(orch.run_now("report").await.unwrap(), FireOutcome::Succeeded);
        assert_eq!(orch.run_now("report").await.unwrap(), FireOutcome::Succeeded);

        let status = orch.status().await;
        let breaker = &status.tasks[0].breaker;
        assert!(!breaker.is_open);
        assert_eq!(breaker.failure_count, 0);
        // Successes after an auto-close accumulate again from zero
        assert_eq!(breaker.success_count, 2);
        assert_eq!(status.tasks[0].skipped_breaker, 1);
    }

    #[tokio::test]
    async fn test_lazy_gate_skips_when_cpu_over_budget() {
        let history = Arc::new(SampleHistory::new(4));
        let orch = Arc::new(TaskOrchestrator::new(
            history.clone(),
            HealerMetrics::new(),
            StructuredLogger::new("test-node"),
        ));
        let counter = Arc::new(AtomicUsize::new(0));
        orch.register_task(counting_task("lazy", counter.clone(), false).with_lazy(50.0))
            .await;

        // No samples yet: the gate does not block
        assert_eq!(orch.run_now("lazy").await.unwrap(), FireOutcome::Succeeded);

        history
            .push(ResourceSample {
                cpu_percent: 90.0,
                ..Default::default()
            })
            .await;
        assert_eq!(orch.run_now("lazy").await.unwrap(), FireOutcome::SkippedCpuBudget);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let status = orch.status().await;
        assert_eq!(status.cpu_average, Some(90.0));
        assert_eq!(status.tasks[0].skipped_cpu, 1);
    }

    #[tokio::test]
    async fn test_unregister_during_execution_discards_outcome() {
        let orch = orchestrator();
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let (s, r) = (started.clone(), release.clone());

        let task = ScheduledTask::new(
            "slow",
            Recurrence::every(Duration::from_secs(60)),
            job_fn(move || {
                let (s, r) = (s.clone(), r.clone());
                async move {
                    s.notify_one();
                    r.notified().await;
                    anyhow::bail!("would have tripped the breaker")
                }
            }),
        );
        orch.register_task(task).await;

        let runner = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.run_now("slow").await })
        };

        started.notified().await;
        assert!(orch.unregister_task("slow").await);
        release.notify_one();

        let outcome = runner.await.unwrap().unwrap();
        assert_eq!(outcome, FireOutcome::Discarded);
        assert!(!orch.contains("slow").await);
        assert!(orch.status().await.tasks.is_empty());
    }

    #[tokio::test]
    async fn test_replaced_task_ignores_stale_outcome() {
        let orch = orchestrator();
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let (s, r) = (started.clone(), release.clone());

        orch.register_task(ScheduledTask::new(
            "job",
            Recurrence::every(Duration::from_secs(60)),
            job_fn(move || {
                let (s, r) = (s.clone(), r.clone());
                async move {
                    s.notify_one();
                    r.notified().await;
                    anyhow::bail!("stale failure")
                }
            }),
        ))
        .await;

        let runner = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.run_now("job").await })
        };
        started.notified().await;

        let counter = Arc::new(AtomicUsize::new(0));
        orch.register_task(counting_task("job", counter, false)).await;
        release.notify_one();

        assert_eq!(runner.await.unwrap().unwrap(), FireOutcome::Discarded);
        let status = orch.status().await;
        assert_eq!(status.tasks[0].breaker.failure_count, 0);
        assert_eq!(status.tasks[0].runs, 0);
    }

    #[tokio::test]
    async fn test_fire_unknown_task() {
        let orch = orchestrator();
        assert!(matches!(
            orch.run_now("missing").await,
            Err(HealerError::UnknownTask(_))
        ));
        assert_eq!(orch.fire("missing", 1).await, FireOutcome::UnknownTask);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let orch = orchestrator();
        let task = ScheduledTask::new(
            "hang",
            Recurrence::every(Duration::from_secs(60)),
            job_fn(|| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok::<(), anyhow::Error>(())
            }),
        )
        .with_timeout(Duration::from_secs(1));
        orch.register_task(task).await;

        match orch.run_now("hang").await.unwrap() {
            FireOutcome::Failed(reason) => assert!(reason.contains("timed out")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panicking_job_is_recorded_as_failure() {
        let orch = orchestrator();
        orch.register_task(ScheduledTask::new(
            "panics",
            Recurrence::every(Duration::from_secs(60)),
            job_fn(|| async {
                if true {
                    panic!("bug in job");
                }
                Ok::<(), anyhow::Error>(())
            }),
        ))
        .await;

        assert_eq!(
            orch.run_now("panics").await.unwrap(),
            FireOutcome::Failed("task panicked".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_firing_and_idempotent_shutdown() {
        let orch = orchestrator();
        let counter = Arc::new(AtomicUsize::new(0));
        orch.register_task(counting_task("tick", counter.clone(), false)).await;

        orch.start().await;
        assert!(orch.status().await.tasks[0].scheduled);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        // Registering while running schedules immediately
        let other = Arc::new(AtomicUsize::new(0));
        orch.register_task(counting_task("late", other.clone(), false)).await;
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(other.load(Ordering::SeqCst), 1);

        orch.shutdown().await;
        orch.shutdown().await;
        let status = orch.status().await;
        assert!(!status.running);
        assert!(status.tasks.iter().all(|t| !t.scheduled));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
