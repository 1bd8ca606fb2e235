//! `/proc` based metrics source
//!
//! Reads host-wide metrics from the proc filesystem:
//! - /proc/stat for aggregate CPU time (utilisation from deltas)
//! - /proc/meminfo for total and available memory
//! - /proc/loadavg for running/total process counts
//! - /proc/<pid>/stat for per-process CPU time and RSS

use super::MetricsSource;
use crate::models::{unix_now, ResourceSample, WorkloadUsage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// Assumed page size when converting RSS pages to bytes
const PAGE_SIZE: u64 = 4096;

/// Default number of workloads reported per sample
const DEFAULT_TOP_WORKLOADS: usize = 10;

/// Aggregate CPU counters from the first line of /proc/stat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub total: u64,
    pub idle: u64,
}

#[derive(Debug, Default)]
struct PreviousReading {
    cpu: Option<CpuTimes>,
    process_ticks: HashMap<u32, u64>,
}

/// Metrics source backed by the proc filesystem
pub struct ProcMetricsSource {
    proc_path: PathBuf,
    top_workloads: usize,
    previous: Mutex<PreviousReading>,
}

impl Default for ProcMetricsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcMetricsSource {
    pub fn new() -> Self {
        Self::with_proc_path("/proc")
    }

    /// Create a source reading from a custom proc root (for testing)
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_path: proc_path.into(),
            top_workloads: DEFAULT_TOP_WORKLOADS,
            previous: Mutex::new(PreviousReading::default()),
        }
    }

    pub fn with_top_workloads(mut self, count: usize) -> Self {
        self.top_workloads = count;
        self
    }

    /// Parse the aggregate `cpu` line of /proc/stat
    pub fn parse_cpu_times(content: &str) -> Result<CpuTimes> {
        let line = content
            .lines()
            .find(|l| l.starts_with("cpu "))
            .context("No aggregate cpu line in /proc/stat")?;

        let values: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .map(|v| v.parse().unwrap_or(0))
            .collect();

        // user nice system idle iowait irq softirq steal
        let total = values.iter().take(8).sum();
        let idle = values.get(3).copied().unwrap_or(0) + values.get(4).copied().unwrap_or(0);

        Ok(CpuTimes { total, idle })
    }

    /// Parse /proc/meminfo into (total_kb, available_kb)
    pub fn parse_meminfo(content: &str) -> Result<(u64, u64)> {
        let mut total = None;
        let mut available = None;

        for line in content.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 2 {
                match parts[0] {
                    "MemTotal:" => total = parts[1].parse().ok(),
                    "MemAvailable:" => available = parts[1].parse().ok(),
                    _ => {}
                }
            }
        }

        let total = total.context("MemTotal missing from /proc/meminfo")?;
        Ok((total, available.unwrap_or(0)))
    }

    /// Parse /proc/loadavg into (running, total) process counts
    pub fn parse_loadavg(content: &str) -> Result<(u32, u32)> {
        let field = content
            .split_whitespace()
            .nth(3)
            .context("Malformed /proc/loadavg")?;
        let (running, total) = field
            .split_once('/')
            .context("Malformed process field in /proc/loadavg")?;

        Ok((
            running.parse().context("Invalid running process count")?,
            total.parse().context("Invalid total process count")?,
        ))
    }

    /// Parse /proc/<pid>/stat into (comm, utime + stime ticks, rss pages)
    pub fn parse_process_stat(content: &str) -> Option<(String, u64, u64)> {
        let open = content.find('(')?;
        let close = content.rfind(')')?;
        let comm = content.get(open + 1..close)?.to_string();

        // Fields after the command name start at field 3 (state)
        let fields: Vec<&str> = content.get(close + 1..)?.split_whitespace().collect();
        let utime: u64 = fields.get(11)?.parse().ok()?;
        let stime: u64 = fields.get(12)?.parse().ok()?;
        let rss: u64 = fields.get(21)?.parse().ok()?;

        Some((comm, utime + stime, rss))
    }

    async fn read(&self, relative: &str) -> Result<String> {
        let path = self.proc_path.join(relative);
        fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    /// List numeric entries of the proc root
    async fn list_pids(&self) -> Vec<u32> {
        let mut pids = Vec::new();
        let mut entries = match fs::read_dir(&self.proc_path).await {
            Ok(entries) => entries,
            Err(_) => return pids,
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
            {
                pids.push(pid);
            }
        }

        pids
    }

    async fn read_process(proc_path: &Path, pid: u32) -> Option<(String, u64, u64)> {
        let content = fs::read_to_string(proc_path.join(format!("{}/stat", pid)))
            .await
            .ok()?;
        Self::parse_process_stat(&content)
    }
}

#[async_trait]
impl MetricsSource for ProcMetricsSource {
    async fn sample(&self) -> Result<ResourceSample> {
        let cpu = Self::parse_cpu_times(&self.read("stat").await?)?;
        let (mem_total_kb, mem_available_kb) = Self::parse_meminfo(&self.read("meminfo").await?)?;
        let (running, total) = Self::parse_loadavg(&self.read("loadavg").await?)?;

        let mut previous = self.previous.lock().await;

        let (total_delta, idle_delta) = match previous.cpu {
            Some(prev) if cpu.total > prev.total => (
                cpu.total - prev.total,
                cpu.idle.saturating_sub(prev.idle),
            ),
            // First reading: utilisation since boot
            _ => (cpu.total, cpu.idle),
        };

        let cpu_percent = if total_delta == 0 {
            0.0
        } else {
            (total_delta.saturating_sub(idle_delta)) as f64 / total_delta as f64 * 100.0
        };

        let memory_percent = if mem_total_kb == 0 {
            0.0
        } else {
            mem_total_kb.saturating_sub(mem_available_kb) as f64 / mem_total_kb as f64 * 100.0
        };

        let mut workloads = Vec::new();
        let mut ticks = HashMap::new();
        let mem_total_bytes = mem_total_kb * 1024;

        for pid in self.list_pids().await {
            let Some((name, proc_ticks, rss_pages)) = Self::read_process(&self.proc_path, pid).await
            else {
                continue;
            };
            ticks.insert(pid, proc_ticks);

            let used = match previous.process_ticks.get(&pid) {
                Some(prev) if previous.cpu.is_some() => proc_ticks.saturating_sub(*prev),
                _ => proc_ticks,
            };
            let proc_cpu = if total_delta == 0 {
                0.0
            } else {
                used as f64 / total_delta as f64 * 100.0
            };
            let proc_mem = if mem_total_bytes == 0 {
                0.0
            } else {
                (rss_pages * PAGE_SIZE) as f64 / mem_total_bytes as f64 * 100.0
            };

            workloads.push(WorkloadUsage {
                id: pid.to_string(),
                name,
                cpu_percent: proc_cpu,
                memory_percent: proc_mem,
            });
        }

        workloads.sort_by(|a, b| {
            b.cpu_percent
                .partial_cmp(&a.cpu_percent)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        workloads.truncate(self.top_workloads);

        previous.cpu = Some(cpu);
        previous.process_ticks = ticks;

        Ok(ResourceSample {
            timestamp: unix_now(),
            cpu_percent,
            memory_percent,
            running_processes: running,
            total_processes: total,
            workloads,
        })
    }
}
