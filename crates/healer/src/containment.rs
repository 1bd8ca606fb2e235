//! cgroup v2 workload controller
//!
//! Isolation moves a process into a dedicated group under the cgroup v2
//! root (optionally CPU-capped via `cpu.max`) and remembers where it came
//! from so release can move it back:
//! - /proc/<pid>/cgroup gives the original group (`0::/path`)
//! - <root>/healer-isolated/cgroup.procs receives the pid
//!
//! Deprioritising and terminating use `renice` and `kill`; scale-down runs
//! an optional hook command.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use healer_lib::{containment::WorkloadController, ResourceKind, WorkloadUsage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const ISOLATION_GROUP: &str = "healer-isolated";

/// Nice value applied by the deprioritize action
const DEPRIORITIZED_NICE: i32 = 10;

pub struct CgroupWorkloadController {
    cgroup_root: PathBuf,
    proc_path: PathBuf,
    cpu_max: Option<String>,
    scale_down_command: Option<Vec<String>>,
    origins: Mutex<HashMap<String, PathBuf>>,
}

impl CgroupWorkloadController {
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
            proc_path: PathBuf::from("/proc"),
            cpu_max: None,
            scale_down_command: None,
            origins: Mutex::new(HashMap::new()),
        }
    }

    /// Use a custom proc root (for testing)
    pub fn with_proc_path(mut self, proc_path: impl Into<PathBuf>) -> Self {
        self.proc_path = proc_path.into();
        self
    }

    pub fn with_cpu_max(mut self, cpu_max: Option<String>) -> Self {
        self.cpu_max = cpu_max;
        self
    }

    pub fn with_scale_down_command(mut self, command: Option<Vec<String>>) -> Self {
        self.scale_down_command = command;
        self
    }

    fn isolation_group(&self) -> PathBuf {
        self.cgroup_root.join(ISOLATION_GROUP)
    }

    /// Parse the unified-hierarchy entry of /proc/<pid>/cgroup
    pub fn parse_cgroup_path(content: &str) -> Option<String> {
        content
            .lines()
            .find_map(|line| line.strip_prefix("0::"))
            .map(|path| path.trim().to_string())
    }

    async fn current_group(&self, pid: &str) -> Result<PathBuf> {
        let path = self.proc_path.join(pid).join("cgroup");
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let relative = Self::parse_cgroup_path(&content)
            .with_context(|| format!("No cgroup v2 entry for pid {}", pid))?;
        Ok(self.cgroup_root.join(relative.trim_start_matches('/')))
    }

    async fn ensure_isolation_group(&self) -> Result<PathBuf> {
        let group = self.isolation_group();
        if fs::metadata(&group).await.is_err() {
            fs::create_dir_all(&group)
                .await
                .with_context(|| format!("Failed to create {}", group.display()))?;
            info!(group = %group.display(), "Created isolation cgroup");
        }
        if let Some(cpu_max) = &self.cpu_max {
            if let Err(e) = fs::write(group.join("cpu.max"), cpu_max).await {
                warn!(error = %e, "Failed to cap isolation cgroup CPU");
            }
        }
        Ok(group)
    }

    async fn move_pid(group: &Path, pid: &str) -> Result<()> {
        let procs = group.join("cgroup.procs");
        fs::write(&procs, pid)
            .await
            .with_context(|| format!("Failed to move pid {} into {}", pid, group.display()))
    }
}

fn validate_pid(id: &str) -> Result<()> {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        bail!("workload id {} is not a pid", id);
    }
    Ok(())
}

async fn run(program: &str, args: &[&str]) -> Result<()> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .with_context(|| format!("Failed to run {}", program))?;
    if !output.status.success() {
        bail!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

#[async_trait]
impl WorkloadController for CgroupWorkloadController {
    async fn isolate(&self, workload: &WorkloadUsage) -> Result<()> {
        validate_pid(&workload.id)?;
        let origin = self.current_group(&workload.id).await?;
        let group = self.ensure_isolation_group().await?;
        Self::move_pid(&group, &workload.id).await?;

        self.origins.lock().await.insert(workload.id.clone(), origin);
        info!(pid = %workload.id, name = %workload.name, "Workload isolated");
        Ok(())
    }

    async fn release(&self, workload_id: &str) -> Result<()> {
        let Some(origin) = self.origins.lock().await.remove(workload_id) else {
            debug!(pid = %workload_id, "No recorded origin, nothing to release");
            return Ok(());
        };
        Self::move_pid(&origin, workload_id).await?;
        info!(pid = %workload_id, group = %origin.display(), "Workload released");
        Ok(())
    }

    async fn deprioritize(&self, workload: &WorkloadUsage) -> Result<()> {
        validate_pid(&workload.id)?;
        let nice = DEPRIORITIZED_NICE.to_string();
        run("renice", &["-n", &nice, "-p", &workload.id]).await
    }

    async fn terminate(&self, workload: &WorkloadUsage) -> Result<()> {
        validate_pid(&workload.id)?;
        warn!(pid = %workload.id, name = %workload.name, "Terminating workload");
        run("kill", &["-TERM", &workload.id]).await?;
        self.origins.lock().await.remove(&workload.id);
        Ok(())
    }

    async fn scale_down(&self, protocol_id: &str, resource: ResourceKind) -> Result<()> {
        let Some((program, args)) = self
            .scale_down_command
            .as_ref()
            .and_then(|c| c.split_first())
        else {
            debug!(protocol = %protocol_id, "No scale-down hook configured");
            return Ok(());
        };
        let status = Command::new(program)
            .args(args)
            .env("HEALER_PROTOCOL", protocol_id)
            .env("HEALER_RESOURCE", resource.to_string())
            .status()
            .await
            .with_context(|| format!("Failed to run scale-down hook {}", program))?;
        if !status.success() {
            bail!("scale-down hook exited with {}", status);
        }
        Ok(())
    }

    async fn workload_exists(&self, workload_id: &str) -> bool {
        if validate_pid(workload_id).is_err() {
            return false;
        }
        let alive = fs::metadata(self.proc_path.join(workload_id)).await.is_ok();
        if !alive {
            self.origins.lock().await.remove(workload_id);
        }
        alive
    }
}
