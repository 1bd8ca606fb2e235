//! Tests for host metrics sampling
//!
//! These tests use a mock proc filesystem so parsing and delta computation
//! can be checked without depending on the real host.

#[cfg(test)]
mod mock_proc_tests {
    use crate::observability::HealerMetrics;
    use crate::sampler::{MetricsSource, ProcMetricsSource, SampleHistory, SamplerConfig, SamplerLoop};
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::fs;
    use tokio::sync::broadcast;

    const MEMINFO: &str = "MemTotal:       16000000 kB\nMemFree:         2000000 kB\nMemAvailable:    4000000 kB\n";

    async fn write_stat(root: &Path, user: u64, idle: u64) {
        let content = format!(
            "cpu  {} 0 0 {} 0 0 0 0 0 0\ncpu0 {} 0 0 {} 0 0 0 0 0 0\n",
            user, idle, user, idle
        );
        fs::write(root.join("stat"), content).await.unwrap();
    }

    async fn write_process(root: &Path, pid: u32, comm: &str, ticks: u64, rss: u64) {
        let dir = root.join(pid.to_string());
        fs::create_dir_all(&dir).await.unwrap();
        // pid (comm) state ppid pgrp session tty tpgid flags minflt cminflt majflt cmajflt
        // utime stime cutime cstime priority nice threads itrealvalue starttime vsize rss
        let stat = format!(
            "{} ({}) S 1 1 1 0 -1 0 0 0 0 0 {} 0 0 0 20 0 1 0 100 1000 {} 0 0",
            pid, comm, ticks, rss
        );
        fs::write(dir.join("stat"), stat).await.unwrap();
    }

    async fn create_mock_proc(temp_dir: &TempDir) {
        let root = temp_dir.path();
        write_stat(root, 100, 900).await;
        fs::write(root.join("meminfo"), MEMINFO).await.unwrap();
        fs::write(root.join("loadavg"), "0.50 0.40 0.30 3/250 4242\n")
            .await
            .unwrap();
        write_process(root, 10, "postgres", 50, 1000).await;
        write_process(root, 20, "redis-server", 10, 500).await;
        // Non-process entries are ignored
        fs::create_dir_all(root.join("sys")).await.unwrap();
    }

    #[test]
    fn test_parse_cpu_times() {
        let times = ProcMetricsSource::parse_cpu_times(
            "cpu  10 2 3 80 5 0 0 0 0 0\ncpu0 10 2 3 80 5 0 0 0 0 0\n",
        )
        .unwrap();
        assert_eq!(times.total, 100);
        assert_eq!(times.idle, 85);
    }

    #[test]
    fn test_parse_meminfo() {
        let (total, available) = ProcMetricsSource::parse_meminfo(MEMINFO).unwrap();
        assert_eq!(total, 16_000_000);
        assert_eq!(available, 4_000_000);

        assert!(ProcMetricsSource::parse_meminfo("MemFree: 10 kB\n").is_err());
    }

    #[test]
    fn test_parse_loadavg() {
        let (running, total) = ProcMetricsSource::parse_loadavg("0.00 0.01 0.05 2/345 12345").unwrap();
        assert_eq!(running, 2);
        assert_eq!(total, 345);

        assert!(ProcMetricsSource::parse_loadavg("garbage").is_err());
    }

    #[test]
    fn test_parse_process_stat_with_spaces_in_name() {
        let stat = "42 (tokio worker) R 1 1 1 0 -1 0 0 0 0 0 7 3 0 0 20 0 4 0 100 1000 256 0";
        let (name, ticks, rss) = ProcMetricsSource::parse_process_stat(stat).unwrap();
        assert_eq!(name, "tokio worker");
        assert_eq!(ticks, 10);
        assert_eq!(rss, 256);
    }

    #[tokio::test]
    async fn test_sample_uses_deltas_between_readings() {
        let temp_dir = TempDir::new().unwrap();
        create_mock_proc(&temp_dir).await;
        let source = ProcMetricsSource::with_proc_path(temp_dir.path());

        let first = source.sample().await.unwrap();
        // Since boot: 100 busy of 1000 total
        assert!((first.cpu_percent - 10.0).abs() < 0.01);
        assert!((first.memory_percent - 75.0).abs() < 0.01);
        assert_eq!(first.running_processes, 3);
        assert_eq!(first.total_processes, 250);
        assert_eq!(first.workloads.len(), 2);
        assert_eq!(first.workloads[0].name, "postgres");

        // 100 more ticks, 80 of them busy, 60 spent in redis
        write_stat(temp_dir.path(), 180, 920).await;
        write_process(temp_dir.path(), 20, "redis-server", 70, 500).await;

        let second = source.sample().await.unwrap();
        assert!((second.cpu_percent - 80.0).abs() < 0.01);
        assert_eq!(second.workloads[0].name, "redis-server");
        assert!((second.workloads[0].cpu_percent - 60.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_top_workloads_truncated() {
        let temp_dir = TempDir::new().unwrap();
        create_mock_proc(&temp_dir).await;
        let source = ProcMetricsSource::with_proc_path(temp_dir.path()).with_top_workloads(1);

        let sample = source.sample().await.unwrap();
        assert_eq!(sample.workloads.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_proc_files_error() {
        let temp_dir = TempDir::new().unwrap();
        let source = ProcMetricsSource::with_proc_path(temp_dir.path());
        assert!(source.sample().await.is_err());
    }

    #[tokio::test]
    async fn test_sampler_loop_records_and_publishes() {
        let temp_dir = TempDir::new().unwrap();
        create_mock_proc(&temp_dir).await;

        let history = Arc::new(SampleHistory::new(4));
        let sampler = SamplerLoop::new(
            Arc::new(ProcMetricsSource::with_proc_path(temp_dir.path())),
            history.clone(),
            SamplerConfig::default(),
            HealerMetrics::new(),
        );
        let mut rx = sampler.subscribe();

        let sample = sampler.sample_once().await;
        assert!(sample.is_some());
        assert_eq!(history.len().await, 1);
        assert!(history.cpu_average().await.is_some());

        let published = rx.try_recv().unwrap();
        assert_eq!(published.total_processes, 250);
    }

    #[tokio::test]
    async fn test_sampler_loop_survives_source_errors() {
        let temp_dir = TempDir::new().unwrap();
        let history = Arc::new(SampleHistory::new(4));
        let sampler = SamplerLoop::new(
            Arc::new(ProcMetricsSource::with_proc_path(temp_dir.path())),
            history.clone(),
            SamplerConfig::default(),
            HealerMetrics::new(),
        );

        assert!(sampler.sample_once().await.is_none());
        assert!(history.is_empty().await);
    }

    #[tokio::test]
    async fn test_sampler_loop_with_zero_interval_keeps_running() {
        let temp_dir = TempDir::new().unwrap();
        create_mock_proc(&temp_dir).await;

        let history = Arc::new(SampleHistory::new(4));
        let sampler = Arc::new(SamplerLoop::new(
            Arc::new(ProcMetricsSource::with_proc_path(temp_dir.path())),
            history.clone(),
            SamplerConfig {
                interval: Duration::ZERO,
                ..Default::default()
            },
            HealerMetrics::new(),
        ));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(sampler.clone().run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!handle.is_finished());
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(!history.is_empty().await);
    }

    #[tokio::test]
    async fn test_history_evicts_oldest_and_averages() {
        let history = SampleHistory::new(3);
        for cpu in [10.0, 20.0, 30.0, 40.0] {
            history
                .push(crate::models::ResourceSample {
                    cpu_percent: cpu,
                    ..Default::default()
                })
                .await;
        }

        assert_eq!(history.len().await, 3);
        assert!((history.cpu_average().await.unwrap() - 30.0).abs() < f64::EPSILON);
        assert_eq!(history.latest().await.unwrap().cpu_percent, 40.0);
    }
}
