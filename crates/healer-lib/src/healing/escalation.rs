//! Cancellable delayed escalations
//!
//! One pending timer per component, tagged with the degraded episode it was
//! armed for. Re-arming replaces the previous timer; a recovery cancels it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

struct PendingEscalation {
    episode: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct EscalationTimers {
    timers: Mutex<HashMap<String, PendingEscalation>>,
    next_episode: AtomicU64,
}

impl EscalationTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an identity for a new degraded episode
    pub fn next_episode(&self) -> u64 {
        self.next_episode.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Run `on_fire` after `delay` unless cancelled first
    pub async fn arm<F>(&self, component: &str, episode: u64, delay: Duration, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire.await;
        });

        let previous = self
            .timers
            .lock()
            .await
            .insert(component.to_string(), PendingEscalation { episode, handle });
        if let Some(previous) = previous {
            previous.handle.abort();
        }
        debug!(component = %component, episode = episode, delay_secs = delay.as_secs(), "Escalation armed");
    }

    /// Cancel the pending escalation for a component
    pub async fn cancel(&self, component: &str) -> bool {
        match self.timers.lock().await.remove(component) {
            Some(pending) => {
                pending.handle.abort();
                debug!(component = %component, episode = pending.episode, "Escalation cancelled");
                true
            }
            None => false,
        }
    }

    /// Forget a timer that has fired, if it still belongs to `episode`
    pub async fn finish(&self, component: &str, episode: u64) {
        let mut timers = self.timers.lock().await;
        if timers.get(component).map(|p| p.episode) == Some(episode) {
            timers.remove(component);
        }
    }

    pub async fn cancel_all(&self) -> usize {
        let mut timers = self.timers.lock().await;
        let count = timers.len();
        for (_, pending) in timers.drain() {
            pending.handle.abort();
        }
        count
    }

    /// Components with an escalation pending, sorted
    pub async fn pending(&self) -> Vec<String> {
        let mut pending: Vec<String> = self.timers.lock().await.keys().cloned().collect();
        pending.sort();
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let timers = Arc::new(EscalationTimers::new());
        let fired = Arc::new(AtomicBool::new(false));
        let episode = timers.next_episode();

        let (flag, t) = (fired.clone(), timers.clone());
        timers
            .arm("cache", episode, Duration::from_secs(60), async move {
                flag.store(true, Ordering::SeqCst);
                t.finish("cache", episode).await;
            })
            .await;

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(timers.pending().await, vec!["cache"]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(fired.load(Ordering::SeqCst));
        assert!(timers.pending().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let timers = EscalationTimers::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        timers
            .arm("api", timers.next_episode(), Duration::from_secs(10), async move {
                flag.store(true, Ordering::SeqCst);
            })
            .await;

        assert!(timers.cancel("api").await);
        assert!(!timers.cancel("api").await);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous_episode() {
        let timers = Arc::new(EscalationTimers::new());
        let first = Arc::new(AtomicBool::new(false));
        let flag = first.clone();
        timers
            .arm("db", timers.next_episode(), Duration::from_secs(10), async move {
                flag.store(true, Ordering::SeqCst);
            })
            .await;
        timers
            .arm("db", timers.next_episode(), Duration::from_secs(100), async {})
            .await;

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!first.load(Ordering::SeqCst));
        assert_eq!(timers.cancel_all().await, 1);
    }
}
