//! Serialized state changes with rollback

use std::future::Future;
use tokio::sync::Mutex;

/// Run `apply` while holding `lock`; if it fails, run `rollback` before the
/// lock is released and return the original error.
pub async fn with_rollback<T, E, A, R, RF>(lock: &Mutex<()>, apply: A, rollback: R) -> Result<T, E>
where
    A: Future<Output = Result<T, E>>,
    R: FnOnce() -> RF,
    RF: Future<Output = ()>,
{
    let _guard = lock.lock().await;
    match apply.await {
        Ok(value) => Ok(value),
        Err(e) => {
            rollback().await;
            Err(e)
        }
    }
}
