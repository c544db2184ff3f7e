// Request deduplication.
// At most one in-flight call per key; late callers share the same outcome.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio::sync::watch;
use tracing::debug;

use crate::error::{Result, StarhopError};

type Settled<T> = Option<Result<T>>;

enum Entry<T> {
    Leader(watch::Sender<Settled<T>>),
    Joiner(watch::Receiver<Settled<T>>),
}

/// In-process single-flight table.
///
/// The first caller for a key becomes the leader and runs the factory; callers
/// arriving while the call is pending join it and observe the identical
/// outcome. The entry is removed whenever the call settles, including when the
/// leader is cancelled mid-flight, so the next request starts fresh.
pub struct SingleFlight<T: Clone> {
    inflight: Mutex<HashMap<String, watch::Receiver<Settled<T>>>>,
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `factory` under `key`, or join the call already running for it.
    pub async fn run<F, Fut>(&self, key: &str, factory: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let entry = {
            let mut inflight = self.inflight.lock().expect("in-flight table lock poisoned");
            if let Some(rx) = inflight.get(key) {
                Entry::Joiner(rx.clone())
            } else {
                let (tx, rx) = watch::channel(None);
                inflight.insert(key.to_owned(), rx);
                Entry::Leader(tx)
            }
        };

        match entry {
            Entry::Joiner(mut rx) => {
                debug!(key, "joining in-flight request");
                loop {
                    if let Some(result) = rx.borrow_and_update().clone() {
                        return result;
                    }
                    if rx.changed().await.is_err() {
                        // Leader dropped without settling.
                        return Err(StarhopError::Cancelled);
                    }
                }
            }
            Entry::Leader(tx) => {
                // Removal must happen on every exit path, cancellation
                // included, so cleanup lives in a drop guard.
                let _cleanup = RemoveOnSettle {
                    inflight: &self.inflight,
                    key,
                };
                let result = factory().await;
                let _ = tx.send(Some(result.clone()));
                result
            }
        }
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct RemoveOnSettle<'a, T: Clone> {
    inflight: &'a Mutex<HashMap<String, watch::Receiver<Settled<T>>>>,
    key: &'a str,
}

impl<T: Clone> Drop for RemoveOnSettle<'_, T> {
    fn drop(&mut self) {
        if let Ok(mut inflight) = self.inflight.lock() {
            inflight.remove(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use tokio::time;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_call() {
        let flight = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                flight
                    .run("Rust-100", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        time::sleep(Duration::from_millis(50)).await;
                        Ok(42u32)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_shared_by_all_joiners() {
        let flight = Arc::new(SingleFlight::<u32>::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                flight
                    .run("Go-100", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        time::sleep(Duration::from_millis(10)).await;
                        Err(StarhopError::Http(503))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Err(StarhopError::Http(503)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_removed_after_settlement() {
        let flight = SingleFlight::new();
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let result = flight
                .run("Rust-100", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1u32)
                })
                .await;
            assert_eq!(result, Ok(1));
        }

        // Second run started fresh, after the first settled.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_do_not_share() {
        let flight = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicU32::new(0));

        let a = {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                flight
                    .run("Rust-100", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        time::sleep(Duration::from_millis(10)).await;
                        Ok(1u32)
                    })
                    .await
            })
        };
        let b = {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                flight
                    .run("Go-100", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        time::sleep(Duration::from_millis(10)).await;
                        Ok(2u32)
                    })
                    .await
            })
        };

        assert_eq!(a.await.unwrap(), Ok(1));
        assert_eq!(b.await.unwrap(), Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_leader_releases_joiners_and_key() {
        let flight = Arc::new(SingleFlight::<u32>::new());

        let leader = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move {
                flight
                    .run("Rust-100", || async {
                        time::sleep(Duration::from_secs(3600)).await;
                        Ok(1)
                    })
                    .await
            })
        };
        // Let the leader claim the key before the joiner arrives.
        tokio::task::yield_now().await;

        let joiner = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move { flight.run("Rust-100", || async { Ok(2) }).await })
        };
        tokio::task::yield_now().await;

        leader.abort();
        assert_eq!(joiner.await.unwrap(), Err(StarhopError::Cancelled));

        // The key is free again; a fresh call becomes the leader.
        let result = flight.run("Rust-100", || async { Ok(3) }).await;
        assert_eq!(result, Ok(3));
    }
}
