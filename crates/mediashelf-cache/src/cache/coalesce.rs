//! In-flight request coalescing.
//!
//! Concurrent misses on the same key share one computation: the first caller
//! starts it, later callers await the same shared future. The registry entry
//! is removed when the computation settles, on success, error or panic.

use std::collections::HashMap;
use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use mediashelf_storage::StorageError;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;

/// Failure of a coalesced or cached query.
///
/// Cloneable so every waiter of a shared computation receives the same error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
    /// The caller's fetch failed. The original error is kept intact.
    #[error("query failed: {0}")]
    Source(Arc<dyn Error + Send + Sync>),

    #[error("query result serialization failed: {0}")]
    Serialization(String),

    /// The shared computation panicked or was cancelled.
    #[error("shared query aborted: {0}")]
    Aborted(String),
}

impl QueryError {
    pub fn source_error<E: Error + Send + Sync + 'static>(error: E) -> Self {
        Self::Source(Arc::new(error))
    }

    /// The caller's original error, for downcasting.
    pub fn source_ref(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        match self {
            Self::Source(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<StorageError> for QueryError {
    fn from(error: StorageError) -> Self {
        Self::source_error(error)
    }
}

type SharedQuery = Shared<BoxFuture<'static, Result<serde_json::Value, QueryError>>>;
type Registry = Arc<Mutex<HashMap<String, (u64, SharedQuery)>>>;

/// Process-wide registry of in-flight computations keyed by cache key.
#[derive(Default)]
pub struct QueryCoalescer {
    in_flight: Registry,
    next_id: AtomicU64,
}

/// Removes the registry entry it was created for when dropped, including
/// during a panic unwind.
struct InFlightGuard {
    registry: Registry,
    key: String,
    id: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut map = self.registry.lock();
        if map.get(&self.key).is_some_and(|(id, _)| *id == self.id) {
            map.remove(&self.key);
        }
    }
}

impl QueryCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of computations currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.lock().contains_key(key)
    }

    /// Runs `compute` unless a computation for `key` is already in flight, in
    /// which case its result is awaited instead.
    ///
    /// The computation runs on its own task, so it completes even if every
    /// waiter is dropped. Results cross waiters as JSON, so `T` must
    /// round-trip through `serde_json`. `compute` is called with the registry
    /// locked and should only construct its future; a panic there propagates
    /// to the caller and registers nothing.
    ///
    /// # Errors
    ///
    /// The computation's error, shared by all waiters.
    pub async fn coalesce<T, F, Fut>(&self, key: &str, compute: F) -> Result<T, QueryError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let (shared, start) = {
            let mut map = self.in_flight.lock();
            if let Some((_, existing)) = map.get(key) {
                crate::metrics::record_query_coalesced();
                tracing::debug!(key = %key, "joining in-flight query");
                (existing.clone(), None)
            } else {
                let fut = compute();
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = oneshot::channel();
                let shared = async move {
                    rx.await.unwrap_or_else(|_| {
                        Err(QueryError::Aborted(
                            "computation ended without a result".to_string(),
                        ))
                    })
                }
                .boxed()
                .shared();
                map.insert(key.to_string(), (id, shared.clone()));
                (shared, Some((id, fut, tx)))
            }
        };

        // Spawned with the registry unlocked: the guard locks it when dropped.
        if let Some((id, fut, tx)) = start {
            let guard = InFlightGuard {
                registry: Arc::clone(&self.in_flight),
                key: key.to_string(),
                id,
            };
            tokio::spawn(async move {
                // Declared in this order so an unwind drops the guard before
                // the sender wakes the waiters.
                let tx = tx;
                let guard = guard;
                let result = match fut.await {
                    Ok(value) => serde_json::to_value(value)
                        .map_err(|e| QueryError::Serialization(e.to_string())),
                    Err(e) => Err(e),
                };
                drop(guard);
                let _ = tx.send(result);
            });
        }

        let value = shared.await?;
        serde_json::from_value(value).map_err(|e| QueryError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::AssertUnwindSafe;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_calls_share_one_computation() {
        let coalescer = Arc::new(QueryCoalescer::new());
        let calls = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let coalescer = Arc::clone(&coalescer);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                coalescer
                    .coalesce("k", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, QueryError>(vec![1, 2, 3])
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), vec![1, 2, 3]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coalescer.in_flight(), 0);

        let counter = Arc::clone(&calls);
        let again: Vec<i32> = coalescer
            .coalesce("k", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, QueryError>(vec![4])
            })
            .await
            .unwrap();
        assert_eq!(again, vec![4]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_are_shared_and_entry_removed() {
        let coalescer = QueryCoalescer::new();
        let result: Result<u32, QueryError> = coalescer
            .coalesce("k", || async {
                Err::<u32, _>(QueryError::from(StorageError::connection_error("db down")))
            })
            .await;

        let err = result.unwrap_err();
        let source = err.source_ref().unwrap();
        assert!(source.downcast_ref::<StorageError>().is_some());
        assert!(!coalescer.is_in_flight("k"));
    }

    #[tokio::test]
    async fn test_panic_becomes_aborted() {
        let coalescer = QueryCoalescer::new();
        let result: Result<u32, QueryError> = coalescer
            .coalesce("k", || async {
                let fail = true;
                if fail {
                    panic!("boom");
                }
                Ok::<u32, QueryError>(0)
            })
            .await;

        assert!(matches!(result, Err(QueryError::Aborted(_))));
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_panicking_constructor_propagates() {
        let coalescer = QueryCoalescer::new();
        let result = AssertUnwindSafe(coalescer.coalesce::<u32, _, _>(
            "k",
            || -> std::future::Ready<Result<u32, QueryError>> { panic!("constructor failed") },
        ))
        .catch_unwind()
        .await;

        assert!(result.is_err());
        assert_eq!(coalescer.in_flight(), 0);

        // The registry is still usable afterwards.
        let value: u32 = coalescer
            .coalesce("k", || async { Ok::<u32, QueryError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_coalesce() {
        let coalescer = QueryCoalescer::new();
        let (a, b) = tokio::join!(
            coalescer.coalesce("a", || async { Ok::<u32, QueryError>(1) }),
            coalescer.coalesce("b", || async { Ok::<u32, QueryError>(2) }),
        );
        assert_eq!((a.unwrap(), b.unwrap()), (1, 2));
    }
}
