//! Single-flight coalescing (spec.md §4.2, §4.3, §8): concurrent identical
//! calls for the same logical key share one underlying future, and every
//! waiter observes the same result. The map mutation itself is guarded by a
//! short-lived `std::sync::Mutex` critical section that never spans the
//! network I/O of the shared future (spec.md §5's shared-resource policy).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use futures::future::{BoxFuture, FutureExt, Shared};

type SharedResult<V, E> = Result<V, E>;
type InFlight<V, E> = Shared<BoxFuture<'static, SharedResult<V, E>>>;

/// Coalesces concurrent calls keyed by `String`. `V`/`E` must be `Clone`
/// because the same resolved value (or error) is fanned out to every
/// waiter, including ones that joined after the call finished.
pub struct SingleFlight<V, E> {
    inflight: Mutex<HashMap<String, InFlight<V, E>>>,
}

impl<V, E> Default for SingleFlight<V, E> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

impl<V, E> SingleFlight<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make` for `key` unless a call for the same key is already in
    /// flight, in which case piggy-back on it. The in-flight entry is
    /// removed once the call resolves so the next caller after that starts
    /// a fresh call rather than replaying a stale result forever.
    pub async fn run<F>(&self, key: &str, make: F) -> SharedResult<V, E>
    where
        F: Future<Output = SharedResult<V, E>> + Send + 'static,
    {
        let (fut, is_leader) = {
            let mut guard = self.inflight.lock().expect("single-flight mutex poisoned");
            if let Some(existing) = guard.get(key) {
                (existing.clone(), false)
            } else {
                let boxed: BoxFuture<'static, SharedResult<V, E>> = make.boxed();
                let shared = boxed.shared();
                guard.insert(key.to_string(), shared.clone());
                (shared, true)
            }
        };

        let result = fut.await;

        // Only the caller that inserted the entry clears it, so a follower
        // that joined mid-flight can't race a later, unrelated call for the
        // same key into being dropped early.
        if is_leader {
            let mut guard = self.inflight.lock().expect("single-flight mutex poisoned");
            guard.remove(key);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_calls_for_same_key_coalesce_into_one() {
        let flight: Arc<SingleFlight<u32, String>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let flight = flight.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flight
                    .run("user@corp.com", async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok::<u32, String>(42)
                    })
                    .await
            }));
        }

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap().unwrap());
        }

        assert!(results.iter().all(|v| *v == 42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_coalesce() {
        let flight: Arc<SingleFlight<u32, String>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let a = {
            let flight = flight.clone();
            let calls = calls.clone();
            flight.run("a", async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, String>(1)
            })
        };
        let b = {
            let flight = flight.clone();
            let calls = calls.clone();
            flight.run("b", async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, String>(2)
            })
        };
        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(ra.unwrap(), 1);
        assert_eq!(rb.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn a_new_call_after_the_first_resolves_runs_again() {
        let flight: SingleFlight<u32, String> = SingleFlight::new();
        let calls = AtomicUsize::new(0);

        let first = flight
            .run("k", async {
                Ok::<u32, String>(1)
            })
            .await
            .unwrap();
        calls.fetch_add(1, Ordering::SeqCst);
        let second = flight
            .run("k", async {
                Ok::<u32, String>(2)
            })
            .await
            .unwrap();
        calls.fetch_add(1, Ordering::SeqCst);

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
