//! Fill group cache (Google mode): a background task periodically
//! enumerates all `group → members` and republishes an immutable snapshot;
//! lookups only ever read the current snapshot, never block on I/O.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::GroupLookup;

/// `group → set<email>`, as produced by an enumeration sweep.
pub type GroupMembership = HashMap<String, HashSet<String>>;

pub struct FillCache {
    snapshot: Arc<ArcSwap<GroupMembership>>,
    stop: Arc<Notify>,
}

impl FillCache {
    /// Spawns the periodic refill loop immediately and returns a handle.
    /// `enumerate` performs one full sweep; its result replaces the
    /// snapshot wholesale (readers never see a partial rebuild).
    pub fn spawn<F, Fut>(refresh_every: Duration, enumerate: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<GroupMembership, String>> + Send + 'static,
    {
        let snapshot = Arc::new(ArcSwap::from_pointee(GroupMembership::new()));
        let stop = Arc::new(Notify::new());

        let snapshot_task = snapshot.clone();
        let stop_task = stop.clone();
        tokio::spawn(async move {
            loop {
                match enumerate().await {
                    Ok(fresh) => {
                        debug!(groups = fresh.len(), "group cache snapshot refreshed");
                        snapshot_task.store(Arc::new(fresh));
                    }
                    Err(err) => {
                        warn!(error = %err, "group enumeration sweep failed, keeping old snapshot");
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(refresh_every) => {}
                    _ = stop_task.notified() => break,
                }
            }
        });

        Self { snapshot, stop }
    }

    /// Stops the background refill loop. The last published snapshot
    /// remains readable after this returns.
    pub fn stop(&self) {
        self.stop.notify_one();
    }

    pub fn lookup(&self, email: &str) -> Option<GroupLookup> {
        let snapshot = self.snapshot.load();
        if snapshot.is_empty() {
            return None;
        }
        let groups: HashSet<String> = snapshot
            .iter()
            .filter(|(_, members)| members.contains(email))
            .map(|(group, _)| group.clone())
            .collect();
        Some(GroupLookup {
            groups,
            stale: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn lookup_before_first_sweep_is_none() {
        let cache = FillCache::spawn(Duration::from_secs(60), || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(GroupMembership::new())
        });
        assert!(cache.lookup("a@corp.com").is_none());
        cache.stop();
    }

    #[tokio::test]
    async fn lookup_after_sweep_reflects_membership() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let cache = FillCache::spawn(Duration::from_millis(10), move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let mut map = GroupMembership::new();
                let mut eng = HashSet::new();
                eng.insert("a@corp.com".to_string());
                map.insert("eng".to_string(), eng);
                Ok(map)
            }
        });

        // Wait for at least one sweep to publish.
        for _ in 0..50 {
            if calls.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let lookup = cache.lookup("a@corp.com").unwrap();
        assert!(lookup.groups.contains("eng"));
        assert!(cache.lookup("stranger@corp.com").unwrap().groups.is_empty());
        cache.stop();
    }
}
