//! # Content Synchronizer
//!
//! Runs module synchronization on a bounded pool of worker threads.
//!
//! Modules that share a cache key (the same git mirror, the same download
//! directory) form one group, and a group is always handled by a single
//! worker in declaration order. Two workers therefore never write to the
//! same mirror at once. Modules without a key are groups of one.
//!
//! The first failure sets a shared flag. Idle workers then drain the queue
//! without doing any work, busy workers finish the group they hold, and the
//! batch returns [`Error::SyncFailed`] listing both the failures and the
//! modules that were updated before it stopped.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;

use crossbeam_channel::unbounded;
use log::{debug, error, info};

use crate::defaults::DEFAULT_POOL_SIZE;
use crate::error::{Error, Result};
use crate::module::Module;

/// A unit of work the synchronizer can schedule.
pub trait Syncable: Send + Sync {
    fn name(&self) -> &str;

    /// Shared resource that forces serialization with other units.
    fn cache_key(&self) -> Option<PathBuf>;

    /// Converge. Returns true when something changed.
    fn sync(&self, force: bool) -> Result<bool>;
}

impl Syncable for Module {
    fn name(&self) -> &str {
        Module::name(self)
    }

    fn cache_key(&self) -> Option<PathBuf> {
        Module::cache_key(self)
    }

    fn sync(&self, force: bool) -> Result<bool> {
        Module::sync(self, force)
    }
}

/// Partition `items` by cache key, keeping the order of first appearance
/// for groups and declaration order within each group.
pub fn group_by_cache_key<T: Syncable>(items: &[T]) -> Vec<Vec<&T>> {
    let mut groups: Vec<Vec<&T>> = Vec::new();
    let mut index: HashMap<PathBuf, usize> = HashMap::new();
    for item in items {
        match item.cache_key() {
            Some(key) => match index.get(&key) {
                Some(&i) => groups[i].push(item),
                None => {
                    index.insert(key, groups.len());
                    groups.push(vec![item]);
                }
            },
            None => groups.push(vec![item]),
        }
    }
    groups
}

#[derive(Default)]
struct Outcome {
    updated: Mutex<BTreeSet<String>>,
    failures: Mutex<Vec<(String, String)>>,
    failed: AtomicBool,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Outcome {
    /// Sync one group in order, stopping at its first failure.
    fn run_group<T: Syncable>(&self, group: &[&T], force: bool) {
        for item in group {
            match item.sync(force) {
                Ok(true) => {
                    guard(&self.updated).insert(item.name().to_string());
                }
                Ok(false) => {}
                Err(e) => {
                    error!("{}", e);
                    guard(&self.failures).push((item.name().to_string(), e.to_string()));
                    self.failed.store(true, Ordering::SeqCst);
                    return;
                }
            }
        }
    }

    fn finish(self) -> Result<BTreeSet<String>> {
        let updated = self
            .updated
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let failures = self
            .failures
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if failures.is_empty() {
            Ok(updated)
        } else {
            Err(Error::SyncFailed {
                updated: updated.into_iter().collect(),
                failures,
            })
        }
    }
}

#[derive(Debug, Clone)]
pub struct Synchronizer {
    pool_size: usize,
    force: bool,
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

impl Synchronizer {
    /// A pool size of zero is treated as one.
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size: pool_size.max(1),
            force: false,
        }
    }

    /// Overwrite local modifications in git modules.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Synchronize every item. Returns the names of the items that changed.
    pub fn sync_all<T: Syncable>(&self, items: &[T]) -> Result<BTreeSet<String>> {
        let groups = group_by_cache_key(items);
        let workers = self.pool_size.min(groups.len());
        debug!(
            "Synchronizing {} item(s) in {} group(s) on {} worker(s)",
            items.len(),
            groups.len(),
            workers.max(1)
        );

        let outcome = Outcome::default();
        if workers <= 1 {
            for group in &groups {
                if outcome.failed.load(Ordering::SeqCst) {
                    break;
                }
                outcome.run_group(group, self.force);
            }
        } else {
            self.run_pool(groups, workers, &outcome);
        }

        let result = outcome.finish();
        if let Ok(updated) = &result {
            info!("{} item(s) updated", updated.len());
        }
        result
    }

    fn run_pool<T: Syncable>(&self, groups: Vec<Vec<&T>>, workers: usize, outcome: &Outcome) {
        let (sender, receiver) = unbounded::<Vec<&T>>();
        for group in groups {
            // The receiver outlives this loop, so sending cannot fail
            let _ = sender.send(group);
        }
        drop(sender);

        let force = self.force;
        thread::scope(|scope| {
            for worker_id in 0..workers {
                let receiver = receiver.clone();
                scope.spawn(move || {
                    debug!("Worker {} started", worker_id);
                    while let Ok(group) = receiver.recv() {
                        if outcome.failed.load(Ordering::SeqCst) {
                            continue;
                        }
                        outcome.run_group(&group, force);
                    }
                    debug!("Worker {} stopped", worker_id);
                });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    /// Counts workers inside each group without taking a lock.
    #[derive(Default)]
    struct Probe {
        in_flight: HashMap<String, AtomicUsize>,
        overlaps: AtomicUsize,
        calls: AtomicUsize,
    }

    struct Item {
        name: String,
        key: Option<String>,
        changes: bool,
        fails: bool,
        probe: Arc<Probe>,
    }

    impl Syncable for Item {
        fn name(&self) -> &str {
            &self.name
        }

        fn cache_key(&self) -> Option<PathBuf> {
            self.key.as_ref().map(PathBuf::from)
        }

        fn sync(&self, _force: bool) -> Result<bool> {
            self.probe.calls.fetch_add(1, Ordering::SeqCst);
            let counter = self.key.as_ref().map(|k| &self.probe.in_flight[k]);
            if let Some(counter) = counter {
                if counter.fetch_add(1, Ordering::SeqCst) != 0 {
                    self.probe.overlaps.fetch_add(1, Ordering::SeqCst);
                }
            }
            thread::sleep(Duration::from_millis(5));
            if let Some(counter) = counter {
                counter.fetch_sub(1, Ordering::SeqCst);
            }
            if self.fails {
                return Err(Error::Io(std::io::Error::other(format!(
                    "{} exploded",
                    self.name
                ))));
            }
            Ok(self.changes)
        }
    }

    fn items(probe: &Arc<Probe>, fail: Option<&str>) -> Vec<Item> {
        // 10 items over 3 keys
        let keys = ["a", "b", "c", "a", "b", "a", "c", "a", "b", "c"];
        keys.iter()
            .enumerate()
            .map(|(i, key)| Item {
                name: format!("mod{}", i),
                key: Some(key.to_string()),
                changes: i % 3 != 0,
                fails: fail == Some(format!("mod{}", i).as_str()),
                probe: Arc::clone(probe),
            })
            .collect()
    }

    fn probe() -> Arc<Probe> {
        let mut probe = Probe::default();
        for key in ["a", "b", "c"] {
            probe.in_flight.insert(key.to_string(), AtomicUsize::new(0));
        }
        Arc::new(probe)
    }

    #[test]
    fn test_grouping_is_deterministic() {
        let probe = probe();
        let mut list = items(&probe, None);
        list.push(Item {
            name: "loose".to_string(),
            key: None,
            changes: true,
            fails: false,
            probe: Arc::clone(&probe),
        });
        let groups = group_by_cache_key(&list);
        let names: Vec<Vec<&str>> = groups
            .iter()
            .map(|g| g.iter().map(|i| i.name.as_str()).collect())
            .collect();
        assert_eq!(
            names,
            vec![
                vec!["mod0", "mod3", "mod5", "mod7"],
                vec!["mod1", "mod4", "mod8"],
                vec!["mod2", "mod6", "mod9"],
                vec!["loose"],
            ]
        );
    }

    #[test]
    fn test_groups_never_run_concurrently() {
        let probe = probe();
        let list = items(&probe, None);
        let updated = Synchronizer::new(4).sync_all(&list).unwrap();
        assert_eq!(probe.overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 10);
        assert_eq!(updated.len(), 6);
    }

    #[test]
    fn test_pool_of_one_matches_pool_of_four() {
        let sequential = Synchronizer::new(1).sync_all(&items(&probe(), None)).unwrap();
        let parallel = Synchronizer::new(4).sync_all(&items(&probe(), None)).unwrap();
        assert_eq!(sequential, parallel);
        assert!(sequential.contains("mod1"));
        assert!(!sequential.contains("mod0"));
    }

    #[test]
    fn test_failure_reports_partial_updates() {
        let probe = probe();
        // mod3 is the second item of group "a"
        let list = items(&probe, Some("mod3"));
        let err = Synchronizer::new(1).sync_all(&list).unwrap_err();
        match err {
            Error::SyncFailed { updated, failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, "mod3");
                // mod0 ran but did not change; the rest of group "a" and
                // every later group were drained
                assert!(updated.is_empty());
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failure_in_pool_still_joins_workers() {
        let probe = probe();
        let list = items(&probe, Some("mod1"));
        let err = Synchronizer::new(4).sync_all(&list).unwrap_err();
        let Error::SyncFailed { failures, updated } = err else {
            panic!("expected a sync failure");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "mod1");
        assert!(failures[0].1.contains("mod1 exploded"));
        // Group "b" stops at mod1; the other groups were already running
        assert!(!updated.contains(&"mod4".to_string()));
        assert!(!updated.contains(&"mod8".to_string()));
        assert_eq!(probe.overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_zero_pool_size_is_sequential() {
        assert_eq!(Synchronizer::new(0).pool_size(), 1);
    }
}
