//! Catalog watcher - polls the catalog source and hot-reloads it
//!
//! Runs on its own named thread. The first marker seen is only recorded; a
//! later change triggers a reparse, an atomic catalog merge into the store,
//! and a `system` + `loco_list_reloaded` announcement. A failed parse keeps
//! the old catalog and is only logged.

use anyhow::Context;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use super::CatalogSource;
use crate::shutdown::Shutdown;
use crate::state::StateStore;

/// Result of a single poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Source absent, marker first seen, or marker unchanged
    Unchanged,
    /// Catalog reloaded with this many locos
    Reloaded(usize),
    /// Marker changed but the source could not be parsed
    Failed,
}

/// Polls a [`CatalogSource`] and pushes changes into the [`StateStore`]
pub struct CatalogWatcher<S: CatalogSource> {
    source: S,
    store: Arc<StateStore>,
    interval: Duration,
    shutdown: Shutdown,
    last_marker: Option<SystemTime>,
}

impl<S: CatalogSource> CatalogWatcher<S> {
    pub fn new(source: S, store: Arc<StateStore>, interval: Duration, shutdown: Shutdown) -> Self {
        Self {
            source,
            store,
            interval,
            shutdown,
            last_marker: None,
        }
    }

    /// Record the current marker without reloading
    ///
    /// Used at startup, after the initial catalog was loaded, so the first
    /// poll does not reload the same content again.
    pub fn prime(&mut self) {
        self.last_marker = self.source.marker();
    }

    /// Check the source once
    pub fn poll_once(&mut self) -> PollOutcome {
        let Some(marker) = self.source.marker() else {
            return PollOutcome::Unchanged;
        };
        match self.last_marker {
            None => {
                debug!("Catalog marker recorded for {}", self.source.describe());
                self.last_marker = Some(marker);
                return PollOutcome::Unchanged;
            }
            Some(last) if last == marker => return PollOutcome::Unchanged,
            Some(_) => self.last_marker = Some(marker),
        }

        let loaded = self
            .source
            .load()
            .with_context(|| format!("Failed to reload {}", self.source.describe()));
        match loaded {
            Ok(entries) => {
                let count = entries.len();
                info!("{} changed, reloading {} locomotives", self.source.describe(), count);
                self.store.replace_catalog(entries);
                self.store.announce_catalog_reload();
                PollOutcome::Reloaded(count)
            }
            Err(e) => {
                warn!("{:#} (keeping old catalog)", e);
                PollOutcome::Failed
            }
        }
    }

    /// Run the poll loop on a background thread until shutdown
    pub fn spawn(mut self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("cs2-catalog".to_string())
            .spawn(move || {
                info!(
                    "Catalog watcher started for {} (every {:?})",
                    self.source.describe(),
                    self.interval
                );
                while !self.shutdown.wait_timeout(self.interval) {
                    self.poll_once();
                }
                debug!("Catalog watcher stopped");
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::catalog::{LocoEntry, LocoFile};
    use crate::state::Event;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Fake {
        marker: Option<SystemTime>,
        result: Option<Vec<LocoEntry>>,
    }

    #[derive(Clone, Default)]
    struct FakeSource(Arc<Mutex<Fake>>);

    impl FakeSource {
        fn set(&self, secs: u64, result: Option<Vec<LocoEntry>>) {
            let mut fake = self.0.lock();
            fake.marker = Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs));
            fake.result = result;
        }
    }

    impl CatalogSource for FakeSource {
        fn marker(&self) -> Option<SystemTime> {
            self.0.lock().marker
        }

        fn load(&self) -> anyhow::Result<Vec<LocoEntry>> {
            self.0
                .lock()
                .result
                .clone()
                .ok_or_else(|| anyhow::anyhow!("bad catalog"))
        }

        fn describe(&self) -> String {
            "fake".to_string()
        }
    }

    fn setup() -> (FakeSource, Arc<StateStore>, CatalogWatcher<FakeSource>) {
        let store = Arc::new(StateStore::new(Arc::new(EventBus::new())));
        let source = FakeSource::default();
        let watcher = CatalogWatcher::new(
            source.clone(),
            Arc::clone(&store),
            Duration::from_millis(10),
            Shutdown::new(),
        );
        (source, store, watcher)
    }

    #[test]
    fn test_missing_source_is_skipped() {
        let (_source, _store, mut watcher) = setup();
        assert_eq!(watcher.poll_once(), PollOutcome::Unchanged);
        assert!(watcher.last_marker.is_none());
    }

    #[test]
    fn test_first_marker_only_recorded() {
        let (source, store, mut watcher) = setup();
        source.set(1, Some(vec![LocoEntry::new(1, "a")]));

        assert_eq!(watcher.poll_once(), PollOutcome::Unchanged);
        assert!(store.loco_catalog().is_empty());
        assert_eq!(watcher.poll_once(), PollOutcome::Unchanged);
    }

    #[test]
    fn test_change_reloads_and_announces() {
        let (source, store, mut watcher) = setup();
        source.set(1, Some(vec![LocoEntry::new(1, "a")]));
        watcher.prime();
        store.set_loco_speed(1, 300);

        let sub = store.bus().subscribe();
        source.set(2, Some(vec![LocoEntry::new(1, "a"), LocoEntry::new(2, "b")]));
        assert_eq!(watcher.poll_once(), PollOutcome::Reloaded(2));

        assert_eq!(store.snapshot_loco(1).unwrap().speed, 300);
        assert_eq!(store.snapshot_loco(2).unwrap().speed, 0);
        let got: Vec<Event> = sub
            .drain()
            .iter()
            .map(|m| serde_json::from_str(m).unwrap())
            .collect();
        assert_eq!(got, vec![Event::System { status: 0 }, Event::LocoListReloaded]);
    }

    #[test]
    fn test_parse_failure_keeps_catalog() {
        let (source, store, mut watcher) = setup();
        store.replace_catalog(vec![LocoEntry::new(1, "a")]);
        store.set_loco_speed(1, 42);
        source.set(1, None);
        watcher.prime();

        let sub = store.bus().subscribe();
        source.set(2, None);
        assert_eq!(watcher.poll_once(), PollOutcome::Failed);

        assert_eq!(store.loco_catalog().len(), 1);
        assert_eq!(store.snapshot_loco(1).unwrap().speed, 42);
        assert!(sub.is_empty());

        // same marker is not retried
        assert_eq!(watcher.poll_once(), PollOutcome::Unchanged);
    }

    #[test]
    fn test_spawned_watcher_stops_on_shutdown() {
        let store = Arc::new(StateStore::new(Arc::new(EventBus::new())));
        let shutdown = Shutdown::new();
        let watcher = CatalogWatcher::new(
            FakeSource::default(),
            store,
            Duration::from_secs(30),
            shutdown.clone(),
        );
        let handle = watcher.spawn().unwrap();
        shutdown.trigger();
        handle.join().unwrap();
    }

    #[test]
    fn test_file_source_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lokomotive.cs2");
        std::fs::write(&path, "lokomotive\n .uid=0x4006\n .name=BR 01\n").unwrap();
        let set_mtime = |secs: u64| {
            std::fs::File::options()
                .write(true)
                .open(&path)
                .unwrap()
                .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
                .unwrap();
        };
        set_mtime(1_000_000);

        let store = Arc::new(StateStore::new(Arc::new(EventBus::new())));
        let mut watcher = CatalogWatcher::new(
            LocoFile::new(&path),
            Arc::clone(&store),
            Duration::from_millis(10),
            Shutdown::new(),
        );
        watcher.prime();
        assert_eq!(watcher.poll_once(), PollOutcome::Unchanged);

        std::fs::write(
            &path,
            "lokomotive\n .uid=0x4006\n .name=BR 01\nlokomotive\n .uid=0x4007\n .name=V 200\n",
        )
        .unwrap();
        set_mtime(1_000_100);

        assert_eq!(watcher.poll_once(), PollOutcome::Reloaded(2));
        assert_eq!(store.loco_catalog()[1].name, "V 200");
    }
}
