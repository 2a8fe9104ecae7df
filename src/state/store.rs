//! StateStore - authoritative runtime state with change notification
//!
//! Holds system run mode, per-loco speed/direction/functions, the 64 switch
//! values and the device catalog. Every write commits and publishes while the
//! domain lock is still held, so subscribers see changes in commit order and
//! nobody can read the old value after its replacement was published.
//!
//! Lock order: system -> locos -> switches -> catalog -> bus registry.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use super::types::{Event, LocoState, StateSnapshot, SystemState, MAX_SPEED, SWITCH_COUNT};
use crate::bus::{EventBus, Subscription};
use crate::catalog::{LocoEntry, SwitchArticle};
use crate::protocol::Direction;

#[derive(Default)]
struct CatalogState {
    locos: Vec<LocoEntry>,
    articles: Vec<SwitchArticle>,
    icon_overrides: HashMap<u32, String>,
}

/// Outcome of a catalog replacement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CatalogMerge {
    /// Locos whose runtime state was carried over
    pub retained: usize,
    /// Locos new to the catalog
    pub added: usize,
    /// Runtime records dropped because their uid left the catalog
    pub removed: usize,
}

/// Authoritative in-memory state shared by the listener, dispatcher and watcher
pub struct StateStore {
    system: Mutex<SystemState>,
    locos: Mutex<BTreeMap<u32, LocoState>>,
    switches: Mutex<[i64; SWITCH_COUNT]>,
    catalog: Mutex<CatalogState>,
    bus: Arc<EventBus>,
}

impl StateStore {
    /// Create an empty store publishing to `bus`
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            system: Mutex::new(SystemState::Stopped),
            locos: Mutex::new(BTreeMap::new()),
            switches: Mutex::new([0; SWITCH_COUNT]),
            catalog: Mutex::new(CatalogState::default()),
            bus,
        }
    }

    /// Bus this store publishes to
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // =========================================================================
    // System
    // =========================================================================

    /// Set the run mode; publishes only when the value actually changes
    ///
    /// Returns `true` if the state changed.
    pub fn set_system_state(&self, new: SystemState) -> bool {
        let mut system = self.system.lock();
        if *system == new {
            return false;
        }
        *system = new;
        info!("System state -> {}", new);
        self.bus.publish(&Event::System {
            status: new.status_flag(),
        });
        true
    }

    /// Current run mode
    pub fn system_state(&self) -> SystemState {
        *self.system.lock()
    }

    // =========================================================================
    // Locos
    // =========================================================================

    /// Store a loco speed (clamped to 0-1023) and publish it
    ///
    /// Returns the value actually stored.
    pub fn set_loco_speed(&self, loc_id: u32, speed: u16) -> u16 {
        let speed = speed.min(MAX_SPEED);
        let mut locos = self.locos.lock();
        locos.entry(loc_id).or_default().speed = speed;
        debug!(loc_id, speed, "loco speed");
        self.bus.publish(&Event::Speed {
            loc_id,
            value: speed,
        });
        speed
    }

    /// Store a loco direction and publish it
    pub fn set_loco_direction(&self, loc_id: u32, direction: Direction) {
        let mut locos = self.locos.lock();
        locos.entry(loc_id).or_default().direction = direction;
        debug!(loc_id, direction = ?direction, "loco direction");
        self.bus.publish(&Event::Direction {
            loc_id,
            value: direction,
        });
    }

    /// Store a loco function bit and publish it
    pub fn set_loco_function(&self, loc_id: u32, index: u8, active: bool) {
        let mut locos = self.locos.lock();
        locos
            .entry(loc_id)
            .or_default()
            .functions
            .insert(index, active);
        debug!(loc_id, index, active, "loco function");
        self.bus.publish(&Event::Function {
            loc_id,
            index,
            value: active as u8,
        });
    }

    /// Copy of one loco's runtime state
    pub fn snapshot_loco(&self, loc_id: u32) -> Option<LocoState> {
        self.locos.lock().get(&loc_id).cloned()
    }

    /// Number of locos with runtime state
    pub fn loco_count(&self) -> usize {
        self.locos.lock().len()
    }

    // =========================================================================
    // Switches
    // =========================================================================

    /// Store a switch value and publish it
    ///
    /// Indices outside 0-63 are ignored: nothing is stored or published and
    /// `false` is returned.
    pub fn set_switch(&self, idx: i64, value: i64) -> bool {
        let Some(slot) = usize::try_from(idx).ok().filter(|i| *i < SWITCH_COUNT) else {
            debug!(idx, "switch index out of range, ignored");
            return false;
        };
        let mut switches = self.switches.lock();
        switches[slot] = value;
        debug!(idx = slot, value, "switch");
        self.bus.publish(&Event::Switch { idx: slot, value });
        true
    }

    /// Copy of all 64 switch values
    pub fn snapshot_switches(&self) -> Vec<i64> {
        self.switches.lock().to_vec()
    }

    // =========================================================================
    // Snapshots and subscription
    // =========================================================================

    /// Consistent copy of system, loco and switch state
    pub fn snapshot(&self) -> StateSnapshot {
        let system = self.system.lock();
        let locos = self.locos.lock();
        let switches = self.switches.lock();
        StateSnapshot {
            system: *system,
            locos: locos.clone(),
            switches: switches.to_vec(),
        }
    }

    /// Subscribe to the event stream, starting with a full-state catch-up
    ///
    /// The catch-up (system status, then speed/direction/functions for every
    /// loco, then all 64 switches) is taken and enqueued while every state lock
    /// is held, so it is followed by exactly the writes committed after it.
    pub fn subscribe(&self) -> Subscription {
        let system = self.system.lock();
        let locos = self.locos.lock();
        let switches = self.switches.lock();

        let mut catch_up = Vec::with_capacity(1 + locos.len() * 2 + SWITCH_COUNT);
        catch_up.push(Event::System {
            status: system.status_flag(),
        });
        for (&loc_id, st) in locos.iter() {
            catch_up.push(Event::Speed {
                loc_id,
                value: st.speed,
            });
            catch_up.push(Event::Direction {
                loc_id,
                value: st.direction,
            });
            for (&index, &active) in &st.functions {
                catch_up.push(Event::Function {
                    loc_id,
                    index,
                    value: active as u8,
                });
            }
        }
        for (idx, &value) in switches.iter().enumerate() {
            catch_up.push(Event::Switch { idx, value });
        }

        self.bus.subscribe_with(&catch_up)
    }

    /// Publish an event that is not tied to a state write (errors, notices)
    pub fn publish(&self, event: &Event) {
        self.bus.publish(event);
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// Replace the loco catalog, merging runtime state
    ///
    /// Locos present before and after keep speed, direction and functions
    /// untouched; new locos get a default record; locos missing from
    /// `entries` lose their runtime state. Applied atomically.
    pub fn replace_catalog(&self, entries: Vec<LocoEntry>) -> CatalogMerge {
        let mut locos = self.locos.lock();
        let mut catalog = self.catalog.lock();

        let mut merge = CatalogMerge::default();
        let mut fresh = BTreeMap::new();
        for entry in &entries {
            if fresh.contains_key(&entry.uid) {
                continue;
            }
            let state = match locos.remove(&entry.uid) {
                Some(prev) => {
                    merge.retained += 1;
                    prev
                }
                None => {
                    merge.added += 1;
                    LocoState::default()
                }
            };
            fresh.insert(entry.uid, state);
        }
        merge.removed = locos.len();
        *locos = fresh;
        catalog.locos = entries;

        info!(
            retained = merge.retained,
            added = merge.added,
            removed = merge.removed,
            "Loco catalog replaced"
        );
        merge
    }

    /// Tell viewers the catalog changed: current system status, then `loco_list_reloaded`
    pub fn announce_catalog_reload(&self) {
        let system = self.system.lock();
        self.bus.publish(&Event::System {
            status: system.status_flag(),
        });
        self.bus.publish(&Event::LocoListReloaded);
    }

    /// Known locos, with icon overrides applied
    pub fn loco_catalog(&self) -> Vec<LocoEntry> {
        let catalog = self.catalog.lock();
        catalog
            .locos
            .iter()
            .map(|entry| match catalog.icon_overrides.get(&entry.uid) {
                Some(icon) => LocoEntry {
                    icon: Some(icon.clone()),
                    ..entry.clone()
                },
                None => entry.clone(),
            })
            .collect()
    }

    /// Override the display icon of a loco and notify viewers
    pub fn set_icon_override(&self, uid: u32, icon: impl Into<String>) {
        let mut catalog = self.catalog.lock();
        catalog.icon_overrides.insert(uid, icon.into());
        self.bus.publish(&Event::LocoListReloaded);
    }

    /// Replace the switch article list (position = switch index)
    pub fn set_switch_catalog(&self, articles: Vec<SwitchArticle>) {
        info!("Switch catalog loaded: {} articles", articles.len());
        self.catalog.lock().articles = articles;
    }

    /// Known switch articles
    pub fn switch_catalog(&self) -> Vec<SwitchArticle> {
        self.catalog.lock().articles.clone()
    }

    /// Bus uid of the article at switch index `idx`, if the catalog lists one
    pub fn switch_article_uid(&self, idx: usize) -> Option<u32> {
        self.catalog.lock().articles.get(idx).and_then(|a| a.uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{article_uid, DecoderType};

    fn make_store() -> (Arc<StateStore>, Subscription) {
        let bus = Arc::new(EventBus::new());
        let raw = bus.subscribe();
        (Arc::new(StateStore::new(bus)), raw)
    }

    fn events(sub: &Subscription) -> Vec<Event> {
        sub.drain()
            .iter()
            .map(|m| serde_json::from_str(m).unwrap())
            .collect()
    }

    #[test]
    fn test_system_state_publishes_only_on_change() {
        let (store, sub) = make_store();

        assert!(store.set_system_state(SystemState::Running));
        assert!(!store.set_system_state(SystemState::Running));
        assert!(store.set_system_state(SystemState::Halted));

        assert_eq!(
            events(&sub),
            vec![Event::System { status: 1 }, Event::System { status: 0 }]
        );
        assert_eq!(store.system_state(), SystemState::Halted);
    }

    #[test]
    fn test_loco_record_created_lazily_with_defaults() {
        let (store, _sub) = make_store();
        assert!(store.snapshot_loco(42).is_none());

        store.set_loco_function(42, 3, true);

        let st = store.snapshot_loco(42).unwrap();
        assert_eq!(st.speed, 0);
        assert_eq!(st.direction, Direction::Forward);
        assert_eq!(st.functions.get(&3), Some(&true));
    }

    #[test]
    fn test_loco_writes_always_publish() {
        let (store, sub) = make_store();

        store.set_loco_speed(7, 100);
        store.set_loco_speed(7, 100);
        store.set_loco_direction(7, Direction::Reverse);

        assert_eq!(
            events(&sub),
            vec![
                Event::Speed { loc_id: 7, value: 100 },
                Event::Speed { loc_id: 7, value: 100 },
                Event::Direction {
                    loc_id: 7,
                    value: Direction::Reverse
                },
            ]
        );
    }

    #[test]
    fn test_speed_is_clamped_before_storage() {
        let (store, sub) = make_store();
        assert_eq!(store.set_loco_speed(1, 5000), 1023);
        assert_eq!(store.snapshot_loco(1).unwrap().speed, 1023);
        assert_eq!(events(&sub), vec![Event::Speed { loc_id: 1, value: 1023 }]);
    }

    #[test]
    fn test_switch_out_of_range_is_noop() {
        let (store, sub) = make_store();

        assert!(!store.set_switch(64, 1));
        assert!(!store.set_switch(-1, 1));
        assert!(sub.is_empty());
        assert!(store.snapshot_switches().iter().all(|v| *v == 0));

        assert!(store.set_switch(63, 2));
        assert_eq!(store.snapshot_switches()[63], 2);
        assert_eq!(events(&sub), vec![Event::Switch { idx: 63, value: 2 }]);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let (store, _sub) = make_store();
        store.set_loco_speed(1, 10);
        let snap = store.snapshot();
        store.set_loco_speed(1, 20);

        assert_eq!(snap.locos[&1].speed, 10);
        assert_eq!(snap.switches.len(), SWITCH_COUNT);
        assert_eq!(store.snapshot_loco(1).unwrap().speed, 20);
    }

    #[test]
    fn test_replace_catalog_preserves_retained_state() {
        let (store, _sub) = make_store();
        store.replace_catalog(vec![LocoEntry::new(1, "BR 01"), LocoEntry::new(2, "V 200")]);
        store.set_loco_speed(1, 500);
        store.set_loco_direction(1, Direction::Reverse);
        store.set_loco_function(1, 0, true);
        store.set_loco_speed(2, 300);

        let merge =
            store.replace_catalog(vec![LocoEntry::new(1, "BR 01 renamed"), LocoEntry::new(3, "E 94")]);

        assert_eq!(
            merge,
            CatalogMerge {
                retained: 1,
                added: 1,
                removed: 1
            }
        );
        let kept = store.snapshot_loco(1).unwrap();
        assert_eq!(kept.speed, 500);
        assert_eq!(kept.direction, Direction::Reverse);
        assert_eq!(kept.functions.get(&0), Some(&true));
        assert!(store.snapshot_loco(2).is_none());
        assert_eq!(store.snapshot_loco(3).unwrap(), LocoState::default());
        assert_eq!(store.loco_catalog()[0].name, "BR 01 renamed");
    }

    #[test]
    fn test_replace_catalog_ignores_duplicate_uids() {
        let (store, _sub) = make_store();
        store.set_loco_speed(9, 77);

        store.replace_catalog(vec![LocoEntry::new(9, "a"), LocoEntry::new(9, "b")]);

        assert_eq!(store.snapshot_loco(9).unwrap().speed, 77);
        assert_eq!(store.loco_count(), 1);
    }

    #[test]
    fn test_announce_catalog_reload() {
        let (store, sub) = make_store();
        store.set_system_state(SystemState::Running);
        sub.drain();

        store.announce_catalog_reload();

        assert_eq!(
            events(&sub),
            vec![Event::System { status: 1 }, Event::LocoListReloaded]
        );
    }

    #[test]
    fn test_subscribe_catch_up_then_live() {
        let (store, _raw) = make_store();
        store.set_system_state(SystemState::Running);
        store.set_loco_speed(5, 80);
        store.set_loco_function(5, 1, false);
        store.set_switch(2, 1);

        let sub = store.subscribe();
        store.set_loco_speed(5, 90);

        let got = events(&sub);
        assert_eq!(got.len(), 1 + 3 + SWITCH_COUNT + 1);
        assert_eq!(got[0], Event::System { status: 1 });
        assert_eq!(got[1], Event::Speed { loc_id: 5, value: 80 });
        assert_eq!(
            got[2],
            Event::Direction {
                loc_id: 5,
                value: Direction::Forward
            }
        );
        assert_eq!(
            got[3],
            Event::Function {
                loc_id: 5,
                index: 1,
                value: 0
            }
        );
        assert_eq!(got[4], Event::Switch { idx: 0, value: 0 });
        assert_eq!(got[6], Event::Switch { idx: 2, value: 1 });
        assert_eq!(got.last(), Some(&Event::Speed { loc_id: 5, value: 90 }));
    }

    #[test]
    fn test_icon_override_applies_and_notifies() {
        let (store, sub) = make_store();
        store.replace_catalog(vec![LocoEntry::new(1, "BR 01")]);

        store.set_icon_override(1, "br01.png");

        assert_eq!(store.loco_catalog()[0].icon.as_deref(), Some("br01.png"));
        assert_eq!(events(&sub), vec![Event::LocoListReloaded]);
    }

    #[test]
    fn test_switch_article_lookup() {
        let (store, _sub) = make_store();
        store.set_switch_catalog(vec![SwitchArticle {
            id: 1,
            dectyp: DecoderType::Mm2,
            name: "W1".to_string(),
            uid: Some(article_uid(1, DecoderType::Mm2)),
        }]);

        assert_eq!(store.switch_article_uid(0), Some(0x3000));
        assert_eq!(store.switch_article_uid(1), None);

        store.set_switch_catalog(crate::catalog::cs2::parse_articles(
            "artikel\n .id=1\n .dectyp=mm2\nartikel\n .name=unnumbered\n",
        ));
        assert_eq!(store.switch_article_uid(0), Some(0x3000));
        assert_eq!(store.switch_article_uid(1), None);
    }

    #[test]
    fn test_concurrent_writes_publish_in_commit_order() {
        let (store, _raw) = make_store();
        let sub = store.subscribe();
        sub.drain();

        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50u16 {
                        store.set_loco_speed(t, i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snapshot = store.snapshot();
        let mut last_seen = BTreeMap::new();
        for event in events(&sub) {
            if let Event::Speed { loc_id, value } = event {
                last_seen.insert(loc_id, value);
            }
        }
        for t in 0..4u32 {
            assert_eq!(last_seen[&t], snapshot.locos[&t].speed);
            assert_eq!(last_seen[&t], 49);
        }
    }
}
