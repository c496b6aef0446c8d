use crate::member::{Heartbeat, MemberId, MemberIdentity, MemberRecord};
use crate::result::Result;
use crate::timer::{TimeoutScheduler, TimeoutTimer};
use anyhow::bail;
use log::info;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

/// Result of a conditional registry operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The member was where the operation expected it and the state changed.
    Applied,
    /// The member was where the operation expected it, but the condition did not hold.
    Ignored,
    /// The member was not where the operation expected it; the caller has to look again.
    Missed,
}

#[derive(Debug)]
enum Liveness {
    Live(TimeoutTimer),
    Dead,
}

#[derive(Debug)]
struct Slot {
    record: MemberRecord,
    liveness: Liveness,
}

impl Slot {
    fn is_live(&self) -> bool {
        match self.liveness {
            Liveness::Live(_) => true,
            Liveness::Dead => false,
        }
    }
}

/// Live and dead members known to this node.
///
/// Every member is either live or dead, never both, and only live members own a timeout. Operations on one
/// member serialize on that member's lock; the table lock is only held for writing when a new member is added.
pub struct MembershipRegistry {
    myself: MemberId,
    cleanup_interval: Duration,
    members: RwLock<HashMap<MemberId, Arc<Mutex<Slot>>>>,
    generations: AtomicU64,
    scheduler: Box<dyn TimeoutScheduler>,
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

impl MembershipRegistry {
    /// Creates an empty registry for the node identified by `myself`.
    pub fn new(myself: MemberId, cleanup_interval: Duration, scheduler: Box<dyn TimeoutScheduler>) -> Self {
        Self {
            myself,
            cleanup_interval,
            members: RwLock::new(HashMap::new()),
            generations: AtomicU64::new(0),
            scheduler,
        }
    }

    /// Id of the local node, never stored in the registry.
    pub fn myself(&self) -> &MemberId {
        &self.myself
    }

    fn slot(&self, id: &MemberId) -> Option<Arc<Mutex<Slot>>> {
        self.members.read().unwrap_or_else(|e| e.into_inner()).get(id).cloned()
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn arm(&self, id: &MemberId) -> TimeoutTimer {
        TimeoutTimer::arm(self.scheduler.as_ref(), id, self.next_generation(), self.cleanup_interval)
    }

    fn lookup(&self, id: &MemberId, live: bool) -> Option<MemberRecord> {
        let slot = self.slot(id)?;
        let slot = lock(&slot);
        if slot.is_live() == live {
            Some(slot.record.clone())
        } else {
            None
        }
    }

    /// Returns the record of `id` if it is live.
    pub fn lookup_live(&self, id: &MemberId) -> Option<MemberRecord> {
        self.lookup(id, true)
    }

    /// Returns the record of `id` if it is dead.
    pub fn lookup_dead(&self, id: &MemberId) -> Option<MemberRecord> {
        self.lookup(id, false)
    }

    /// Returns the generation of the timeout owned by `id`, if it is live.
    pub fn timer_generation(&self, id: &MemberId) -> Option<u64> {
        let slot = self.slot(id)?;
        let slot = lock(&slot);
        match slot.liveness {
            Liveness::Live(ref timer) => Some(timer.generation()),
            Liveness::Dead => None,
        }
    }

    /// Adds a newly discovered member to the live set and arms its timeout.
    ///
    /// Fails if the member is already known, live or dead, or if it is the local node.
    pub fn insert_live(&self, record: MemberRecord) -> Result<()> {
        if record.identity.id == self.myself {
            bail!("Refusing to register the local node {}", self.myself)
        }
        let mut members = self.members.write().unwrap_or_else(|e| e.into_inner());
        if members.contains_key(record.id()) {
            bail!("Member {} is already registered", record.id())
        }
        let timer = self.arm(record.id());
        members.insert(
            record.id().clone(),
            Arc::new(Mutex::new(Slot {
                record,
                liveness: Liveness::Live(timer),
            })),
        );
        Ok(())
    }

    /// Moves a dead member to the live set with `heartbeat`, arming a fresh timeout.
    ///
    /// The identity replaces the stored one. Returns false if the member is not dead.
    pub fn move_dead_to_live(&self, identity: MemberIdentity, heartbeat: Heartbeat) -> bool {
        let slot = match self.slot(&identity.id) {
            Some(slot) => slot,
            None => return false,
        };
        let mut slot = lock(&slot);
        if slot.is_live() {
            return false;
        }
        let timer = self.arm(&identity.id);
        slot.record = MemberRecord::new(identity, heartbeat);
        slot.liveness = Liveness::Live(timer);
        true
    }

    /// Like `move_dead_to_live`, but only if `heartbeat` is greater than the one recorded at death.
    pub fn revive_if_greater(&self, identity: MemberIdentity, heartbeat: Heartbeat) -> Outcome {
        let slot = match self.slot(&identity.id) {
            Some(slot) => slot,
            None => return Outcome::Missed,
        };
        let mut slot = lock(&slot);
        if slot.is_live() {
            return Outcome::Missed;
        }
        if heartbeat <= slot.record.heartbeat {
            return Outcome::Ignored;
        }
        let timer = self.arm(&identity.id);
        slot.record = MemberRecord::new(identity, heartbeat);
        slot.liveness = Liveness::Live(timer);
        Outcome::Applied
    }

    /// Moves a live member to the dead set, keeping its last heartbeat and cancelling its timeout.
    ///
    /// Returns false if the member is not live.
    pub fn move_live_to_dead(&self, id: &MemberId) -> bool {
        let slot = match self.slot(id) {
            Some(slot) => slot,
            None => return false,
        };
        let mut slot = lock(&slot);
        match std::mem::replace(&mut slot.liveness, Liveness::Dead) {
            Liveness::Live(timer) => {
                timer.cancel(self.scheduler.as_ref(), id);
                true
            }
            Liveness::Dead => false,
        }
    }

    /// Handles a fired timeout: the member dies only if `generation` is still its current arming.
    ///
    /// A fire racing with a heartbeat update or a revival carries an older generation and is dropped.
    pub fn expire(&self, id: &MemberId, generation: u64) -> bool {
        let slot = match self.slot(id) {
            Some(slot) => slot,
            None => return false,
        };
        let mut slot = lock(&slot);
        let current = match slot.liveness {
            Liveness::Live(ref timer) => timer.generation() == generation,
            Liveness::Dead => false,
        };
        if !current {
            return false;
        }
        slot.liveness = Liveness::Dead;
        info!(
            "Member {} declared dead at heartbeat {}",
            slot.record.identity, slot.record.heartbeat
        );
        true
    }

    /// Sets the heartbeat of a live member and resets its timeout iff `candidate` is greater.
    pub fn update_heartbeat_if_greater(&self, id: &MemberId, candidate: Heartbeat) -> bool {
        self.refresh(id, candidate) == Outcome::Applied
    }

    /// Like `update_heartbeat_if_greater`, reporting `Outcome::Missed` when the member is not live.
    pub fn refresh(&self, id: &MemberId, candidate: Heartbeat) -> Outcome {
        let slot = match self.slot(id) {
            Some(slot) => slot,
            None => return Outcome::Missed,
        };
        let mut slot = lock(&slot);
        let slot = &mut *slot;
        match slot.liveness {
            Liveness::Live(ref mut timer) => {
                if candidate <= slot.record.heartbeat {
                    return Outcome::Ignored;
                }
                slot.record.heartbeat = candidate;
                timer.reset(self.scheduler.as_ref(), id, self.next_generation(), self.cleanup_interval);
                Outcome::Applied
            }
            Liveness::Dead => Outcome::Missed,
        }
    }

    /// Adds a member to the live set unless it is already known; the caller looks again on `Missed`.
    pub(crate) fn discover(&self, record: MemberRecord) -> Outcome {
        match self.insert_live(record) {
            Ok(()) => Outcome::Applied,
            Err(_) => Outcome::Missed,
        }
    }

    fn collect(&self, live: bool) -> Vec<MemberRecord> {
        let slots = self
            .members
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect::<Vec<_>>();
        let mut records = slots
            .iter()
            .filter_map(|slot| {
                let slot = lock(slot);
                if slot.is_live() == live {
                    Some(slot.record.clone())
                } else {
                    None
                }
            })
            .collect::<Vec<_>>();
        records.sort_by(|a, b| a.id().cmp(b.id()));
        records
    }

    /// Snapshot of the live members, ordered by id.
    pub fn live_members(&self) -> Vec<MemberRecord> {
        self.collect(true)
    }

    /// Snapshot of the dead members, ordered by id.
    pub fn dead_members(&self) -> Vec<MemberRecord> {
        self.collect(false)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Call {
        Schedule(MemberId, u64),
        Cancel(MemberId),
    }

    /// Records scheduler calls instead of running timeouts.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingScheduler {
        pub(crate) calls: Arc<Mutex<Vec<Call>>>,
    }

    impl RecordingScheduler {
        pub(crate) fn take(&self) -> Vec<Call> {
            std::mem::replace(&mut *self.calls.lock().unwrap(), vec![])
        }
    }

    impl TimeoutScheduler for RecordingScheduler {
        fn schedule(&self, id: &MemberId, generation: u64, _after: Duration) {
            self.calls.lock().unwrap().push(Call::Schedule(id.clone(), generation));
        }

        fn cancel(&self, id: &MemberId) {
            self.calls.lock().unwrap().push(Call::Cancel(id.clone()));
        }
    }

    pub(crate) fn registry() -> (MembershipRegistry, RecordingScheduler) {
        let scheduler = RecordingScheduler::default();
        let registry = MembershipRegistry::new(
            MemberId::from("a"),
            Duration::from_secs(10),
            Box::new(scheduler.clone()),
        );
        (registry, scheduler)
    }

    pub(crate) fn record(id: &str, heartbeat: Heartbeat) -> MemberRecord {
        MemberRecord::new(identity(id), heartbeat)
    }

    pub(crate) fn identity(id: &str) -> MemberIdentity {
        MemberIdentity::new(id, "cluster", format!("udp://{}:2000", id))
    }

    pub(crate) fn kill(registry: &MembershipRegistry, id: &str, heartbeat: Heartbeat) {
        registry.insert_live(record(id, heartbeat)).unwrap();
        assert!(registry.move_live_to_dead(&MemberId::from(id)));
    }

    #[test]
    fn insert_live_arms_timer() {
        let (registry, scheduler) = registry();

        registry.insert_live(record("b", 5)).unwrap();

        assert_eq!(registry.lookup_live(&"b".into()), Some(record("b", 5)));
        assert_eq!(registry.lookup_dead(&"b".into()), None);
        assert_eq!(scheduler.take(), vec![Call::Schedule("b".into(), 1)]);
        assert_eq!(registry.timer_generation(&"b".into()), Some(1));
    }

    #[test]
    fn insert_live_rejects_known_and_self() {
        let (registry, _) = registry();
        registry.insert_live(record("b", 5)).unwrap();
        kill(&registry, "c", 1);

        assert!(registry.insert_live(record("b", 6)).is_err());
        assert!(registry.insert_live(record("c", 6)).is_err());
        assert!(registry.insert_live(record("a", 1)).is_err());
        assert_eq!(registry.lookup_live(&"a".into()), None);
        assert_eq!(registry.lookup_live(&"b".into()), Some(record("b", 5)));
    }

    #[test]
    fn update_heartbeat_only_when_greater() {
        let (registry, scheduler) = registry();
        registry.insert_live(record("b", 5)).unwrap();
        scheduler.take();

        assert!(!registry.update_heartbeat_if_greater(&"b".into(), 5));
        assert!(!registry.update_heartbeat_if_greater(&"b".into(), 3));
        assert_eq!(scheduler.take(), vec![]);

        assert!(registry.update_heartbeat_if_greater(&"b".into(), 8));
        assert_eq!(registry.lookup_live(&"b".into()).unwrap().heartbeat, 8);
        assert_eq!(scheduler.take(), vec![Call::Schedule("b".into(), 2)]);
    }

    #[test]
    fn refresh_misses_dead_and_unknown_members() {
        let (registry, _) = registry();
        kill(&registry, "d", 10);

        assert_eq!(registry.refresh(&"d".into(), 20), Outcome::Missed);
        assert_eq!(registry.refresh(&"x".into(), 20), Outcome::Missed);
        assert_eq!(registry.lookup_dead(&"d".into()).unwrap().heartbeat, 10);
    }

    #[test]
    fn move_live_to_dead_cancels_timer_and_keeps_heartbeat() {
        let (registry, scheduler) = registry();
        registry.insert_live(record("b", 5)).unwrap();
        scheduler.take();

        assert!(registry.move_live_to_dead(&"b".into()));
        assert!(!registry.move_live_to_dead(&"b".into()));

        assert_eq!(registry.lookup_dead(&"b".into()), Some(record("b", 5)));
        assert_eq!(registry.lookup_live(&"b".into()), None);
        assert_eq!(registry.timer_generation(&"b".into()), None);
        assert_eq!(scheduler.take(), vec![Call::Cancel("b".into())]);
    }

    #[test]
    fn move_dead_to_live_is_unconditional() {
        let (registry, scheduler) = registry();
        kill(&registry, "s", 9);
        scheduler.take();

        let moved = MemberIdentity::new("s", "cluster", "udp://10.1.1.1:2000");
        assert!(registry.move_dead_to_live(moved.clone(), 2));

        let revived = registry.lookup_live(&"s".into()).unwrap();
        assert_eq!(revived.heartbeat, 2);
        assert_eq!(revived.identity.uri, moved.uri);
        assert_eq!(scheduler.take(), vec![Call::Schedule("s".into(), 2)]);
        assert!(!registry.move_dead_to_live(identity("s"), 3));
        assert!(!registry.move_dead_to_live(identity("x"), 3));
    }

    #[test]
    fn revive_if_greater_uses_strict_comparison() {
        let (registry, _) = registry();
        kill(&registry, "d", 10);

        assert_eq!(registry.revive_if_greater(identity("d"), 10), Outcome::Ignored);
        assert_eq!(registry.revive_if_greater(identity("d"), 4), Outcome::Ignored);
        assert_eq!(registry.lookup_dead(&"d".into()), Some(record("d", 10)));

        assert_eq!(registry.revive_if_greater(identity("d"), 12), Outcome::Applied);
        assert_eq!(registry.lookup_live(&"d".into()), Some(record("d", 12)));
        assert_eq!(registry.revive_if_greater(identity("d"), 20), Outcome::Missed);
    }

    #[test]
    fn expire_ignores_superseded_generation() {
        let (registry, _) = registry();
        registry.insert_live(record("b", 5)).unwrap();
        let first = registry.timer_generation(&"b".into()).unwrap();
        registry.update_heartbeat_if_greater(&"b".into(), 6);

        assert!(!registry.expire(&"b".into(), first));
        assert_eq!(registry.lookup_live(&"b".into()).unwrap().heartbeat, 6);

        let current = registry.timer_generation(&"b".into()).unwrap();
        assert!(registry.expire(&"b".into(), current));
        assert_eq!(registry.lookup_dead(&"b".into()), Some(record("b", 6)));
        assert!(!registry.expire(&"b".into(), current));
    }

    #[test]
    fn expire_after_revival_is_stale() {
        let (registry, _) = registry();
        registry.insert_live(record("b", 5)).unwrap();
        let before_death = registry.timer_generation(&"b".into()).unwrap();
        assert!(registry.expire(&"b".into(), before_death));
        assert!(registry.move_dead_to_live(identity("b"), 7));

        assert!(!registry.expire(&"b".into(), before_death));
        assert_eq!(registry.lookup_live(&"b".into()), Some(record("b", 7)));
    }

    #[test]
    fn snapshots_are_disjoint_and_sorted() {
        let (registry, _) = registry();
        registry.insert_live(record("c", 1)).unwrap();
        registry.insert_live(record("b", 2)).unwrap();
        kill(&registry, "d", 3);

        assert_eq!(registry.live_members(), vec![record("b", 2), record("c", 1)]);
        assert_eq!(registry.dead_members(), vec![record("d", 3)]);
    }
}
