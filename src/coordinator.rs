#![deny(missing_docs)]

use crate::engine::ReconciliationEngine;
use crate::member::{GossipMember, Heartbeat, MemberIdentity, MemberRecord};
use crate::registry::MembershipRegistry;
use crate::result::Result;
use crate::settings::GossipSettings;
use crate::timer::{self, TimerThread};
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Owns the membership view of the local node.
///
/// Snapshots delivered by the transport are merged through `on_receive`, which may be called from any number of
/// threads at once. Timeouts run on an internal thread that lives as long as the coordinator.
pub struct GossipCoordinator {
    myself: MemberIdentity,
    heartbeat: AtomicU64,
    settings: GossipSettings,
    registry: Arc<MembershipRegistry>,
    engine: ReconciliationEngine,
    timer: TimerThread,
}

impl GossipCoordinator {
    /// Creates the coordinator of `myself` and starts its timer thread.
    pub fn new(myself: MemberIdentity, settings: GossipSettings) -> Result<Self> {
        let (scheduler, commands) = timer::channel();
        let registry = Arc::new(MembershipRegistry::new(
            myself.id.clone(),
            settings.cleanup_interval(),
            Box::new(scheduler),
        ));
        let expiring = Arc::downgrade(&registry);
        let timer = TimerThread::spawn(commands, settings.timer_tick(), move |id, generation| {
            if let Some(registry) = expiring.upgrade() {
                registry.expire(&id, generation);
            }
        })?;
        debug!("Coordinator of {} started", myself);
        Ok(GossipCoordinator {
            engine: ReconciliationEngine::new(myself.id.clone()),
            myself,
            heartbeat: AtomicU64::new(1),
            settings,
            registry,
            timer,
        })
    }

    /// Merges a snapshot `remote` received from `sender`.
    pub fn on_receive(&self, sender: &GossipMember, remote: &[GossipMember]) {
        self.engine.merge(&self.registry, sender, remote);
    }

    /// Identity of the local node.
    pub fn myself(&self) -> &MemberIdentity {
        &self.myself
    }

    /// Settings the coordinator was created with.
    pub fn settings(&self) -> &GossipSettings {
        &self.settings
    }

    /// Registry holding the membership view.
    pub fn registry(&self) -> &MembershipRegistry {
        &self.registry
    }

    /// Members currently believed reachable.
    pub fn live_members(&self) -> Vec<MemberRecord> {
        self.registry.live_members()
    }

    /// Members currently believed unreachable, with the heartbeat they had when declared dead.
    pub fn dead_members(&self) -> Vec<MemberRecord> {
        self.registry.dead_members()
    }

    /// Current heartbeat of the local node.
    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat.load(Ordering::SeqCst)
    }

    /// Increments the heartbeat of the local node, returning the new value.
    pub fn beat(&self) -> Heartbeat {
        self.heartbeat.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Builds what the active side sends to a peer: the local node as sender and the live members plus itself.
    pub fn payload(&self) -> (GossipMember, Vec<GossipMember>) {
        let sender = GossipMember::new(self.myself.clone(), self.heartbeat());
        let members = std::iter::once(sender.clone())
            .chain(self.registry.live_members().iter().map(MemberRecord::to_gossip))
            .collect();
        (sender, members)
    }

    /// Stops the timer thread. Live members are no longer declared dead afterwards.
    pub fn stop(&mut self) -> Result<()> {
        self.timer.stop()
    }
}
