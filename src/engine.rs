use crate::member::{GossipMember, MemberId, MemberRecord};
use crate::registry::{MembershipRegistry, Outcome};
use log::{debug, info, log_enabled, Level};

// A member keeps moving between live and dead only while other threads race on it.
const MAX_ATTEMPTS: usize = 4;

/// Folds snapshots received from peers into the local registry.
///
/// Merging never fails: every combination of local state and remote heartbeat is either applied or ignored.
/// Records are trusted as delivered, validating ids and heartbeats is up to the transport.
pub struct ReconciliationEngine {
    myself: MemberId,
}

impl ReconciliationEngine {
    /// Creates an engine for the node identified by `myself`.
    pub fn new(myself: MemberId) -> Self {
        ReconciliationEngine { myself }
    }

    /// Merges `remote`, received directly from `sender`, into `registry`.
    ///
    /// Entries about the local node are skipped. A member listed more than once ends up with the greatest of
    /// its heartbeats.
    pub fn merge(&self, registry: &MembershipRegistry, sender: &GossipMember, remote: &[GossipMember]) {
        // Hearing from a member directly proves it is alive, whatever heartbeat was recorded at its death.
        if registry.move_dead_to_live(sender.identity.clone(), sender.heartbeat) {
            info!(
                "{} contacted by dead member {}",
                self.myself, sender.identity.uri
            );
        }

        for member in remote {
            if *member.id() == self.myself {
                continue;
            }
            self.reconcile(registry, sender, remote, member);
        }
    }

    fn reconcile(
        &self,
        registry: &MembershipRegistry,
        sender: &GossipMember,
        remote: &[GossipMember],
        member: &GossipMember,
    ) {
        for _ in 0..MAX_ATTEMPTS {
            let outcome = if registry.lookup_live(member.id()).is_some() {
                registry.refresh(member.id(), member.heartbeat)
            } else if registry.lookup_dead(member.id()).is_some() {
                match registry.revive_if_greater(member.identity.clone(), member.heartbeat) {
                    Outcome::Applied => {
                        debug!(
                            "Removed remote member {} from dead list and added to live list",
                            member.identity.uri
                        );
                        Outcome::Applied
                    }
                    Outcome::Ignored => {
                        self.dump(registry, sender, remote);
                        Outcome::Ignored
                    }
                    Outcome::Missed => Outcome::Missed,
                }
            } else {
                let outcome = registry.discover(MemberRecord::from(member.clone()));
                if outcome == Outcome::Applied {
                    debug!("Discovered member {} at heartbeat {}", member.identity, member.heartbeat);
                }
                outcome
            };
            if outcome != Outcome::Missed {
                return;
            }
        }
        debug!("Member {} kept changing state while merging, skipping it", member.identity);
        self.dump(registry, sender, remote);
    }

    fn dump(&self, registry: &MembershipRegistry, sender: &GossipMember, remote: &[GossipMember]) {
        if !log_enabled!(Level::Debug) {
            return;
        }
        debug!("me {}", self.myself);
        debug!("sender {}", sender);
        debug!("remote {:?}", remote.iter().map(|m| m.to_string()).collect::<Vec<_>>());
        debug!("live {:?}", registry.live_members().iter().map(|m| m.to_string()).collect::<Vec<_>>());
        debug!("dead {:?}", registry.dead_members().iter().map(|m| m.to_string()).collect::<Vec<_>>());
    }
}
