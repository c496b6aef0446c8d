//! Membership view of a heartbeat-based gossip failure detector.
//!
//! Every node keeps a set of live and a set of dead members. Peers periodically send their view of the cluster,
//! which is merged into the local one by [`GossipCoordinator::on_receive`]. A live member whose heartbeat has not
//! increased within the cleanup interval is declared dead; a dead member comes back when it contacts the node
//! directly or when a peer reports a greater heartbeat for it.
//!
//! Transport, address resolution and the side pushing the local view to peers live outside this crate.

mod coordinator;
mod engine;
mod member;
mod registry;
mod result;
mod settings;
mod timer;

pub use crate::coordinator::GossipCoordinator;
pub use crate::engine::ReconciliationEngine;
pub use crate::member::{GossipMember, Heartbeat, MemberId, MemberIdentity, MemberRecord};
pub use crate::registry::{MembershipRegistry, Outcome};
pub use crate::settings::GossipSettings;
pub use crate::timer::{TimeoutScheduler, TimeoutTimer};
