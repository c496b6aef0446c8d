use gossip_membership::{GossipCoordinator, GossipMember, GossipSettings, Heartbeat, MemberIdentity};
use std::time::{Duration, Instant};

pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env().is_test(true).try_init();
}

pub fn identity(id: &str) -> MemberIdentity {
    MemberIdentity::new(id, "test", format!("udp://{}:2345", id))
}

pub fn gossip(id: &str, heartbeat: Heartbeat) -> GossipMember {
    GossipMember::new(identity(id), heartbeat)
}

pub fn coordinator(id: &str, cleanup_interval: u64) -> GossipCoordinator {
    init_logging();
    let settings = GossipSettings {
        cleanup_interval,
        gossip_interval: cleanup_interval / 4,
        timer_tick: 10,
    };
    GossipCoordinator::new(identity(id), settings).unwrap()
}

pub fn live(coordinator: &GossipCoordinator) -> Vec<(String, Heartbeat)> {
    coordinator
        .live_members()
        .into_iter()
        .map(|m| (m.identity.id.to_string(), m.heartbeat))
        .collect()
}

pub fn dead(coordinator: &GossipCoordinator) -> Vec<(String, Heartbeat)> {
    coordinator
        .dead_members()
        .into_iter()
        .map(|m| (m.identity.id.to_string(), m.heartbeat))
        .collect()
}

pub fn wait_until<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
