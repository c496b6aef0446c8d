use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use sha1::{Digest, Sha1};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

/// Heartbeat counter, only ever increased by the member's own process.
pub type Heartbeat = u64;

/// Cluster-unique identifier of a member.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(String);

impl MemberId {
    /// Wraps an identifier received from a peer or from configuration.
    pub fn new(id: impl Into<String>) -> Self {
        MemberId(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        MemberId::new(id)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable identity of a member.
///
/// Two identities are equal when their ids are equal, regardless of cluster name or uri.
#[derive(Debug, Clone)]
pub struct MemberIdentity {
    /// Cluster-unique id.
    pub id: MemberId,
    /// Name of the cluster the member belongs to.
    pub cluster_name: String,
    /// Endpoint address the member is reachable at.
    pub uri: String,
}

impl MemberIdentity {
    /// Creates an identity from its parts.
    pub fn new(id: impl Into<MemberId>, cluster_name: impl Into<String>, uri: impl Into<String>) -> Self {
        MemberIdentity {
            id: id.into(),
            cluster_name: cluster_name.into(),
            uri: uri.into(),
        }
    }

    /// Creates an identity for the local node with a freshly generated id.
    pub fn local(cluster_name: impl Into<String>, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        MemberIdentity {
            id: generate_id(&uri),
            cluster_name: cluster_name.into(),
            uri,
        }
    }
}

impl From<String> for MemberId {
    fn from(id: String) -> Self {
        MemberId(id)
    }
}

impl PartialEq for MemberIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MemberIdentity {}

impl Hash for MemberIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl fmt::Display for MemberIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.id, self.uri, self.cluster_name)
    }
}

/// Member record as it travels between nodes.
///
/// Values are trusted as delivered: a non-empty id is a precondition the transport has to uphold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipMember {
    /// Identity of the described member.
    pub identity: MemberIdentity,
    /// Heartbeat last known to the sending node.
    pub heartbeat: Heartbeat,
}

impl GossipMember {
    /// Creates a wire record.
    pub fn new(identity: MemberIdentity, heartbeat: Heartbeat) -> Self {
        GossipMember { identity, heartbeat }
    }

    /// Shorthand for the member's id.
    pub fn id(&self) -> &MemberId {
        &self.identity.id
    }
}

impl fmt::Display for GossipMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} hb={}", self.identity, self.heartbeat)
    }
}

/// Member as known by the local registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRecord {
    /// Identity of the member.
    pub identity: MemberIdentity,
    /// Last accepted heartbeat.
    pub heartbeat: Heartbeat,
}

impl MemberRecord {
    /// Creates a record.
    pub fn new(identity: MemberIdentity, heartbeat: Heartbeat) -> Self {
        MemberRecord { identity, heartbeat }
    }

    /// Shorthand for the member's id.
    pub fn id(&self) -> &MemberId {
        &self.identity.id
    }

    /// Converts the record into its wire form.
    pub fn to_gossip(&self) -> GossipMember {
        GossipMember::new(self.identity.clone(), self.heartbeat)
    }
}

impl From<GossipMember> for MemberRecord {
    fn from(member: GossipMember) -> Self {
        MemberRecord::new(member.identity, member.heartbeat)
    }
}

impl fmt::Display for MemberRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} hb={}", self.identity, self.heartbeat)
    }
}

fn generate_id(uri: &str) -> MemberId {
    let mut hasher = Sha1::new();
    hasher.input(uri.as_bytes());
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => hasher.input(duration.as_nanos().to_be_bytes()),
        Err(_) => hasher.input(SmallRng::from_entropy().gen::<u64>().to_be_bytes()),
    }
    let digest = hasher.result();
    MemberId(digest.iter().map(|b| format!("{:02x}", b)).collect())
}
