/// Value types describing managed instances and replica-set state.
use std::collections::BTreeMap;
use std::fmt;

/// The router's per-instance verdict, derived from role and liveness.
/// Never stored in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    ReadWrite,
    ReadOnly,
    Unavailable,
}

/// Aggregated availability of one replica set. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaSetStatus {
    AvailableWritable,
    AvailableReadOnly,
    Unavailable,
}

/// An individual database node as described by the catalog, annotated with
/// the mode resolved from live group-replication state.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedInstance {
    pub replicaset_name: String,
    pub server_uuid: String,
    /// Free-form role tag from the catalog, e.g. "HA".
    pub role: String,
    pub mode: ServerMode,
    pub weight: f32,
    pub version_token: u32,
    pub location: String,
    /// Empty when the catalog row carried a null classic address.
    pub host: String,
    pub port: u16,
    pub xport: u16,
}

impl ManagedInstance {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ManagedInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} ({})",
            self.host, self.port, self.server_uuid
        )
    }
}

/// Replica-set name to instance list, in the catalog's native order.
/// Invariant: every instance's `replicaset_name` equals the key it is
/// stored under.
pub type ReplicaSetView = BTreeMap<String, Vec<ManagedInstance>>;

/// Group-replication member state as reported by a node about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    Online,
    Offline,
    Recovering,
    Unreachable,
    Other,
}

impl MemberState {
    /// Map the `member_state` column value onto the closed enum. Anything
    /// unrecognized collapses into `Other`.
    pub fn from_catalog(value: &str) -> Self {
        match value {
            "ONLINE" => MemberState::Online,
            "OFFLINE" => MemberState::Offline,
            "RECOVERING" => MemberState::Recovering,
            "UNREACHABLE" => MemberState::Unreachable,
            _ => MemberState::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    Primary,
    Secondary,
}

/// A live view of a node as seen from inside the replication group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupReplicationMember {
    pub member_id: String,
    pub host: String,
    pub port: u16,
    pub state: MemberState,
    pub role: MemberRole,
}
