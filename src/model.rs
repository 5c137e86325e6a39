use uuid::Uuid;

/// A node's identity from the local node's perspective. Wraps the SQLite
/// rowid assigned the first time an address is sighted; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub i64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Minimal reference to a peer, created lazily on first sighting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub local_id: NodeId,
    pub address: String,
}

/// An established path to a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub discovery_uuid: Uuid,
    pub destination_local_id: NodeId,
    pub next_hop_local_id: NodeId,
    pub previous_hop_local_id: Option<NodeId>,
    pub hop_count: u16,
    pub opened: bool,
}

/// The most recent wall-clock use of a route by a particular send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteUsage {
    pub usage_request_uuid: Uuid,
    pub route_entry_discovery_uuid: Uuid,
    pub last_used_timestamp: i64,
}

/// In-flight discovery state, written when a node broadcasts or relays a
/// request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRequestEntry {
    pub request_uuid: Uuid,
    pub destination_local_id: NodeId,
    pub previous_hop_local_id: Option<NodeId>,
}

impl RouteRequestEntry {
    /// `true` at the node that originated the request.
    pub fn is_source(&self) -> bool {
        self.previous_hop_local_id.is_none()
    }
}

/// Per-neighbor record of an outbound branch of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastStatusEntry {
    pub request_uuid: Uuid,
    pub neighbor_local_id: NodeId,
    pub pending_response_in_progress: bool,
}
