use async_trait::async_trait;

use crate::error::RoutingError;

/// Neighbor transport, consumed as an external collaborator. Owns
/// discovery/advertisement and the connection lifecycle to directly
/// reachable peers; this crate only ever hands it already hop-encrypted
/// bytes and reads its current neighbor set.
#[async_trait]
pub trait NeighborTransport: Send + Sync {
    /// Deliver `bytes` to the neighbor at `address`. Returns an opaque
    /// transport-assigned payload id on successful handoff.
    async fn send_to_neighbor(&self, address: &str, bytes: Vec<u8>) -> Result<u64, RoutingError>;

    /// Addresses of peers currently reachable in one hop.
    async fn connected_neighbors(&self) -> Vec<String>;
}
