use async_trait::async_trait;
use uuid::Uuid;

use crate::codec::RouteStatus;
use crate::model::RouteEntry;

/// Events the core surfaces to the application/message layer above it.
#[async_trait]
pub trait RoutingUpcalls: Send + Sync {
    /// A route to `destination_address` is usable, either freshly
    /// discovered or already cached.
    async fn on_route_found(&self, destination_address: &str, route: RouteEntry);

    /// Discovery for `request_uuid` collapsed without finding a route.
    async fn on_route_not_found(
        &self,
        request_uuid: Uuid,
        destination_address: &str,
        status: RouteStatus,
    );

    /// An end-to-end-decrypted application payload addressed to this node
    /// has arrived.
    async fn on_routed_message_received(
        &self,
        original_sender_address: &str,
        inner_payload: Vec<u8>,
        payload_id: u64,
    );
}
