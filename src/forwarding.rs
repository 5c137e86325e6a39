use std::sync::Arc;

use log::{debug, warn};

use crate::codec::{self, CoreMessage, RoutedMessageEnvelope};
use crate::config::RoutingConfig;
use crate::crypto::CryptoSession;
use crate::error::RoutingError;
use crate::model::RouteUsage;
use crate::scheduler::Scheduler;
use crate::store::{NodeDirectory, RouteTable};
use crate::transport::NeighborTransport;
use crate::upcalls::RoutingUpcalls;

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Result of `ForwardingEngine::send`.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Sent(u64),
    NoRoute,
    EncryptFailed(String),
}

/// Selects the next hop for a destination, encapsulates and decapsulates
/// routed messages, and updates usage timestamps (C4).
pub struct ForwardingEngine {
    nodes: NodeDirectory,
    routes: RouteTable,
    scheduler: Arc<Scheduler>,
    transport: Arc<dyn NeighborTransport>,
    crypto: Arc<dyn CryptoSession>,
    upcalls: Arc<dyn RoutingUpcalls>,
    config: RoutingConfig,
}

impl ForwardingEngine {
    pub fn new(
        nodes: NodeDirectory,
        routes: RouteTable,
        scheduler: Arc<Scheduler>,
        transport: Arc<dyn NeighborTransport>,
        crypto: Arc<dyn CryptoSession>,
        upcalls: Arc<dyn RoutingUpcalls>,
        config: RoutingConfig,
    ) -> Self {
        Self {
            nodes,
            routes,
            scheduler,
            transport,
            crypto,
            upcalls,
            config,
        }
    }

    /// Look up a usable route to `destination_local_id`, evicting it (and
    /// its usages) if it is stale. Shared by `send` and
    /// `on_incoming_routed`.
    async fn usable_route(
        &self,
        destination_local_id: crate::model::NodeId,
    ) -> Result<Option<(crate::model::RouteEntry, RouteUsage)>, RoutingError> {
        let routes = self.routes.clone();
        let (route, usage) = self
            .scheduler
            .submit(move || {
                let route = routes.get_most_recent_opened_route(destination_local_id)?;
                let usage = routes.get_most_recent_usage(destination_local_id)?;
                Ok((route, usage))
            })
            .await?;

        let (route, usage) = match (route, usage) {
            (Some(route), Some(usage)) => (route, usage),
            _ => return Ok(None),
        };

        let max_inactivity_millis = self.config.max_inactivity.as_millis() as i64;
        if !route.opened || now_millis() - usage.last_used_timestamp > max_inactivity_millis {
            debug!(
                "usable_route: evicting stale route {} to {}",
                route.discovery_uuid, destination_local_id
            );
            let routes = self.routes.clone();
            let discovery_uuid = route.discovery_uuid;
            self.scheduler
                .submit(move || routes.delete_route_cascade(discovery_uuid))
                .await?;
            return Ok(None);
        }

        let next_hop_address = self
            .nodes
            .get(route.next_hop_local_id)?
            .map(|node| node.address);
        let next_hop_address = match next_hop_address {
            Some(addr) => addr,
            None => return Ok(None),
        };

        let connected = self.transport.connected_neighbors().await;
        if !connected.iter().any(|addr| addr == &next_hop_address) {
            debug!(
                "usable_route: next hop {next_hop_address} no longer connected, evicting route"
            );
            let routes = self.routes.clone();
            let discovery_uuid = route.discovery_uuid;
            self.scheduler
                .submit(move || routes.delete_route_cascade(discovery_uuid))
                .await?;
            return Ok(None);
        }

        Ok(Some((route, usage)))
    }

    async fn forward_envelope(
        &self,
        next_hop_address: &str,
        message: RoutedMessageEnvelope,
    ) -> Result<u64, RoutingError> {
        let plaintext = codec::encode_envelope(&CoreMessage::RoutedMessage(message))?;
        let ciphertext = self
            .crypto
            .encrypt(next_hop_address, &plaintext)
            .await
            .map_err(|err| RoutingError::EncryptFailed {
                peer: next_hop_address.to_string(),
                reason: err.to_string(),
            })?;
        self.transport
            .send_to_neighbor(next_hop_address, ciphertext)
            .await
            .map_err(|err| RoutingError::TransportSend {
                neighbor: next_hop_address.to_string(),
                reason: err.to_string(),
            })
    }

    pub async fn send(
        &self,
        final_destination_address: &str,
        original_sender_address: &str,
        inner_payload_bytes: &[u8],
    ) -> Result<SendOutcome, RoutingError> {
        let destination_local_id = self.nodes.resolve_or_create(final_destination_address)?;

        let (route, usage) = match self.usable_route(destination_local_id).await? {
            Some(pair) => pair,
            None => return Ok(SendOutcome::NoRoute),
        };

        let e2e_blob = match self
            .crypto
            .encrypt(final_destination_address, inner_payload_bytes)
            .await
        {
            Ok(blob) => blob,
            Err(err) => {
                warn!(
                    "send: e2e encrypt for {final_destination_address} failed: {err}"
                );
                return Ok(SendOutcome::EncryptFailed(err.to_string()));
            }
        };

        let next_hop_address = self
            .nodes
            .get(route.next_hop_local_id)?
            .map(|node| node.address)
            .ok_or(RoutingError::NoRoute)?;

        let routed = RoutedMessageEnvelope {
            final_destination_address: final_destination_address.to_string(),
            route_uuid: route.discovery_uuid,
            route_usage_uuid: usage.usage_request_uuid,
            original_sender_address: original_sender_address.to_string(),
            e2e_encrypted_body: e2e_blob,
            payload_id: None,
        };

        let payload_id = self.forward_envelope(&next_hop_address, routed).await?;

        let routes = self.routes.clone();
        let usage_uuid = usage.usage_request_uuid;
        let now = now_millis();
        self.scheduler
            .submit(move || routes.touch_usage(usage_uuid, now))
            .await?;

        Ok(SendOutcome::Sent(payload_id))
    }

    pub async fn on_incoming_routed(
        &self,
        sender_address: &str,
        mut routed_message: RoutedMessageEnvelope,
        self_address: &str,
        transport_payload_id: u64,
    ) -> Result<(), RoutingError> {
        let _ = sender_address;

        if routed_message.final_destination_address == self_address {
            let plaintext = match self
                .crypto
                .decrypt(
                    &routed_message.original_sender_address,
                    &routed_message.e2e_encrypted_body,
                )
                .await
            {
                Ok(plaintext) => plaintext,
                Err(err) => {
                    warn!(
                        "on_incoming_routed: decrypt from {} failed, dropping: {err}",
                        routed_message.original_sender_address
                    );
                    return Ok(());
                }
            };

            let payload_id = routed_message.payload_id.unwrap_or(transport_payload_id);
            self.upcalls
                .on_routed_message_received(
                    &routed_message.original_sender_address,
                    plaintext,
                    payload_id,
                )
                .await;
            return Ok(());
        }

        let destination_local_id = match self
            .nodes
            .resolve(&routed_message.final_destination_address)?
        {
            Some(id) => id,
            None => {
                debug!(
                    "on_incoming_routed: no route for unseen destination {}",
                    routed_message.final_destination_address
                );
                return Ok(());
            }
        };

        let (route, usage) = match self.usable_route(destination_local_id).await? {
            Some(pair) => pair,
            None => {
                debug!(
                    "on_incoming_routed: no route for {}, dropping",
                    routed_message.final_destination_address
                );
                return Ok(());
            }
        };

        if routed_message.payload_id.is_none() {
            routed_message.payload_id = Some(transport_payload_id);
        }

        let next_hop_address = self
            .nodes
            .get(route.next_hop_local_id)?
            .map(|node| node.address)
            .ok_or(RoutingError::NoRoute)?;

        self.forward_envelope(&next_hop_address, routed_message)
            .await?;

        let routes = self.routes.clone();
        let usage_uuid = usage.usage_request_uuid;
        let now = now_millis();
        self.scheduler
            .submit(move || routes.touch_usage(usage_uuid, now))
            .await?;

        Ok(())
    }
}
