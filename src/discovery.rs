use std::sync::Arc;

use log::{debug, info, warn};
use uuid::Uuid;

use crate::codec::{self, CoreMessage, RouteRequestMessage, RouteResponseMessage, RouteStatus};
use crate::config::RoutingConfig;
use crate::crypto::CryptoSession;
use crate::error::RoutingError;
use crate::model::{BroadcastStatusEntry, NodeId, RouteEntry, RouteRequestEntry, RouteUsage};
use crate::scheduler::Scheduler;
use crate::store::{DiscoveryState, NodeDirectory, RouteTable};
use crate::transport::NeighborTransport;
use crate::upcalls::RoutingUpcalls;

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Result of `DiscoveryEngine::initiate_discovery`.
#[derive(Debug, Clone)]
pub enum DiscoveryOutcome {
    /// A usable cached route was found; no network traffic was sent.
    Found(RouteEntry),
    /// A fresh request was broadcast to this many neighbors.
    Initiated { branches: u32 },
    /// No neighbor was connected (or none accepted dispatch); nothing was
    /// persisted.
    NoNeighbors,
}

/// Initiates, relays, and completes route requests; processes responses;
/// applies collapse rules (C3).
pub struct DiscoveryEngine {
    nodes: NodeDirectory,
    routes: RouteTable,
    discovery: DiscoveryState,
    scheduler: Arc<Scheduler>,
    transport: Arc<dyn NeighborTransport>,
    crypto: Arc<dyn CryptoSession>,
    upcalls: Arc<dyn RoutingUpcalls>,
    config: RoutingConfig,
}

impl DiscoveryEngine {
    pub fn new(
        nodes: NodeDirectory,
        routes: RouteTable,
        discovery: DiscoveryState,
        scheduler: Arc<Scheduler>,
        transport: Arc<dyn NeighborTransport>,
        crypto: Arc<dyn CryptoSession>,
        upcalls: Arc<dyn RoutingUpcalls>,
        config: RoutingConfig,
    ) -> Self {
        Self {
            nodes,
            routes,
            discovery,
            scheduler,
            transport,
            crypto,
            upcalls,
            config,
        }
    }

    async fn send_envelope(
        &self,
        neighbor_address: &str,
        message: &CoreMessage,
    ) -> Result<u64, RoutingError> {
        let plaintext = codec::encode_envelope(message)?;
        let ciphertext = self
            .crypto
            .encrypt(neighbor_address, &plaintext)
            .await
            .map_err(|err| RoutingError::EncryptFailed {
                peer: neighbor_address.to_string(),
                reason: err.to_string(),
            })?;
        self.transport
            .send_to_neighbor(neighbor_address, ciphertext)
            .await
            .map_err(|err| RoutingError::TransportSend {
                neighbor: neighbor_address.to_string(),
                reason: err.to_string(),
            })
    }

    async fn reply(&self, to_address: &str, request_uuid: Uuid, status: RouteStatus, hop_count: u32) {
        let message = CoreMessage::RouteResponse(RouteResponseMessage {
            request_uuid,
            status,
            hop_count,
        });
        if let Err(err) = self.send_envelope(to_address, &message).await {
            warn!("discovery: failed to send response to {to_address}: {err}");
        }
    }

    /// Resolve `address` to a local id, creating the `Node` lazily. Node
    /// creation has no cross-entity invariant to protect, so it runs
    /// outside the scheduler queue.
    fn resolve(&self, address: &str) -> Result<NodeId, RoutingError> {
        self.nodes.resolve_or_create(address)
    }

    pub async fn initiate_discovery(
        &self,
        destination_address: &str,
    ) -> Result<DiscoveryOutcome, RoutingError> {
        let destination_local_id = self.resolve(destination_address)?;

        let cached = {
            let routes = self.routes.clone();
            self.scheduler
                .submit(move || {
                    let route = routes.get_most_recent_opened_route(destination_local_id)?;
                    let usage = routes.get_most_recent_usage(destination_local_id)?;
                    Ok((route, usage))
                })
                .await?
        };

        if let (Some(route), Some(usage)) = cached {
            let max_inactivity_millis = self.config.max_inactivity.as_millis() as i64;
            if route.opened && now_millis() - usage.last_used_timestamp <= max_inactivity_millis {
                debug!("initiate_discovery: reusing cached route to {destination_address}");
                return Ok(DiscoveryOutcome::Found(route));
            }
        }

        let neighbors = self.transport.connected_neighbors().await;
        if neighbors.is_empty() {
            return Ok(DiscoveryOutcome::NoNeighbors);
        }

        let request_uuid = Uuid::new_v4();
        let max_ttl_absolute_millis =
            now_millis() + self.config.default_route_ttl.as_millis() as i64;

        {
            let discovery = self.discovery.clone();
            let entry = RouteRequestEntry {
                request_uuid,
                destination_local_id,
                previous_hop_local_id: None,
            };
            self.scheduler
                .submit(move || discovery.insert_request(&entry))
                .await?;
        }

        let request_msg = RouteRequestMessage {
            uuid: request_uuid,
            destination_address: destination_address.to_string(),
            remaining_hops: self.config.default_route_hops as u32,
            max_ttl_absolute_millis,
        };

        let mut dispatched = Vec::new();
        for neighbor in &neighbors {
            let message = CoreMessage::RouteRequest(request_msg.clone());
            match self.send_envelope(neighbor, &message).await {
                Ok(_) => match self.resolve(neighbor) {
                    Ok(id) => dispatched.push(id),
                    Err(err) => warn!("initiate_discovery: failed to resolve {neighbor}: {err}"),
                },
                Err(err) => {
                    warn!("initiate_discovery: send to {neighbor} failed: {err}");
                }
            }
        }

        if dispatched.is_empty() {
            let discovery = self.discovery.clone();
            self.scheduler
                .submit(move || discovery.delete_request(request_uuid))
                .await?;
            return Ok(DiscoveryOutcome::NoNeighbors);
        }

        let branch_count = dispatched.len() as u32;
        {
            let discovery = self.discovery.clone();
            self.scheduler
                .submit(move || {
                    for neighbor_local_id in dispatched {
                        discovery.insert_broadcast_status(&BroadcastStatusEntry {
                            request_uuid,
                            neighbor_local_id,
                            pending_response_in_progress: false,
                        })?;
                    }
                    Ok(())
                })
                .await?;
        }

        info!("initiate_discovery: broadcast {request_uuid} to {branch_count} neighbors");
        Ok(DiscoveryOutcome::Initiated {
            branches: branch_count,
        })
    }

    pub async fn on_incoming_request(
        &self,
        sender_address: &str,
        request: RouteRequestMessage,
        self_address: &str,
    ) -> Result<(), RoutingError> {
        let sender_local_id = self.resolve(sender_address)?;

        let existing = {
            let discovery = self.discovery.clone();
            let uuid = request.uuid;
            self.scheduler
                .submit(move || discovery.get_request(uuid))
                .await?
        };
        if existing.is_some() {
            debug!("on_incoming_request: {} already in progress", request.uuid);
            self.reply(
                sender_address,
                request.uuid,
                RouteStatus::RequestAlreadyInProgress,
                0,
            )
            .await;
            return Ok(());
        }

        if request.destination_address == self_address {
            self.reply(sender_address, request.uuid, RouteStatus::RouteFound, 0)
                .await;
            return Ok(());
        }

        if request.max_ttl_absolute_millis <= now_millis() {
            self.reply(sender_address, request.uuid, RouteStatus::TtlExpired, 0)
                .await;
            return Ok(());
        }

        if request.remaining_hops == 0 {
            self.reply(
                sender_address,
                request.uuid,
                RouteStatus::MaxHopsReached,
                0,
            )
            .await;
            return Ok(());
        }

        let destination_local_id = self.resolve(&request.destination_address)?;
        {
            let discovery = self.discovery.clone();
            let entry = RouteRequestEntry {
                request_uuid: request.uuid,
                destination_local_id,
                previous_hop_local_id: Some(sender_local_id),
            };
            self.scheduler
                .submit(move || discovery.insert_request(&entry))
                .await?;
        }

        let relay_msg = RouteRequestMessage {
            uuid: request.uuid,
            destination_address: request.destination_address.clone(),
            remaining_hops: request.remaining_hops - 1,
            max_ttl_absolute_millis: request.max_ttl_absolute_millis,
        };

        let neighbors = self.transport.connected_neighbors().await;
        let mut dispatched = Vec::new();
        for neighbor in neighbors.iter().filter(|addr| addr.as_str() != sender_address) {
            let message = CoreMessage::RouteRequest(relay_msg.clone());
            match self.send_envelope(neighbor, &message).await {
                Ok(_) => match self.resolve(neighbor) {
                    Ok(id) => dispatched.push(id),
                    Err(err) => warn!("on_incoming_request: failed to resolve {neighbor}: {err}"),
                },
                Err(err) => warn!("on_incoming_request: relay to {neighbor} failed: {err}"),
            }
        }

        if dispatched.is_empty() {
            self.reply(
                sender_address,
                request.uuid,
                RouteStatus::NoRouteFound,
                0,
            )
            .await;
            let discovery = self.discovery.clone();
            let uuid = request.uuid;
            self.scheduler
                .submit(move || discovery.delete_request(uuid))
                .await?;
            return Ok(());
        }

        let uuid = request.uuid;
        let discovery = self.discovery.clone();
        self.scheduler
            .submit(move || {
                for neighbor_local_id in dispatched {
                    discovery.insert_broadcast_status(&BroadcastStatusEntry {
                        request_uuid: uuid,
                        neighbor_local_id,
                        pending_response_in_progress: false,
                    })?;
                }
                Ok(())
            })
            .await?;

        Ok(())
    }

    /// Delete all broadcast statuses and the request row for `uuid`, then
    /// either notify the application (at the source) or forward the
    /// terminal status toward `previous_hop` (at a relay).
    async fn complete(
        &self,
        request_uuid: Uuid,
        destination_address: String,
        previous_hop_address: Option<String>,
        status: RouteStatus,
        hop_count: u32,
    ) -> Result<(), RoutingError> {
        {
            let discovery = self.discovery.clone();
            self.scheduler
                .submit(move || {
                    discovery.delete_all_broadcast_statuses(request_uuid)?;
                    discovery.delete_request(request_uuid)
                })
                .await?;
        }

        match previous_hop_address {
            None => {
                self.upcalls
                    .on_route_not_found(request_uuid, &destination_address, status)
                    .await;
            }
            Some(previous_hop) => {
                self.reply(&previous_hop, request_uuid, status, hop_count).await;
            }
        }
        Ok(())
    }

    pub async fn on_incoming_response(
        &self,
        sender_address: &str,
        response: RouteResponseMessage,
    ) -> Result<(), RoutingError> {
        let uuid = response.request_uuid;
        let sender_local_id = self.resolve(sender_address)?;

        let entry = {
            let discovery = self.discovery.clone();
            self.scheduler
                .submit(move || discovery.get_request(uuid))
                .await?
        };
        let entry = match entry {
            Some(entry) => entry,
            None => {
                debug!("on_incoming_response: {uuid} has no request entry, dropping (late response)");
                return Ok(());
            }
        };

        let branch = {
            let discovery = self.discovery.clone();
            self.scheduler
                .submit(move || discovery.get_broadcast_status(uuid, sender_local_id))
                .await?
        };
        if branch.is_none() {
            debug!("on_incoming_response: {uuid} has no branch for {sender_address}, dropping (unsolicited)");
            return Ok(());
        }

        let is_source = entry.previous_hop_local_id.is_none();
        let previous_hop_address = match entry.previous_hop_local_id {
            None => None,
            Some(id) => self.nodes.get(id)?.map(|node| node.address),
        };
        let destination_address = self
            .nodes
            .get(entry.destination_local_id)?
            .map(|node| node.address)
            .unwrap_or_default();

        match response.status {
            RouteStatus::RouteFound => {
                let route = RouteEntry {
                    discovery_uuid: uuid,
                    destination_local_id: entry.destination_local_id,
                    next_hop_local_id: sender_local_id,
                    previous_hop_local_id: entry.previous_hop_local_id,
                    hop_count: response.hop_count as u16,
                    opened: true,
                };
                let now = now_millis();
                {
                    let discovery = self.discovery.clone();
                    let routes = self.routes.clone();
                    let route = route.clone();
                    self.scheduler
                        .submit(move || {
                            discovery.delete_request(uuid)?;
                            routes.insert_route(&route, now)?;
                            routes.insert_usage(&RouteUsage {
                                usage_request_uuid: uuid,
                                route_entry_discovery_uuid: uuid,
                                last_used_timestamp: now,
                            })?;
                            discovery.delete_all_broadcast_statuses(uuid)
                        })
                        .await?;
                }

                if is_source {
                    self.upcalls
                        .on_route_found(&destination_address, route)
                        .await;
                } else if let Some(previous_hop) = previous_hop_address {
                    self.reply(
                        &previous_hop,
                        uuid,
                        RouteStatus::RouteFound,
                        response.hop_count + 1,
                    )
                    .await;
                }
                Ok(())
            }
            RouteStatus::RequestAlreadyInProgress => {
                if is_source {
                    warn!("on_incoming_response: {uuid} suspected UUID collision at source");
                }
                let discovery = self.discovery.clone();
                self.scheduler
                    .submit(move || {
                        discovery.update_broadcast_status(uuid, sender_local_id, true)
                    })
                    .await?;

                let any_undecided = {
                    let discovery = self.discovery.clone();
                    self.scheduler
                        .submit(move || discovery.any_broadcast_status_with_pending(uuid, false))
                        .await?
                };
                if any_undecided {
                    return Ok(());
                }

                self.complete(
                    uuid,
                    destination_address,
                    previous_hop_address,
                    RouteStatus::RequestAlreadyInProgress,
                    0,
                )
                .await
            }
            failure @ (RouteStatus::NoRouteFound
            | RouteStatus::TtlExpired
            | RouteStatus::MaxHopsReached) => {
                {
                    let discovery = self.discovery.clone();
                    self.scheduler
                        .submit(move || discovery.delete_broadcast_status(uuid, sender_local_id))
                        .await?;
                }

                let any_undecided = {
                    let discovery = self.discovery.clone();
                    self.scheduler
                        .submit(move || discovery.any_broadcast_status_with_pending(uuid, false))
                        .await?
                };
                if any_undecided {
                    return Ok(());
                }

                let any_in_progress = {
                    let discovery = self.discovery.clone();
                    self.scheduler
                        .submit(move || discovery.any_broadcast_status_with_pending(uuid, true))
                        .await?
                };

                let terminal_status = if any_in_progress {
                    RouteStatus::RequestAlreadyInProgress
                } else {
                    failure
                };

                self.complete(
                    uuid,
                    destination_address,
                    previous_hop_address,
                    terminal_status,
                    0,
                )
                .await
            }
            RouteStatus::Unknown(code) => {
                warn!("on_incoming_response: {uuid} dropped, unknown status code {code}");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingTransport {
        neighbors: Vec<String>,
        sent: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl RecordingTransport {
        fn new(neighbors: Vec<&str>) -> Self {
            Self {
                neighbors: neighbors.into_iter().map(String::from).collect(),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent_to(&self, address: &str) -> Vec<CoreMessage> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(addr, _)| addr == address)
                .map(|(_, bytes)| codec::decode_envelope(bytes).unwrap())
                .collect()
        }
    }

    #[async_trait]
    impl NeighborTransport for RecordingTransport {
        async fn send_to_neighbor(&self, address: &str, bytes: Vec<u8>) -> Result<u64, RoutingError> {
            self.sent.lock().unwrap().push((address.to_string(), bytes));
            Ok(1)
        }

        async fn connected_neighbors(&self) -> Vec<String> {
            self.neighbors.clone()
        }
    }

    struct IdentityCrypto;

    #[async_trait]
    impl CryptoSession for IdentityCrypto {
        async fn encrypt(&self, _peer_address: &str, plaintext: &[u8]) -> Result<Vec<u8>, RoutingError> {
            Ok(plaintext.to_vec())
        }

        async fn decrypt(&self, _peer_address: &str, ciphertext: &[u8]) -> Result<Vec<u8>, RoutingError> {
            Ok(ciphertext.to_vec())
        }
    }

    #[derive(Debug, Clone)]
    enum RecordedEvent {
        RouteFound(String, RouteEntry),
        RouteNotFound(String, RouteStatus),
    }

    struct RecordingUpcalls {
        events: Mutex<Vec<RecordedEvent>>,
    }

    impl RecordingUpcalls {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }

        fn events(&self) -> Vec<RecordedEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RoutingUpcalls for RecordingUpcalls {
        async fn on_route_found(&self, destination_address: &str, route: RouteEntry) {
            self.events
                .lock()
                .unwrap()
                .push(RecordedEvent::RouteFound(destination_address.to_string(), route));
        }

        async fn on_route_not_found(
            &self,
            _request_uuid: Uuid,
            destination_address: &str,
            status: RouteStatus,
        ) {
            self.events.lock().unwrap().push(RecordedEvent::RouteNotFound(
                destination_address.to_string(),
                status,
            ));
        }

        async fn on_routed_message_received(&self, _: &str, _: Vec<u8>, _: u64) {}
    }

    fn build_engine(
        neighbors: Vec<&str>,
    ) -> (DiscoveryEngine, Arc<RecordingTransport>, Arc<RecordingUpcalls>) {
        let (nodes, routes, discovery) = store::open_in_memory().unwrap();
        let transport = Arc::new(RecordingTransport::new(neighbors));
        let crypto = Arc::new(IdentityCrypto);
        let upcalls = Arc::new(RecordingUpcalls::new());
        let scheduler = Arc::new(Scheduler::new());
        let engine = DiscoveryEngine::new(
            nodes,
            routes,
            discovery,
            scheduler,
            transport.clone(),
            crypto,
            upcalls.clone(),
            RoutingConfig::default(),
        );
        (engine, transport, upcalls)
    }

    #[tokio::test]
    async fn destination_match_replies_route_found() {
        let (engine, transport, _upcalls) = build_engine(vec![]);
        let request = RouteRequestMessage {
            uuid: Uuid::new_v4(),
            destination_address: "self".to_string(),
            remaining_hops: 5,
            max_ttl_absolute_millis: now_millis() + 10_000,
        };
        engine
            .on_incoming_request("sender", request.clone(), "self")
            .await
            .unwrap();

        let replies = transport.sent_to("sender");
        assert_eq!(replies.len(), 1);
        match &replies[0] {
            CoreMessage::RouteResponse(r) => {
                assert_eq!(r.request_uuid, request.uuid);
                assert!(matches!(r.status, RouteStatus::RouteFound));
                assert_eq!(r.hop_count, 0);
            }
            other => panic!("expected RouteResponse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_ttl_replies_ttl_expired() {
        let (engine, transport, _upcalls) = build_engine(vec!["neighbor"]);
        let request = RouteRequestMessage {
            uuid: Uuid::new_v4(),
            destination_address: "other".to_string(),
            remaining_hops: 5,
            max_ttl_absolute_millis: now_millis() - 1,
        };
        engine
            .on_incoming_request("sender", request, "self")
            .await
            .unwrap();

        let replies = transport.sent_to("sender");
        assert_eq!(replies.len(), 1);
        match &replies[0] {
            CoreMessage::RouteResponse(r) => assert!(matches!(r.status, RouteStatus::TtlExpired)),
            other => panic!("expected RouteResponse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ttl_equal_to_now_counts_as_expired() {
        let (engine, transport, _upcalls) = build_engine(vec!["neighbor"]);
        let request = RouteRequestMessage {
            uuid: Uuid::new_v4(),
            destination_address: "other".to_string(),
            remaining_hops: 5,
            max_ttl_absolute_millis: now_millis(),
        };
        engine
            .on_incoming_request("sender", request, "self")
            .await
            .unwrap();

        let replies = transport.sent_to("sender");
        assert_eq!(replies.len(), 1);
        match &replies[0] {
            CoreMessage::RouteResponse(r) => assert!(matches!(r.status, RouteStatus::TtlExpired)),
            other => panic!("expected RouteResponse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_remaining_hops_replies_max_hops_reached() {
        let (engine, transport, _upcalls) = build_engine(vec!["neighbor"]);
        let request = RouteRequestMessage {
            uuid: Uuid::new_v4(),
            destination_address: "other".to_string(),
            remaining_hops: 0,
            max_ttl_absolute_millis: now_millis() + 10_000,
        };
        engine
            .on_incoming_request("sender", request, "self")
            .await
            .unwrap();

        let replies = transport.sent_to("sender");
        assert_eq!(replies.len(), 1);
        match &replies[0] {
            CoreMessage::RouteResponse(r) => assert!(matches!(r.status, RouteStatus::MaxHopsReached)),
            other => panic!("expected RouteResponse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_request_replies_already_in_progress() {
        let (engine, transport, _upcalls) = build_engine(vec!["neighbor"]);
        let uuid = Uuid::new_v4();
        let destination_local_id = engine.resolve("other").unwrap();
        engine
            .discovery
            .insert_request(&RouteRequestEntry {
                request_uuid: uuid,
                destination_local_id,
                previous_hop_local_id: None,
            })
            .unwrap();

        let request = RouteRequestMessage {
            uuid,
            destination_address: "other".to_string(),
            remaining_hops: 5,
            max_ttl_absolute_millis: now_millis() + 10_000,
        };
        engine
            .on_incoming_request("sender", request, "self")
            .await
            .unwrap();

        let replies = transport.sent_to("sender");
        assert_eq!(replies.len(), 1);
        match &replies[0] {
            CoreMessage::RouteResponse(r) => {
                assert!(matches!(r.status, RouteStatus::RequestAlreadyInProgress))
            }
            other => panic!("expected RouteResponse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn route_found_at_source_invokes_upcall() {
        let (engine, transport, upcalls) = build_engine(vec!["neighbor"]);
        let uuid = Uuid::new_v4();
        let destination_local_id = engine.resolve("dest").unwrap();
        let neighbor_local_id = engine.resolve("neighbor").unwrap();
        engine
            .discovery
            .insert_request(&RouteRequestEntry {
                request_uuid: uuid,
                destination_local_id,
                previous_hop_local_id: None,
            })
            .unwrap();
        engine
            .discovery
            .insert_broadcast_status(&BroadcastStatusEntry {
                request_uuid: uuid,
                neighbor_local_id,
                pending_response_in_progress: false,
            })
            .unwrap();

        let response = RouteResponseMessage {
            request_uuid: uuid,
            status: RouteStatus::RouteFound,
            hop_count: 2,
        };
        engine
            .on_incoming_response("neighbor", response)
            .await
            .unwrap();

        let events = upcalls.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            RecordedEvent::RouteFound(destination, route) => {
                assert_eq!(destination, "dest");
                assert_eq!(route.hop_count, 2);
                assert!(route.opened);
            }
            other => panic!("expected RouteFound, got {other:?}"),
        }
        assert!(transport.sent_to("neighbor").is_empty());
    }

    #[tokio::test]
    async fn route_found_at_relay_forwards_with_incremented_hop_count() {
        let (engine, transport, upcalls) = build_engine(vec!["downstream"]);
        let uuid = Uuid::new_v4();
        let destination_local_id = engine.resolve("dest").unwrap();
        let previous_hop_local_id = engine.resolve("upstream").unwrap();
        let downstream_local_id = engine.resolve("downstream").unwrap();
        engine
            .discovery
            .insert_request(&RouteRequestEntry {
                request_uuid: uuid,
                destination_local_id,
                previous_hop_local_id: Some(previous_hop_local_id),
            })
            .unwrap();
        engine
            .discovery
            .insert_broadcast_status(&BroadcastStatusEntry {
                request_uuid: uuid,
                neighbor_local_id: downstream_local_id,
                pending_response_in_progress: false,
            })
            .unwrap();

        let response = RouteResponseMessage {
            request_uuid: uuid,
            status: RouteStatus::RouteFound,
            hop_count: 2,
        };
        engine
            .on_incoming_response("downstream", response)
            .await
            .unwrap();

        assert!(upcalls.events().is_empty());
        let replies = transport.sent_to("upstream");
        assert_eq!(replies.len(), 1);
        match &replies[0] {
            CoreMessage::RouteResponse(r) => {
                assert!(matches!(r.status, RouteStatus::RouteFound));
                assert_eq!(r.hop_count, 3);
            }
            other => panic!("expected RouteResponse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn already_in_progress_waits_for_remaining_siblings() {
        let (engine, transport, upcalls) = build_engine(vec!["b", "c"]);
        let uuid = Uuid::new_v4();
        let destination_local_id = engine.resolve("dest").unwrap();
        let b = engine.resolve("b").unwrap();
        let c = engine.resolve("c").unwrap();
        engine
            .discovery
            .insert_request(&RouteRequestEntry {
                request_uuid: uuid,
                destination_local_id,
                previous_hop_local_id: None,
            })
            .unwrap();
        engine
            .discovery
            .insert_broadcast_status(&BroadcastStatusEntry {
                request_uuid: uuid,
                neighbor_local_id: b,
                pending_response_in_progress: false,
            })
            .unwrap();
        engine
            .discovery
            .insert_broadcast_status(&BroadcastStatusEntry {
                request_uuid: uuid,
                neighbor_local_id: c,
                pending_response_in_progress: false,
            })
            .unwrap();

        let response = RouteResponseMessage {
            request_uuid: uuid,
            status: RouteStatus::RequestAlreadyInProgress,
            hop_count: 0,
        };
        engine.on_incoming_response("b", response).await.unwrap();

        assert!(upcalls.events().is_empty());
        assert!(transport.sent_to("b").is_empty());
        assert!(engine.discovery.get_request(uuid).unwrap().is_some());
    }

    #[tokio::test]
    async fn failure_status_completes_when_last_sibling_resolves() {
        let (engine, _transport, upcalls) = build_engine(vec!["b"]);
        let uuid = Uuid::new_v4();
        let destination_local_id = engine.resolve("dest").unwrap();
        let b = engine.resolve("b").unwrap();
        engine
            .discovery
            .insert_request(&RouteRequestEntry {
                request_uuid: uuid,
                destination_local_id,
                previous_hop_local_id: None,
            })
            .unwrap();
        engine
            .discovery
            .insert_broadcast_status(&BroadcastStatusEntry {
                request_uuid: uuid,
                neighbor_local_id: b,
                pending_response_in_progress: false,
            })
            .unwrap();

        let response = RouteResponseMessage {
            request_uuid: uuid,
            status: RouteStatus::NoRouteFound,
            hop_count: 0,
        };
        engine.on_incoming_response("b", response).await.unwrap();

        let events = upcalls.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            RecordedEvent::RouteNotFound(destination, status) => {
                assert_eq!(destination, "dest");
                assert!(matches!(status, RouteStatus::NoRouteFound));
            }
            other => panic!("expected RouteNotFound, got {other:?}"),
        }
        assert!(engine.discovery.get_request(uuid).unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_status_is_dropped() {
        let (engine, transport, upcalls) = build_engine(vec!["b"]);
        let uuid = Uuid::new_v4();
        let destination_local_id = engine.resolve("dest").unwrap();
        let b = engine.resolve("b").unwrap();
        engine
            .discovery
            .insert_request(&RouteRequestEntry {
                request_uuid: uuid,
                destination_local_id,
                previous_hop_local_id: None,
            })
            .unwrap();
        engine
            .discovery
            .insert_broadcast_status(&BroadcastStatusEntry {
                request_uuid: uuid,
                neighbor_local_id: b,
                pending_response_in_progress: false,
            })
            .unwrap();

        let response = RouteResponseMessage {
            request_uuid: uuid,
            status: RouteStatus::Unknown(200),
            hop_count: 0,
        };
        engine.on_incoming_response("b", response).await.unwrap();

        assert!(upcalls.events().is_empty());
        assert!(transport.sent_to("b").is_empty());
        assert!(engine.discovery.get_request(uuid).unwrap().is_some());
    }

    #[tokio::test]
    async fn late_response_with_no_request_entry_is_dropped() {
        let (engine, transport, upcalls) = build_engine(vec!["b"]);
        let response = RouteResponseMessage {
            request_uuid: Uuid::new_v4(),
            status: RouteStatus::RouteFound,
            hop_count: 0,
        };
        engine.on_incoming_response("b", response).await.unwrap();
        assert!(upcalls.events().is_empty());
        assert!(transport.sent_to("b").is_empty());
    }

    #[tokio::test]
    async fn unsolicited_response_with_no_branch_is_dropped() {
        let (engine, transport, upcalls) = build_engine(vec!["b"]);
        let uuid = Uuid::new_v4();
        let destination_local_id = engine.resolve("dest").unwrap();
        engine
            .discovery
            .insert_request(&RouteRequestEntry {
                request_uuid: uuid,
                destination_local_id,
                previous_hop_local_id: None,
            })
            .unwrap();

        let response = RouteResponseMessage {
            request_uuid: uuid,
            status: RouteStatus::RouteFound,
            hop_count: 0,
        };
        engine
            .on_incoming_response("stranger", response)
            .await
            .unwrap();
        assert!(upcalls.events().is_empty());
        assert!(transport.sent_to("stranger").is_empty());
        assert!(engine.discovery.get_request(uuid).unwrap().is_some());
    }
}
