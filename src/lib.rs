//! Mesh routing core: on-demand route discovery, durable bookkeeping of
//! in-flight discoveries and established routes, and source-routed
//! forwarding of opaque end-to-end-encrypted payloads across a
//! delay-tolerant peer-to-peer mesh.
//!
//! The neighbor transport, the cryptographic session layer, the
//! application message layer, and the storage engine's own connection
//! lifecycle are external collaborators, consumed here as trait objects
//! ([`transport::NeighborTransport`], [`crypto::CryptoSession`],
//! [`upcalls::RoutingUpcalls`]) injected at construction time.

pub mod codec;
pub mod config;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod forwarding;
pub mod model;
pub mod scheduler;
pub mod store;
pub mod transport;
pub mod upcalls;

use std::sync::Arc;

use log::warn;

pub use codec::{CoreMessage, RouteStatus};
pub use config::RoutingConfig;
pub use crypto::CryptoSession;
pub use discovery::{DiscoveryEngine, DiscoveryOutcome};
pub use error::RoutingError;
pub use forwarding::{ForwardingEngine, SendOutcome};
pub use model::{BroadcastStatusEntry, Node, NodeId, RouteEntry, RouteRequestEntry, RouteUsage};
pub use scheduler::Scheduler;
pub use transport::NeighborTransport;
pub use upcalls::RoutingUpcalls;

/// Wires C1–C6 together into one handle: the entry point embedders
/// construct once per local node identity.
pub struct RoutingCore {
    self_address: String,
    discovery: DiscoveryEngine,
    forwarding: ForwardingEngine,
    crypto: Arc<dyn CryptoSession>,
}

impl RoutingCore {
    /// Open (or create) the sqlite-backed store at `db_path` and wire up
    /// the discovery and forwarding engines behind one shared scheduler.
    pub fn open(
        self_address: impl Into<String>,
        db_path: &str,
        transport: Arc<dyn NeighborTransport>,
        crypto: Arc<dyn CryptoSession>,
        upcalls: Arc<dyn RoutingUpcalls>,
        config: RoutingConfig,
    ) -> Result<Self, RoutingError> {
        let (nodes, routes, discovery_state) = store::open(db_path)?;
        Ok(Self::wire(
            self_address,
            nodes,
            routes,
            discovery_state,
            transport,
            crypto,
            upcalls,
            config,
        ))
    }

    /// As [`Self::open`], but backed by an in-memory store (tests, or a
    /// node that does not need to survive a restart).
    pub fn open_in_memory(
        self_address: impl Into<String>,
        transport: Arc<dyn NeighborTransport>,
        crypto: Arc<dyn CryptoSession>,
        upcalls: Arc<dyn RoutingUpcalls>,
        config: RoutingConfig,
    ) -> Result<Self, RoutingError> {
        let (nodes, routes, discovery_state) = store::open_in_memory()?;
        Ok(Self::wire(
            self_address,
            nodes,
            routes,
            discovery_state,
            transport,
            crypto,
            upcalls,
            config,
        ))
    }

    fn wire(
        self_address: impl Into<String>,
        nodes: store::NodeDirectory,
        routes: store::RouteTable,
        discovery_state: store::DiscoveryState,
        transport: Arc<dyn NeighborTransport>,
        crypto: Arc<dyn CryptoSession>,
        upcalls: Arc<dyn RoutingUpcalls>,
        config: RoutingConfig,
    ) -> Self {
        let scheduler = Arc::new(Scheduler::new());

        let discovery = DiscoveryEngine::new(
            nodes.clone(),
            routes.clone(),
            discovery_state,
            scheduler.clone(),
            transport.clone(),
            crypto.clone(),
            upcalls.clone(),
            config.clone(),
        );

        let forwarding = ForwardingEngine::new(
            nodes,
            routes,
            scheduler,
            transport,
            crypto.clone(),
            upcalls,
            config,
        );

        Self {
            self_address: self_address.into(),
            discovery,
            forwarding,
            crypto,
        }
    }

    /// See [`DiscoveryEngine::initiate_discovery`].
    pub async fn initiate_discovery(
        &self,
        destination_address: &str,
    ) -> Result<DiscoveryOutcome, RoutingError> {
        self.discovery.initiate_discovery(destination_address).await
    }

    /// See [`ForwardingEngine::send`].
    pub async fn send(
        &self,
        final_destination_address: &str,
        inner_payload_bytes: &[u8],
    ) -> Result<SendOutcome, RoutingError> {
        self.forwarding
            .send(
                final_destination_address,
                &self.self_address,
                inner_payload_bytes,
            )
            .await
    }

    /// Entry point for the transport's inbound dispatch: decrypt the
    /// hop-encrypted bytes, decode the outer envelope, and route to the
    /// discovery or forwarding engine by message type. Decrypt and decode
    /// failures are dropped silently, per the error handling design.
    pub async fn on_incoming_payload(
        &self,
        sender_address: &str,
        hop_ciphertext_bytes: Vec<u8>,
        transport_payload_id: u64,
    ) -> Result<(), RoutingError> {
        let plaintext = match self.crypto.decrypt(sender_address, &hop_ciphertext_bytes).await {
            Ok(plaintext) => plaintext,
            Err(err) => {
                warn!("on_incoming_payload: decrypt from {sender_address} failed, dropping: {err}");
                return Ok(());
            }
        };

        let message = match codec::decode_envelope(&plaintext) {
            Ok(message) => message,
            Err(err) => {
                warn!("on_incoming_payload: malformed message from {sender_address}, dropping: {err}");
                return Ok(());
            }
        };

        match message {
            CoreMessage::RouteRequest(request) => {
                self.discovery
                    .on_incoming_request(sender_address, request, &self.self_address)
                    .await
            }
            CoreMessage::RouteResponse(response) => {
                self.discovery
                    .on_incoming_response(sender_address, response)
                    .await
            }
            CoreMessage::RoutedMessage(routed) => {
                self.forwarding
                    .on_incoming_routed(
                        sender_address,
                        routed,
                        &self.self_address,
                        transport_payload_id,
                    )
                    .await
            }
        }
    }
}
