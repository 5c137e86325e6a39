use async_trait::async_trait;

use crate::error::RoutingError;

/// Cryptographic session layer, consumed as an external collaborator.
/// Session bootstrapping happens out of band; this crate only calls
/// `encrypt`/`decrypt` keyed by the peer's address, once per hop or once
/// end-to-end for the final destination.
#[async_trait]
pub trait CryptoSession: Send + Sync {
    /// Encrypt `plaintext` for `peer_address`.
    async fn encrypt(&self, peer_address: &str, plaintext: &[u8]) -> Result<Vec<u8>, RoutingError>;

    /// Decrypt `ciphertext` received from `peer_address`.
    async fn decrypt(&self, peer_address: &str, ciphertext: &[u8]) -> Result<Vec<u8>, RoutingError>;
}
