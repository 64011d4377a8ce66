//! The bare Settings and Metadata RPCs: a connection may just want to read
//! the host's current terms or basic identity without negotiating a
//! contract.

use serde::{Deserialize, Serialize};
use storage_host_chain::SiaPublicKey;
use tokio::io::AsyncWrite;

use crate::negotiation::error::NegotiationError;
use crate::negotiation::wire_types::write_payload;
use crate::settings::HostInternalSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataResponse {
    pub public_key: SiaPublicKey,
    pub block_height: u64,
    pub accepting_contracts: bool,
    pub net_address: String,
}

/// Sends `settings` and returns; there is nothing further for the peer to
/// negotiate on this selector (contrast with the settings-then-accept
/// preamble embedded in FormContract/ReviseContract/Download).
pub async fn handle_settings<S: AsyncWrite + Unpin>(
    stream: &mut S,
    settings: &HostInternalSettings,
) -> Result<(), NegotiationError> {
    write_payload(stream, settings).await
}

pub async fn handle_metadata<S: AsyncWrite + Unpin>(
    stream: &mut S,
    public_key: SiaPublicKey,
    block_height: u64,
    settings: &HostInternalSettings,
) -> Result<(), NegotiationError> {
    let response = MetadataResponse {
        public_key,
        block_height,
        accepting_contracts: settings.accepting_contracts,
        net_address: settings.net_address.clone(),
    };
    write_payload(stream, &response).await
}
