//! The negotiation engine: selector dispatch over a raw TCP connection
//! and the `TaskTracker`+`CancellationToken` accept loop that owns it.

pub mod download;
pub mod error;
pub mod form_contract;
pub mod payment;
pub mod recent_revision;
pub mod revise_contract;
pub mod settings_rpc;
pub mod wire_types;

use std::net::SocketAddr;
use std::sync::Arc;

use storage_host_common::constants::ITERATED_CONNECTION_TIME;
use storage_host_common::encoding::EncodingError;
use storage_host_common::Kinded;
use storage_host_core::context::HostState;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::negotiation::error::{peer_message, protocol, NegotiationError};
use crate::negotiation::wire_types::write_error;
use crate::settings::HostInternalSettings;

const SELECTOR_SIZE: usize = 8;

const SETTINGS_SELECTOR: [u8; SELECTOR_SIZE] = *b"Settings";
const METADATA_SELECTOR: [u8; SELECTOR_SIZE] = *b"Metadata";
const FORM_CONTRACT_SELECTOR: [u8; SELECTOR_SIZE] = *b"FrmCntrt";
const RECENT_REVISION_SELECTOR: [u8; SELECTOR_SIZE] = *b"RecntRev";
const REVISE_CONTRACT_SELECTOR: [u8; SELECTOR_SIZE] = *b"RvisCntr";
const DOWNLOAD_SELECTOR: [u8; SELECTOR_SIZE] = *b"Download";

/// Binds `listen_address` and accepts connections until `token` is
/// cancelled, spawning one task per connection under `tracker`.
pub async fn run_negotiation_server(
    listen_address: SocketAddr,
    state: Arc<HostState>,
    settings: Arc<HostInternalSettings>,
    token: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen_address).await?;
    tracing::info!(%listen_address, "negotiation engine listening");
    let tracker = TaskTracker::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let state = state.clone();
                let settings = settings.clone();
                let child = token.child_token();
                let connection_id = uuid::Uuid::new_v4();
                tracker.spawn(async move {
                    let result = tokio::time::timeout(
                        ITERATED_CONNECTION_TIME,
                        handle_connection(stream, &state, &settings, child, connection_id),
                    )
                    .await;
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            // Probabilistic log throttling: the first occurrences
                            // of each error kind log in full, later ones are
                            // sampled, so an adversarial peer hammering one RPC
                            // can't flood the log.
                            if state.log_throttle.should_log(err.kind().as_str(), 0.01) {
                                tracing::warn!(error = %err, %peer, %connection_id, "negotiation connection ended with an error");
                            }
                        }
                        Err(_) => {
                            tracing::info!(%peer, %connection_id, "negotiation connection hit its wall-clock deadline");
                        }
                    }
                });
            }
            _ = token.cancelled() => break,
        }
    }

    tracker.close();
    tracker.wait().await;
    Ok(())
}

#[tracing::instrument(skip_all, fields(%connection_id))]
async fn handle_connection(
    mut stream: TcpStream,
    state: &HostState,
    settings: &HostInternalSettings,
    token: CancellationToken,
    connection_id: uuid::Uuid,
) -> Result<(), NegotiationError> {
    let mut selector = [0u8; SELECTOR_SIZE];
    tokio::select! {
        result = stream.read_exact(&mut selector) => result.map_err(EncodingError::from)?,
        _ = token.cancelled() => return Ok(()),
    };

    let outcome = dispatch(&selector, &mut stream, state, settings).await;
    if let Err(err) = &outcome {
        let _ = write_error(&mut stream, &peer_message(err)).await;
    }
    outcome
}

async fn dispatch(
    selector: &[u8; SELECTOR_SIZE],
    stream: &mut TcpStream,
    state: &HostState,
    settings: &HostInternalSettings,
) -> Result<(), NegotiationError> {
    match *selector {
        SETTINGS_SELECTOR => settings_rpc::handle_settings(stream, settings).await,
        METADATA_SELECTOR => {
            settings_rpc::handle_metadata(stream, state.identity.public_key(), state.block_height(), settings).await
        }
        FORM_CONTRACT_SELECTOR => form_contract::handle_form_contract(stream, state, settings).await,
        RECENT_REVISION_SELECTOR => recent_revision::handle_recent_revision(stream, state).await,
        REVISE_CONTRACT_SELECTOR => revise_contract::handle_revise_contract(stream, state, settings).await,
        DOWNLOAD_SELECTOR => download::handle_download(stream, state, settings).await,
        _ => Err(protocol("unrecognized RPC selector")),
    }
}
