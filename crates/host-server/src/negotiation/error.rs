//! Error taxonomy translation at the wire boundary: a `Communication`-kind
//! error is reported to the peer as a rejection string and the connection
//! closes; every other kind closes silently (or,
//! for `Internal`, after a generic message) so no disk-invariant detail
//! ever reaches an adversarial peer.

use storage_host_chain::{ChainError, PoolError};
use storage_host_common::encoding::EncodingError;
use storage_host_common::{HostErrorKind, Kinded};
use storage_host_core::db::DBError;
use storage_host_core::identity::IdentityError;
use storage_host_core::lock_table::LockError;
use storage_host_core::sector_store::SectorStoreError;

#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    #[error("{0}")]
    Protocol(String),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Db(#[from] DBError),
    #[error(transparent)]
    SectorStore(#[from] SectorStoreError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Proof(#[from] storage_host_proofs::ProofError),
}

/// Shorthand for the common case: a peer-visible protocol rejection.
pub fn protocol(msg: impl Into<String>) -> NegotiationError {
    NegotiationError::Protocol(msg.into())
}

impl Kinded for NegotiationError {
    fn kind(&self) -> HostErrorKind {
        match self {
            NegotiationError::Protocol(_) => HostErrorKind::Communication,
            NegotiationError::Encoding(EncodingError::Io(_)) => HostErrorKind::Connection,
            NegotiationError::Encoding(_) => HostErrorKind::Communication,
            NegotiationError::Db(_) => HostErrorKind::Internal,
            NegotiationError::SectorStore(_) => HostErrorKind::Internal,
            NegotiationError::Chain(_) => HostErrorKind::Internal,
            NegotiationError::Pool(err) => err.kind(),
            NegotiationError::Identity(_) => HostErrorKind::Communication,
            NegotiationError::Lock(_) => HostErrorKind::Communication,
            NegotiationError::Proof(_) => HostErrorKind::Internal,
        }
    }
}

/// The message written back to the peer ahead of `"error: "`, never
/// leaking internal detail for anything but a `Communication` kind.
pub fn peer_message(err: &NegotiationError) -> String {
    match err.kind() {
        HostErrorKind::Communication => err.to_string(),
        HostErrorKind::Consensus => "rejected".to_string(),
        HostErrorKind::Internal | HostErrorKind::Connection => "internal error".to_string(),
    }
}
