//! Wire encoding, error taxonomy and log throttling shared by every
//! storage-host crate.

pub mod constants;
pub mod encoding;
pub mod error;
pub mod log_throttle;

pub use error::{HostErrorKind, Kinded};
pub use log_throttle::LogThrottle;

/// 32-byte hash used throughout the host: sector Merkle roots, contract and
/// transaction ids, unlock hashes.
pub type Hash256 = [u8; 32];

/// Hashes an arbitrary serializable value the way transaction and contract
/// ids are derived: canonical `bincode` encoding, blake2b-256 digest.
pub fn hash_encode<T: serde::Serialize>(value: &T) -> Hash256 {
    let encoded = bincode::serialize(value).expect("in-memory types are always serializable");
    let digest = blake2b_simd::Params::new().hash_length(32).hash(&encoded);
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_bytes());
    out
}
