//! Merkle tree construction and storage-proof building/verification.
//!
//! Two binary hash domains are used, both built from the same
//! `blake2b_simd`-based node function with leaf/node prefixes so a leaf
//! hash can never collide with an internal node hash:
//!
//! - the **sector tree**: leaves are the 64-byte segments of one 4 MiB
//!   sector, always exactly [`SEGMENTS_PER_SECTOR`] of them (a power of
//!   two, so no padding is ever needed in practice).
//! - the **file tree**: leaves are the sector roots themselves (already
//!   hashes, used directly without re-hashing), padded with a zero leaf
//!   up to the next power of two when the sector count isn't one.

use storage_host_common::constants::{SEGMENTS_PER_SECTOR, SECTOR_SIZE};
use storage_host_common::{HostErrorKind, Hash256, Kinded};

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Padding leaf for the file-level tree: a sector root can never be all
/// zero (it is itself a hash of nonzero-entropy data), so this is
/// unambiguous.
const FILE_PAD: Hash256 = [0u8; 32];

#[derive(Debug, thiserror::Error)]
pub enum ProofError {
    #[error("sector data must be exactly {SECTOR_SIZE} bytes, got {0}")]
    BadSectorSize(usize),
    #[error("segment index {0} has no corresponding sector")]
    SegmentOutOfRange(u64),
    #[error("sector data does not hash to the expected sector root")]
    SectorRootMismatch,
    #[error("proof is too short to cover the sector tree depth")]
    ShortProof,
}

impl Kinded for ProofError {
    fn kind(&self) -> HostErrorKind {
        HostErrorKind::Internal
    }
}

fn leaf_hash(data: &[u8]) -> Hash256 {
    let mut buf = Vec::with_capacity(1 + data.len());
    buf.push(LEAF_PREFIX);
    buf.extend_from_slice(data);
    digest(&buf)
}

fn node_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut buf = [0u8; 65];
    buf[0] = NODE_PREFIX;
    buf[1..33].copy_from_slice(left);
    buf[33..65].copy_from_slice(right);
    digest(&buf)
}

fn digest(buf: &[u8]) -> Hash256 {
    let hash = blake2b_simd::Params::new().hash_length(32).hash(buf);
    let mut out = [0u8; 32];
    out.copy_from_slice(hash.as_bytes());
    out
}

fn zero_segment_leaf() -> Hash256 {
    leaf_hash(&[0u8; 64])
}

/// Root of a binary tree over `leaves`, padded with `pad` to the next
/// power of two.
fn merkle_root(mut leaves: Vec<Hash256>, pad: Hash256) -> Hash256 {
    if leaves.is_empty() {
        return pad;
    }
    let target = leaves.len().next_power_of_two();
    leaves.resize(target, pad);
    while leaves.len() > 1 {
        leaves = leaves.chunks(2).map(|c| node_hash(&c[0], &c[1])).collect();
    }
    leaves[0]
}

/// Sibling hashes from `index`'s leaf up to the root, bottom to top.
fn merkle_proof(mut leaves: Vec<Hash256>, pad: Hash256, mut index: usize) -> Vec<Hash256> {
    let target = leaves.len().next_power_of_two().max(1);
    leaves.resize(target, pad);
    let mut proof = Vec::new();
    while leaves.len() > 1 {
        let sibling = index ^ 1;
        proof.push(leaves[sibling]);
        index /= 2;
        leaves = leaves.chunks(2).map(|c| node_hash(&c[0], &c[1])).collect();
    }
    proof
}

/// Recomputes the root an audit path implies for `leaf` at `index`.
fn apply_proof(leaf: Hash256, mut index: usize, proof: &[Hash256]) -> Hash256 {
    let mut current = leaf;
    for sibling in proof {
        current = if index % 2 == 0 {
            node_hash(&current, sibling)
        } else {
            node_hash(sibling, &current)
        };
        index /= 2;
    }
    current
}

/// Merkle root of one 4 MiB sector, computed over its 64-byte leaves.
pub fn sector_merkle_root(sector_data: &[u8]) -> Result<Hash256, ProofError> {
    if sector_data.len() as u64 != SECTOR_SIZE {
        return Err(ProofError::BadSectorSize(sector_data.len()));
    }
    let leaves: Vec<Hash256> = sector_data.chunks(64).map(leaf_hash).collect();
    Ok(merkle_root(leaves, zero_segment_leaf()))
}

/// Merkle root of a file, computed over its ordered sequence of sector
/// roots.
pub fn file_merkle_root(sector_roots: &[Hash256]) -> Hash256 {
    merkle_root(sector_roots.to_vec(), FILE_PAD)
}

/// A constructed storage proof: the challenged 64-byte segment plus the
/// combined audit path (sector-level then file-level).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltProof {
    pub base: [u8; 64],
    pub hash_set: Vec<Hash256>,
}

/// Builds the two-stage proof for `segment_index` within a file whose
/// sectors are `sector_roots`, given the raw bytes of the sector that
/// contains it.
pub fn build_proof(
    sector_data: &[u8],
    sector_roots: &[Hash256],
    segment_index: u64,
) -> Result<BuiltProof, ProofError> {
    if sector_data.len() as u64 != SECTOR_SIZE {
        return Err(ProofError::BadSectorSize(sector_data.len()));
    }
    let sector_index = (segment_index / SEGMENTS_PER_SECTOR) as usize;
    let sector_segment = (segment_index % SEGMENTS_PER_SECTOR) as usize;
    if sector_index >= sector_roots.len() {
        return Err(ProofError::SegmentOutOfRange(segment_index));
    }

    let leaves: Vec<Hash256> = sector_data.chunks(64).map(leaf_hash).collect();
    let pad = zero_segment_leaf();

    let computed_root = merkle_root(leaves.clone(), pad);
    if computed_root != sector_roots[sector_index] {
        return Err(ProofError::SectorRootMismatch);
    }

    let mut base = [0u8; 64];
    base.copy_from_slice(&sector_data[sector_segment * 64..sector_segment * 64 + 64]);

    let mut hash_set = merkle_proof(leaves, pad, sector_segment);
    hash_set.extend(merkle_proof(sector_roots.to_vec(), FILE_PAD, sector_index));

    Ok(BuiltProof { base, hash_set })
}

/// Verifies a storage proof against a known file Merkle root. The sector
/// tree depth is fixed ([`SEGMENTS_PER_SECTOR`] is a power of two), so the
/// split between the sector-level and file-level halves of `hash_set`
/// requires no side information about sector count.
pub fn verify_proof(
    file_merkle_root_value: Hash256,
    segment_index: u64,
    base: &[u8; 64],
    hash_set: &[Hash256],
) -> Result<bool, ProofError> {
    let sector_depth = SEGMENTS_PER_SECTOR.trailing_zeros() as usize;
    if hash_set.len() < sector_depth {
        return Err(ProofError::ShortProof);
    }
    let sector_segment = (segment_index % SEGMENTS_PER_SECTOR) as usize;
    let sector_index = (segment_index / SEGMENTS_PER_SECTOR) as usize;
    let (sector_proof, file_proof) = hash_set.split_at(sector_depth);

    let sector_root = apply_proof(leaf_hash(base), sector_segment, sector_proof);
    let computed_file_root = apply_proof(sector_root, sector_index, file_proof);
    Ok(computed_file_root == file_merkle_root_value)
}
