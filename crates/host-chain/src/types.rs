//! Chain primitive types the host negotiates over: contracts, revisions,
//! storage proofs and the transactions that carry them. These mirror the
//! essential shape of a UTXO-chain's file-contract primitives without
//! claiming wire compatibility with any particular chain — only internal
//! consistency between this host and its peers.

use serde::{Deserialize, Serialize};
use storage_host_common::{hash_encode, Hash256};

pub type BlockHeight = u64;
pub type Currency = u128;
pub type UnlockHash = Hash256;

/// The void output: payouts routed here on a missed proof are burned.
pub const VOID_UNLOCK_HASH: UnlockHash = [0u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    Ed25519,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiaPublicKey {
    pub algorithm: SignatureAlgorithm,
    pub key: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockConditions {
    pub timelock: BlockHeight,
    pub public_keys: Vec<SiaPublicKey>,
    pub signatures_required: u64,
}

impl UnlockConditions {
    /// Standard 2-of-2 renter/host unlock conditions.
    pub fn standard_2_of_2(renter_key: SiaPublicKey, host_key: SiaPublicKey) -> Self {
        Self {
            timelock: 0,
            public_keys: vec![renter_key, host_key],
            signatures_required: 2,
        }
    }

    pub fn unlock_hash(&self) -> UnlockHash {
        hash_encode(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiacoinOutput {
    pub value: Currency,
    pub unlock_hash: UnlockHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiacoinInput {
    pub parent_id: Hash256,
    pub unlock_conditions: UnlockConditions,
}

/// An origin file contract: exactly 2 valid + 2 missed payouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContract {
    pub file_size: u64,
    pub file_merkle_root: Hash256,
    pub window_start: BlockHeight,
    pub window_end: BlockHeight,
    pub payout: Currency,
    pub valid_proof_outputs: [SiacoinOutput; 2],
    pub missed_proof_outputs: [SiacoinOutput; 2],
    pub unlock_hash: UnlockHash,
    pub revision_number: u64,
}

/// A successor revision: exactly 2 valid + 3 missed payouts, the third
/// missed output being the void output holding risked collateral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContractRevision {
    pub parent_id: Hash256,
    pub unlock_conditions: UnlockConditions,
    pub new_revision_number: u64,
    pub new_file_size: u64,
    pub new_file_merkle_root: Hash256,
    pub new_window_start: BlockHeight,
    pub new_window_end: BlockHeight,
    pub new_valid_proof_outputs: [SiacoinOutput; 2],
    pub new_missed_proof_outputs: [SiacoinOutput; 3],
    pub new_unlock_hash: UnlockHash,
}

impl FileContractRevision {
    pub fn void_output(&self) -> &SiacoinOutput {
        &self.new_missed_proof_outputs[2]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageProof {
    pub parent_id: Hash256,
    pub segment: [u8; 64],
    /// Merkle inclusion proof: leaf-level hashes up to the sector root,
    /// followed by the cached sibling hashes up to the file merkle root.
    pub hash_set: Vec<Hash256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSignature {
    pub parent_id: Hash256,
    pub public_key_index: u64,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub siacoin_inputs: Vec<SiacoinInput>,
    pub siacoin_outputs: Vec<SiacoinOutput>,
    pub file_contracts: Vec<FileContract>,
    pub file_contract_revisions: Vec<FileContractRevision>,
    pub storage_proofs: Vec<StorageProof>,
    pub miner_fees: Vec<Currency>,
    pub signatures: Vec<TransactionSignature>,
}

impl Transaction {
    pub fn id(&self) -> Hash256 {
        hash_encode(self)
    }

    /// Derives the id a file contract at `index` in this transaction will be
    /// assigned once confirmed, the way a UTXO chain derives output ids from
    /// their parent transaction id and position.
    pub fn file_contract_id(&self, index: usize) -> Hash256 {
        hash_encode(&(self.id(), "contract", index))
    }

    pub fn marshalled_len(&self) -> usize {
        bincode::serialize(self)
            .map(|bytes| bytes.len())
            .unwrap_or(0)
    }
}

/// One logical transaction-pool submission: the last element carries the
/// contract or revision of interest, everything before it is parent context
/// (funding inputs, etc).
pub type TransactionSet = Vec<Transaction>;

#[derive(Debug, Clone)]
pub struct Block {
    pub height: BlockHeight,
    pub transactions: Vec<Transaction>,
}
