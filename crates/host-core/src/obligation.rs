//! The storage obligation data model: one record per accepted contract,
//! its sector usage accounting, and the action-item and storage-folder
//! records that drive and host it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use storage_host_chain::{
    BlockHeight, Currency, FileContract, FileContractRevision, SiacoinOutput, TransactionSet,
    UnlockConditions,
};
use storage_host_common::Hash256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObligationStatus {
    Unresolved,
    Rejected,
    Succeeded,
    Failed,
}

impl ObligationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ObligationStatus::Unresolved)
    }
}

/// One storage obligation: the host's commitment, backed by collateral, to
/// store the sectors named by `sector_roots` until its proof window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageObligation {
    pub id: Hash256,
    /// The renter/host 2-of-2 unlock conditions negotiated at FormContract
    /// time; kept on the obligation because the origin contract only
    /// reveals their hash, and RecentRevision's challenge needs the
    /// renter's public key before any revision has been confirmed.
    pub unlock_conditions: UnlockConditions,
    pub sector_roots: Vec<Hash256>,
    pub origin_txn_set: TransactionSet,
    pub revision_txn_set: TransactionSet,

    pub contract_cost: Currency,
    pub locked_collateral: Currency,
    pub potential_storage_revenue: Currency,
    pub potential_download_revenue: Currency,
    pub potential_upload_revenue: Currency,
    pub risked_collateral: Currency,
    pub transaction_fees_added: Currency,

    pub origin_confirmed: bool,
    pub revision_confirmed: bool,
    pub proof_confirmed: bool,

    pub status: ObligationStatus,
    pub negotiation_height: BlockHeight,
}

impl StorageObligation {
    /// The contract carried by the last transaction of the origin set.
    /// Invariant: the origin set is always non-empty.
    pub fn origin_contract(&self) -> &FileContract {
        &self
            .origin_txn_set
            .last()
            .expect("origin_txn_set is non-empty by construction")
            .file_contracts[0]
    }

    /// The revision carried by the last transaction of the revision set, if
    /// any revision has been negotiated yet.
    pub fn latest_revision(&self) -> Option<&FileContractRevision> {
        self.revision_txn_set
            .last()
            .map(|txn| &txn.file_contract_revisions[0])
    }

    /// `expiration` = window_start of latest revision (or origin).
    pub fn expiration(&self) -> BlockHeight {
        self.latest_revision()
            .map(|r| r.new_window_start)
            .unwrap_or_else(|| self.origin_contract().window_start)
    }

    /// `proof_deadline` = window_end of latest revision (or origin).
    pub fn proof_deadline(&self) -> BlockHeight {
        self.latest_revision()
            .map(|r| r.new_window_end)
            .unwrap_or_else(|| self.origin_contract().window_end)
    }

    pub fn file_size(&self) -> u64 {
        self.latest_revision()
            .map(|r| r.new_file_size)
            .unwrap_or_else(|| self.origin_contract().file_size)
    }

    pub fn merkle_root(&self) -> Hash256 {
        self.latest_revision()
            .map(|r| r.new_file_merkle_root)
            .unwrap_or_else(|| self.origin_contract().file_merkle_root)
    }

    pub fn valid_proof_outputs(&self) -> [SiacoinOutput; 2] {
        self.latest_revision()
            .map(|r| r.new_valid_proof_outputs)
            .unwrap_or_else(|| self.origin_contract().valid_proof_outputs)
    }

    /// The risked-collateral void output, present once a revision exists
    /// (the origin contract has only 2 missed outputs).
    pub fn void_output(&self) -> Option<&SiacoinOutput> {
        self.latest_revision().map(|r| r.void_output())
    }

    pub fn revision_number(&self) -> u64 {
        self.latest_revision()
            .map(|r| r.new_revision_number)
            .unwrap_or_else(|| self.origin_contract().revision_number)
    }
}

/// One distinct stored sector. The reference count is the length of
/// `expirations`: a sector is physically deleted only when this multiset
/// becomes empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorUsage {
    pub expirations: Vec<BlockHeight>,
    pub storage_folder_uid: [u8; 16],
    pub corrupted: bool,
}

/// A height-indexed wakeup for the Action Scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionItem {
    pub height: BlockHeight,
    pub obligation_id: Hash256,
}

/// A disk-backed pool of sector storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFolder {
    pub uid: [u8; 16],
    pub path: PathBuf,
    pub size: u64,
    pub size_remaining: u64,
    pub failed_reads: u64,
    pub failed_writes: u64,
}

impl StorageFolder {
    pub fn new(path: PathBuf, size: u64) -> Self {
        let mut uid = [0u8; 16];
        rand::Rng::fill(&mut rand::thread_rng(), &mut uid);
        Self {
            uid,
            path,
            size,
            size_remaining: size,
            failed_reads: 0,
            failed_writes: 0,
        }
    }

    pub fn uid_hex(&self) -> String {
        hex::encode(self.uid)
    }

    /// A folder with too many combined failed reads/writes is excluded
    /// from new-sector placement, per §4.9: repeated failures mark it
    /// unusable without killing the host.
    pub fn is_usable(&self) -> bool {
        self.failed_reads + self.failed_writes < storage_host_common::constants::MAX_STORAGE_FOLDER_FAILURES
    }
}
