//! ReviseContract: a loop of upload/modify iterations, each trading a
//! batch of sector changes for a co-signed paid revision.

use serde::{Deserialize, Serialize};
use storage_host_chain::{FileContractRevision, Transaction, TransactionSignature};
use storage_host_common::constants::{
    OBLIGATION_LOCK_TIMEOUT, REVISE_CONTRACT_DEADLINE, SECTOR_ENTROPY_FLOOR, SECTOR_SIZE,
};
use storage_host_common::Hash256;
use storage_host_core::context::HostState;
use storage_host_core::entropy::passes_entropy_floor;
use storage_host_core::obligation::StorageObligation;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::negotiation::error::{protocol, NegotiationError};
use crate::negotiation::payment::{verify_collateral_not_decreased, verify_payment_revision, verify_window_unchanged};
use crate::negotiation::wire_types::{exchange_settings, read_payload, with_deadline, write_payload};
use crate::settings::HostInternalSettings;

const BATCH_OVERHEAD: usize = 4096;

#[derive(Debug, Serialize, Deserialize)]
struct ReviseContractStart {
    contract_id: Hash256,
}

/// One requested change to the sector list, in application order: insert,
/// append, delete, or modify-in-place at a sector-root index.
#[derive(Debug, Serialize, Deserialize)]
enum SectorModification {
    Append { data: Vec<u8> },
    Insert { index: usize, data: Vec<u8> },
    Delete { index: usize },
    Modify { index: usize, data: Vec<u8> },
}

#[derive(Debug, Serialize, Deserialize)]
struct ReviseContractBatch {
    modifications: Vec<SectorModification>,
    revision: FileContractRevision,
    renter_signature: TransactionSignature,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReviseContractReply {
    host_signature: TransactionSignature,
}

pub async fn handle_revise_contract<S>(
    stream: &mut S,
    state: &HostState,
    settings: &HostInternalSettings,
) -> Result<(), NegotiationError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        if !exchange_settings(stream, settings).await? {
            return Ok(());
        }
        with_deadline(REVISE_CONTRACT_DEADLINE, run_iteration(stream, state, settings)).await?;
    }
}

async fn run_iteration<S>(
    stream: &mut S,
    state: &HostState,
    settings: &HostInternalSettings,
) -> Result<(), NegotiationError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let start: ReviseContractStart = read_payload(stream, 32).await?;
    let _guard = state
        .lock_table
        .try_lock(start.contract_id, OBLIGATION_LOCK_TIMEOUT)
        .await?;

    let mut obligation = state
        .db
        .get_obligation(start.contract_id)?
        .ok_or_else(|| protocol("no obligation with that contract id"))?;
    if obligation.status.is_terminal() {
        return Err(protocol("obligation is no longer active"));
    }

    let max_batch_bytes = settings.max_revise_batch_size as usize + BATCH_OVERHEAD;
    let batch: ReviseContractBatch = read_payload(stream, max_batch_bytes).await?;

    let height = state.block_height();
    let expiration = obligation.expiration();

    let mut new_sector_roots = obligation.sector_roots.clone();
    let mut vacated_roots: Vec<Hash256> = Vec::new();
    let mut added_roots: Vec<Hash256> = Vec::new();
    let mut bytes_added: u64 = 0;

    let apply_outcome = apply_modifications(
        state,
        &batch.modifications,
        expiration,
        &mut new_sector_roots,
        &mut vacated_roots,
        &mut added_roots,
        &mut bytes_added,
    )
    .await;

    if let Err(err) = apply_outcome {
        rollback(state, &added_roots, expiration).await;
        return Err(err);
    }

    let new_file_size = new_sector_roots.len() as u64 * SECTOR_SIZE;
    let new_merkle_root = storage_host_proofs::file_merkle_root(&new_sector_roots);
    let remaining_duration = expiration.saturating_sub(height);
    let expected_transfer = settings.min_upload_bandwidth_price * bytes_added as u128
        + settings.min_storage_price * new_file_size as u128 * remaining_duration as u128;

    if let Err(err) = verify_revision(&obligation, height, &batch.revision, expected_transfer, new_file_size, new_merkle_root) {
        rollback(state, &added_roots, expiration).await;
        return Err(err);
    }

    let void_delta = match verify_collateral_not_decreased(&obligation, &batch.revision) {
        Ok(delta) => delta,
        Err(err) => {
            rollback(state, &added_roots, expiration).await;
            return Err(err);
        }
    };

    let mut revision_txn = Transaction::default();
    revision_txn.file_contract_revisions.push(batch.revision.clone());
    revision_txn.signatures.push(batch.renter_signature);
    let signed_revision_txn = match state.wallet.sign_transaction(revision_txn, false).await {
        Ok(signed) => signed,
        Err(err) => {
            rollback(state, &added_roots, expiration).await;
            return Err(NegotiationError::Chain(err));
        }
    };
    let host_signature = signed_revision_txn
        .signatures
        .last()
        .cloned()
        .ok_or_else(|| protocol("wallet did not return a host signature"))?;

    obligation.sector_roots = new_sector_roots;
    obligation.revision_txn_set.push(signed_revision_txn);
    obligation.risked_collateral += void_delta;
    let storage_revenue = settings.min_storage_price * new_file_size as u128 * remaining_duration as u128;
    let upload_revenue = settings.min_upload_bandwidth_price * bytes_added as u128;
    obligation.potential_storage_revenue += storage_revenue;
    obligation.potential_upload_revenue += upload_revenue;

    state.db.put_obligation(&obligation)?;
    state
        .financial
        .lock()
        .record_revision_revenue(upload_revenue, storage_revenue, 0);

    state.sector_store.remove_batch(&vacated_roots, expiration).await?;

    write_payload(stream, &ReviseContractReply { host_signature }).await
}

fn verify_revision(
    obligation: &StorageObligation,
    height: u64,
    revision: &FileContractRevision,
    expected_transfer: storage_host_chain::Currency,
    new_file_size: u64,
    new_merkle_root: Hash256,
) -> Result<(), NegotiationError> {
    if revision.parent_id != obligation.id {
        return Err(protocol("revision parent id does not match the obligation"));
    }
    if revision.unlock_conditions != obligation.unlock_conditions {
        return Err(protocol("revision unlock conditions changed"));
    }
    if revision.new_unlock_hash != obligation.unlock_conditions.unlock_hash() {
        return Err(protocol("revision unlock hash does not match the 2-of-2 conditions"));
    }
    if revision.new_file_size != new_file_size || revision.new_file_merkle_root != new_merkle_root {
        return Err(protocol("revision file size or merkle root does not match the applied sector changes"));
    }
    verify_window_unchanged(obligation, revision)?;
    verify_payment_revision(obligation, height, revision, expected_transfer)
}

#[allow(clippy::too_many_arguments)]
async fn apply_modifications(
    state: &HostState,
    modifications: &[SectorModification],
    expiration: u64,
    sector_roots: &mut Vec<Hash256>,
    vacated_roots: &mut Vec<Hash256>,
    added_roots: &mut Vec<Hash256>,
    bytes_added: &mut u64,
) -> Result<(), NegotiationError> {
    for modification in modifications {
        match modification {
            SectorModification::Append { data } => {
                let root = store_new_sector(state, data, expiration).await?;
                sector_roots.push(root);
                added_roots.push(root);
                *bytes_added += SECTOR_SIZE;
            }
            SectorModification::Insert { index, data } => {
                if *index > sector_roots.len() {
                    return Err(protocol("insert index out of range"));
                }
                let root = store_new_sector(state, data, expiration).await?;
                sector_roots.insert(*index, root);
                added_roots.push(root);
                *bytes_added += SECTOR_SIZE;
            }
            SectorModification::Delete { index } => {
                if *index >= sector_roots.len() {
                    return Err(protocol("delete index out of range"));
                }
                vacated_roots.push(sector_roots.remove(*index));
            }
            SectorModification::Modify { index, data } => {
                if *index >= sector_roots.len() {
                    return Err(protocol("modify index out of range"));
                }
                let root = store_new_sector(state, data, expiration).await?;
                added_roots.push(root);
                vacated_roots.push(std::mem::replace(&mut sector_roots[*index], root));
                *bytes_added += SECTOR_SIZE;
            }
        }
    }
    Ok(())
}

async fn store_new_sector(
    state: &HostState,
    data: &[u8],
    expiration: u64,
) -> Result<Hash256, NegotiationError> {
    if data.len() as u64 != SECTOR_SIZE {
        return Err(protocol("sector data must be exactly one sector in size"));
    }
    if !passes_entropy_floor(data, SECTOR_ENTROPY_FLOOR) {
        return Err(protocol("sector data failed the entropy floor check"));
    }
    let root = storage_host_proofs::sector_merkle_root(data).map_err(|_| protocol("sector data failed to hash"))?;
    state.sector_store.add(root, expiration, data).await?;
    Ok(root)
}

/// Reverses every sector this iteration added on failure. Errors are
/// logged, not propagated — the iteration is already failing for another
/// reason.
async fn rollback(state: &HostState, added_roots: &[Hash256], expiration: u64) {
    for &root in added_roots {
        if let Err(err) = state.sector_store.remove(root, expiration).await {
            tracing::warn!(%err, "failed to roll back a sector added during a failed revision");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::RngCore;
    use storage_host_chain::mock::MockChain;
    use storage_host_chain::{
        FileContract, SiaPublicKey, SignatureAlgorithm, SiacoinOutput, Transaction, UnlockConditions,
    };
    use storage_host_common::encoding::{read_bincode, write_bincode, write_string};
    use storage_host_core::db::ObligationDB;
    use storage_host_core::identity::HostIdentity;
    use storage_host_core::obligation::{ObligationStatus, StorageFolder};
    use storage_host_core::sector_store::SectorStore;

    use super::*;
    use crate::negotiation::wire_types::ACCEPTED;

    const WINDOW_START: u64 = 100;
    const WINDOW_END: u64 = 200;

    async fn test_state() -> (tempfile::TempDir, HostState, Hash256) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(ObligationDB::open(dir.path().join("db")).unwrap());
        let folder = StorageFolder::new(dir.path().join("folder0"), SECTOR_SIZE * 4);
        tokio::fs::create_dir_all(&folder.path).await.unwrap();
        let sector_store = Arc::new(SectorStore::new(db.clone(), vec![folder]));
        let chain = Arc::new(MockChain::new(0));
        let identity = HostIdentity::generate();

        let unlock_conditions = UnlockConditions::standard_2_of_2(
            SiaPublicKey { algorithm: SignatureAlgorithm::Ed25519, key: [7u8; 32] },
            identity.public_key(),
        );
        let mut origin = Transaction::default();
        origin.file_contracts.push(FileContract {
            file_size: 0,
            file_merkle_root: [0u8; 32],
            window_start: WINDOW_START,
            window_end: WINDOW_END,
            payout: 0,
            valid_proof_outputs: [
                SiacoinOutput { value: 10_000_000_000, unlock_hash: [1u8; 32] },
                SiacoinOutput { value: 0, unlock_hash: [2u8; 32] },
            ],
            missed_proof_outputs: [
                SiacoinOutput { value: 10_000_000_000, unlock_hash: [1u8; 32] },
                SiacoinOutput { value: 0, unlock_hash: [2u8; 32] },
            ],
            unlock_hash: unlock_conditions.unlock_hash(),
            revision_number: 0,
        });
        let id = origin.file_contract_id(0);

        let obligation = storage_host_core::obligation::StorageObligation {
            id,
            unlock_conditions,
            sector_roots: Vec::new(),
            origin_txn_set: vec![origin],
            revision_txn_set: Vec::new(),
            contract_cost: 0,
            locked_collateral: 0,
            potential_storage_revenue: 0,
            potential_download_revenue: 0,
            potential_upload_revenue: 0,
            risked_collateral: 0,
            transaction_fees_added: 0,
            origin_confirmed: true,
            revision_confirmed: true,
            proof_confirmed: false,
            status: ObligationStatus::Unresolved,
            negotiation_height: 0,
        };
        db.put_obligation(&obligation).unwrap();

        let state = HostState::new(db, sector_store, chain.clone(), chain.clone(), chain, identity, 0);
        (dir, state, id)
    }

    fn random_sector() -> Vec<u8> {
        let mut data = vec![0u8; SECTOR_SIZE as usize];
        rand::thread_rng().fill_bytes(&mut data);
        data
    }

    #[tokio::test]
    async fn appending_a_sector_charges_storage_and_persists_the_root() {
        let (_dir, state, id) = test_state().await;
        let db_handle = state.db.clone();
        let settings = HostInternalSettings::default();
        let sector = random_sector();
        let root = storage_host_proofs::sector_merkle_root(&sector).unwrap();
        let new_merkle_root = storage_host_proofs::file_merkle_root(&[root]);

        let remaining_duration = WINDOW_START;
        let expected_transfer =
            settings.min_storage_price * SECTOR_SIZE as u128 * remaining_duration as u128;

        let revision = FileContractRevision {
            parent_id: id,
            unlock_conditions: state.db.get_obligation(id).unwrap().unwrap().unlock_conditions,
            new_revision_number: 1,
            new_file_size: SECTOR_SIZE,
            new_file_merkle_root: new_merkle_root,
            new_window_start: WINDOW_START,
            new_window_end: WINDOW_END,
            new_valid_proof_outputs: [
                SiacoinOutput { value: 10_000_000_000 - expected_transfer, unlock_hash: [1u8; 32] },
                SiacoinOutput { value: expected_transfer, unlock_hash: [2u8; 32] },
            ],
            new_missed_proof_outputs: [
                SiacoinOutput { value: 10_000_000_000 - expected_transfer, unlock_hash: [1u8; 32] },
                SiacoinOutput { value: expected_transfer, unlock_hash: [2u8; 32] },
                SiacoinOutput { value: 0, unlock_hash: [0u8; 32] },
            ],
            new_unlock_hash: state.db.get_obligation(id).unwrap().unwrap().unlock_conditions.unlock_hash(),
        };
        let renter_signature = TransactionSignature {
            parent_id: [0u8; 32],
            public_key_index: 0,
            signature: vec![0u8; 64],
        };

        let (mut client, mut server) = tokio::io::duplex(16 * 1024 * 1024);
        let server_task = tokio::spawn(async move { handle_revise_contract(&mut server, &state, &settings).await });

        let client_task = tokio::spawn(async move {
            let _settings: HostInternalSettings = read_bincode(&mut client, 1 << 20).await.unwrap();
            write_string(&mut client, ACCEPTED).await.unwrap();

            write_bincode(&mut client, &ReviseContractStart { contract_id: id }).await.unwrap();
            let batch = ReviseContractBatch {
                modifications: vec![SectorModification::Append { data: sector }],
                revision,
                renter_signature,
            };
            write_bincode(&mut client, &batch).await.unwrap();
            let _reply: ReviseContractReply = read_bincode(&mut client, 1 << 20).await.unwrap();

            write_string(&mut client, "stop").await.unwrap();
        });

        let (server_result, client_result) = tokio::join!(server_task, client_task);
        server_result.unwrap().unwrap();
        client_result.unwrap();

        let obligation = db_handle.get_obligation(id).unwrap().unwrap();
        assert_eq!(obligation.sector_roots, vec![root]);
        assert_eq!(obligation.revision_number(), 1);
        assert_eq!(obligation.potential_storage_revenue, expected_transfer);
    }

    #[tokio::test]
    async fn low_entropy_sector_data_is_rejected() {
        let (_dir, state, id) = test_state().await;
        let settings = HostInternalSettings::default();
        let sector = vec![0u8; SECTOR_SIZE as usize];

        let remaining_duration = WINDOW_START;
        let expected_transfer =
            settings.min_storage_price * SECTOR_SIZE as u128 * remaining_duration as u128;
        let unlock_conditions = state.db.get_obligation(id).unwrap().unwrap().unlock_conditions;
        let revision = FileContractRevision {
            parent_id: id,
            unlock_conditions: unlock_conditions.clone(),
            new_revision_number: 1,
            new_file_size: SECTOR_SIZE,
            new_file_merkle_root: [0u8; 32],
            new_window_start: WINDOW_START,
            new_window_end: WINDOW_END,
            new_valid_proof_outputs: [
                SiacoinOutput { value: 10_000_000_000 - expected_transfer, unlock_hash: [1u8; 32] },
                SiacoinOutput { value: expected_transfer, unlock_hash: [2u8; 32] },
            ],
            new_missed_proof_outputs: [
                SiacoinOutput { value: 10_000_000_000 - expected_transfer, unlock_hash: [1u8; 32] },
                SiacoinOutput { value: expected_transfer, unlock_hash: [2u8; 32] },
                SiacoinOutput { value: 0, unlock_hash: [0u8; 32] },
            ],
            new_unlock_hash: unlock_conditions.unlock_hash(),
        };
        let renter_signature = TransactionSignature {
            parent_id: [0u8; 32],
            public_key_index: 0,
            signature: vec![0u8; 64],
        };

        let (mut client, mut server) = tokio::io::duplex(16 * 1024 * 1024);
        let server_task = tokio::spawn(async move { handle_revise_contract(&mut server, &state, &settings).await });

        let client_task = tokio::spawn(async move {
            let _settings: HostInternalSettings = read_bincode(&mut client, 1 << 20).await.unwrap();
            write_string(&mut client, ACCEPTED).await.unwrap();

            write_bincode(&mut client, &ReviseContractStart { contract_id: id }).await.unwrap();
            let batch = ReviseContractBatch {
                modifications: vec![SectorModification::Append { data: sector }],
                revision,
                renter_signature,
            };
            write_bincode(&mut client, &batch).await.unwrap();
        });

        let (server_result, client_result) = tokio::join!(server_task, client_task);
        client_result.unwrap();
        assert!(server_result.unwrap().is_err());
    }
}
