//! The Obligation State Machine: the single entry point `handle(id)` that
//! drives an obligation through resubmission, revision, and proof
//! construction.

use storage_host_chain::{PoolError, StorageProof, Transaction};
use storage_host_common::constants::{
    RESUBMISSION_TIMEOUT, REVISION_SUBMISSION_BUFFER, SEGMENTS_PER_SECTOR,
};
use storage_host_common::{HostErrorKind, Hash256, Kinded};

use crate::context::HostState;
use crate::db::DBError;
use crate::obligation::{ObligationStatus, StorageObligation};
use crate::sector_store::SectorStoreError;

#[derive(Debug, thiserror::Error)]
pub enum StateMachineError {
    #[error(transparent)]
    Db(#[from] DBError),
    #[error(transparent)]
    SectorStore(#[from] SectorStoreError),
    #[error(transparent)]
    Proof(#[from] storage_host_proofs::ProofError),
    #[error(transparent)]
    Chain(#[from] storage_host_chain::ChainError),
    #[error("no obligation with id {0:x?}")]
    NotFound(Hash256),
}

impl Kinded for StateMachineError {
    fn kind(&self) -> HostErrorKind {
        HostErrorKind::Internal
    }
}

/// Runs `handle` for `id`. The caller is expected to already hold the
/// obligation's exclusive lock.
#[tracing::instrument(skip(state), fields(obligation = %hex::encode(id)))]
pub async fn handle(state: &HostState, id: Hash256) -> Result<(), StateMachineError> {
    let Some(mut obligation) = state.db.get_obligation(id)? else {
        return Err(StateMachineError::NotFound(id));
    };

    if obligation.status.is_terminal() {
        return Ok(());
    }

    let height = state.block_height();

    if !obligation.origin_confirmed {
        resubmit_origin(state, &mut obligation, height).await?;
    } else if should_resubmit_revision(&obligation, height) {
        resubmit_revision(state, &mut obligation, height).await?;
    } else if !obligation.proof_confirmed
        && height >= obligation.expiration() + RESUBMISSION_TIMEOUT
    {
        build_and_submit_proof(state, &mut obligation, height).await?;
    }

    if obligation.status.is_terminal() {
        state.db.put_obligation(&obligation)?;
        return Ok(());
    }

    state.db.put_obligation(&obligation)?;

    if obligation.proof_confirmed && height >= obligation.proof_deadline() {
        remove(state, &mut obligation, ObligationStatus::Succeeded).await?;
        state.db.put_obligation(&obligation)?;
    }

    Ok(())
}

fn should_resubmit_revision(obligation: &StorageObligation, height: u64) -> bool {
    !obligation.revision_confirmed
        && obligation.latest_revision().is_some()
        && height >= obligation.expiration().saturating_sub(REVISION_SUBMISSION_BUFFER)
}

async fn resubmit_origin(
    state: &HostState,
    obligation: &mut StorageObligation,
    height: u64,
) -> Result<(), StateMachineError> {
    match state
        .pool
        .accept_transaction_set(obligation.origin_txn_set.clone())
        .await
    {
        Err(PoolError::ConsensusConflict) => {
            remove(state, obligation, ObligationStatus::Rejected).await?;
        }
        Ok(()) | Err(PoolError::Transient(_)) => {
            state
                .db
                .enqueue_action(height + RESUBMISSION_TIMEOUT, obligation.id)?;
            state
                .db
                .enqueue_action(height + 2 * RESUBMISSION_TIMEOUT, obligation.id)?;
        }
    }
    Ok(())
}

async fn resubmit_revision(
    state: &HostState,
    obligation: &mut StorageObligation,
    height: u64,
) -> Result<(), StateMachineError> {
    if height > obligation.expiration() {
        remove(state, obligation, ObligationStatus::Rejected).await?;
        return Ok(());
    }

    let revision = obligation
        .latest_revision()
        .expect("should_resubmit_revision checked this exists")
        .clone();

    let (_min_fee, fee_estimate) = state.consensus.fee_estimation().await?;
    let host_value = revision.new_valid_proof_outputs[1].value;
    if host_value / 2 < fee_estimate {
        // Not enough value left to cover a miner fee; wait for the next
        // action item rather than submit a transaction that will be
        // dropped for underpaying.
        return Ok(());
    }

    let mut txn = Transaction::default();
    txn.file_contract_revisions.push(revision);
    let miner_fee = (txn.marshalled_len() as u128 + 300) * fee_estimate;

    let (funded, mut parents) = state
        .wallet
        .fund_transaction(txn, 0, miner_fee)
        .await
        .map_err(StateMachineError::Chain)?;
    let signed = state
        .wallet
        .sign_transaction(funded, false)
        .await
        .map_err(StateMachineError::Chain)?;
    parents.push(signed);

    match state.pool.accept_transaction_set(parents).await {
        Ok(()) => {
            obligation.transaction_fees_added += miner_fee;
            state.financial.lock().record_transaction_fee(miner_fee);
        }
        Err(PoolError::ConsensusConflict) => {
            remove(state, obligation, ObligationStatus::Rejected).await?;
        }
        Err(PoolError::Transient(_)) => {
            // Retry on the next action item; the caller already re-enqueues
            // via the scheduler's height-driven dispatch.
        }
    }
    Ok(())
}

async fn build_and_submit_proof(
    state: &HostState,
    obligation: &mut StorageObligation,
    height: u64,
) -> Result<(), StateMachineError> {
    if obligation.sector_roots.is_empty() {
        remove(state, obligation, ObligationStatus::Succeeded).await?;
        return Ok(());
    }
    if height > obligation.proof_deadline() {
        remove(state, obligation, ObligationStatus::Failed).await?;
        return Ok(());
    }

    let (_min_fee, fee_estimate) = state.consensus.fee_estimation().await?;
    let host_value = obligation.valid_proof_outputs()[1].value;
    if host_value < fee_estimate {
        // Not enough value left to cover a miner fee; wait for the next
        // action item rather than submit a transaction that will be
        // dropped for underpaying.
        return Ok(());
    }

    let segment_index = state.consensus.storage_proof_segment(obligation.id).await?;
    let sector_index = (segment_index / SEGMENTS_PER_SECTOR) as usize;
    let Some(&sector_root) = obligation.sector_roots.get(sector_index) else {
        remove(state, obligation, ObligationStatus::Failed).await?;
        return Ok(());
    };

    let sector_data = state.sector_store.read(sector_root).await?;
    let built = storage_host_proofs::build_proof(&sector_data, &obligation.sector_roots, segment_index)?;

    let mut txn = Transaction::default();
    txn.storage_proofs.push(StorageProof {
        parent_id: obligation.id,
        segment: built.base,
        hash_set: built.hash_set,
    });

    let (funded, mut parents) = state
        .wallet
        .fund_transaction(txn, 0, fee_estimate)
        .await
        .map_err(StateMachineError::Chain)?;
    let signed = state
        .wallet
        .sign_transaction(funded, true)
        .await
        .map_err(StateMachineError::Chain)?;
    parents.push(signed);

    if let Err(PoolError::ConsensusConflict) = state.pool.accept_transaction_set(parents).await {
        remove(state, obligation, ObligationStatus::Failed).await?;
        return Ok(());
    }

    state
        .db
        .enqueue_action(obligation.proof_deadline(), obligation.id)?;
    Ok(())
}

/// Terminates an obligation: decrements sector refcounts, folds the
/// status-specific financial deltas, and clears `sector_roots` while
/// retaining the DB row for audit.
async fn remove(
    state: &HostState,
    obligation: &mut StorageObligation,
    status: ObligationStatus,
) -> Result<(), StateMachineError> {
    let expiration = obligation.expiration();
    state
        .sector_store
        .remove_batch(&obligation.sector_roots, expiration)
        .await?;
    state.financial.lock().record_terminal(obligation, status);
    obligation.status = status;
    obligation.sector_roots.clear();
    Ok(())
}
