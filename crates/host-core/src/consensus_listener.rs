//! Applies confirmed/reverted block deltas to obligation confirmation
//! flags and the block height.

use std::sync::Arc;

use storage_host_chain::{Block, ConsensusChange, ConsensusSet};
use storage_host_common::{HostErrorKind, Hash256, Kinded};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::context::HostState;
use crate::db::{DBError, ObligationDB};
use crate::obligation::StorageObligation;

#[derive(Debug, thiserror::Error)]
pub enum ConsensusListenerError {
    #[error(transparent)]
    Chain(#[from] storage_host_chain::ChainError),
    #[error(transparent)]
    Db(#[from] DBError),
    #[error("consensus subscription ended")]
    Closed,
}

impl Kinded for ConsensusListenerError {
    fn kind(&self) -> HostErrorKind {
        HostErrorKind::Consensus
    }
}

/// Runs until the subscription closes or `token` is cancelled, applying
/// each `ConsensusChange` to `state.db`, advancing `state`'s block height by
/// the net applied/reverted block count (incrementing once per applied
/// block, decrementing once per reverted block), and notifying
/// `ready_height` so the scheduler can dispatch due action items.
#[tracing::instrument(skip_all)]
pub async fn start_consensus_listener(
    consensus: Arc<dyn ConsensusSet>,
    state: Arc<HostState>,
    ready_height: UnboundedSender<u64>,
    token: CancellationToken,
) -> Result<(), ConsensusListenerError> {
    let recent_change = state.db.get_recent_change()?;
    let mut subscription = consensus.subscribe(recent_change).await?;

    loop {
        tokio::select! {
            change = subscription.receiver.recv() => {
                let Some(change) = change else {
                    tracing::info!("consensus subscription closed");
                    return Err(ConsensusListenerError::Closed);
                };
                apply_change(&state.db, &change)?;
                state.db.put_recent_change(change.id)?;
                let delta = change.applied.len() as i64 - change.reverted.len() as i64;
                let height = advance_height(&state, delta);
                if ready_height.send(height).is_err() {
                    tracing::warn!("scheduler channel closed, stopping consensus listener");
                    return Ok(());
                }
            }
            _ = token.cancelled() => {
                tracing::info!("consensus listener stopped by cancellation");
                return Ok(());
            }
        }
    }
}

/// Applies a signed block-count `delta` to `state`'s block height and
/// returns the new height.
fn advance_height(state: &HostState, delta: i64) -> u64 {
    let current = state.block_height();
    let next = if delta >= 0 {
        current + delta as u64
    } else {
        current.saturating_sub((-delta) as u64)
    };
    state.set_block_height(next);
    next
}

/// Applies one `ConsensusChange`'s reverted and applied blocks to every
/// matching obligation's confirmation flags. Exposed separately from the
/// task loop so tests can drive it synchronously without standing up a
/// full subscription.
pub fn apply_change(db: &ObligationDB, change: &ConsensusChange) -> Result<(), DBError> {
    for block in &change.reverted {
        apply_block(db, block, false)?;
    }
    for block in &change.applied {
        apply_block(db, block, true)?;
    }
    Ok(())
}

fn apply_block(db: &ObligationDB, block: &Block, confirmed: bool) -> Result<(), DBError> {
    for txn in &block.transactions {
        for index in 0..txn.file_contracts.len() {
            let id = txn.file_contract_id(index);
            if let Some(mut obligation) = db.get_obligation(id)? {
                obligation.origin_confirmed = confirmed;
                db.put_obligation(&obligation)?;
            }
        }
        for revision in &txn.file_contract_revisions {
            if let Some(mut obligation) = db.get_obligation(revision.parent_id)? {
                if matches_latest_revision(&obligation, revision) {
                    obligation.revision_confirmed = confirmed;
                    db.put_obligation(&obligation)?;
                }
            }
        }
        for proof in &txn.storage_proofs {
            if let Some(mut obligation) = db.get_obligation(proof.parent_id)? {
                obligation.proof_confirmed = confirmed;
                db.put_obligation(&obligation)?;
            }
        }
    }
    Ok(())
}

fn matches_latest_revision(
    obligation: &StorageObligation,
    revision: &storage_host_chain::FileContractRevision,
) -> bool {
    obligation
        .latest_revision()
        .map(|latest| latest.new_revision_number == revision.new_revision_number)
        .unwrap_or(false)
}
