//! The Action Scheduler: for each new block height, drains due action
//! items and dispatches the Obligation State Machine for each, serialized
//! by the obligation lock.

use std::sync::Arc;
use std::time::Duration;

use storage_host_common::constants::OBLIGATION_LOCK_TIMEOUT;
use storage_host_common::{HostErrorKind, Hash256, Kinded};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::context::HostState;
use crate::db::DBError;
use crate::lock_table::LockError;
use crate::state_machine::{self, StateMachineError};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Db(#[from] DBError),
}

impl Kinded for SchedulerError {
    fn kind(&self) -> HostErrorKind {
        HostErrorKind::Internal
    }
}

/// Drains every action item at or below `state.block_height()` once,
/// exactly like a late tick. Run on startup before subscribing to new
/// heights, so pending work from before a restart is rediscovered.
#[tracing::instrument(skip_all)]
pub async fn recover_on_startup(state: Arc<HostState>) -> Result<(), SchedulerError> {
    let height = state.block_height();
    let due = state.db.drain_actions_up_to(height)?;
    tracing::info!(count = due.len(), height, "replaying due action items on startup");
    dispatch_all(&state, due, &TaskTracker::new()).await;
    Ok(())
}

/// Runs until `ready_height` closes or `token` is cancelled. Each new
/// height drains its due action items and dispatches one bounded task per
/// obligation id.
#[tracing::instrument(skip_all)]
pub async fn start_scheduler(
    state: Arc<HostState>,
    mut ready_height: UnboundedReceiver<u64>,
    token: CancellationToken,
) -> Result<(), SchedulerError> {
    let tracker = TaskTracker::new();

    loop {
        tokio::select! {
            height = ready_height.recv() => {
                let Some(height) = height else {
                    tracing::info!("scheduler input channel closed");
                    break;
                };
                let due = state.db.drain_actions_up_to(height)?;
                dispatch_all(&state, due, &tracker).await;
            }
            _ = token.cancelled() => {
                tracing::info!("scheduler stopped by cancellation");
                break;
            }
        }
    }

    tracker.close();
    tracker.wait().await;
    Ok(())
}

async fn dispatch_all(state: &Arc<HostState>, due: Vec<Hash256>, tracker: &TaskTracker) {
    for id in due {
        let state = state.clone();
        tracker.spawn(async move {
            if let Err(err) = dispatch_one(state, id).await {
                tracing::warn!(obligation = %hex::encode(id), %err, "action item dispatch failed");
            }
        });
    }
}

/// Acquires the obligation's lock with a timeout and runs `handle` once.
/// Idempotent: a given `(height, id)` may be dispatched more than once
/// during a reorganization, and an already-terminal obligation returns
/// immediately.
async fn dispatch_one(state: Arc<HostState>, id: Hash256) -> Result<(), DispatchError> {
    let _guard = state.lock_table.try_lock(id, OBLIGATION_LOCK_TIMEOUT).await?;
    state_machine::handle(&state, id).await?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
enum DispatchError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    StateMachine(#[from] StateMachineError),
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use storage_host_chain::mock::MockChain;
    use storage_host_chain::{FileContract, SiacoinOutput, Transaction};
    use tokio::sync::mpsc;

    use super::*;
    use crate::db::ObligationDB;
    use crate::obligation::{ObligationStatus, StorageFolder, StorageObligation};
    use crate::sector_store::SectorStore;

    async fn build_state(height: u64) -> (tempfile::TempDir, Arc<HostState>, Hash256) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(ObligationDB::open(dir.path().join("db")).unwrap());
        let folder = StorageFolder::new(dir.path().join("folder0"), 1 << 30);
        tokio::fs::create_dir_all(&folder.path).await.unwrap();
        let sector_store = Arc::new(SectorStore::new(db.clone(), vec![folder]));
        let chain = Arc::new(MockChain::new(height));

        let mut txn = Transaction::default();
        txn.file_contracts.push(FileContract {
            file_size: 0,
            file_merkle_root: [0u8; 32],
            window_start: height + 50,
            window_end: height + 100,
            payout: 10,
            valid_proof_outputs: [
                SiacoinOutput { value: 5, unlock_hash: [1u8; 32] },
                SiacoinOutput { value: 5, unlock_hash: [2u8; 32] },
            ],
            missed_proof_outputs: [
                SiacoinOutput { value: 5, unlock_hash: [1u8; 32] },
                SiacoinOutput { value: 5, unlock_hash: [2u8; 32] },
            ],
            unlock_hash: [3u8; 32],
            revision_number: 0,
        });
        let id = txn.file_contract_id(0);
        let obligation = StorageObligation {
            id,
            unlock_conditions: storage_host_chain::UnlockConditions::standard_2_of_2(
                storage_host_chain::SiaPublicKey {
                    algorithm: storage_host_chain::SignatureAlgorithm::Ed25519,
                    key: [1u8; 32],
                },
                storage_host_chain::SiaPublicKey {
                    algorithm: storage_host_chain::SignatureAlgorithm::Ed25519,
                    key: [2u8; 32],
                },
            ),
            sector_roots: Vec::new(),
            origin_txn_set: vec![txn],
            revision_txn_set: Vec::new(),
            contract_cost: 0,
            locked_collateral: 0,
            potential_storage_revenue: 0,
            potential_download_revenue: 0,
            potential_upload_revenue: 0,
            risked_collateral: 0,
            transaction_fees_added: 0,
            origin_confirmed: false,
            revision_confirmed: false,
            proof_confirmed: false,
            status: ObligationStatus::Unresolved,
            negotiation_height: height,
        };
        db.put_obligation(&obligation).unwrap();
        db.enqueue_action(height, id).unwrap();

        let state = Arc::new(HostState::new(
            db,
            sector_store,
            chain.clone(),
            chain.clone(),
            chain,
            crate::identity::HostIdentity::generate(),
            height,
        ));
        (dir, state, id)
    }

    #[tokio::test]
    async fn startup_recovery_drains_pending_actions() {
        let (_dir, state, id) = build_state(0).await;
        recover_on_startup(state.clone()).await.unwrap();
        // origin gets resubmitted and re-enqueued; obligation stays unresolved.
        let obligation = state.db.get_obligation(id).unwrap().unwrap();
        assert!(!obligation.status.is_terminal());
    }

    #[tokio::test]
    async fn scheduler_dispatches_on_new_height() {
        let (_dir, state, id) = build_state(0).await;
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let handle = tokio::spawn(start_scheduler(state.clone(), rx, token.clone()));

        tx.send(0).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        handle.await.unwrap().unwrap();

        let obligation = state.db.get_obligation(id).unwrap().unwrap();
        assert!(!obligation.status.is_terminal());
    }
}
