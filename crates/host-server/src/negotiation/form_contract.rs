//! FormContract: negotiates a brand-new storage obligation from a bare,
//! sectorless contract.

use serde::{Deserialize, Serialize};
use storage_host_chain::{
    FileContractRevision, SiaPublicKey, TransactionSet, TransactionSignature, UnlockConditions,
};
use storage_host_common::constants::{OBLIGATION_LOCK_TIMEOUT, RESUBMISSION_TIMEOUT, REVISION_SUBMISSION_BUFFER};
use storage_host_core::context::HostState;
use storage_host_core::obligation::{ObligationStatus, StorageObligation};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::negotiation::error::{protocol, NegotiationError};
use crate::negotiation::wire_types::{exchange_settings, read_payload, with_deadline, write_payload};
use crate::settings::HostInternalSettings;

const MAX_REQUEST_SIZE: usize = 256 * 1024;
const MAX_SIGN_SIZE: usize = 64 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct FormContractRequest {
    origin_txn_set: TransactionSet,
    renter_key: SiaPublicKey,
}

/// The funded-but-unsigned origin set, handed back for the renter to
/// co-sign: the reply carries the added parents, inputs, and outputs.
#[derive(Debug, Serialize, Deserialize)]
struct FormContractFunded {
    origin_txn_set: TransactionSet,
}

#[derive(Debug, Serialize, Deserialize)]
struct FormContractSign {
    renter_contract_signatures: Vec<TransactionSignature>,
    renter_revision_signature: TransactionSignature,
}

#[derive(Debug, Serialize, Deserialize)]
struct FormContractFinal {
    host_contract_signatures: Vec<TransactionSignature>,
    host_revision_signature: TransactionSignature,
}

pub async fn handle_form_contract<S>(
    stream: &mut S,
    state: &HostState,
    settings: &HostInternalSettings,
) -> Result<(), NegotiationError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if !exchange_settings(stream, settings).await? {
        return Ok(());
    }

    with_deadline(storage_host_common::constants::FORM_CONTRACT_DEADLINE, async {
        if !settings.accepting_contracts {
            return Err(protocol("host is not accepting new contracts"));
        }

        let request: FormContractRequest = read_payload(stream, MAX_REQUEST_SIZE).await?;
        let height = state.block_height();
        let host_key = state.identity.public_key();

        let mut origin_txn_set = request.origin_txn_set;
        let last_txn = origin_txn_set
            .last()
            .ok_or_else(|| protocol("origin transaction set is empty"))?;
        if last_txn.file_contracts.len() != 1 {
            return Err(protocol("last transaction must carry exactly one contract"));
        }
        let contract = last_txn.file_contracts[0].clone();

        if contract.file_size != 0 || contract.file_merkle_root != [0u8; 32] {
            return Err(protocol("a new contract must carry no sectors"));
        }
        if contract.window_start <= height + REVISION_SUBMISSION_BUFFER {
            return Err(protocol("window_start leaves no revision submission buffer"));
        }
        if contract.window_end < contract.window_start + settings.window_size {
            return Err(protocol("proof window is narrower than the configured minimum"));
        }
        if contract.window_start > height + settings.max_duration {
            return Err(protocol("window_start exceeds the configured maximum duration"));
        }

        let host_unlock_hash = state.wallet.next_address().await?;
        if contract.valid_proof_outputs[1].unlock_hash != host_unlock_hash
            || contract.missed_proof_outputs[1].unlock_hash != host_unlock_hash
        {
            return Err(protocol("host payout does not point at the host's unlock hash"));
        }
        if contract.valid_proof_outputs[1].value != contract.missed_proof_outputs[1].value {
            return Err(protocol("host valid and missed payouts must match"));
        }
        if contract.valid_proof_outputs[1].value < settings.min_contract_price {
            return Err(protocol("contract price is below the configured minimum"));
        }

        let expected_collateral = contract.valid_proof_outputs[1].value - settings.min_contract_price;
        if expected_collateral > settings.max_collateral {
            return Err(protocol("requested collateral exceeds the configured maximum"));
        }
        let locked = state.financial.lock().locked_storage_collateral;
        if locked + expected_collateral > settings.collateral_budget {
            return Err(protocol("collateral budget exhausted"));
        }

        let unlock_conditions = UnlockConditions::standard_2_of_2(request.renter_key.clone(), host_key.clone());
        if contract.unlock_hash != unlock_conditions.unlock_hash() {
            return Err(protocol("unlock hash is not the renter/host 2-of-2"));
        }

        let (_min_fee, recommended_fee) = state.consensus.fee_estimation().await?;
        let fee_per_byte = last_txn.miner_fees.iter().sum::<u128>()
            / last_txn.marshalled_len().max(1) as u128;
        if fee_per_byte < recommended_fee {
            return Err(protocol("transaction fee is below the pool's fee estimate"));
        }

        let funding_txn = origin_txn_set
            .pop()
            .expect("checked non-empty above");
        let (funded_txn, mut new_parents) = state
            .wallet
            .fund_transaction(funding_txn, expected_collateral, 0)
            .await?;
        new_parents.append(&mut origin_txn_set);
        new_parents.push(funded_txn);
        let funded_set = new_parents;

        write_payload(stream, &FormContractFunded { origin_txn_set: funded_set.clone() }).await?;

        let sign: FormContractSign = read_payload(stream, MAX_SIGN_SIZE).await?;

        let mut final_txn = funded_set
            .last()
            .expect("funded_set always has at least the contract txn")
            .clone();
        final_txn.signatures.extend(sign.renter_contract_signatures);
        let renter_signature_count = final_txn.signatures.len();
        let host_signed = state.wallet.sign_transaction(final_txn, true).await?;
        let host_contract_signatures = host_signed.signatures[renter_signature_count..].to_vec();

        let mut finalized_set = funded_set;
        let last_index = finalized_set.len() - 1;
        finalized_set[last_index] = host_signed.clone();

        let id = host_signed.file_contract_id(0);

        let initial_revision = FileContractRevision {
            parent_id: id,
            unlock_conditions: unlock_conditions.clone(),
            new_revision_number: contract.revision_number + 1,
            new_file_size: 0,
            new_file_merkle_root: [0u8; 32],
            new_window_start: contract.window_start,
            new_window_end: contract.window_end,
            new_valid_proof_outputs: contract.valid_proof_outputs,
            new_missed_proof_outputs: [
                contract.missed_proof_outputs[0],
                contract.missed_proof_outputs[1],
                storage_host_chain::SiacoinOutput {
                    value: 0,
                    unlock_hash: storage_host_chain::VOID_UNLOCK_HASH,
                },
            ],
            new_unlock_hash: contract.unlock_hash,
        };

        let mut revision_txn = storage_host_chain::Transaction::default();
        revision_txn.file_contract_revisions.push(initial_revision.clone());
        revision_txn.signatures.push(sign.renter_revision_signature);
        let signed_revision_txn = state.wallet.sign_transaction(revision_txn, false).await?;
        let host_revision_signature = signed_revision_txn
            .signatures
            .last()
            .cloned()
            .unwrap_or(TransactionSignature {
                parent_id: id,
                public_key_index: 1,
                signature: Vec::new(),
            });

        let _guard = state.lock_table.try_lock(id, OBLIGATION_LOCK_TIMEOUT).await?;

        let obligation = StorageObligation {
            id,
            unlock_conditions,
            sector_roots: Vec::new(),
            origin_txn_set: finalized_set.clone(),
            revision_txn_set: vec![signed_revision_txn],
            contract_cost: settings.min_contract_price,
            locked_collateral: expected_collateral,
            potential_storage_revenue: 0,
            potential_download_revenue: 0,
            potential_upload_revenue: 0,
            risked_collateral: expected_collateral,
            transaction_fees_added: 0,
            origin_confirmed: false,
            revision_confirmed: false,
            proof_confirmed: false,
            status: ObligationStatus::Unresolved,
            negotiation_height: height,
        };

        state.db.put_obligation(&obligation)?;
        state.financial.lock().record_new_obligation(&obligation);
        state.db.enqueue_action(height + RESUBMISSION_TIMEOUT, id)?;

        if let Err(err) = state.pool.accept_transaction_set(finalized_set).await {
            tracing::warn!(%err, "origin transaction set rejected at formation time, scheduler will retry");
        }

        write_payload(
            stream,
            &FormContractFinal {
                host_contract_signatures,
                host_revision_signature,
            },
        )
        .await
    })
    .await
}
