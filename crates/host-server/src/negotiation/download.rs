//! Download: a loop of read iterations, each trading a payment revision
//! for a batch of requested byte ranges.

use serde::{Deserialize, Serialize};
use storage_host_chain::{Transaction, TransactionSignature};
use storage_host_common::constants::{DOWNLOAD_ITERATION_DEADLINE, OBLIGATION_LOCK_TIMEOUT, SECTOR_SIZE};
use storage_host_common::Hash256;
use storage_host_core::context::HostState;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::negotiation::error::{protocol, NegotiationError};
use crate::negotiation::payment::{verify_download_identical_fields, verify_payment_revision};
use crate::negotiation::wire_types::{exchange_settings, read_payload, with_deadline, write_payload};
use crate::settings::HostInternalSettings;

const MAX_REQUEST_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct ReadRequest {
    sector_root: Hash256,
    offset: u64,
    length: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct DownloadBatch {
    contract_id: Hash256,
    requests: Vec<ReadRequest>,
    revision: storage_host_chain::FileContractRevision,
    renter_signature: TransactionSignature,
}

#[derive(Debug, Serialize, Deserialize)]
struct DownloadReply {
    host_signature: TransactionSignature,
    data: Vec<u8>,
}

pub async fn handle_download<S>(
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
        with_deadline(DOWNLOAD_ITERATION_DEADLINE, run_iteration(stream, state, settings)).await?;
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
    let batch: DownloadBatch = read_payload(stream, MAX_REQUEST_SIZE).await?;

    let mut total_length: u64 = 0;
    for request in &batch.requests {
        if request.length > SECTOR_SIZE || request.offset + request.length > SECTOR_SIZE {
            return Err(protocol("request_out_of_bounds"));
        }
        total_length += request.length;
    }
    if total_length > settings.max_download_batch_size {
        return Err(protocol("large_download_batch"));
    }

    let _guard = state
        .lock_table
        .try_lock(batch.contract_id, OBLIGATION_LOCK_TIMEOUT)
        .await?;

    let mut obligation = state
        .db
        .get_obligation(batch.contract_id)?
        .ok_or_else(|| protocol("no obligation with that contract id"))?;
    if obligation.status.is_terminal() {
        return Err(protocol("obligation is no longer active"));
    }

    let height = state.block_height();
    let expected_transfer = settings.min_download_bandwidth_price * total_length as u128;

    verify_payment_revision(&obligation, height, &batch.revision, expected_transfer)?;
    verify_download_identical_fields(&obligation, &batch.revision)?;

    let mut revision_txn = Transaction::default();
    revision_txn.file_contract_revisions.push(batch.revision.clone());
    revision_txn.signatures.push(batch.renter_signature);
    let signed_revision_txn = state.wallet.sign_transaction(revision_txn, false).await?;
    let host_signature = signed_revision_txn
        .signatures
        .last()
        .cloned()
        .ok_or_else(|| protocol("wallet did not return a host signature"))?;

    obligation.revision_txn_set.push(signed_revision_txn);
    obligation.potential_download_revenue += expected_transfer;
    state.db.put_obligation(&obligation)?;
    state
        .financial
        .lock()
        .record_revision_revenue(0, 0, expected_transfer);

    let mut data = Vec::with_capacity(total_length as usize);
    for request in &batch.requests {
        let sector = state.sector_store.read(request.sector_root).await?;
        let start = request.offset as usize;
        let end = start + request.length as usize;
        data.extend_from_slice(&sector[start..end]);
    }

    write_payload(stream, &DownloadReply { host_signature, data }).await
}
