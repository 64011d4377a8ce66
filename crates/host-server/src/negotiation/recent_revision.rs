//! RecentRevision: challenge-response authentication of the renter's key,
//! then a read-only reply with the latest revision.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use storage_host_chain::{FileContractRevision, TransactionSignature};
use storage_host_common::constants::{OBLIGATION_LOCK_TIMEOUT, RECENT_REVISION_DEADLINE};
use storage_host_common::Hash256;
use storage_host_core::context::HostState;
use storage_host_core::identity::verify_challenge_response;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::negotiation::error::{protocol, NegotiationError};
use crate::negotiation::wire_types::{read_payload, with_deadline, write_payload};

const MAX_SIGNATURE_SIZE: usize = 256;

#[derive(Debug, Serialize, Deserialize)]
pub struct RecentRevisionResponse {
    pub revision: FileContractRevision,
    pub signatures: Vec<TransactionSignature>,
}

/// Reads a contract id, challenges the renter, and on a valid signature
/// returns the latest revision under a timed lock. The lock is released
/// when the function returns; there is nothing to mutate here.
pub async fn handle_recent_revision<S>(stream: &mut S, state: &HostState) -> Result<(), NegotiationError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    with_deadline(RECENT_REVISION_DEADLINE, async {
        let contract_id: Hash256 = read_payload(stream, 32).await?;

        let mut challenge = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut challenge);
        write_payload(stream, &challenge).await?;

        let signature: [u8; 64] = read_payload(stream, MAX_SIGNATURE_SIZE).await?;

        let _guard = state
            .lock_table
            .try_lock(contract_id, OBLIGATION_LOCK_TIMEOUT)
            .await?;

        let obligation = state
            .db
            .get_obligation(contract_id)?
            .ok_or_else(|| protocol("no obligation with that contract id"))?;

        let renter_key = &obligation.unlock_conditions.public_keys[0];
        verify_challenge_response(renter_key, &challenge, &signature)?;

        let Some(revision) = obligation.latest_revision().cloned() else {
            return Err(protocol("contract has no revision yet"));
        };
        let signatures = obligation
            .revision_txn_set
            .last()
            .expect("a latest_revision implies a non-empty revision_txn_set")
            .signatures
            .clone();

        write_payload(stream, &RecentRevisionResponse { revision, signatures }).await
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ed25519_dalek::{Signer, SigningKey};
    use storage_host_chain::mock::MockChain;
    use storage_host_chain::{
        FileContract, SiaPublicKey, SignatureAlgorithm, SiacoinOutput, Transaction, UnlockConditions,
    };
    use storage_host_common::encoding::{read_bincode, write_bincode};
    use storage_host_core::db::ObligationDB;
    use storage_host_core::obligation::{ObligationStatus, StorageFolder, StorageObligation};
    use storage_host_core::sector_store::SectorStore;

    use super::*;

    async fn obligation_with_revision(renter_verifying_key: [u8; 32]) -> (tempfile::TempDir, HostState, Hash256) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(ObligationDB::open(dir.path().join("db")).unwrap());
        let folder = StorageFolder::new(
            dir.path().join("folder0"),
            storage_host_common::constants::SECTOR_SIZE * 4,
        );
        tokio::fs::create_dir_all(&folder.path).await.unwrap();
        let sector_store = Arc::new(SectorStore::new(db.clone(), vec![folder]));
        let chain = Arc::new(MockChain::new(0));
        let identity = storage_host_core::identity::HostIdentity::generate();

        let renter_key = SiaPublicKey { algorithm: SignatureAlgorithm::Ed25519, key: renter_verifying_key };
        let unlock_conditions = UnlockConditions::standard_2_of_2(renter_key, identity.public_key());

        let mut origin = Transaction::default();
        origin.file_contracts.push(FileContract {
            file_size: 0,
            file_merkle_root: [0u8; 32],
            window_start: 1000,
            window_end: 2000,
            payout: 0,
            valid_proof_outputs: [
                SiacoinOutput { value: 10, unlock_hash: [1u8; 32] },
                SiacoinOutput { value: 10, unlock_hash: [2u8; 32] },
            ],
            missed_proof_outputs: [
                SiacoinOutput { value: 10, unlock_hash: [1u8; 32] },
                SiacoinOutput { value: 10, unlock_hash: [2u8; 32] },
            ],
            unlock_hash: unlock_conditions.unlock_hash(),
            revision_number: 0,
        });
        let id = origin.file_contract_id(0);

        let revision = FileContractRevision {
            parent_id: id,
            unlock_conditions: unlock_conditions.clone(),
            new_revision_number: 1,
            new_file_size: 0,
            new_file_merkle_root: [0u8; 32],
            new_window_start: 1000,
            new_window_end: 2000,
            new_valid_proof_outputs: [
                SiacoinOutput { value: 10, unlock_hash: [1u8; 32] },
                SiacoinOutput { value: 10, unlock_hash: [2u8; 32] },
            ],
            new_missed_proof_outputs: [
                SiacoinOutput { value: 10, unlock_hash: [1u8; 32] },
                SiacoinOutput { value: 10, unlock_hash: [2u8; 32] },
                SiacoinOutput { value: 0, unlock_hash: [0u8; 32] },
            ],
            new_unlock_hash: unlock_conditions.unlock_hash(),
        };
        let mut revision_txn = Transaction::default();
        revision_txn.file_contract_revisions.push(revision);

        let obligation = StorageObligation {
            id,
            unlock_conditions,
            sector_roots: Vec::new(),
            origin_txn_set: vec![origin],
            revision_txn_set: vec![revision_txn],
            contract_cost: 10,
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

    #[tokio::test]
    async fn authenticated_renter_receives_the_latest_revision() {
        let renter_signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let (_dir, state, id) =
            obligation_with_revision(renter_signing_key.verifying_key().to_bytes()).await;

        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let server_task = tokio::spawn(async move { handle_recent_revision(&mut server, &state).await });

        let client_task = tokio::spawn(async move {
            write_bincode(&mut client, &id).await.unwrap();
            let challenge: [u8; 32] = read_bincode(&mut client, 64).await.unwrap();
            let signature = renter_signing_key.sign(&challenge).to_bytes();
            write_bincode(&mut client, &signature).await.unwrap();
            let response: RecentRevisionResponse = read_bincode(&mut client, 1 << 20).await.unwrap();
            response
        });

        let (server_result, client_result) = tokio::join!(server_task, client_task);
        server_result.unwrap().unwrap();
        let response = client_result.unwrap();
        assert_eq!(response.revision.new_revision_number, 1);
    }

    #[tokio::test]
    async fn wrong_signing_key_is_rejected() {
        let renter_signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let impostor_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let (_dir, state, id) =
            obligation_with_revision(renter_signing_key.verifying_key().to_bytes()).await;

        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let server_task = tokio::spawn(async move { handle_recent_revision(&mut server, &state).await });

        let client_task = tokio::spawn(async move {
            write_bincode(&mut client, &id).await.unwrap();
            let challenge: [u8; 32] = read_bincode(&mut client, 64).await.unwrap();
            let signature = impostor_key.sign(&challenge).to_bytes();
            write_bincode(&mut client, &signature).await.unwrap();
        });

        let (server_result, client_result) = tokio::join!(server_task, client_task);
        client_result.unwrap();
        assert!(server_result.unwrap().is_err());
    }
}
