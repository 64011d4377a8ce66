//! Shared payment-revision verification, applied identically by
//! ReviseContract and Download.

use storage_host_chain::{Currency, FileContractRevision};
use storage_host_common::constants::REVISION_SUBMISSION_BUFFER;
use storage_host_core::obligation::StorageObligation;

use crate::negotiation::error::{protocol, NegotiationError};

/// Checks the rules common to both revision protocols: submission-buffer
/// headroom, the renter-to-host value transfer, the no-grief renter
/// valid/missed ordering, and the strictly-increasing revision number.
/// Callers layer their own additional rules on top (Download's
/// identical-field check; ReviseContract's collateral-void bookkeeping).
pub fn verify_payment_revision(
    obligation: &StorageObligation,
    height: u64,
    revision: &FileContractRevision,
    expected_transfer: Currency,
) -> Result<(), NegotiationError> {
    let existing_valid = obligation.valid_proof_outputs();
    let existing_window_start = obligation.expiration();
    let existing_revision_number = obligation.revision_number();

    if existing_window_start.saturating_sub(REVISION_SUBMISSION_BUFFER) <= height {
        return Err(protocol(
            "contract has already entered its revision submission buffer",
        ));
    }

    if revision.new_revision_number <= existing_revision_number {
        return Err(protocol("revision number did not strictly increase"));
    }

    let renter_before = existing_valid[0].value;
    let renter_after = revision.new_valid_proof_outputs[0].value;
    let renter_delta = renter_before.saturating_sub(renter_after);
    if renter_after > renter_before || renter_delta < expected_transfer {
        return Err(protocol("renter payment did not cover the expected transfer"));
    }

    let host_before = existing_valid[1].value;
    let host_after = revision.new_valid_proof_outputs[1].value;
    if host_after.saturating_sub(host_before) != renter_delta {
        return Err(protocol(
            "host payout did not increase by exactly the renter's payment",
        ));
    }

    if revision.new_valid_proof_outputs[0].value > revision.new_missed_proof_outputs[0].value {
        return Err(protocol("renter valid output exceeds renter missed output"));
    }

    Ok(())
}

/// The proof window never moves in a revision: this host rejects any
/// window change outright rather than tracking it through a richer
/// action-item protocol.
pub fn verify_window_unchanged(
    obligation: &StorageObligation,
    revision: &FileContractRevision,
) -> Result<(), NegotiationError> {
    if revision.new_window_start != obligation.expiration()
        || revision.new_window_end != obligation.proof_deadline()
    {
        return Err(protocol("revision may not move the proof window"));
    }
    Ok(())
}

/// Download leaves every identifying field untouched: only the payout
/// split moves.
pub fn verify_download_identical_fields(
    obligation: &StorageObligation,
    revision: &FileContractRevision,
) -> Result<(), NegotiationError> {
    if revision.parent_id != obligation.id {
        return Err(protocol("revision parent id does not match the obligation"));
    }
    if revision.unlock_conditions != obligation.unlock_conditions {
        return Err(protocol("revision unlock conditions changed"));
    }
    if revision.new_file_size != obligation.file_size() || revision.new_file_merkle_root != obligation.merkle_root()
    {
        return Err(protocol("download revision must not change file size or merkle root"));
    }
    if revision.new_unlock_hash != obligation.unlock_conditions.unlock_hash() {
        return Err(protocol("revision unlock hash does not match the 2-of-2 conditions"));
    }
    verify_window_unchanged(obligation, revision)?;

    let existing_missed = obligation
        .latest_revision()
        .map(|r| r.new_missed_proof_outputs)
        .expect("a revision exists once any payment revision is being verified");
    if revision.new_missed_proof_outputs[1].value < existing_missed[1].value {
        return Err(protocol("download must not decrease the host's missed payout"));
    }
    if revision.new_missed_proof_outputs[1].unlock_hash != existing_missed[1].unlock_hash
        || revision.new_missed_proof_outputs[2].unlock_hash != existing_missed[2].unlock_hash
    {
        return Err(protocol("revision changed the host or void unlock hash"));
    }

    Ok(())
}

/// ReviseContract may grow risked collateral by routing additional value
/// into the void output, but never shrink it.
pub fn verify_collateral_not_decreased(
    obligation: &StorageObligation,
    revision: &FileContractRevision,
) -> Result<Currency, NegotiationError> {
    let existing_void = obligation
        .void_output()
        .map(|o| o.value)
        .unwrap_or(0);
    let new_void = revision.void_output().value;
    if new_void < existing_void {
        return Err(protocol("revision decreased risked collateral"));
    }
    Ok(new_void - existing_void)
}

#[cfg(test)]
mod tests {
    use storage_host_chain::{SiaPublicKey, SignatureAlgorithm, Transaction, UnlockConditions};
    use storage_host_core::obligation::ObligationStatus;

    use super::*;

    fn obligation(host_value: Currency, renter_value: Currency, revision_number: u64) -> StorageObligation {
        let mut origin = Transaction::default();
        origin.file_contracts.push(storage_host_chain::FileContract {
            file_size: 0,
            file_merkle_root: [0u8; 32],
            window_start: 1000,
            window_end: 2000,
            payout: 0,
            valid_proof_outputs: [
                storage_host_chain::SiacoinOutput { value: renter_value, unlock_hash: [1u8; 32] },
                storage_host_chain::SiacoinOutput { value: host_value, unlock_hash: [2u8; 32] },
            ],
            missed_proof_outputs: [
                storage_host_chain::SiacoinOutput { value: renter_value, unlock_hash: [1u8; 32] },
                storage_host_chain::SiacoinOutput { value: host_value, unlock_hash: [2u8; 32] },
            ],
            unlock_hash: [3u8; 32],
            revision_number,
        });
        StorageObligation {
            id: [9u8; 32],
            unlock_conditions: UnlockConditions::standard_2_of_2(
                SiaPublicKey { algorithm: SignatureAlgorithm::Ed25519, key: [1u8; 32] },
                SiaPublicKey { algorithm: SignatureAlgorithm::Ed25519, key: [2u8; 32] },
            ),
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
            revision_confirmed: false,
            proof_confirmed: false,
            status: ObligationStatus::Unresolved,
            negotiation_height: 0,
        }
    }

    fn revision(renter_value: Currency, host_value: Currency, revision_number: u64) -> FileContractRevision {
        FileContractRevision {
            parent_id: [9u8; 32],
            unlock_conditions: UnlockConditions::standard_2_of_2(
                SiaPublicKey { algorithm: SignatureAlgorithm::Ed25519, key: [1u8; 32] },
                SiaPublicKey { algorithm: SignatureAlgorithm::Ed25519, key: [2u8; 32] },
            ),
            new_revision_number: revision_number,
            new_file_size: 0,
            new_file_merkle_root: [0u8; 32],
            new_window_start: 1000,
            new_window_end: 2000,
            new_valid_proof_outputs: [
                storage_host_chain::SiacoinOutput { value: renter_value, unlock_hash: [1u8; 32] },
                storage_host_chain::SiacoinOutput { value: host_value, unlock_hash: [2u8; 32] },
            ],
            new_missed_proof_outputs: [
                storage_host_chain::SiacoinOutput { value: renter_value, unlock_hash: [1u8; 32] },
                storage_host_chain::SiacoinOutput { value: host_value, unlock_hash: [2u8; 32] },
                storage_host_chain::SiacoinOutput { value: 0, unlock_hash: [0u8; 32] },
            ],
            new_unlock_hash: [3u8; 32],
        }
    }

    #[test]
    fn accepts_a_well_formed_payment() {
        let ob = obligation(100, 50, 1);
        let rev = revision(40, 60, 2);
        assert!(verify_payment_revision(&ob, 0, &rev, 10).is_ok());
    }

    #[test]
    fn rejects_insufficient_transfer() {
        let ob = obligation(100, 50, 1);
        let rev = revision(45, 55, 2);
        assert!(verify_payment_revision(&ob, 0, &rev, 10).is_err());
    }

    #[test]
    fn rejects_non_increasing_revision_number() {
        let ob = obligation(100, 50, 5);
        let rev = revision(40, 60, 5);
        assert!(verify_payment_revision(&ob, 0, &rev, 10).is_err());
    }

    #[test]
    fn rejects_inside_submission_buffer() {
        let ob = obligation(100, 50, 1);
        let rev = revision(40, 60, 2);
        assert!(verify_payment_revision(&ob, 900, &rev, 10).is_err());
    }
}
