//! Aggregated financial counters, updated under the host lock atomically
//! with the persistence of the triggering obligation.

use serde::{Deserialize, Serialize};
use storage_host_chain::Currency;

use crate::obligation::{ObligationStatus, StorageObligation};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinancialMetrics {
    pub contract_count: u64,
    pub potential_contract_compensation: Currency,
    pub locked_storage_collateral: Currency,
    pub potential_storage_revenue: Currency,
    pub potential_upload_revenue: Currency,
    pub potential_download_revenue: Currency,
    pub risked_storage_collateral: Currency,
    pub realized_contract_compensation: Currency,
    pub storage_revenue: Currency,
    pub upload_bandwidth_revenue: Currency,
    pub download_bandwidth_revenue: Currency,
    pub transaction_fee_expenses: Currency,
    pub lost_storage_collateral: Currency,
    pub lost_revenue: Currency,
}

impl FinancialMetrics {
    /// Folds a newly-accepted obligation's potentials in (FormContract).
    pub fn record_new_obligation(&mut self, obligation: &StorageObligation) {
        self.contract_count += 1;
        self.potential_contract_compensation += obligation.contract_cost;
        self.locked_storage_collateral += obligation.locked_collateral;
        self.potential_storage_revenue += obligation.potential_storage_revenue;
        self.potential_upload_revenue += obligation.potential_upload_revenue;
        self.potential_download_revenue += obligation.potential_download_revenue;
        self.risked_storage_collateral += obligation.risked_collateral;
    }

    /// Releases the potentials an obligation was carrying, regardless of
    /// how it resolves; call before applying the status-specific deltas
    /// below.
    fn release_potentials(&mut self, obligation: &StorageObligation) {
        self.potential_contract_compensation = self
            .potential_contract_compensation
            .saturating_sub(obligation.contract_cost);
        self.locked_storage_collateral = self
            .locked_storage_collateral
            .saturating_sub(obligation.locked_collateral);
        self.potential_storage_revenue = self
            .potential_storage_revenue
            .saturating_sub(obligation.potential_storage_revenue);
        self.potential_upload_revenue = self
            .potential_upload_revenue
            .saturating_sub(obligation.potential_upload_revenue);
        self.potential_download_revenue = self
            .potential_download_revenue
            .saturating_sub(obligation.potential_download_revenue);
        self.risked_storage_collateral = self
            .risked_storage_collateral
            .saturating_sub(obligation.risked_collateral);
    }

    /// Applies the terminal-status-specific deltas.
    pub fn record_terminal(&mut self, obligation: &StorageObligation, status: ObligationStatus) {
        self.release_potentials(obligation);
        match status {
            ObligationStatus::Rejected => {
                self.transaction_fee_expenses = self
                    .transaction_fee_expenses
                    .saturating_sub(obligation.transaction_fees_added);
            }
            ObligationStatus::Succeeded => {
                self.realized_contract_compensation += obligation.contract_cost;
                self.storage_revenue += obligation.potential_storage_revenue;
                self.upload_bandwidth_revenue += obligation.potential_upload_revenue;
                self.download_bandwidth_revenue += obligation.potential_download_revenue;
            }
            ObligationStatus::Failed => {
                self.lost_storage_collateral += obligation.risked_collateral;
                self.lost_revenue += obligation.potential_storage_revenue
                    + obligation.potential_upload_revenue
                    + obligation.potential_download_revenue;
            }
            ObligationStatus::Unresolved => {}
        }
    }

    pub fn record_transaction_fee(&mut self, fee: Currency) {
        self.transaction_fee_expenses += fee;
    }

    /// Folds the potential-revenue deltas a paid revision adds (upload in
    /// ReviseContract, download in Download). Called
    /// alongside the matching increment on the obligation itself so the
    /// aggregate and the per-obligation potentials never drift apart.
    pub fn record_revision_revenue(&mut self, upload: Currency, storage: Currency, download: Currency) {
        self.potential_upload_revenue += upload;
        self.potential_storage_revenue += storage;
        self.potential_download_revenue += download;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obligation::ObligationStatus;
    use storage_host_chain::Transaction;

    fn obligation() -> StorageObligation {
        let mut origin = Transaction::default();
        origin.file_contracts.push(storage_host_chain::FileContract {
            file_size: 0,
            file_merkle_root: [0u8; 32],
            window_start: 0,
            window_end: 0,
            payout: 0,
            valid_proof_outputs: [
                storage_host_chain::SiacoinOutput { value: 0, unlock_hash: [0u8; 32] },
                storage_host_chain::SiacoinOutput { value: 0, unlock_hash: [0u8; 32] },
            ],
            missed_proof_outputs: [
                storage_host_chain::SiacoinOutput { value: 0, unlock_hash: [0u8; 32] },
                storage_host_chain::SiacoinOutput { value: 0, unlock_hash: [0u8; 32] },
            ],
            unlock_hash: [0u8; 32],
            revision_number: 0,
        });
        StorageObligation {
            id: [1u8; 32],
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
            origin_txn_set: vec![origin],
            revision_txn_set: Vec::new(),
            contract_cost: 10,
            locked_collateral: 20,
            potential_storage_revenue: 30,
            potential_download_revenue: 5,
            potential_upload_revenue: 5,
            risked_collateral: 20,
            transaction_fees_added: 2,
            origin_confirmed: true,
            revision_confirmed: true,
            proof_confirmed: true,
            status: ObligationStatus::Unresolved,
            negotiation_height: 0,
        }
    }

    #[test]
    fn succeeded_obligation_realizes_revenue() {
        let mut metrics = FinancialMetrics::default();
        let ob = obligation();
        metrics.record_new_obligation(&ob);
        metrics.record_terminal(&ob, ObligationStatus::Succeeded);
        assert_eq!(metrics.storage_revenue, 30);
        assert_eq!(metrics.potential_storage_revenue, 0);
        assert_eq!(metrics.realized_contract_compensation, 10);
    }

    #[test]
    fn failed_obligation_loses_collateral_and_revenue() {
        let mut metrics = FinancialMetrics::default();
        let ob = obligation();
        metrics.record_new_obligation(&ob);
        metrics.record_terminal(&ob, ObligationStatus::Failed);
        assert_eq!(metrics.lost_storage_collateral, 20);
        assert_eq!(metrics.lost_revenue, 40);
        assert_eq!(metrics.locked_storage_collateral, 0);
    }

    #[test]
    fn rejected_obligation_refunds_fees() {
        let mut metrics = FinancialMetrics::default();
        metrics.transaction_fee_expenses = 10;
        let ob = obligation();
        metrics.record_terminal(&ob, ObligationStatus::Rejected);
        assert_eq!(metrics.transaction_fee_expenses, 8);
    }

    #[test]
    fn revision_revenue_folds_into_potentials() {
        let mut metrics = FinancialMetrics::default();
        metrics.record_revision_revenue(5, 7, 11);
        assert_eq!(metrics.potential_upload_revenue, 5);
        assert_eq!(metrics.potential_storage_revenue, 7);
        assert_eq!(metrics.potential_download_revenue, 11);
    }
}
