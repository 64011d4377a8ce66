//! Shared host state threaded through the scheduler, state machine and
//! negotiation handlers: a daemon's long-lived collaborators grouped
//! behind one `Arc`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use storage_host_chain::{ConsensusSet, TransactionPool, Wallet};
use storage_host_common::LogThrottle;

use crate::db::ObligationDB;
use crate::financial::FinancialMetrics;
use crate::identity::HostIdentity;
use crate::lock_table::LockTable;
use crate::sector_store::SectorStore;

pub struct HostState {
    pub db: Arc<ObligationDB>,
    pub sector_store: Arc<SectorStore>,
    pub lock_table: Arc<LockTable>,
    pub consensus: Arc<dyn ConsensusSet>,
    pub pool: Arc<dyn TransactionPool>,
    pub wallet: Arc<dyn Wallet>,
    pub identity: HostIdentity,
    pub financial: Mutex<FinancialMetrics>,
    /// Probabilistic log throttling: the first occurrences of each error
    /// kind log in full, later ones are sampled.
    pub log_throttle: LogThrottle,
    block_height: AtomicU64,
}

impl HostState {
    pub fn new(
        db: Arc<ObligationDB>,
        sector_store: Arc<SectorStore>,
        consensus: Arc<dyn ConsensusSet>,
        pool: Arc<dyn TransactionPool>,
        wallet: Arc<dyn Wallet>,
        identity: HostIdentity,
        starting_height: u64,
    ) -> Self {
        Self {
            db,
            sector_store,
            lock_table: Arc::new(LockTable::new()),
            consensus,
            pool,
            wallet,
            identity,
            financial: Mutex::new(FinancialMetrics::default()),
            log_throttle: LogThrottle::default(),
            block_height: AtomicU64::new(starting_height),
        }
    }

    pub fn block_height(&self) -> u64 {
        self.block_height.load(Ordering::SeqCst)
    }

    pub fn set_block_height(&self, height: u64) {
        self.block_height.store(height, Ordering::SeqCst);
    }
}
