//! Trait contracts for the external collaborators the host core consumes:
//! the Consensus Set, the Transaction Pool and the Wallet. The core is
//! built against these traits only; [`mock`] provides a controllable test
//! harness implementing all three.

pub mod mock;
pub mod types;

use async_trait::async_trait;
use storage_host_common::{HostErrorKind, Kinded};
use tokio::sync::mpsc;
pub use types::{
    Block, BlockHeight, Currency, FileContract, FileContractRevision, SiaPublicKey,
    SignatureAlgorithm, SiacoinInput, SiacoinOutput, StorageProof, Transaction, TransactionSet,
    TransactionSignature, UnlockConditions, UnlockHash, VOID_UNLOCK_HASH,
};

use storage_host_common::Hash256;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("consensus subscription closed")]
    SubscriptionClosed,
    #[error("no segment available for contract")]
    NoSegment,
    #[error("wallet error: {0}")]
    Wallet(String),
}

impl Kinded for ChainError {
    fn kind(&self) -> HostErrorKind {
        HostErrorKind::Internal
    }
}

/// A batch of confirmed/reverted blocks, as delivered by the consensus set's
/// subscription stream.
#[derive(Debug, Clone)]
pub struct ConsensusChange {
    pub reverted: Vec<Block>,
    pub applied: Vec<Block>,
    pub id: Hash256,
}

pub struct ConsensusSubscription {
    pub receiver: mpsc::UnboundedReceiver<ConsensusChange>,
}

/// External consensus set. Implementations deliver a linearized stream of
/// applied/reverted blocks and answer proof-challenge queries.
#[async_trait]
pub trait ConsensusSet: Send + Sync {
    async fn subscribe(
        &self,
        recent_change_id: Option<Hash256>,
    ) -> Result<ConsensusSubscription, ChainError>;

    fn unsubscribe(&self);

    /// The consensus-chosen segment index to prove for this contract at the
    /// current block height.
    async fn storage_proof_segment(&self, contract_id: Hash256) -> Result<u64, ChainError>;

    /// `(minimum, recommended)` fee-per-byte-of-transaction estimation.
    async fn fee_estimation(&self) -> Result<(Currency, Currency), ChainError>;

    fn block_height(&self) -> BlockHeight;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    /// The set conflicts with the confirmed chain (a double-spend):
    /// terminal for the affected obligation.
    #[error("transaction set conflicts with confirmed chain")]
    ConsensusConflict,
    /// Anything else: the scheduler retries on the next action item.
    #[error("transient transaction pool error: {0}")]
    Transient(String),
}

impl Kinded for PoolError {
    fn kind(&self) -> HostErrorKind {
        match self {
            PoolError::ConsensusConflict => HostErrorKind::Consensus,
            PoolError::Transient(_) => HostErrorKind::Internal,
        }
    }
}

/// External transaction pool.
#[async_trait]
pub trait TransactionPool: Send + Sync {
    async fn accept_transaction_set(&self, txns: TransactionSet) -> Result<(), PoolError>;
}

/// External wallet. The usual builder-style wallet API
/// (`start_transaction`/`register_transaction`/`fund_siacoins`/...) is
/// collapsed into two async calls so the trait stays object-safe: funding
/// and signing are the only two operations the core ever needs performed
/// on its behalf.
#[async_trait]
pub trait Wallet: Send + Sync {
    async fn next_address(&self) -> Result<UnlockHash, ChainError>;

    /// Registers `txn` on top of `parents`, funds it with `amount` siacoins
    /// and adds `miner_fee` as a miner fee output, returning the funded
    /// (unsigned) transaction and any new parent transactions the wallet
    /// had to add (e.g. a siacoin-output-splitting transaction).
    async fn fund_transaction(
        &self,
        txn: Transaction,
        amount: Currency,
        miner_fee: Currency,
    ) -> Result<(Transaction, Vec<Transaction>), ChainError>;

    /// Signs `txn`. `whole_transaction` selects whether the signature covers
    /// every field (initial contract formation) or only the fields relevant
    /// to a later revision co-sign.
    async fn sign_transaction(
        &self,
        txn: Transaction,
        whole_transaction: bool,
    ) -> Result<Transaction, ChainError>;
}
