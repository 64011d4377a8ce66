//! A scriptable in-memory chain used by host-core and host-server tests:
//! a controllable block-height cursor, injectable transaction-pool
//! failures, and a wallet that funds/signs deterministically.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::RngCore;
use storage_host_common::Hash256;
use tokio::sync::mpsc;

use crate::{
    Block, BlockHeight, ChainError, ConsensusChange, ConsensusSet, ConsensusSubscription,
    Currency, PoolError, SiacoinInput, SiacoinOutput, Transaction, TransactionPool, TransactionSet,
    UnlockConditions, UnlockHash, Wallet,
};

#[derive(Debug, Clone)]
pub enum PoolBehavior {
    Accept,
    ConsensusConflict,
    Transient(String),
}

struct MockChainInner {
    height: BlockHeight,
    subscribers: Vec<mpsc::UnboundedSender<ConsensusChange>>,
    fee_estimation: (Currency, Currency),
    segments: HashMap<Hash256, u64>,
    pool_behavior: PoolBehavior,
    wallet_address: UnlockHash,
    accepted: Vec<TransactionSet>,
    last_subscribe_recent_change_id: Option<Hash256>,
}

/// A shared handle to a scriptable chain. Clone freely; all clones observe
/// the same state.
#[derive(Clone)]
pub struct MockChain(Arc<Mutex<MockChainInner>>);

impl MockChain {
    pub fn new(starting_height: BlockHeight) -> Self {
        let mut address = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut address);
        Self(Arc::new(Mutex::new(MockChainInner {
            height: starting_height,
            subscribers: Vec::new(),
            fee_estimation: (1, 1),
            segments: HashMap::new(),
            pool_behavior: PoolBehavior::Accept,
            wallet_address: address,
            accepted: Vec::new(),
            last_subscribe_recent_change_id: None,
        })))
    }

    /// The `recent_change_id` passed to the most recent `subscribe` call, so
    /// a test can assert a simulated restart resumed from where it left off.
    pub fn last_subscribe_recent_change_id(&self) -> Option<Hash256> {
        self.0.lock().last_subscribe_recent_change_id
    }

    pub fn set_pool_behavior(&self, behavior: PoolBehavior) {
        self.0.lock().pool_behavior = behavior;
    }

    /// The address `next_address`/`fund_transaction` hand out, readable
    /// synchronously so tests can embed it in a contract draft.
    pub fn wallet_address(&self) -> UnlockHash {
        self.0.lock().wallet_address
    }

    pub fn set_fee_estimation(&self, min: Currency, recommended: Currency) {
        self.0.lock().fee_estimation = (min, recommended);
    }

    pub fn set_segment_index(&self, contract_id: Hash256, segment_index: u64) {
        self.0.lock().segments.insert(contract_id, segment_index);
    }

    pub fn accepted_sets(&self) -> Vec<TransactionSet> {
        self.0.lock().accepted.clone()
    }

    /// Advances the height by one block, optionally confirming `txns`, and
    /// fans the change out to every subscriber.
    pub fn mine_block(&self, txns: Vec<Transaction>) {
        let mut inner = self.0.lock();
        inner.height += 1;
        let change = ConsensusChange {
            reverted: Vec::new(),
            applied: vec![Block {
                height: inner.height,
                transactions: txns,
            }],
            id: {
                let mut id = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut id);
                id
            },
        };
        inner.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }

    /// Mines `n` empty blocks, e.g. to cross a revision-submission or proof
    /// deadline boundary in tests.
    pub fn mine_empty(&self, n: u64) {
        for _ in 0..n {
            self.mine_block(Vec::new());
        }
    }

    pub fn revert_last_block(&self, txns: Vec<Transaction>) {
        let mut inner = self.0.lock();
        let reverted = Block {
            height: inner.height,
            transactions: txns,
        };
        inner.height -= 1;
        let change = ConsensusChange {
            reverted: vec![reverted],
            applied: Vec::new(),
            id: {
                let mut id = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut id);
                id
            },
        };
        inner.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }
}

#[async_trait]
impl ConsensusSet for MockChain {
    async fn subscribe(
        &self,
        recent_change_id: Option<Hash256>,
    ) -> Result<ConsensusSubscription, ChainError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.0.lock();
        inner.last_subscribe_recent_change_id = recent_change_id;
        inner.subscribers.push(tx);
        Ok(ConsensusSubscription { receiver: rx })
    }

    fn unsubscribe(&self) {
        self.0.lock().subscribers.clear();
    }

    async fn storage_proof_segment(&self, contract_id: Hash256) -> Result<u64, ChainError> {
        Ok(self
            .0
            .lock()
            .segments
            .get(&contract_id)
            .copied()
            .unwrap_or(0))
    }

    async fn fee_estimation(&self) -> Result<(Currency, Currency), ChainError> {
        Ok(self.0.lock().fee_estimation)
    }

    fn block_height(&self) -> BlockHeight {
        self.0.lock().height
    }
}

#[async_trait]
impl TransactionPool for MockChain {
    async fn accept_transaction_set(&self, txns: TransactionSet) -> Result<(), PoolError> {
        let mut inner = self.0.lock();
        match &inner.pool_behavior {
            PoolBehavior::Accept => {
                inner.accepted.push(txns);
                Ok(())
            }
            PoolBehavior::ConsensusConflict => Err(PoolError::ConsensusConflict),
            PoolBehavior::Transient(msg) => Err(PoolError::Transient(msg.clone())),
        }
    }
}

#[async_trait]
impl Wallet for MockChain {
    /// Returns the chain's one scripted wallet address, the same one
    /// `fund_transaction` pays collateral and change into. A real wallet
    /// mints a fresh address per call for privacy; this harness keeps one
    /// so a test's client-side contract draft can name the host's payout
    /// address before the host itself computes it inline.
    async fn next_address(&self) -> Result<UnlockHash, ChainError> {
        Ok(self.0.lock().wallet_address)
    }

    async fn fund_transaction(
        &self,
        mut txn: Transaction,
        amount: Currency,
        miner_fee: Currency,
    ) -> Result<(Transaction, Vec<Transaction>), ChainError> {
        let address = self.0.lock().wallet_address;
        let mut parent_id = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut parent_id);
        txn.siacoin_inputs.push(SiacoinInput {
            parent_id,
            unlock_conditions: UnlockConditions {
                timelock: 0,
                public_keys: Vec::new(),
                signatures_required: 1,
            },
        });
        if amount > 0 {
            txn.siacoin_outputs.push(SiacoinOutput {
                value: amount,
                unlock_hash: address,
            });
        }
        txn.miner_fees.push(miner_fee);
        Ok((txn, Vec::new()))
    }

    async fn sign_transaction(
        &self,
        mut txn: Transaction,
        _whole_transaction: bool,
    ) -> Result<Transaction, ChainError> {
        for input in &txn.siacoin_inputs {
            txn.signatures.push(crate::TransactionSignature {
                parent_id: input.parent_id,
                public_key_index: 0,
                signature: vec![0u8; 64],
            });
        }
        Ok(txn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mining_advances_height_and_notifies_subscribers() {
        let chain = MockChain::new(100);
        let sub = chain.subscribe(None).await.unwrap();
        let mut rx = sub.receiver;
        chain.mine_block(Vec::new());
        let change = rx.recv().await.unwrap();
        assert_eq!(change.applied[0].height, 101);
        assert_eq!(chain.block_height(), 101);
    }

    #[tokio::test]
    async fn pool_behavior_is_scriptable() {
        let chain = MockChain::new(0);
        chain.set_pool_behavior(PoolBehavior::ConsensusConflict);
        let err = chain.accept_transaction_set(vec![]).await.unwrap_err();
        assert!(matches!(err, PoolError::ConsensusConflict));
    }

    #[tokio::test]
    async fn wallet_funds_and_signs() {
        let chain = MockChain::new(0);
        let (funded, parents) = chain
            .fund_transaction(Transaction::default(), 100, 5)
            .await
            .unwrap();
        assert!(parents.is_empty());
        assert_eq!(funded.miner_fees, vec![5]);
        let signed = chain.sign_transaction(funded, true).await.unwrap();
        assert_eq!(signed.signatures.len(), signed.siacoin_inputs.len());
    }
}
