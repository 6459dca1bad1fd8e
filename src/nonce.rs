//! Nonce assignment for outgoing transactions.

use crate::node::{
    method::eth,
    remote::Remote,
    transaction::{NoncedTransactionRequest, TransactionRequest},
    types::{Block, Network},
};
use alloy_primitives::Address;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};

/// Attaches nonces to transaction requests.
#[async_trait]
pub trait NonceService: Send + Sync {
    /// Reserves a nonce for the request's account.
    async fn populate_nonce(&self, request: TransactionRequest) -> Result<NoncedTransactionRequest>;

    /// Gives back a nonce reserved for an account that was never used.
    fn release_nonce(&self, network: &Network, account: Address, nonce: u64);
}

/// Source of the number of transactions an account has sent, including the
/// ones still in the mempool.
#[async_trait]
pub trait TransactionCount: Send + Sync {
    async fn pending_transaction_count(&self, account: Address) -> Result<u64>;
}

#[async_trait]
impl TransactionCount for Remote {
    async fn pending_transaction_count(&self, account: Address) -> Result<u64> {
        let count = self
            .execute(eth::GetTransactionCount, (account, Block::Pending))
            .await
            .with_context(|| format!("failed to fetch transaction count for {account}"))?;
        Ok(count.to())
    }
}

/// A nonce service that tracks the nonces of transactions being signed on top
/// of the pending transaction count of the remote node.
pub struct NonceTracker<C> {
    source: C,
    in_flight: Mutex<HashMap<(String, Address), BTreeSet<u64>>>,
}

impl<C> NonceTracker<C> {
    pub fn new(source: C) -> Self {
        Self {
            source,
            in_flight: Default::default(),
        }
    }
}

#[async_trait]
impl<C> NonceService for NonceTracker<C>
where
    C: TransactionCount,
{
    async fn populate_nonce(&self, request: TransactionRequest) -> Result<NoncedTransactionRequest> {
        let account = request.from();
        let pending = self.source.pending_transaction_count(account).await?;

        let nonce = {
            let mut in_flight = self.in_flight.lock();
            let nonces = in_flight
                .entry((request.network().chain_id.clone(), account))
                .or_default();
            // Anything below the pending count has made it to the node.
            nonces.retain(|nonce| *nonce >= pending);

            let mut nonce = pending;
            while nonces.contains(&nonce) {
                nonce += 1;
            }
            nonces.insert(nonce);
            nonce
        };

        tracing::debug!(%account, nonce, pending, "reserved nonce");
        Ok(NoncedTransactionRequest::new(request, nonce))
    }

    fn release_nonce(&self, network: &Network, account: Address, nonce: u64) {
        let mut in_flight = self.in_flight.lock();
        let released = in_flight
            .get_mut(&(network.chain_id.clone(), account))
            .map(|nonces| nonces.remove(&nonce))
            .unwrap_or_default();
        if released {
            tracing::debug!(%account, nonce, "released nonce");
        }
    }
}
