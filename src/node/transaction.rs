//! Partial transaction type for RPC calls.

use super::{
    method::eth,
    remote::Remote,
    types::{Block, Network},
};
use alloy_consensus::{Signed, TxEip1559};
use alloy_eips::{eip2718::Encodable2718 as _, eip2930::AccessList};
use alloy_primitives::{Address, Bytes, TxKind, B256, U128, U256, U64};
use anyhow::{bail, ensure, Context as _, Result};
use serde::{Deserialize, Serialize};

/// Transaction request parameters used for `eth_sendTransaction` and
/// `eth_signTransaction` RPC calls, bound to the network they target.
///
/// This is basically an Ethereum transaction with a `from` field used to
/// determine the account to sign with and with optional arguments.
#[derive(Clone, Debug, Serialize)]
pub struct TransactionRequest {
    #[serde(flatten)]
    args: TransactionArgs,
    network: Network,
}

/// Inner transaction arguments with generated serialization implementation.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransactionArgs {
    /// The transaction type.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<U64>,
    /// The account used for sending the transaction.
    from: Address,
    /// The target address for the transaction. This can also be `None` to
    /// indicate a contract creation transaction.
    to: Option<Address>,
    /// The gas limit for the transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    gas: Option<U64>,
    /// The legacy gas price in Wei for the transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    gas_price: Option<U128>,
    /// The maximum gas price in Wei for the transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    max_fee_per_gas: Option<U128>,
    /// The maximum priority fee in Wei for the transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    max_priority_fee_per_gas: Option<U128>,
    /// The amount of Ether to send with the transaction.
    #[serde(default)]
    value: U256,
    /// The calldata to use for the transaction.
    #[serde(default, alias = "input")]
    data: Bytes,
    /// The nonce requested by the caller. It is always replaced by the nonce
    /// service.
    #[serde(skip_serializing)]
    nonce: Option<U64>,
    /// List of addresses and storage keys that the transaction plans to access.
    #[serde(skip_serializing_if = "Option::is_none")]
    access_list: Option<AccessList>,
    /// The chain ID for the transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    chain_id: Option<U64>,
}

impl TransactionRequest {
    /// Creates a transaction request from arguments.
    ///
    /// Validates that the arguments make sense for the target network.
    pub fn new(args: TransactionArgs, network: Network) -> Result<Self> {
        match args.kind.map(|kind| kind.to::<u64>()) {
            None | Some(0) | Some(2) => {}
            Some(kind) => bail!("unsupported transaction type {kind:#x}"),
        }
        ensure!(
            args.gas_price.is_none()
                || (args.max_fee_per_gas.is_none() && args.max_priority_fee_per_gas.is_none()),
            "malformed transaction args: both legacy and EIP-1559 fees specified",
        );
        if let Some(chain_id) = args.chain_id {
            ensure!(
                chain_id.to::<u64>() == network.chain_id()?,
                "transaction chain ID {chain_id} does not match {}",
                network.name,
            );
        }

        Ok(Self { args, network })
    }

    /// The account used for sending the transaction.
    pub fn from(&self) -> Address {
        self.args.from
    }

    /// The network the transaction targets.
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Fills a transaction by asking the remote node for all unspecified gas
    /// parameters.
    pub async fn fill(&mut self, remote: &Remote) -> Result<()> {
        if self.args.gas.is_none() {
            let args = serde_json::to_value(&self.args)?;
            let gas = remote
                .execute(eth::EstimateGas, (args, Block::Latest))
                .await
                .context("failed to estimate gas")?;
            self.args.gas = Some(gas);
        }

        let args = &mut self.args;
        if args.gas_price.is_none()
            && (args.max_fee_per_gas.is_none() || args.max_priority_fee_per_gas.is_none())
        {
            let gas_price = remote.execute(eth::GasPrice, ()).await?;
            let priority_fee = remote.execute(eth::MaxPriorityFeePerGas, ()).await?;
            let priority_fee = *args.max_priority_fee_per_gas.get_or_insert(priority_fee);
            args.max_fee_per_gas
                .get_or_insert(gas_price.saturating_add(priority_fee));
        }

        Ok(())
    }
}

/// A transaction request with a nonce attached by the nonce service.
#[derive(Clone, Debug, Serialize)]
pub struct NoncedTransactionRequest {
    #[serde(flatten)]
    request: TransactionRequest,
    #[serde(with = "quantity")]
    nonce: u64,
}

/// Hex encoded JSON quantities.
mod quantity {
    use serde::Serializer;

    pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{value:#x}"))
    }
}

impl NoncedTransactionRequest {
    /// Attaches a nonce to a transaction request.
    pub fn new(request: TransactionRequest, nonce: u64) -> Self {
        if let Some(requested) = request.args.nonce.filter(|requested| *requested != U64::from(nonce)) {
            tracing::debug!(%requested, nonce, "replacing caller supplied nonce");
        }
        Self { request, nonce }
    }

    /// The account used for sending the transaction.
    pub fn from(&self) -> Address {
        self.request.from()
    }

    /// The nonce attached to the request.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// The network the transaction targets.
    pub fn network(&self) -> &Network {
        self.request.network()
    }

    /// Builds the EIP-1559 transaction to sign. Legacy gas prices are used for
    /// both EIP-1559 fee fields.
    pub fn to_eip1559(&self) -> Result<TxEip1559> {
        let args = &self.request.args;
        let (max_fee_per_gas, max_priority_fee_per_gas) = match (
            args.gas_price,
            args.max_fee_per_gas,
            args.max_priority_fee_per_gas,
        ) {
            (Some(gas_price), None, None) => (gas_price, gas_price),
            (None, Some(max_fee), Some(priority_fee)) => (max_fee, priority_fee),
            _ => bail!("transaction fees are not fully specified"),
        };
        let gas = args.gas.context("transaction gas limit is not specified")?;

        Ok(TxEip1559 {
            chain_id: self.network().chain_id()?,
            nonce: self.nonce,
            gas_limit: gas.to(),
            max_fee_per_gas: max_fee_per_gas.to(),
            max_priority_fee_per_gas: max_priority_fee_per_gas.to(),
            to: args.to.map_or(TxKind::Create, TxKind::Call),
            value: args.value,
            access_list: args.access_list.clone().unwrap_or_default(),
            input: args.data.clone(),
        })
    }
}

/// A signed transaction ready to be broadcast.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SignedTransaction {
    pub from: Address,
    #[serde(with = "quantity")]
    pub nonce: u64,
    pub hash: B256,
    /// The EIP-2718 encoded signed transaction.
    pub raw: Bytes,
}

impl SignedTransaction {
    pub fn new(from: Address, signed: Signed<TxEip1559>) -> Self {
        Self {
            from,
            nonce: signed.tx().nonce,
            hash: *signed.hash(),
            raw: signed.encoded_2718().into(),
        }
    }
}
