//! Shared fixtures and mock collaborators for unit tests.

use crate::{
    jsonrpc,
    node::{
        transaction::{NoncedTransactionRequest, SignedTransaction, TransactionRequest},
        typeddata::TypedData,
        types::Network,
        RpcRouter,
    },
    nonce::NonceService,
    permission::{ApprovalSurface, PermissionRecord},
    signer::{SignerError, Signing, SigningMethod},
};
use alloy_consensus::SignableTransaction as _;
use alloy_primitives::{address, Address, Signature};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};

/// The well known development mnemonic.
pub const MNEMONIC: &str = "test test test test test test test test test test test junk";

pub fn network() -> Network {
    Network {
        name: "test".to_owned(),
        chain_id: "1".to_owned(),
    }
}

/// The EIP-712 "Ether Mail" example with an optional domain chain ID.
pub fn mail(chain_id: Option<Value>) -> Value {
    let mut domain_type = vec![
        json!({ "name": "name", "type": "string" }),
        json!({ "name": "version", "type": "string" }),
    ];
    let mut domain = json!({
        "name": "Ether Mail",
        "version": "1",
        "verifyingContract": "0xCcCCccccCCCCcCCCCCCcCcCccCcCCCcCcccccccC",
    });
    if let Some(chain_id) = chain_id {
        domain_type.push(json!({ "name": "chainId", "type": "uint256" }));
        domain["chainId"] = chain_id;
    }
    domain_type.push(json!({ "name": "verifyingContract", "type": "address" }));

    json!({
        "types": {
            "EIP712Domain": domain_type,
            "Person": [
                { "name": "name", "type": "string" },
                { "name": "wallet", "type": "address" },
            ],
            "Mail": [
                { "name": "from", "type": "Person" },
                { "name": "to", "type": "Person" },
                { "name": "contents", "type": "string" },
            ],
        },
        "primaryType": "Mail",
        "domain": domain,
        "message": {
            "from": {
                "name": "Cow",
                "wallet": "0xCD2a3d9F938E13CD947Ec05AbC7FE734Df8DD826",
            },
            "to": {
                "name": "Bob",
                "wallet": "0xbBbBBBBbbBBBbbbBbbBbbbbBBbBbbbbBbBbbBBbB",
            },
            "contents": "Hello, Bob!",
        },
    })
}

#[derive(Clone, Copy)]
enum Behaviour {
    Succeed,
    Fail,
    Status(u16),
}

/// A signer backend that answers every call the same way and counts them.
#[derive(Clone)]
pub struct MockSigner(Arc<MockSignerState>);

struct MockSignerState {
    behaviour: Behaviour,
    calls: AtomicUsize,
    hidden: Mutex<Vec<Address>>,
}

impl MockSigner {
    pub const ADDRESS: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

    fn new(behaviour: Behaviour) -> Self {
        Self(Arc::new(MockSignerState {
            behaviour,
            calls: AtomicUsize::new(0),
            hidden: Mutex::new(Vec::new()),
        }))
    }

    /// A signer failing with a generic error.
    pub fn failing() -> Self {
        Self::new(Behaviour::Fail)
    }

    /// A signer failing with a device status word.
    pub fn status(status: u16) -> Self {
        Self::new(Behaviour::Status(status))
    }

    pub fn calls(&self) -> usize {
        self.0.calls.load(Ordering::SeqCst)
    }

    pub fn hidden(&self) -> Vec<Address> {
        self.0.hidden.lock().clone()
    }

    fn call(&self) -> Result<(), SignerError> {
        self.0.calls.fetch_add(1, Ordering::SeqCst);
        match self.0.behaviour {
            Behaviour::Succeed => Ok(()),
            Behaviour::Fail => Err(SignerError::Other(anyhow!("mock failure"))),
            Behaviour::Status(status) => Err(SignerError::DeviceStatus(status)),
        }
    }
}

impl Default for MockSigner {
    fn default() -> Self {
        Self::new(Behaviour::Succeed)
    }
}

#[async_trait]
impl Signing for MockSigner {
    async fn derive_address(&self, _: &str) -> Result<Address, SignerError> {
        self.call()?;
        Ok(Self::ADDRESS)
    }

    async fn sign_transaction(
        &self,
        transaction: &NoncedTransactionRequest,
        _: &SigningMethod,
    ) -> Result<SignedTransaction, SignerError> {
        self.call()?;
        let tx = transaction.to_eip1559()?;
        Ok(SignedTransaction::new(
            transaction.from(),
            tx.into_signed(Signature::test_signature()),
        ))
    }

    async fn sign_typed_data(
        &self,
        _: &TypedData,
        _: Address,
        _: &SigningMethod,
    ) -> Result<Signature, SignerError> {
        self.call()?;
        Ok(Signature::test_signature())
    }

    async fn sign_message(&self, _: Address, _: &[u8]) -> Result<Signature, SignerError> {
        self.call()?;
        Ok(Signature::test_signature())
    }

    fn hide_account(&self, account: Address) -> Result<(), SignerError> {
        self.call()?;
        self.0.hidden.lock().push(account);
        Ok(())
    }
}

/// A nonce service handing out increasing nonces and recording releases.
#[derive(Clone, Default)]
pub struct MockNonces(Arc<MockNoncesState>);

#[derive(Default)]
struct MockNoncesState {
    next: AtomicU64,
    populated: AtomicUsize,
    released: Mutex<Vec<u64>>,
    fail: AtomicBool,
}

impl MockNonces {
    /// Makes every following nonce request fail.
    pub fn fail(&self) {
        self.0.fail.store(true, Ordering::SeqCst);
    }

    pub fn populated(&self) -> usize {
        self.0.populated.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> Vec<u64> {
        self.0.released.lock().clone()
    }
}

#[async_trait]
impl NonceService for MockNonces {
    async fn populate_nonce(&self, request: TransactionRequest) -> Result<NoncedTransactionRequest> {
        if self.0.fail.load(Ordering::SeqCst) {
            bail!("nonce service unavailable");
        }
        self.0.populated.fetch_add(1, Ordering::SeqCst);
        let nonce = self.0.next.fetch_add(1, Ordering::SeqCst);
        Ok(NoncedTransactionRequest::new(request, nonce))
    }

    fn release_nonce(&self, _: &Network, _: Address, nonce: u64) {
        self.0.released.lock().push(nonce);
    }
}

/// An approval surface that only records the prompts it was asked to open.
#[derive(Clone, Default)]
pub struct MockApproval(Arc<Mutex<Vec<PermissionRecord>>>);

impl MockApproval {
    pub fn opened(&self) -> Vec<PermissionRecord> {
        self.0.lock().clone()
    }
}

#[async_trait]
impl ApprovalSurface for MockApproval {
    async fn open(&self, record: &PermissionRecord) -> Result<()> {
        self.0.lock().push(record.clone());
        Ok(())
    }
}

/// An RPC router recording the calls it was asked to route.
#[derive(Clone, Default)]
pub struct MockRouter(Arc<Mutex<Vec<(String, Vec<Value>)>>>);

impl MockRouter {
    pub fn routed(&self) -> Vec<String> {
        self.0.lock().iter().map(|(method, _)| method.clone()).collect()
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.0.lock().clone()
    }
}

#[async_trait]
impl RpcRouter for MockRouter {
    async fn route(&self, method: &str, params: Vec<Value>) -> Result<Value, jsonrpc::Error> {
        self.0.lock().push((method.to_owned(), params.clone()));
        match method {
            "eth_accounts" => Ok(json!([MockSigner::ADDRESS])),
            _ => Ok(json!({ "method": method, "params": params })),
        }
    }
}
