//! Routing of signing operations to the signer backend owning an account.

use super::{AccountSigner, BoxSigner, SignerError, SignerKind, SigningMethod};
use crate::{
    events::{signature_bytes, Event, EventSink, FailureReason, SignatureResult},
    node::{
        transaction::{SignedTransaction, TransactionRequest},
        typeddata::TypedData,
        types::Network,
    },
    nonce::NonceService,
};
use alloy_primitives::{Address, Signature};
use parking_lot::RwLock;
use thiserror::Error;

/// Dispatches signing operations to the configured signer backends.
///
/// Every signing attempt that reaches a backend emits exactly one terminal
/// event, whether it succeeds or fails.
pub struct SigningRouter {
    keyring: Option<BoxSigner>,
    ledger: Option<BoxSigner>,
    network: Network,
    nonces: Box<dyn NonceService>,
    events: EventSink,
    accounts: RwLock<Vec<(Address, SigningMethod)>>,
}

impl SigningRouter {
    pub fn new(network: Network, nonces: Box<dyn NonceService>, events: EventSink) -> Self {
        Self {
            keyring: None,
            ledger: None,
            network,
            nonces,
            events,
            accounts: Default::default(),
        }
    }

    /// Configures the software keyring backend.
    pub fn with_keyring(mut self, signer: BoxSigner) -> Self {
        self.keyring = Some(signer);
        self
    }

    /// Configures the hardware device backend.
    pub fn with_ledger(mut self, signer: BoxSigner) -> Self {
        self.ledger = Some(signer);
        self
    }

    /// The network signing requests are validated against.
    pub fn network(&self) -> &Network {
        &self.network
    }

    fn signer(&self, kind: SignerKind) -> Result<&BoxSigner, SigningError> {
        let signer = match kind {
            SignerKind::Keyring => self.keyring.as_ref(),
            SignerKind::Ledger => self.ledger.as_ref(),
        };
        signer.ok_or(SigningError::UnknownSigner(kind))
    }

    /// Derives the address of an account with the backend of its kind.
    pub async fn derive_address(&self, signer: &AccountSigner) -> Result<Address, SigningError> {
        self.signer(signer.kind)?
            .derive_address(&signer.account_id)
            .await
            .map_err(SigningError::from_backend)
    }

    /// Reserves a nonce for and signs a transaction.
    ///
    /// The nonce is released again if the backend fails to sign.
    pub async fn sign_transaction(
        &self,
        request: TransactionRequest,
        method: &SigningMethod,
    ) -> Result<SignedTransaction, SigningError> {
        let signer = self.signer(method.kind())?;
        let nonced = self
            .nonces
            .populate_nonce(request)
            .await
            .map_err(SigningError::Nonce)?;

        match signer.sign_transaction(&nonced, method).await {
            Ok(signed) => {
                self.events
                    .emit(Event::SigningTxResponse(SignatureResult::SuccessTx {
                        signed_tx: signed.clone(),
                    }));
                Ok(signed)
            }
            Err(err) => {
                self.nonces
                    .release_nonce(nonced.network(), nonced.from(), nonced.nonce());
                tracing::warn!(account = %nonced.from(), nonce = nonced.nonce(), %err, "failed to sign transaction");
                self.events.emit(Event::SigningTxResponse(SignatureResult::Error {
                    reason: err.reason(),
                }));
                Err(SigningError::from_backend(err))
            }
        }
    }

    /// Gives back the nonce of a signed transaction that never made it to
    /// the network.
    pub fn release_nonce(&self, transaction: &SignedTransaction) {
        tracing::debug!(account = %transaction.from, nonce = transaction.nonce, "releasing nonce of unsent transaction");
        self.nonces
            .release_nonce(&self.network, transaction.from, transaction.nonce);
    }

    /// Signs EIP-712 typed data after verifying its domain matches the
    /// network.
    pub async fn sign_typed_data(
        &self,
        typed_data: &TypedData,
        account: Address,
        method: &SigningMethod,
    ) -> Result<Signature, SigningError> {
        if let Err(declared) = typed_data.verify(&self.network) {
            return Err(SigningError::ChainIdMismatch {
                declared: declared.to_string(),
                expected: self.network.chain_id.clone(),
            });
        }
        let signer = self.signer(method.kind())?;

        let result = signer.sign_typed_data(typed_data, account, method).await;
        self.events
            .emit(Event::SigningDataResponse(data_result(&result)));
        result.map_err(|err| {
            tracing::warn!(%account, %err, "failed to sign typed data");
            SigningError::from_backend(err)
        })
    }

    /// Signs a personal message.
    pub async fn sign_data(
        &self,
        account: Address,
        message: &[u8],
        method: &SigningMethod,
    ) -> Result<Signature, SigningError> {
        let signer = self.signer(method.kind())?;

        let result = signer.sign_message(account, message).await;
        self.events
            .emit(Event::PersonalSigningResponse(data_result(&result)));
        result.map_err(|err| {
            tracing::warn!(%account, %err, "failed to sign message");
            SigningError::from_backend(err)
        })
    }

    /// Removes an account from the keyring. Hardware accounts cannot be
    /// removed.
    pub fn remove_account(&self, account: Address, method: &SigningMethod) -> Result<(), SigningError> {
        match method.kind() {
            SignerKind::Keyring => {
                self.signer(SignerKind::Keyring)?
                    .hide_account(account)
                    .map_err(SigningError::from_backend)?;
                self.accounts.write().retain(|(address, _)| *address != account);
                Ok(())
            }
            SignerKind::Ledger => Err(SigningError::UnsupportedOperation {
                operation: "account removal",
                kind: SignerKind::Ledger,
            }),
        }
    }

    /// Starts tracking an address along with the method used to sign for it.
    pub fn add_tracked_address(&self, account: Address, method: SigningMethod) {
        tracing::debug!(%account, ?method, "tracking account");
        let mut accounts = self.accounts.write();
        match accounts.iter_mut().find(|(address, _)| *address == account) {
            Some(entry) => entry.1 = method,
            None => accounts.push((account, method)),
        }
    }

    /// Returns the tracked addresses in the order they were added.
    pub fn tracked_accounts(&self) -> Vec<Address> {
        self.accounts.read().iter().map(|(address, _)| *address).collect()
    }

    /// Returns the signing method for a tracked address.
    pub fn signing_method(&self, account: Address) -> Option<SigningMethod> {
        self.accounts
            .read()
            .iter()
            .find(|(address, _)| *address == account)
            .map(|(_, method)| method.clone())
    }
}

fn data_result(result: &Result<Signature, SignerError>) -> SignatureResult<alloy_primitives::Bytes> {
    match result {
        Ok(signature) => SignatureResult::SuccessData {
            signed_data: signature_bytes(signature),
        },
        Err(err) => SignatureResult::Error {
            reason: err.reason(),
        },
    }
}

/// An error signing with the router.
#[derive(Debug, Error)]
pub enum SigningError {
    /// No backend is configured for the signer kind.
    #[error("no {0} signer is configured")]
    UnknownSigner(SignerKind),

    /// The typed data domain targets another chain.
    #[error("typed data chain ID {declared} does not match network chain ID {expected}")]
    ChainIdMismatch { declared: String, expected: String },

    /// The user or the device declined to sign.
    #[error("user rejected the request")]
    UserRejected(#[source] SignerError),

    /// The backend failed for any other reason.
    #[error("signing failed: {0}")]
    GenericError(#[source] SignerError),

    #[error("{operation} is not supported for {kind} accounts")]
    UnsupportedOperation {
        operation: &'static str,
        kind: SignerKind,
    },

    /// No nonce could be reserved for the transaction.
    #[error("failed to reserve nonce: {0:#}")]
    Nonce(anyhow::Error),

    /// There is no known signing method for the account.
    #[error("account {0} is not tracked")]
    UntrackedAccount(Address),
}

impl SigningError {
    /// Normalizes a backend error.
    pub fn from_backend(err: SignerError) -> Self {
        match err.reason() {
            FailureReason::UserRejected => Self::UserRejected(err),
            FailureReason::GenericError => Self::GenericError(err),
        }
    }
}
