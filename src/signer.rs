//! An abstraction around signers.
//!
//! Every signer backend implements the same capability interface, which allows
//! the [`router::SigningRouter`] to dispatch operations to the backend owning
//! an account and to compose other operations around them, such as logging.

pub mod keyring;
pub mod ledger;
pub mod log_recorder;
pub mod router;

use crate::{
    events::FailureReason,
    node::{
        transaction::{NoncedTransactionRequest, SignedTransaction},
        typeddata::TypedData,
    },
};
use alloy_primitives::{Address, Signature};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// Status word a hardware device returns when the user declines an operation.
pub const CONDITIONS_OF_USE_NOT_SATISFIED: u16 = 0x6985;

/// A trait abstracting Ethereum signing backends.
#[async_trait]
pub trait Signing: Send + Sync {
    /// Derives the address of an account managed by the signer.
    async fn derive_address(&self, account_id: &str) -> Result<Address, SignerError>;

    /// Signs an Ethereum transaction.
    async fn sign_transaction(
        &self,
        transaction: &NoncedTransactionRequest,
        method: &SigningMethod,
    ) -> Result<SignedTransaction, SignerError>;

    /// Signs Ethereum EIP-712 typed data.
    async fn sign_typed_data(
        &self,
        typed_data: &TypedData,
        account: Address,
        method: &SigningMethod,
    ) -> Result<Signature, SignerError>;

    /// Signs an Ethereum message with the EIP-191 personal message prefix.
    async fn sign_message(&self, account: Address, message: &[u8]) -> Result<Signature, SignerError>;

    /// Hides an account so that it is no longer listed or used for signing.
    fn hide_account(&self, account: Address) -> Result<(), SignerError> {
        let _ = account;
        Err(SignerError::Unsupported("account removal"))
    }
}

/// A boxed signer that is safe to send between threads.
pub type BoxSigner = Box<dyn Signing + Send + Sync + 'static>;

/// The closed set of signer backends.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerKind {
    Keyring,
    Ledger,
}

impl Display for SignerKind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Keyring => "keyring",
            Self::Ledger => "ledger",
        })
    }
}

/// Identifies the backend owning an account.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AccountSigner {
    #[serde(rename = "type")]
    pub kind: SignerKind,
    #[serde(rename = "accountID")]
    pub account_id: String,
}

/// The signing method for an operation along with its backend specific
/// parameters.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SigningMethod {
    Keyring,
    Ledger {
        #[serde(rename = "deviceID")]
        device_id: String,
        path: String,
    },
}

impl SigningMethod {
    /// The backend this method must be dispatched to.
    pub fn kind(&self) -> SignerKind {
        match self {
            Self::Keyring => SignerKind::Keyring,
            Self::Ledger { .. } => SignerKind::Ledger,
        }
    }
}

/// An error returned by a signer backend.
#[derive(Debug, Error)]
pub enum SignerError {
    /// The hardware device answered with a non-success status word.
    #[error("device returned status {0:#06x}")]
    DeviceStatus(u16),

    /// The signing method was dispatched to a backend of another kind.
    #[error("{method} signing method used with the {backend} signer")]
    MethodMismatch {
        method: SignerKind,
        backend: SignerKind,
    },

    /// The account is not managed by the signer.
    #[error("unknown account {0}")]
    UnknownAccount(Address),

    /// The operation is not supported by the signer.
    #[error("{0} is not supported by this signer")]
    Unsupported(&'static str),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SignerError {
    /// Normalizes a backend error into the reason reported to subscribers.
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::DeviceStatus(CONDITIONS_OF_USE_NOT_SATISFIED) => FailureReason::UserRejected,
            _ => FailureReason::GenericError,
        }
    }
}
