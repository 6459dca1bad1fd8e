//! Hardware device signer.
//!
//! The device itself is reached through a [`LedgerTransport`]. Payloads are
//! sent in the form the device firmware expects: the RLP signing payload for
//! transactions, the domain separator and struct hash for typed data, and the
//! raw bytes for personal messages.

use super::{SignerError, SignerKind, Signing, SigningMethod};
use crate::{
    jsonrpc::{self, InvalidScheme},
    node::{
        method::ledger,
        remote::{Remote, RemoteError},
        transaction::{NoncedTransactionRequest, SignedTransaction},
        typeddata::TypedData,
    },
};
use alloy_consensus::SignableTransaction as _;
use alloy_primitives::{Address, Bytes, Signature, B256};
use anyhow::{anyhow, Context as _};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Url;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Transport to a hardware signing device.
#[async_trait]
pub trait LedgerTransport: Send + Sync {
    async fn derive_address(&self, device_id: &str, path: &str) -> Result<Address, TransportError>;

    async fn sign_transaction(
        &self,
        device_id: &str,
        path: &str,
        payload: Bytes,
    ) -> Result<Signature, TransportError>;

    async fn sign_typed_data(
        &self,
        device_id: &str,
        path: &str,
        domain_separator: B256,
        struct_hash: B256,
    ) -> Result<Signature, TransportError>;

    async fn sign_message(
        &self,
        device_id: &str,
        path: &str,
        message: Bytes,
    ) -> Result<Signature, TransportError>;
}

/// An error communicating with a hardware device.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The device answered with a status word other than success.
    #[error("device status {0:#06x}")]
    Status(u16),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<TransportError> for SignerError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Status(status) => Self::DeviceStatus(status),
            TransportError::Other(err) => Self::Other(err),
        }
    }
}

/// A signer backed by a single hardware device.
pub struct Ledger<T> {
    transport: T,
    device_id: String,
    paths: RwLock<HashMap<Address, String>>,
}

impl<T> Ledger<T> {
    /// Creates a new signer for the device with the specified identifier.
    pub fn new(transport: T, device_id: impl Into<String>) -> Self {
        Self {
            transport,
            device_id: device_id.into(),
            paths: Default::default(),
        }
    }

    fn path(&self, account: Address) -> Result<String, SignerError> {
        self.paths
            .read()
            .get(&account)
            .cloned()
            .ok_or(SignerError::UnknownAccount(account))
    }
}

fn ledger_method(method: &SigningMethod) -> Result<(&str, &str), SignerError> {
    match method {
        SigningMethod::Ledger { device_id, path } => Ok((device_id.as_str(), path.as_str())),
        other => Err(SignerError::MethodMismatch {
            method: other.kind(),
            backend: SignerKind::Ledger,
        }),
    }
}

#[async_trait]
impl<T> Signing for Ledger<T>
where
    T: LedgerTransport,
{
    async fn derive_address(&self, account_id: &str) -> Result<Address, SignerError> {
        let address = self
            .transport
            .derive_address(&self.device_id, account_id)
            .await?;
        self.paths.write().insert(address, account_id.to_owned());
        Ok(address)
    }

    async fn sign_transaction(
        &self,
        transaction: &NoncedTransactionRequest,
        method: &SigningMethod,
    ) -> Result<SignedTransaction, SignerError> {
        let (device_id, path) = ledger_method(method)?;
        let tx = transaction.to_eip1559()?;
        let signature = self
            .transport
            .sign_transaction(device_id, path, tx.encoded_for_signing().into())
            .await?;

        let signer = signature
            .recover_address_from_prehash(&tx.signature_hash())
            .context("device returned an invalid transaction signature")?;
        if signer != transaction.from() {
            return Err(anyhow!(
                "device signed with {signer} instead of {}",
                transaction.from()
            )
            .into());
        }

        Ok(SignedTransaction::new(signer, tx.into_signed(signature)))
    }

    async fn sign_typed_data(
        &self,
        typed_data: &TypedData,
        account: Address,
        method: &SigningMethod,
    ) -> Result<Signature, SignerError> {
        let (device_id, path) = ledger_method(method)?;
        let domain_separator = typed_data.domain.separator();
        let struct_hash = typed_data
            .hash_struct()
            .context("failed to hash typed data message")?;
        let hash = typed_data
            .eip712_signing_hash()
            .context("failed to hash typed data")?;
        let signature = self
            .transport
            .sign_typed_data(device_id, path, domain_separator, struct_hash)
            .await?;

        let signer = signature
            .recover_address_from_prehash(&hash)
            .context("device returned an invalid typed data signature")?;
        if signer != account {
            return Err(anyhow!("device signed with {signer} instead of {account}").into());
        }

        Ok(signature)
    }

    async fn sign_message(&self, account: Address, message: &[u8]) -> Result<Signature, SignerError> {
        let path = self.path(account)?;
        Ok(self
            .transport
            .sign_message(&self.device_id, &path, Bytes::copy_from_slice(message))
            .await?)
    }
}

/// A transport talking to a device bridge process over JSON RPC.
pub struct LedgerBridge {
    remote: Remote,
}

impl LedgerBridge {
    pub fn new(url: Url) -> Result<Self, InvalidScheme> {
        Ok(Self {
            remote: Remote::new(url)?,
        })
    }

    pub fn url(&self) -> &Url {
        self.remote.url()
    }
}

/// Extracts the device status word the bridge attaches to error data.
fn status(err: &jsonrpc::Error) -> Option<u16> {
    err.data
        .as_ref()?
        .get("statusCode")
        .and_then(Value::as_u64)
        .and_then(|status| u16::try_from(status).ok())
}

impl From<RemoteError> for TransportError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Rpc(err) => match status(&err) {
                Some(status) => Self::Status(status),
                None => Self::Other(err.into()),
            },
            err => Self::Other(err.into()),
        }
    }
}

fn signature(raw: Bytes) -> Result<Signature, TransportError> {
    Ok(Signature::try_from(&raw[..]).context("device returned a malformed signature")?)
}

#[async_trait]
impl LedgerTransport for LedgerBridge {
    async fn derive_address(&self, device_id: &str, path: &str) -> Result<Address, TransportError> {
        Ok(self
            .remote
            .execute(
                ledger::DeriveAddress,
                (device_id.to_owned(), path.to_owned()),
            )
            .await?)
    }

    async fn sign_transaction(
        &self,
        device_id: &str,
        path: &str,
        payload: Bytes,
    ) -> Result<Signature, TransportError> {
        let raw = self
            .remote
            .execute(
                ledger::SignTransaction,
                (device_id.to_owned(), path.to_owned(), payload),
            )
            .await?;
        signature(raw)
    }

    async fn sign_typed_data(
        &self,
        device_id: &str,
        path: &str,
        domain_separator: B256,
        struct_hash: B256,
    ) -> Result<Signature, TransportError> {
        let raw = self
            .remote
            .execute(
                ledger::SignEip712HashedMessage,
                (device_id.to_owned(), path.to_owned(), domain_separator, struct_hash),
            )
            .await?;
        signature(raw)
    }

    async fn sign_message(
        &self,
        device_id: &str,
        path: &str,
        message: Bytes,
    ) -> Result<Signature, TransportError> {
        let raw = self
            .remote
            .execute(
                ledger::SignPersonalMessage,
                (device_id.to_owned(), path.to_owned(), message),
            )
            .await?;
        signature(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        node::transaction::TransactionRequest,
        signer::CONDITIONS_OF_USE_NOT_SATISFIED,
        testing::{self, MNEMONIC},
    };
    use alloy_primitives::{address, keccak256};
    use alloy_signer::SignerSync as _;
    use alloy_signer_local::{coins_bip39::English, MnemonicBuilder, PrivateKeySigner};
    use parking_lot::Mutex;
    use serde_json::json;

    const PATH: &str = "m/44'/60'/0'/0/0";
    const ACCOUNT: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

    /// A device that signs with keys derived from the test mnemonic, or
    /// answers every signing request with a fixed status word.
    #[derive(Default)]
    struct Device {
        status: Option<u16>,
        payloads: Mutex<Vec<Bytes>>,
    }

    impl Device {
        fn declining() -> Self {
            Self {
                status: Some(CONDITIONS_OF_USE_NOT_SATISFIED),
                ..Default::default()
            }
        }

        fn key(&self, path: &str) -> Result<PrivateKeySigner, TransportError> {
            if let Some(status) = self.status {
                return Err(TransportError::Status(status));
            }
            Ok(MnemonicBuilder::<English>::default()
                .phrase(MNEMONIC)
                .derivation_path(path)
                .and_then(|builder| builder.build())
                .context("bad path")?)
        }
    }

    #[async_trait]
    impl LedgerTransport for Device {
        async fn derive_address(&self, _: &str, path: &str) -> Result<Address, TransportError> {
            Ok(MnemonicBuilder::<English>::default()
                .phrase(MNEMONIC)
                .derivation_path(path)
                .and_then(|builder| builder.build())
                .context("bad path")?
                .address())
        }

        async fn sign_transaction(
            &self,
            _: &str,
            path: &str,
            payload: Bytes,
        ) -> Result<Signature, TransportError> {
            let key = self.key(path)?;
            self.payloads.lock().push(payload.clone());
            Ok(key.sign_hash_sync(&keccak256(&payload)).unwrap())
        }

        async fn sign_typed_data(
            &self,
            _: &str,
            path: &str,
            domain_separator: B256,
            struct_hash: B256,
        ) -> Result<Signature, TransportError> {
            let key = self.key(path)?;
            let mut buf = vec![0x19, 0x01];
            buf.extend_from_slice(domain_separator.as_slice());
            buf.extend_from_slice(struct_hash.as_slice());
            Ok(key.sign_hash_sync(&keccak256(buf)).unwrap())
        }

        async fn sign_message(
            &self,
            _: &str,
            path: &str,
            message: Bytes,
        ) -> Result<Signature, TransportError> {
            let key = self.key(path)?;
            Ok(key.sign_message_sync(&message).unwrap())
        }
    }

    fn method(path: &str) -> SigningMethod {
        SigningMethod::Ledger {
            device_id: "nano".to_owned(),
            path: path.to_owned(),
        }
    }

    fn transaction() -> NoncedTransactionRequest {
        let request = TransactionRequest::new(
            serde_json::from_value(json!({
                "from": ACCOUNT,
                "to": "0x70997970C51812dc3A010C7d01b50e0d17dc79C8",
                "gas": "0x5208",
                "maxFeePerGas": "0x2",
                "maxPriorityFeePerGas": "0x1",
            }))
            .unwrap(),
            testing::network(),
        )
        .unwrap();
        NoncedTransactionRequest::new(request, 0)
    }

    #[tokio::test]
    async fn signs_transactions_with_signing_payload() {
        let ledger = Ledger::new(Device::default(), "nano");
        let nonced = transaction();

        let signed = ledger.sign_transaction(&nonced, &method(PATH)).await.unwrap();
        assert_eq!(signed.from, ACCOUNT);

        let payloads = ledger.transport.payloads.lock();
        let expected = nonced.to_eip1559().unwrap().encoded_for_signing();
        assert_eq!(payloads.as_slice(), [Bytes::from(expected)]);
    }

    #[tokio::test]
    async fn rejects_signatures_from_other_accounts() {
        let ledger = Ledger::new(Device::default(), "nano");
        assert!(matches!(
            ledger
                .sign_transaction(&transaction(), &method("m/44'/60'/0'/0/1"))
                .await,
            Err(SignerError::Other(_)),
        ));
    }

    #[tokio::test]
    async fn signs_hashed_typed_data() {
        let ledger = Ledger::new(Device::default(), "nano");
        let typed_data =
            serde_json::from_value::<TypedData>(testing::mail(Some(json!(1)))).unwrap();

        let signature = ledger
            .sign_typed_data(&typed_data, ACCOUNT, &method(PATH))
            .await
            .unwrap();
        let hash = typed_data.eip712_signing_hash().unwrap();
        assert_eq!(
            signature.recover_address_from_prehash(&hash).unwrap(),
            ACCOUNT
        );
    }

    #[tokio::test]
    async fn rejects_typed_data_signed_by_other_accounts() {
        let ledger = Ledger::new(Device::default(), "nano");
        let typed_data =
            serde_json::from_value::<TypedData>(testing::mail(Some(json!(1)))).unwrap();
        assert!(matches!(
            ledger
                .sign_typed_data(&typed_data, ACCOUNT, &method("m/44'/60'/0'/0/1"))
                .await,
            Err(SignerError::Other(_)),
        ));
    }

    #[tokio::test]
    async fn messages_need_derived_accounts() {
        let ledger = Ledger::new(Device::default(), "nano");
        assert!(matches!(
            ledger.sign_message(ACCOUNT, b"hello").await,
            Err(SignerError::UnknownAccount(_)),
        ));

        assert_eq!(ledger.derive_address(PATH).await.unwrap(), ACCOUNT);
        let signature = ledger.sign_message(ACCOUNT, b"hello").await.unwrap();
        assert_eq!(
            signature.recover_address_from_msg(b"hello").unwrap(),
            ACCOUNT
        );
    }

    #[tokio::test]
    async fn device_status_is_preserved() {
        let ledger = Ledger::new(Device::declining(), "nano");
        let err = ledger
            .sign_transaction(&transaction(), &method(PATH))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SignerError::DeviceStatus(CONDITIONS_OF_USE_NOT_SATISFIED)
        ));
    }

    #[tokio::test]
    async fn rejects_keyring_methods() {
        let ledger = Ledger::new(Device::default(), "nano");
        assert!(matches!(
            ledger
                .sign_transaction(&transaction(), &SigningMethod::Keyring)
                .await,
            Err(SignerError::MethodMismatch {
                method: SignerKind::Keyring,
                backend: SignerKind::Ledger,
            }),
        ));
    }

    #[test]
    fn bridge_status_codes() {
        let declined = jsonrpc::Error::internal_error().with_data(json!({
            "statusCode": CONDITIONS_OF_USE_NOT_SATISFIED,
        }));
        assert!(matches!(
            TransportError::from(RemoteError::Rpc(declined)),
            TransportError::Status(CONDITIONS_OF_USE_NOT_SATISFIED),
        ));

        let other = jsonrpc::Error::internal_error().with_data("locked");
        assert!(matches!(
            TransportError::from(RemoteError::Rpc(other)),
            TransportError::Other(_),
        ));
    }
}
