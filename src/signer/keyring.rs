//! The software keyring holding accounts derived from a BIP-39 mnemonic.

use super::{SignerError, SignerKind, Signing, SigningMethod};
use crate::node::{
    transaction::{NoncedTransactionRequest, SignedTransaction},
    typeddata::TypedData,
};
use alloy_consensus::SignableTransaction as _;
use alloy_primitives::{Address, Signature};
use alloy_signer::SignerSync as _;
use alloy_signer_local::{coins_bip39::English, MnemonicBuilder, PrivateKeySigner};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// A collection of accounts derived from a mnemonic that can perform Ethereum
/// ECDSA operations.
pub struct Keyring {
    mnemonic: MnemonicBuilder<English>,
    accounts: RwLock<Accounts>,
}

#[derive(Default)]
struct Accounts {
    signers: HashMap<Address, PrivateKeySigner>,
    hidden: HashSet<Address>,
}

impl Keyring {
    /// Creates a new keyring from a mnemonic, deriving private keys for the
    /// specified number of accounts.
    pub fn new(mnemonic: &str, password: &str, count: u32) -> Result<Self> {
        let keyring = Self {
            mnemonic: MnemonicBuilder::<English>::default()
                .phrase(mnemonic)
                .password(password),
            accounts: Default::default(),
        };
        for index in 0..count {
            keyring.derive(index)?;
        }
        Ok(keyring)
    }

    /// Returns the visible accounts of the keyring, sorted by address.
    pub fn accounts(&self) -> Vec<Address> {
        let accounts = self.accounts.read();
        let mut addresses = accounts
            .signers
            .keys()
            .filter(|address| !accounts.hidden.contains(*address))
            .copied()
            .collect::<Vec<_>>();
        addresses.sort();
        addresses
    }

    /// Derives the account at the specified index of the default Ethereum
    /// derivation path. Deriving a hidden account makes it visible again.
    fn derive(&self, index: u32) -> Result<Address> {
        let signer = self
            .mnemonic
            .clone()
            .index(index)
            .and_then(|builder| builder.build())
            .with_context(|| format!("key derivation error for index {index}"))?;
        let address = signer.address();

        let mut accounts = self.accounts.write();
        accounts.hidden.remove(&address);
        accounts.signers.insert(address, signer);
        Ok(address)
    }

    fn signer(&self, account: Address) -> Result<PrivateKeySigner, SignerError> {
        let accounts = self.accounts.read();
        match accounts.signers.get(&account) {
            Some(signer) if !accounts.hidden.contains(&account) => Ok(signer.clone()),
            _ => Err(SignerError::UnknownAccount(account)),
        }
    }
}

fn ensure_keyring(method: &SigningMethod) -> Result<(), SignerError> {
    match method.kind() {
        SignerKind::Keyring => Ok(()),
        other => Err(SignerError::MethodMismatch {
            method: other,
            backend: SignerKind::Keyring,
        }),
    }
}

#[async_trait]
impl Signing for Keyring {
    async fn derive_address(&self, account_id: &str) -> Result<Address, SignerError> {
        let index = account_id
            .parse::<u32>()
            .with_context(|| format!("invalid keyring account index '{account_id}'"))?;
        Ok(self.derive(index)?)
    }

    async fn sign_transaction(
        &self,
        transaction: &NoncedTransactionRequest,
        method: &SigningMethod,
    ) -> Result<SignedTransaction, SignerError> {
        ensure_keyring(method)?;
        let signer = self.signer(transaction.from())?;
        let tx = transaction.to_eip1559()?;
        let signature = signer
            .sign_hash_sync(&tx.signature_hash())
            .context("failed to sign transaction")?;
        Ok(SignedTransaction::new(
            transaction.from(),
            tx.into_signed(signature),
        ))
    }

    async fn sign_typed_data(
        &self,
        typed_data: &TypedData,
        account: Address,
        method: &SigningMethod,
    ) -> Result<Signature, SignerError> {
        ensure_keyring(method)?;
        let signature = self
            .signer(account)?
            .sign_dynamic_typed_data_sync(typed_data)
            .context("failed to sign typed data")?;
        Ok(signature)
    }

    async fn sign_message(&self, account: Address, message: &[u8]) -> Result<Signature, SignerError> {
        let signature = self
            .signer(account)?
            .sign_message_sync(message)
            .context("failed to sign message")?;
        Ok(signature)
    }

    fn hide_account(&self, account: Address) -> Result<(), SignerError> {
        let mut accounts = self.accounts.write();
        if !accounts.signers.contains_key(&account) {
            return Err(SignerError::UnknownAccount(account));
        }
        accounts.hidden.insert(account);
        Ok(())
    }
}
