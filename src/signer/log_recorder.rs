//! A signer that just logs all signing operations.

use super::{SignerError, Signing, SigningMethod};
use crate::{
    events::signature_bytes,
    node::{
        transaction::{NoncedTransactionRequest, SignedTransaction},
        typeddata::TypedData,
    },
    serialization::message,
};
use alloy_primitives::{Address, Signature};
use async_trait::async_trait;

/// Wrapping signer that logs all signing operations to the global logger.
pub struct LogRecorder<S>(pub S);

#[async_trait]
impl<S> Signing for LogRecorder<S>
where
    S: Signing,
{
    async fn derive_address(&self, account_id: &str) -> Result<Address, SignerError> {
        let account = self.0.derive_address(account_id).await?;
        tracing::debug!(%account, %account_id, "derived account");
        Ok(account)
    }

    async fn sign_transaction(
        &self,
        transaction: &NoncedTransactionRequest,
        method: &SigningMethod,
    ) -> Result<SignedTransaction, SignerError> {
        let signed = self.0.sign_transaction(transaction, method).await?;
        tracing::info!(
            account = %signed.from,
            ?transaction,
            hash = %signed.hash,
            "signed transaction"
        );
        Ok(signed)
    }

    async fn sign_typed_data(
        &self,
        typed_data: &TypedData,
        account: Address,
        method: &SigningMethod,
    ) -> Result<Signature, SignerError> {
        let signature = self.0.sign_typed_data(typed_data, account, method).await?;
        tracing::info!(
            %account,
            ?typed_data,
            signature = %signature_bytes(&signature),
            "signed typed data"
        );
        Ok(signature)
    }

    async fn sign_message(&self, account: Address, message: &[u8]) -> Result<Signature, SignerError> {
        let signature = self.0.sign_message(account, message).await?;
        let message = message::encode(message);
        tracing::info!(
            %account,
            %message,
            signature = %signature_bytes(&signature),
            "signed message"
        );
        Ok(signature)
    }

    fn hide_account(&self, account: Address) -> Result<(), SignerError> {
        self.0.hide_account(account)?;
        tracing::info!(%account, "hid account");
        Ok(())
    }
}
