//! Module implementing the signing node.
//!
//! The node answers account and signing methods locally with the signing
//! router and proxies everything else to the remote node.

pub mod method;
pub mod remote;
pub mod transaction;
pub mod typeddata;
pub mod types;

use self::{
    method::eth,
    remote::{Remote, RemoteError},
    transaction::{SignedTransaction, TransactionArgs, TransactionRequest},
    typeddata::TypedData,
};
use crate::{
    events::signature_bytes,
    jsonrpc,
    serialization::message,
    signer::{
        router::{SigningError, SigningRouter},
        SigningMethod,
    },
};
use alloy_primitives::{Address, U64};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

/// Routes JSON RPC calls that passed the permission gate.
#[async_trait]
pub trait RpcRouter: Send + Sync {
    async fn route(&self, method: &str, params: Vec<Value>) -> Result<Value, jsonrpc::Error>;
}

/// The signing node.
pub struct Node {
    signing: SigningRouter,
    remote: Remote,
}

impl Node {
    pub fn new(signing: SigningRouter, remote: Remote) -> Self {
        Self { signing, remote }
    }

    pub fn signing(&self) -> &SigningRouter {
        &self.signing
    }

    fn signing_method(&self, account: Address) -> Result<SigningMethod, SigningError> {
        self.signing
            .signing_method(account)
            .ok_or(SigningError::UntrackedAccount(account))
    }

    async fn sign_transaction(&self, params: Vec<Value>) -> Result<SignedTransaction, jsonrpc::Error> {
        let (args,) = parse::<(TransactionArgs,)>(params, 1)?;
        let mut request = TransactionRequest::new(args, self.signing.network().clone())
            .map_err(|err| jsonrpc::Error::invalid_params().with_data(format!("{err:#}")))?;
        let method = self.signing_method(request.from())?;
        request.fill(&self.remote).await.map_err(|err| {
            tracing::warn!(?err, "failed to fill transaction");
            jsonrpc::Error::internal_error().with_data(format!("{err:#}"))
        })?;

        Ok(self.signing.sign_transaction(request, &method).await?)
    }

    async fn sign_message(&self, account: Address, message: String) -> Result<Value, jsonrpc::Error> {
        let method = self.signing_method(account)?;
        let signature = self
            .signing
            .sign_data(account, &message::decode(&message), &method)
            .await?;
        Ok(json!(signature_bytes(&signature)))
    }

    async fn sign_typed_data(&self, params: Vec<Value>) -> Result<Value, jsonrpc::Error> {
        let (account, typed_data) = parse::<(Address, Value)>(params, 2)?;
        let typed_data = match typed_data {
            Value::String(json) => serde_json::from_str::<TypedData>(&json),
            value => serde_json::from_value::<TypedData>(value),
        }
        .map_err(|err| jsonrpc::Error::invalid_params().with_data(err.to_string()))?;

        let method = self.signing_method(account)?;
        let signature = self
            .signing
            .sign_typed_data(&typed_data, account, &method)
            .await?;
        Ok(json!(signature_bytes(&signature)))
    }

    async fn proxy(&self, method: &str, params: Vec<Value>) -> Result<Value, jsonrpc::Error> {
        self.remote.execute(method, params).await.map_err(|err| match err {
            RemoteError::Rpc(err) => err,
            err => {
                tracing::warn!(%method, %err, "failed to proxy request");
                jsonrpc::Error::internal_error().with_data(err.to_string())
            }
        })
    }
}

#[async_trait]
impl RpcRouter for Node {
    async fn route(&self, method: &str, params: Vec<Value>) -> Result<Value, jsonrpc::Error> {
        match method {
            "eth_accounts" => Ok(json!(self.signing.tracked_accounts())),
            "eth_chainId" => {
                let chain_id = self.signing.network().chain_id().map_err(|err| {
                    jsonrpc::Error::internal_error().with_data(format!("{err:#}"))
                })?;
                Ok(json!(U64::from(chain_id)))
            }
            "eth_signTransaction" => Ok(json!(self.sign_transaction(params).await?)),
            "eth_sendTransaction" => {
                let signed = self.sign_transaction(params).await?;
                let hash = self
                    .remote
                    .execute(eth::SendRawTransaction, (signed.raw.clone(),))
                    .await
                    .map_err(|err| {
                        tracing::warn!(%err, hash = %signed.hash, "failed to send transaction");
                        self.signing.release_nonce(&signed);
                        match err {
                            RemoteError::Rpc(err) => err,
                            err => jsonrpc::Error::internal_error().with_data(err.to_string()),
                        }
                    })?;
                tracing::info!(%hash, "sent transaction");
                Ok(json!(hash))
            }
            "personal_sign" => {
                let (message, account) = parse::<(String, Address)>(params, 2)?;
                self.sign_message(account, message).await
            }
            "eth_sign" => {
                let (account, message) = parse::<(Address, String)>(params, 2)?;
                self.sign_message(account, message).await
            }
            "eth_signTypedData" | "eth_signTypedData_v3" | "eth_signTypedData_v4" => {
                self.sign_typed_data(params).await
            }
            _ => self.proxy(method, params).await,
        }
    }
}

/// Parses positional parameters, ignoring any beyond the expected count.
fn parse<T>(mut params: Vec<Value>, count: usize) -> Result<T, jsonrpc::Error>
where
    T: DeserializeOwned,
{
    params.truncate(count);
    serde_json::from_value(Value::Array(params))
        .map_err(|err| jsonrpc::Error::invalid_params().with_data(err.to_string()))
}

impl From<SigningError> for jsonrpc::Error {
    fn from(err: SigningError) -> Self {
        let error = match &err {
            SigningError::UserRejected(_) => Self::user_rejected(),
            SigningError::UnknownSigner(_) | SigningError::ChainIdMismatch { .. } => {
                Self::invalid_params()
            }
            SigningError::UntrackedAccount(_) => Self::unauthorized(),
            SigningError::UnsupportedOperation { .. } => Self::unsupported_method(),
            SigningError::GenericError(_) | SigningError::Nonce(_) => Self::internal_error(),
        };
        error.with_data(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::EventSink,
        signer::CONDITIONS_OF_USE_NOT_SATISFIED,
        testing::{self, MockNonces, MockSigner},
    };
    use alloy_primitives::Signature;
    use reqwest::Url;

    const ACCOUNT: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    fn node(signer: MockSigner) -> Node {
        node_with(signer, MockNonces::default(), "http://localhost:8545")
    }

    fn node_with(signer: MockSigner, nonces: MockNonces, remote: &str) -> Node {
        let signing = SigningRouter::new(testing::network(), Box::new(nonces), EventSink::new())
            .with_keyring(Box::new(signer));
        signing.add_tracked_address(MockSigner::ADDRESS, SigningMethod::Keyring);

        let remote = Remote::new(Url::parse(remote).unwrap()).unwrap();
        Node::new(signing, remote)
    }

    fn test_signature() -> Value {
        json!(signature_bytes(&Signature::test_signature()))
    }

    #[tokio::test]
    async fn local_methods() {
        let node = node(MockSigner::default());
        assert_eq!(
            node.route("eth_accounts", vec![]).await.unwrap(),
            json!([MockSigner::ADDRESS]),
        );
        assert_eq!(node.route("eth_chainId", vec![]).await.unwrap(), json!("0x1"));
    }

    #[tokio::test]
    async fn message_parameter_order() {
        let signer = MockSigner::default();
        let node = node(signer.clone());
        assert_eq!(
            node.route("personal_sign", vec![json!("0x68656c6c6f"), json!(ACCOUNT)])
                .await
                .unwrap(),
            test_signature(),
        );
        assert_eq!(
            node.route("eth_sign", vec![json!(ACCOUNT), json!("hello")])
                .await
                .unwrap(),
            test_signature(),
        );
        // MetaMask style password parameter is ignored.
        assert!(node
            .route(
                "personal_sign",
                vec![json!("hello"), json!(ACCOUNT), json!("password")]
            )
            .await
            .is_ok());
        assert_eq!(signer.calls(), 3);

        assert_eq!(
            node.route("eth_sign", vec![json!("hello"), json!(ACCOUNT)])
                .await
                .unwrap_err()
                .code,
            -32602,
        );
    }

    #[tokio::test]
    async fn typed_data_as_object_or_string() {
        let node = node(MockSigner::default());
        let typed_data = testing::mail(Some(json!(1)));

        assert_eq!(
            node.route("eth_signTypedData_v4", vec![json!(ACCOUNT), typed_data.clone()])
                .await
                .unwrap(),
            test_signature(),
        );
        assert_eq!(
            node.route(
                "eth_signTypedData_v3",
                vec![json!(ACCOUNT), json!(typed_data.to_string())]
            )
            .await
            .unwrap(),
            test_signature(),
        );

        let err = node
            .route(
                "eth_signTypedData",
                vec![json!(ACCOUNT), testing::mail(Some(json!("0x5")))],
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, -32602);
    }

    #[tokio::test]
    async fn signs_transactions() {
        let node = node(MockSigner::default());
        let signed = node
            .route(
                "eth_signTransaction",
                vec![json!({
                    "from": ACCOUNT,
                    "to": "0x70997970C51812dc3A010C7d01b50e0d17dc79C8",
                    "gas": "0x5208",
                    "gasPrice": "0x1",
                })],
            )
            .await
            .unwrap();
        assert_eq!(signed["nonce"], json!("0x0"));
        assert!(signed["raw"].as_str().unwrap().starts_with("0x02"));
    }

    #[tokio::test]
    async fn unsent_transactions_release_their_nonce() {
        let nonces = MockNonces::default();
        // Nothing listens on port 1, so the broadcast fails after signing.
        let node = node_with(MockSigner::default(), nonces.clone(), "http://127.0.0.1:1");
        let err = node
            .route(
                "eth_sendTransaction",
                vec![json!({
                    "from": ACCOUNT,
                    "to": "0x70997970C51812dc3A010C7d01b50e0d17dc79C8",
                    "gas": "0x5208",
                    "gasPrice": "0x1",
                })],
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, -32603);
        assert_eq!(nonces.populated(), 1);
        assert_eq!(nonces.released(), vec![0]);
    }

    #[tokio::test]
    async fn signing_errors() {
        let node = node(MockSigner::status(CONDITIONS_OF_USE_NOT_SATISFIED));
        let err = node
            .route("personal_sign", vec![json!("hello"), json!(ACCOUNT)])
            .await
            .unwrap_err();
        assert_eq!(err.code, 4001);

        let untracked = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
        let err = node
            .route("personal_sign", vec![json!("hello"), json!(untracked)])
            .await
            .unwrap_err();
        assert_eq!(err.code, 4100);

        let err = node
            .route("eth_signTransaction", vec![json!({ "from": ACCOUNT, "bogus": 1 })])
            .await
            .unwrap_err();
        assert_eq!(err.code, -32602);
    }

    #[test]
    fn signing_error_codes() {
        let code = |err: SigningError| jsonrpc::Error::from(err).code;
        assert_eq!(
            code(SigningError::UnknownSigner(crate::signer::SignerKind::Ledger)),
            -32602
        );
        assert_eq!(
            code(SigningError::UnsupportedOperation {
                operation: "account removal",
                kind: crate::signer::SignerKind::Ledger,
            }),
            4200
        );
        assert_eq!(
            code(SigningError::Nonce(anyhow::anyhow!("unavailable"))),
            -32603
        );
    }
}
