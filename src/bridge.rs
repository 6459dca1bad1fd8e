//! The bridge between untrusted dApp requests and the internal RPC router.

use crate::{
    jsonrpc::{self, Id, Params},
    node::RpcRouter,
    permission::{PermissionGate, PermissionState},
    serialization,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Methods that require the origin to have been granted access.
const SIGNING_METHODS: &[&str] = &[
    "eth_sendTransaction",
    "eth_signTransaction",
    "eth_sign",
    "personal_sign",
    "eth_signTypedData",
    "eth_signTypedData_v3",
    "eth_signTypedData_v4",
];

/// The page a request originates from.
#[derive(Clone, Debug)]
pub struct Caller {
    pub origin: String,
    pub favicon_url: Option<String>,
}

/// A request sent by a dApp.
#[derive(Debug, Deserialize, Serialize)]
pub struct PortRequest {
    pub id: Id,
    pub method: String,
    #[serde(default)]
    pub params: Option<Params>,
}

/// The response to a dApp request, correlated by its ID.
#[derive(Debug, Deserialize, Serialize)]
pub struct PortResponse {
    pub id: Id,
    #[serde(flatten, with = "serialization::result")]
    pub result: Result<Value, jsonrpc::Error>,
}

/// Gates dApp requests on their origin's permission before routing them.
pub struct RequestBridge {
    gate: Arc<PermissionGate>,
    router: Arc<dyn RpcRouter>,
}

impl RequestBridge {
    pub fn new(gate: Arc<PermissionGate>, router: Arc<dyn RpcRouter>) -> Self {
        Self { gate, router }
    }

    /// Handles a single dApp request.
    pub async fn handle(&self, caller: &Caller, request: PortRequest) -> PortResponse {
        let PortRequest { id, method, params } = request;
        let params = params.map(Params::into_positional).unwrap_or_default();
        tracing::debug!(origin = %caller.origin, %method, ?id, "dApp request");

        let result = self.dispatch(caller, &method, params).await;
        if let Err(err) = &result {
            tracing::debug!(origin = %caller.origin, %method, code = err.code, %err, "dApp request failed");
        }
        PortResponse { id, result }
    }

    async fn dispatch(
        &self,
        caller: &Caller,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value, jsonrpc::Error> {
        if method == "eth_requestAccounts" {
            let state = self
                .gate
                .request_accounts(&caller.origin, caller.favicon_url.clone())
                .await
                .map_err(internal_error)?;
            return match state {
                PermissionState::Allow => self.router.route("eth_accounts", params).await,
                PermissionState::Deny | PermissionState::Request => {
                    Err(jsonrpc::Error::user_rejected())
                }
            };
        }

        let allowed = self
            .gate
            .check_permission(&caller.origin)
            .await
            .map_err(internal_error)?;
        match method {
            "eth_accounts" if !allowed => Ok(json!([])),
            method if !allowed && SIGNING_METHODS.contains(&method) => {
                Err(jsonrpc::Error::unauthorized())
            }
            method => self.router.route(method, params).await,
        }
    }
}

fn internal_error(err: anyhow::Error) -> jsonrpc::Error {
    tracing::error!(?err, "permission gate failure");
    jsonrpc::Error::internal_error()
}
