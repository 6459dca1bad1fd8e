//! A module implementing a JSON RPC client for a remote node.

use super::method::Method;
use crate::jsonrpc::{self, Client, ClientError, Id, InvalidScheme, JsonRpc, Params, Request};
use reqwest::Url;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{
    fmt::{self, Display, Formatter},
    sync::atomic::{AtomicU64, Ordering},
};

/// A remote JSON RPC node.
pub struct Remote {
    client: Client,
    ids: AtomicU64,
}

impl Remote {
    /// Create a new remote node client.
    pub fn new(url: Url) -> Result<Self, InvalidScheme> {
        let client = Client::new(url)?;
        Ok(Self {
            client,
            ids: Default::default(),
        })
    }

    /// Returns the URL of the remote node.
    pub fn url(&self) -> &Url {
        self.client.url()
    }

    /// Executes a typed method call.
    pub async fn execute<M>(&self, method: M, params: M::Params) -> Result<M::Result, RemoteError>
    where
        M: Method,
        M::Params: Serialize,
        M::Result: DeserializeOwned,
    {
        let params = match serde_json::to_value(params)? {
            Value::Array(array) => Params::Array(array),
            // Methods without parameters serialize to a unit.
            Value::Null => Params::Array(vec![]),
            // Automatically promote single values to arrays with one entry. We
            // can do this for Ethereum JSON RPC requests since they MUST use
            // array parameters.
            value => Params::Array(vec![value]),
        };

        let id = Id::Number(self.ids.fetch_add(1, Ordering::Relaxed).into());
        let request = Request {
            jsonrpc: JsonRpc::V2,
            method: method.into_name(),
            params: Some(params),
            id: id.clone(),
        };

        let response = self.client.execute(request).await?;
        if response.id != id {
            tracing::warn!(expected = ?id, actual = ?response.id, "mismatched response ID");
        }
        let result = serde_json::from_value(response.result?)?;

        Ok(result)
    }
}

/// An error executing a JSON RPC request with a remote node.
#[derive(Debug)]
pub enum RemoteError {
    /// An error occured during JSON serialization of method parameters or
    /// result.
    Json(serde_json::Error),

    /// An error occured in the underlying JSON RPC client.
    Client(ClientError),

    /// A JSON RPC error occured while processing the request.
    Rpc(jsonrpc::Error),
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Json(err) => write!(f, "JSON serialization error: {err}"),
            Self::Client(err) => write!(f, "client error: {err}"),
            Self::Rpc(err) => write!(f, "remote RPC error: {err}"),
        }
    }
}

impl std::error::Error for RemoteError {}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<ClientError> for RemoteError {
    fn from(err: ClientError) -> Self {
        Self::Client(err)
    }
}

impl From<jsonrpc::Error> for RemoteError {
    fn from(err: jsonrpc::Error) -> Self {
        Self::Rpc(err)
    }
}
