//! Module for JSON RPC types.

use reqwest::Url;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};
use std::fmt::{self, Display, Formatter};

/// JSON RPC client.
pub struct Client {
    http: reqwest::Client,
    url: Url,
}

impl Client {
    /// Creates a new client for the given URL.
    pub fn new(url: Url) -> Result<Self, InvalidScheme> {
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(InvalidScheme(Some(other.to_owned()))),
        }

        Ok(Self {
            http: reqwest::Client::new(),
            url,
        })
    }

    /// Returns the URL the client is connected to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Executes a JSON RPC request.
    pub async fn execute(&self, request: Request) -> Result<Response, ClientError> {
        let response = self
            .http
            .post(self.url.clone())
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Invalid URL scheme.
#[derive(Debug)]
pub struct InvalidScheme(pub Option<String>);

impl Display for InvalidScheme {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match &self.0 {
            Some(s) => write!(f, "invalid scheme {s}"),
            None => f.write_str("missing scheme"),
        }
    }
}

impl std::error::Error for InvalidScheme {}

/// JSON RPC client error.
#[derive(Debug)]
pub enum ClientError {
    /// An error occured while performing an HTTP request.
    Http(reqwest::Error),

    /// An error occured serializing or deserializing JSON RPC data.
    Json(serde_json::Error),
}

impl Display for ClientError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Http(err) => write!(f, "HTTP error: {err}"),
            Self::Json(err) => write!(f, "JSON error: {err}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

/// JSON RPC version.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub enum JsonRpc {
    #[serde(rename = "2.0")]
    V2,
}

/// JSON RPC message identifier.
///
/// From JSON RPC 2.0:
/// > An identifier established by the Client that MUST contain a String,
/// > Number, or NULL value if included. If it is not included it is assumed to
/// > be a notification. The value SHOULD normally not be Null and Numbers
/// > SHOULD NOT contain fractional parts
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Id {
    String(String),
    Number(Number),
    Null,
}

/// JSON RPC params.
///
/// From JSON RPC 2.0:
/// > If present, parameters for the rpc call MUST be provided as a structured
/// > value. Either by-position through an Array or by-name through an Object.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Params {
    Array(Vec<Value>),
    Object(Map<String, Value>),
}

impl Params {
    /// Returns positional parameters. Ethereum JSON RPC methods MUST use
    /// array parameters, so by-name parameters are promoted to an array with
    /// a single entry.
    pub fn into_positional(self) -> Vec<Value> {
        match self {
            Params::Array(array) => array,
            Params::Object(object) => vec![Value::Object(object)],
        }
    }
}

/// JSON RPC request.
#[derive(Debug, Deserialize, Serialize)]
pub struct Request {
    pub jsonrpc: JsonRpc,
    pub method: String,
    pub params: Option<Params>,
    pub id: Id,
}

/// JSON RPC response.
#[derive(Debug)]
pub struct Response {
    pub result: Result<Value, Error>,
    pub id: Id,
}

impl<'de> Deserialize<'de> for Response {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Res {
            #[allow(dead_code)]
            jsonrpc: JsonRpc,
            #[serde(default, deserialize_with = "present")]
            result: Option<Value>,
            error: Option<Error>,
            id: Id,
        }

        let res = Res::deserialize(deserializer)?;
        let result = match (res.result, res.error) {
            (Some(result), None) => Ok(result),
            (None, Some(error)) => Err(error),
            (Some(_), Some(_)) => return Err(de::Error::custom("both result and error specified")),
            (None, None) => return Err(de::Error::custom("missing result or error")),
        };
        Ok(Response { result, id: res.id })
    }
}

/// A `null` result is a valid result, so a present `result` field is always
/// `Some`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// JSON RPC error.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Error {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Error {
    /// Creates an error with a custom message.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Creates an error indicating parameters were invalid.
    pub fn invalid_params() -> Error {
        Self::new(-32602, "Invalid params")
    }

    /// Creates an error indicating an internal server error was encountered.
    pub fn internal_error() -> Error {
        Self::new(-32603, "Internal error")
    }

    /// EIP-1193 error for a request the user rejected.
    pub fn user_rejected() -> Error {
        Self::new(4001, "User rejected the request.")
    }

    /// EIP-1193 error for a method or account the origin is not authorized
    /// for.
    pub fn unauthorized() -> Error {
        Self::new(
            4100,
            "The requested method and/or account has not been authorized by the user.",
        )
    }

    /// EIP-1193 error for a method the wallet does not support.
    pub fn unsupported_method() -> Error {
        Self::new(4200, "The Provider does not support the requested method.")
    }

    /// Attaches a human readable reason to the error.
    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Error {}
