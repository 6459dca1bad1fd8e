//! Events published to subscribers such as the approval UI.

use crate::{node::transaction::SignedTransaction, permission::PermissionRecord};
use alloy_primitives::{Bytes, Signature};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Number of events buffered for slow subscribers before they start lagging.
const CAPACITY: usize = 64;

/// An event emitted by the signing subsystem.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum Event {
    PermissionRequest(PermissionRecord),
    SigningTxResponse(SignatureResult<SignedTransaction>),
    SigningDataResponse(SignatureResult<Bytes>),
    PersonalSigningResponse(SignatureResult<Bytes>),
}

/// Encodes a signature in its 65 byte `r || s || v` form.
pub fn signature_bytes(signature: &Signature) -> Bytes {
    signature.as_bytes().to_vec().into()
}

/// The terminal outcome of a signing attempt.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum SignatureResult<T> {
    #[serde(rename = "success-tx", rename_all = "camelCase")]
    SuccessTx { signed_tx: T },
    #[serde(rename = "success-data", rename_all = "camelCase")]
    SuccessData { signed_data: T },
    #[serde(rename = "error")]
    Error { reason: FailureReason },
}

/// Normalized reason of a failed signing attempt.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureReason {
    UserRejected,
    GenericError,
}

/// A handle for publishing events to every current subscriber.
#[derive(Clone)]
pub struct EventSink {
    sender: broadcast::Sender<Event>,
}

impl EventSink {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CAPACITY);
        Self { sender }
    }

    /// Publishes an event. Events emitted without subscribers are dropped.
    pub fn emit(&self, event: Event) {
        tracing::trace!(?event, "emitting event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}
