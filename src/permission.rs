//! Per-origin permission gating for dApp requests.
//!
//! An origin has to be granted access by the user before it can see accounts
//! or request signatures. Requests from origins without a decision are queued
//! until the user answers the prompt opened on the approval surface.

pub mod store;

use self::store::PermissionStore;
use crate::events::{Event, EventSink};
use anyhow::{ensure, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tokio::sync::oneshot;

/// The permission state of an origin.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Request,
    Allow,
    Deny,
}

/// The permission record of an origin.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRecord {
    pub origin: String,
    pub favicon_url: Option<String>,
    pub state: PermissionState,
}

/// Where the user is asked to decide on a permission request.
#[async_trait]
pub trait ApprovalSurface: Send + Sync {
    async fn open(&self, record: &PermissionRecord) -> Result<()>;
}

/// An approval surface that points the user to the approval page in the
/// logs. Decisions come back through the permission API.
pub struct Notifier {
    url: String,
}

impl Notifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl ApprovalSurface for Notifier {
    async fn open(&self, record: &PermissionRecord) -> Result<()> {
        tracing::warn!(
            origin = %record.origin,
            url = %self.url,
            "origin is requesting account access; allow or deny it at the approval URL"
        );
        Ok(())
    }
}

/// A prompt waiting for a decision.
struct Pending {
    id: u64,
    record: PermissionRecord,
    waiters: Vec<oneshot::Sender<PermissionState>>,
}

/// The permission gate.
pub struct PermissionGate {
    store: Box<dyn PermissionStore>,
    approval: Box<dyn ApprovalSurface>,
    events: EventSink,
    timeout: Option<Duration>,
    /// Held while reading or writing stored decisions together with the
    /// pending table.
    decisions: tokio::sync::Mutex<()>,
    pending: Mutex<HashMap<String, Pending>>,
    prompts: AtomicU64,
}

impl PermissionGate {
    pub fn new(
        store: Box<dyn PermissionStore>,
        approval: Box<dyn ApprovalSurface>,
        events: EventSink,
    ) -> Self {
        Self {
            store,
            approval,
            events,
            timeout: None,
            decisions: Default::default(),
            pending: Default::default(),
            prompts: Default::default(),
        }
    }

    /// Denies prompts that are not answered within the timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns true if the origin was granted access.
    pub async fn check_permission(&self, origin: &str) -> Result<bool> {
        let record = self.store.get(origin).await?;
        Ok(matches!(
            record,
            Some(PermissionRecord {
                state: PermissionState::Allow,
                ..
            })
        ))
    }

    /// Requests account access for an origin, waiting for the user's
    /// decision if it was not already granted.
    pub async fn request_accounts(
        &self,
        origin: &str,
        favicon_url: Option<String>,
    ) -> Result<PermissionState> {
        let (sender, mut receiver) = oneshot::channel();
        let prompt = {
            let _decisions = self.decisions.lock().await;
            if self.check_permission(origin).await? {
                return Ok(PermissionState::Allow);
            }

            let mut sender = Some(sender);
            if let Some(pending) = self.pending.lock().get_mut(origin) {
                pending.waiters.extend(sender.take());
            }
            match sender {
                Some(sender) => {
                    let record = PermissionRecord {
                        origin: origin.to_owned(),
                        favicon_url,
                        state: PermissionState::Request,
                    };
                    self.store.put(record.clone()).await?;
                    let id = self.prompts.fetch_add(1, Ordering::Relaxed);
                    self.pending.lock().insert(
                        origin.to_owned(),
                        Pending {
                            id,
                            record: record.clone(),
                            waiters: vec![sender],
                        },
                    );
                    Some((id, record))
                }
                None => None,
            }
        };

        if let Some((id, record)) = prompt {
            if let Err(err) = self.prompt(&record).await {
                // Dropping the queue wakes every waiter with a denial. A queue
                // that replaced it after a decision is left alone.
                let mut pending = self.pending.lock();
                if pending.get(origin).is_some_and(|pending| pending.id == id) {
                    pending.remove(origin);
                }
                return Err(err);
            }
        }

        if let Some(timeout) = self.timeout {
            if tokio::time::timeout(timeout, &mut receiver).await.is_err() {
                tracing::info!(%origin, "permission request timed out");
                self.resolve(origin, PermissionState::Deny).await?;
            }
        }
        Ok(receiver.await.unwrap_or(PermissionState::Deny))
    }

    async fn prompt(&self, record: &PermissionRecord) -> Result<()> {
        tracing::debug!(origin = %record.origin, "requesting permission");
        self.events.emit(Event::PermissionRequest(record.clone()));
        self.approval.open(record).await
    }

    /// Resolves every pending request of an origin with a decision.
    ///
    /// Returns false if there was no pending request for the origin.
    pub async fn resolve(&self, origin: &str, decision: PermissionState) -> Result<bool> {
        ensure!(
            decision != PermissionState::Request,
            "permission requests can only be resolved with allow or deny"
        );
        let _decisions = self.decisions.lock().await;
        let Some(pending) = self.pending.lock().remove(origin) else {
            return Ok(false);
        };

        tracing::info!(%origin, ?decision, waiters = pending.waiters.len(), "resolved permission");
        let persisted = self
            .store
            .put(PermissionRecord {
                state: decision,
                ..pending.record
            })
            .await;
        for waiter in pending.waiters {
            let _ = waiter.send(decision);
        }

        persisted.map(|_| true)
    }

    /// Returns the records of origins waiting for a decision.
    pub fn pending_origins(&self) -> Vec<PermissionRecord> {
        let mut records = self
            .pending
            .lock()
            .values()
            .map(|pending| pending.record.clone())
            .collect::<Vec<_>>();
        records.sort_by(|a, b| a.origin.cmp(&b.origin));
        records
    }

    #[cfg(test)]
    pub(crate) fn waiters(&self, origin: &str) -> usize {
        self.pending
            .lock()
            .get(origin)
            .map_or(0, |pending| pending.waiters.len())
    }
}
