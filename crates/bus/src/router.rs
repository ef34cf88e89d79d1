//! Address → inbox routing.
//!
//! Every agent attaches under a unique address and gets a bounded inbox.
//! Senders look the target up at send time, so agents can come and go
//! without the rest of the network noticing.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::message::{Delivery, Envelope};

pub type Address = String;

/// Inbox depth per agent. A full inbox applies backpressure to the sender.
const INBOX_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("no agent attached at address '{0}'")]
    UnknownAddress(Address),

    #[error("inbox closed for address '{0}'")]
    InboxClosed(Address),
}

impl From<BusError> for inquest_core::Error {
    fn from(e: BusError) -> Self {
        inquest_core::Error::Transport(e.to_string())
    }
}

#[derive(Clone, Default)]
pub struct Router {
    inboxes: Arc<RwLock<HashMap<Address, mpsc::Sender<Delivery>>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register an inbox for `address`. Re-attaching replaces the
    /// previous inbox.
    pub async fn attach(&self, address: &str) -> mpsc::Receiver<Delivery> {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.inboxes.write().await.insert(address.to_string(), tx);
        debug!(address, "agent attached");
        rx
    }

    pub async fn detach(&self, address: &str) {
        self.inboxes.write().await.remove(address);
        debug!(address, "agent detached");
    }

    /// Deliver an envelope; waits when the target inbox is full.
    pub async fn send(&self, from: &str, to: &str, envelope: Envelope) -> Result<(), BusError> {
        let tx = self
            .inboxes
            .read()
            .await
            .get(to)
            .cloned()
            .ok_or_else(|| BusError::UnknownAddress(to.to_string()))?;
        tx.send(Delivery {
            from: from.to_string(),
            envelope,
        })
        .await
        .map_err(|_| BusError::InboxClosed(to.to_string()))
    }

    pub async fn is_attached(&self, address: &str) -> bool {
        self.inboxes.read().await.contains_key(address)
    }
}
