//! Notification dispatch: the post-commit side effect of a settlement.
//!
//! RULE: Dispatch happens after the ledger transaction commits and is
//! best-effort. A failing dispatcher is logged by the caller and dropped;
//! it never un-commits a settlement and is never retried.

use crate::{
    model::Outcome,
    types::{Amount, CardId, PaymentId, UserId},
};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

/// Everything the user-facing notifier needs to word a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub payment_id: PaymentId,
    pub user_id: UserId,
    pub card_id: CardId,
    pub card_last4: String,
    pub outcome: Outcome,
    pub amount: Amount,
}

/// Consumer of settlement notifications. Shared across worker threads.
pub trait NotificationDispatcher: Send + Sync {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Writes notifications to the log and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
    fn notify(&self, n: &Notification) -> anyhow::Result<()> {
        log::info!(
            "notify: user={} card=****{} payment={} outcome={} amount={}",
            n.user_id,
            n.card_last4,
            n.payment_id,
            n.outcome.as_str(),
            n.amount
        );
        Ok(())
    }
}

/// Hands notifications to a background consumer over a channel.
///
/// `notify` only fails when the consumer has gone away.
pub struct ChannelDispatcher {
    sender: Sender<Notification>,
}

impl ChannelDispatcher {
    /// A dispatcher plus the receiving end, for callers that drain it themselves.
    pub fn new() -> (Self, Receiver<Notification>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }

    /// A dispatcher whose messages are forwarded to `sink` on a dedicated
    /// worker thread. The worker exits once every dispatcher clone is dropped.
    pub fn spawn_worker<D>(sink: D) -> (Self, JoinHandle<()>)
    where
        D: NotificationDispatcher + 'static,
    {
        let (dispatcher, receiver) = Self::new();
        let handle = thread::spawn(move || {
            for n in receiver {
                if let Err(e) = sink.notify(&n) {
                    log::warn!("notify worker: delivery for payment {} failed: {e}", n.payment_id);
                }
            }
            log::debug!("notify worker: channel closed, exiting");
        });
        (dispatcher, handle)
    }
}

impl Clone for ChannelDispatcher {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl NotificationDispatcher for ChannelDispatcher {
    fn notify(&self, n: &Notification) -> anyhow::Result<()> {
        self.sender
            .send(n.clone())
            .map_err(|_| anyhow::anyhow!("notification channel closed"))
    }
}
