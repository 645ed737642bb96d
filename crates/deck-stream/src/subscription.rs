use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::engine::Registry;
use crate::error::StreamError;
use crate::event::ChangeEvent;

/// State shared between a subscription, its handles and the registry.
#[derive(Debug)]
pub(crate) struct SubscriberState {
    pub(crate) id: u64,
    pub(crate) lagged: AtomicBool,
    closed: watch::Sender<bool>,
}

impl SubscriberState {
    pub(crate) fn new(id: u64) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id,
            lagged: AtomicBool::new(false),
            closed,
        }
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// Closes a subscription from anywhere, and waits for it to close.
#[derive(Clone, Debug)]
pub struct SubscriptionHandle {
    state: Arc<SubscriberState>,
    registry: Weak<Registry>,
}

impl SubscriptionHandle {
    /// Stop delivery. Safe to call any number of times.
    pub fn close(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.state.id);
        }
        if !self.state.is_closed() {
            debug!(subscriber = self.state.id, "subscription closed");
        }
        self.state.mark_closed();
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Resolves once the subscription is closed, by `close` or by lagging.
    pub async fn closed(&self) {
        let mut rx = self.state.closed.subscribe();
        // The sender lives in `self.state`, so this cannot fail.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// A live change subscription.
///
/// Dropping the subscription closes it.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::Receiver<ChangeEvent>,
    handle: SubscriptionHandle,
    finished: bool,
}

impl Subscription {
    pub(crate) fn new(
        receiver: mpsc::Receiver<ChangeEvent>,
        state: Arc<SubscriberState>,
        registry: Weak<Registry>,
    ) -> Self {
        Self {
            receiver,
            handle: SubscriptionHandle { state, registry },
            finished: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.handle.state.id
    }

    /// Next event. Returns `Some(Err(StreamError::Lagged))` once if the
    /// subscriber fell behind, then `None` when the subscription is closed.
    pub async fn recv(&mut self) -> Option<Result<ChangeEvent, StreamError>> {
        if self.finished {
            return None;
        }
        match self.receiver.recv().await {
            Some(event) => Some(Ok(event)),
            None => {
                self.finished = true;
                self.handle.state.mark_closed();
                if self.handle.state.lagged.swap(false, Ordering::AcqRel) {
                    Some(Err(StreamError::Lagged))
                } else {
                    None
                }
            }
        }
    }

    /// Stop delivery. Events already queued are discarded.
    pub fn close(&mut self) {
        self.handle.close();
        self.receiver.close();
        self.finished = true;
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    pub async fn closed(&self) {
        self.handle.closed().await
    }

    /// A cloneable handle that can close this subscription from another task.
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.close();
    }
}
