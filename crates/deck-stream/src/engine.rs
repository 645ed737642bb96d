use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use deck_links::{evaluate, GraphSource};
use deck_schema::{compile, CompiledQuery, Schema};
use deck_types::{ChangeKind, RowChange};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::StreamResult;
use crate::event::ChangeEvent;
use crate::subscription::{SubscriberState, Subscription};

/// Configuration for the [`ChangeStreamEngine`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Events buffered per subscriber before it is considered lagging.
    pub subscriber_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 1024,
        }
    }
}

struct Subscriber {
    query: CompiledQuery,
    sender: mpsc::Sender<ChangeEvent>,
    state: Arc<SubscriberState>,
}

/// Registered subscribers of one engine.
#[derive(Default)]
pub(crate) struct Registry {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl Registry {
    fn add(&self, subscriber: Subscriber) {
        self.subscribers
            .write()
            .expect("registry lock poisoned")
            .push(subscriber);
    }

    pub(crate) fn remove(&self, id: u64) {
        self.subscribers
            .write()
            .expect("registry lock poisoned")
            .retain(|sub| sub.state.id != id);
    }

    fn len(&self) -> usize {
        self.subscribers.read().expect("registry lock poisoned").len()
    }

    /// Deliver one row change to every subscriber it concerns. Subscribers
    /// whose receiver is gone are pruned; subscribers whose buffer is full
    /// are flagged as lagged and dropped.
    fn dispatch(&self, change: &RowChange, graph: &dyn GraphSource) {
        let mut subs = self.subscribers.write().expect("registry lock poisoned");
        subs.retain(|sub| {
            let Some(event) = event_for(&sub.query, change, graph) else {
                return !sub.sender.is_closed();
            };
            match sub.sender.try_send(event) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscriber = sub.state.id, "subscriber lagged, closing");
                    sub.state.lagged.store(true, Ordering::Release);
                    sub.state.mark_closed();
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

/// Decide which event, if any, `change` produces for a subscriber.
fn event_for(
    query: &CompiledQuery,
    change: &RowChange,
    graph: &dyn GraphSource,
) -> Option<ChangeEvent> {
    let no_options = BTreeMap::new();
    let after = evaluate(graph, query, &change.after, &no_options)?;
    let before = change
        .before
        .as_ref()
        .and_then(|before| evaluate(graph, query, before, &no_options));
    let kind = match &before {
        None => ChangeKind::Insert,
        Some(before) if *before == after => return None,
        Some(_) => ChangeKind::Update,
    };
    Some(ChangeEvent {
        kind,
        id: change.after.id,
        before,
        after,
    })
}

/// Fans the backend's change feed out to schema-filtered subscriptions.
///
/// The engine holds one receiver of the shared feed no matter how many
/// subscriptions exist. The receiver is created on the first `subscribe`,
/// so changes published before that are not replayed.
pub struct ChangeStreamEngine {
    changes: broadcast::Sender<RowChange>,
    graph: Arc<dyn GraphSource>,
    registry: Arc<Registry>,
    pump: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
    config: StreamConfig,
}

impl ChangeStreamEngine {
    pub fn new(
        changes: broadcast::Sender<RowChange>,
        graph: Arc<dyn GraphSource>,
        config: StreamConfig,
    ) -> Self {
        Self {
            changes,
            graph,
            registry: Arc::new(Registry::default()),
            pump: Mutex::new(None),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    /// Register a subscription for changes matching `schema`.
    ///
    /// Compilation errors are returned here rather than through the
    /// subscription. Must be called within a Tokio runtime.
    pub fn subscribe(&self, schema: &Schema) -> StreamResult<Subscription> {
        let query = compile(schema)?;
        self.ensure_started();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.config.subscriber_capacity.max(1));
        let state = Arc::new(SubscriberState::new(id));
        self.registry.add(Subscriber {
            query,
            sender,
            state: Arc::clone(&state),
        });
        debug!(subscriber = id, "subscription registered");
        Ok(Subscription::new(receiver, state, Arc::downgrade(&self.registry)))
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    fn ensure_started(&self) {
        let mut pump = self.pump.lock().expect("pump lock poisoned");
        if pump.is_some() {
            return;
        }
        // Subscribe before spawning so no change published after this call
        // can be missed.
        let mut feed = self.changes.subscribe();
        let registry = Arc::clone(&self.registry);
        let graph = Arc::clone(&self.graph);
        *pump = Some(tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(change) => registry.dispatch(&change, graph.as_ref()),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "change feed lagged, changes were dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("change feed closed");
        }));
        info!("change stream engine started");
    }
}

impl Drop for ChangeStreamEngine {
    fn drop(&mut self) {
        if let Ok(mut pump) = self.pump.lock() {
            if let Some(task) = pump.take() {
                task.abort();
            }
        }
    }
}
