//! In-process broadcast hub
//!
//! Connects any number of peers inside one process and applies the
//! transport filtering rules centrally, which makes it both the reference
//! transport for tests and a usable same-process bus. Delivery is
//! asynchronous: every subscriber owns an unbounded queue drained by its
//! own task, so handlers never run inside `emit` and peers are free to
//! emit from within their handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::channel::{Channel, MessageHandler, Subscription};
use crate::protocol::{Event, Message, PeerId, PROTOCOL_VERSION};

/// Default declared latency for in-process delivery.
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(50);

struct Subscriber {
    peer: PeerId,
    version: String,
    queue: mpsc::UnboundedSender<Message>,
}

struct HubState {
    subscribers: HashMap<u64, Subscriber>,
    /// Emissions still to be swallowed by [`MemoryHub::drop_next`].
    drop_next: usize,
}

/// Shared bus all [`MemoryChannel`]s of one group hang off.
pub struct MemoryHub {
    latency: Duration,
    next_token: AtomicU64,
    state: Mutex<HubState>,
}

impl MemoryHub {
    /// Create a hub whose channels declare the given latency bound.
    pub fn new(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            next_token: AtomicU64::new(0),
            state: Mutex::new(HubState {
                subscribers: HashMap::new(),
                drop_next: 0,
            }),
        })
    }

    /// Hub with the default latency bound.
    pub fn with_default_latency() -> Arc<Self> {
        Self::new(DEFAULT_LATENCY)
    }

    /// Create a channel for `peer` speaking the current protocol version.
    pub fn channel(self: &Arc<Self>, peer: impl Into<PeerId>) -> MemoryChannel {
        self.channel_with_version(peer, PROTOCOL_VERSION)
    }

    /// Create a channel speaking an arbitrary protocol version. Lets tests
    /// put a mismatched speaker on the bus.
    pub fn channel_with_version(
        self: &Arc<Self>,
        peer: impl Into<PeerId>,
        version: impl Into<String>,
    ) -> MemoryChannel {
        MemoryChannel {
            hub: self.clone(),
            peer: peer.into(),
            version: version.into(),
        }
    }

    /// Silently swallow the next `count` emissions (loss injection).
    pub fn drop_next(&self, count: usize) {
        self.state.lock().drop_next += count;
    }

    /// Number of attached listeners.
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    fn dispatch(&self, msg: Message) {
        let mut state = self.state.lock();
        if state.drop_next > 0 {
            state.drop_next -= 1;
            debug!("Hub: dropping {:?} from {}", msg.event, msg.from);
            return;
        }
        for sub in state.subscribers.values() {
            if sub.peer == msg.from {
                // a peer never hears its own emissions
                continue;
            }
            if msg.to.as_ref().is_some_and(|to| to != &sub.peer) {
                continue;
            }
            if sub.version != msg.version {
                debug!(
                    "Hub: not delivering {:?} to {} (version {} != {})",
                    msg.event, sub.peer, msg.version, sub.version
                );
                continue;
            }
            // receiver gone mid-dispatch is fine, the entry is removed on detach
            let _ = sub.queue.send(msg.clone());
        }
    }

    fn attach(&self, subscriber: Subscriber) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.state.lock().subscribers.insert(token, subscriber);
        token
    }

    fn detach(&self, token: u64) {
        self.state.lock().subscribers.remove(&token);
    }
}

/// One peer's handle onto a [`MemoryHub`].
pub struct MemoryChannel {
    hub: Arc<MemoryHub>,
    peer: PeerId,
    version: String,
}

impl Channel for MemoryChannel {
    fn emit(&self, event: Event, to: Option<PeerId>) {
        debug!("Hub: {} emits {:?} (to {:?})", self.peer, event, to);
        self.hub.dispatch(Message {
            from: self.peer.clone(),
            to,
            event,
            version: self.version.clone(),
        });
    }

    /// Spawns the drain task for this listener; must run inside a tokio
    /// runtime. Closing the subscription ends the task once its queue is
    /// empty.
    fn listen(&self, handler: MessageHandler) -> Subscription {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = self.hub.attach(Subscriber {
            peer: self.peer.clone(),
            version: self.version.clone(),
            queue: tx,
        });
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                handler(msg);
            }
        });

        let hub = self.hub.clone();
        Subscription::new(move || hub.detach(token))
    }

    fn latency(&self) -> Duration {
        self.hub.latency
    }

    fn destroy(&self) {
        // nothing held beyond subscriptions, which carry their own teardown
    }
}
