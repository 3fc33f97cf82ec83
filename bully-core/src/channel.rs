//! Transport capability consumed by the election engine

use std::time::Duration;

use crate::protocol::{Event, Message, PeerId};

/// Handler invoked once per delivered message.
pub type MessageHandler = Box<dyn Fn(Message) + Send + Sync>;

/// Broadcast transport connecting one peer to the rest of the group.
///
/// Implementations stamp the sender id and protocol version on emit, and
/// filter inbound traffic before it reaches the handler: a peer never sees
/// its own emissions, messages addressed to somebody else, or messages
/// stamped with a different protocol version.
///
/// Delivery is fire-and-forget. There are no acknowledgments and no
/// ordering guarantees beyond per-sender arrival order on well-behaved
/// transports; the election engine tolerates loss, duplication and
/// reordering of individual messages.
pub trait Channel: Send + Sync {
    /// Send `event` to one peer (`Some(id)`) or to everyone else (`None`).
    /// Never blocks; errors are the transport's problem to log.
    fn emit(&self, event: Event, to: Option<PeerId>);

    /// Register `handler` for inbound messages. Messages are delivered
    /// asynchronously, one at a time, in arrival order. Dropping the
    /// returned subscription detaches the handler.
    fn listen(&self, handler: MessageHandler) -> Subscription;

    /// Declared upper bound on one-way delivery time. Election timeouts
    /// are sized from this, so slower transports settle proportionally
    /// slower rather than misfiring.
    fn latency(&self) -> Duration;

    /// Release transport resources. Idempotent; emits after destroy are
    /// silently discarded.
    fn destroy(&self);
}

/// Guard for a [`Channel::listen`] registration. Detaches the handler when
/// dropped or explicitly unsubscribed, whichever comes first.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap the teardown a transport runs when its listener goes away.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Detach now instead of at drop.
    pub fn unsubscribe(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}
