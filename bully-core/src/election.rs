//! Bully leader election engine
//!
//! One [`Bully`] instance represents a single peer. It reacts to inbound
//! protocol messages, drives two mutually exclusive timeouts, and signals
//! observers whenever its believed leader changes:
//! - campaign: broadcast [`Event::Election`], claim the leadership unless
//!   somebody superior objects within the claim window
//! - on objection: back off long enough for the objector's own campaign to
//!   finish, then contest again
//! - on the leader's death: re-elect immediately
//!
//! Inbound messages and timeout firings serialize on one mutex, so the
//! engine observes every stimulus in a definite order. No operation blocks;
//! timeouts are deadlines watched by a single timer task.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::channel::{Channel, Subscription};
use crate::protocol::{Event, Leader, Message, PeerId};

/// Claim window: a campaigner waits this many channel latencies for a
/// superior peer to object before declaring itself leader. One latency for
/// the call to reach everyone, one for an objection to come back.
pub const CLAIM_TIMEOUT_LATENCIES: u32 = 2;

/// Retry backoff: an objected-to campaigner waits this many channel
/// latencies before contesting again, leaving the objector's own claim
/// window room to complete.
pub const RETRY_TIMEOUT_LATENCIES: u32 = 3;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct BullyConfig {
    /// When true, a sitting leader never concedes, not even to a superior
    /// challenger; it answers every challenge by re-announcing itself.
    /// When false it yields to superior challengers and re-enters the
    /// contest as an ordinary candidate.
    pub totalitarian: bool,
    /// What the engine believes before it first goes live. Starting from
    /// [`Leader::Election`] makes the first [`Bully::become_live`] claim
    /// leadership outright instead of campaigning.
    pub initial_leader: Leader,
}

impl Default for BullyConfig {
    fn default() -> Self {
        Self {
            totalitarian: true,
            initial_leader: Leader::Election,
        }
    }
}

/// One-shot deadline that can be rescheduled or cancelled at any time.
/// Cancelling clears the deadline, so a cancelled timeout can never fire;
/// cancelling when nothing is pending is a no-op.
#[derive(Debug, Default)]
struct Timeout {
    deadline: Option<Instant>,
}

impl Timeout {
    fn schedule(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Consume the deadline if it is due at `now`.
    fn fire_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

type LeaderCallback = Box<dyn Fn(&Leader) + Send + Sync>;

/// Guard for a leader-change callback registered with
/// [`Bully::on_leader_change`]. Dropping it detaches the callback.
pub struct ChangeListener {
    engine: Weak<Inner>,
    token: u64,
}

impl ChangeListener {
    /// Detach now instead of at drop.
    pub fn detach(self) {}
}

impl Drop for ChangeListener {
    fn drop(&mut self) {
        if let Some(inner) = self.engine.upgrade() {
            inner.state.lock().listeners.remove(&self.token);
        }
    }
}

struct State {
    leader: Leader,
    live: bool,
    /// Pending leadership claim. At most one of `lead` and `retry` is ever
    /// scheduled; arming either cancels both first.
    lead: Timeout,
    /// Pending campaign retry after an objection.
    retry: Timeout,
    subscription: Option<Subscription>,
    timer_task: Option<JoinHandle<()>>,
    listeners: HashMap<u64, LeaderCallback>,
    next_listener: u64,
}

struct Inner {
    id: PeerId,
    totalitarian: bool,
    claim_timeout: Duration,
    retry_timeout: Duration,
    channel: Arc<dyn Channel>,
    state: Mutex<State>,
    /// Wakes the timer task whenever a deadline may have moved.
    timer_wakeup: Notify,
}

/// A single peer in the election.
///
/// Construction is inert; the engine neither sends nor receives until
/// [`become_live`](Bully::become_live). Dropping the engine is equivalent
/// to [`destroy`](Bully::destroy).
pub struct Bully {
    inner: Arc<Inner>,
}

impl Bully {
    /// Create an engine for `id` talking over `channel`.
    ///
    /// Timeouts are sized from the channel's declared latency, so one
    /// engine per channel: sharing a channel would also defeat the
    /// self-filtering transports do on the sender id.
    pub fn new(id: impl Into<PeerId>, channel: Arc<dyn Channel>, config: BullyConfig) -> Self {
        let latency = channel.latency();
        Self {
            inner: Arc::new(Inner {
                id: id.into(),
                totalitarian: config.totalitarian,
                claim_timeout: latency * CLAIM_TIMEOUT_LATENCIES,
                retry_timeout: latency * RETRY_TIMEOUT_LATENCIES,
                channel,
                state: Mutex::new(State {
                    leader: config.initial_leader,
                    live: false,
                    lead: Timeout::default(),
                    retry: Timeout::default(),
                    subscription: None,
                    timer_task: None,
                    listeners: HashMap::new(),
                    next_listener: 0,
                }),
                timer_wakeup: Notify::new(),
            }),
        }
    }

    /// This peer's id.
    pub fn id(&self) -> &PeerId {
        &self.inner.id
    }

    /// The leader this peer currently believes in.
    pub fn leader(&self) -> Leader {
        self.inner.state.lock().leader.clone()
    }

    /// True while no leader is known (a contest is in progress).
    pub fn is_electing(&self) -> bool {
        self.inner.state.lock().leader == Leader::Election
    }

    /// True while this peer believes it leads.
    pub fn is_leader(&self) -> bool {
        self.inner.state.lock().leader.is(&self.inner.id)
    }

    /// True between [`become_live`](Bully::become_live) and
    /// [`shutdown`](Bully::shutdown).
    pub fn is_live(&self) -> bool {
        self.inner.state.lock().live
    }

    /// Register `callback` for leader changes. It runs synchronously from
    /// whatever call changed the belief, once per actual change, with the
    /// new value. Keep it light and do not call back into the engine from
    /// inside it. Dropping the returned guard detaches the callback.
    pub fn on_leader_change(
        &self,
        callback: impl Fn(&Leader) + Send + Sync + 'static,
    ) -> ChangeListener {
        let mut state = self.inner.state.lock();
        let token = state.next_listener;
        state.next_listener += 1;
        state.listeners.insert(token, Box::new(callback));
        ChangeListener {
            engine: Arc::downgrade(&self.inner),
            token,
        }
    }

    /// Subscribe to the channel and enter the contest. This is the (re-)
    /// entry point into the group: an engine that believes in nobody claims
    /// the leadership outright, one that believed in somebody (itself
    /// included) campaigns. Calling it while already live re-subscribes and
    /// re-contests.
    ///
    /// Spawns the engine's timer task; must run inside a tokio runtime.
    pub fn become_live(&self) {
        let mut state = self.inner.state.lock();
        state.subscription = None;

        let weak = Arc::downgrade(&self.inner);
        let subscription = self.inner.channel.listen(Box::new(move |msg| {
            if let Some(inner) = weak.upgrade() {
                inner.on_message(&msg);
            }
        }));
        state.subscription = Some(subscription);
        state.live = true;

        if state.timer_task.is_none() {
            let weak = Arc::downgrade(&self.inner);
            state.timer_task = Some(tokio::spawn(run_timeouts(weak)));
        }

        info!("Election: {} is live", self.inner.id);
        if state.leader == Leader::Election {
            self.inner.assert_leadership_locked(&mut state);
        } else {
            self.inner.campaign_locked(&mut state);
        }
        drop(state);
        self.inner.timer_wakeup.notify_one();
    }

    /// Contest the leadership now. No effect unless live.
    pub fn campaign(&self) {
        let mut state = self.inner.state.lock();
        self.inner.campaign_locked(&mut state);
        drop(state);
        self.inner.timer_wakeup.notify_one();
    }

    /// Claim the leadership now, skipping the contest. No effect unless
    /// live.
    pub fn assert_leadership(&self) {
        let mut state = self.inner.state.lock();
        self.inner.assert_leadership_locked(&mut state);
        drop(state);
        self.inner.timer_wakeup.notify_one();
    }

    /// Leave the group: unsubscribe, cancel pending timeouts, forget the
    /// leader and broadcast the departure. After this the engine is silent
    /// until [`become_live`](Bully::become_live) is called again. Safe in
    /// any state; does nothing when already down.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        if !state.live {
            return;
        }
        state.live = false;
        state.subscription = None;
        state.lead.cancel();
        state.retry.cancel();
        if let Some(task) = state.timer_task.take() {
            task.abort();
        }
        self.inner.set_leader_locked(&mut state, Leader::Election);
        self.inner.channel.emit(Event::Dead, None);
        drop(state);
        info!("Election: {} stepped down", self.inner.id);
    }

    /// Shutdown (if live) and release the transport.
    pub fn destroy(&self) {
        self.shutdown();
        self.inner.channel.destroy();
    }

    #[cfg(test)]
    pub(crate) fn handle_message(&self, msg: &Message) {
        self.inner.on_message(msg);
    }
}

impl Drop for Bully {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl Inner {
    /// Every leader assignment funnels through here; listeners fire only
    /// on an actual change.
    fn set_leader_locked(&self, state: &mut State, leader: Leader) {
        if state.leader == leader {
            return;
        }
        debug!("Election: {} now believes in {}", self.id, leader);
        state.leader = leader;
        for callback in state.listeners.values() {
            callback(&state.leader);
        }
    }

    fn cancel_timeouts_locked(&self, state: &mut State) {
        state.lead.cancel();
        state.retry.cancel();
    }

    /// Broadcast the wish to lead, then claim by timeout unless somebody
    /// superior objects within the claim window.
    fn campaign_locked(&self, state: &mut State) {
        if !state.live {
            return;
        }
        self.cancel_timeouts_locked(state);
        self.set_leader_locked(state, Leader::Election);
        info!("Election: {} campaigns", self.id);
        self.channel.emit(Event::Election, None);
        state.lead.schedule(self.claim_timeout);
    }

    /// Declare this peer the leader to everyone.
    fn assert_leadership_locked(&self, state: &mut State) {
        if !state.live {
            return;
        }
        self.cancel_timeouts_locked(state);
        self.set_leader_locked(state, Leader::Peer(self.id.clone()));
        info!("Election: {} leads", self.id);
        self.channel.emit(Event::Leader, None);
    }

    fn on_message(&self, msg: &Message) {
        let mut state = self.state.lock();
        if !state.live {
            // late delivery from a queue drained after shutdown
            return;
        }
        // transports filter addressing already; keep the guard for handlers
        // fed by foreign channel implementations
        if msg.to.as_ref().is_some_and(|to| to != &self.id) {
            return;
        }
        debug!("Election: {} got {:?} from {}", self.id, msg.event, msg.from);

        match msg.event {
            Event::Leader => {
                // whoever announces is the leader, no questions asked
                self.cancel_timeouts_locked(&mut state);
                self.set_leader_locked(&mut state, Leader::Peer(msg.from.clone()));
            }
            Event::Election => {
                let outranked = msg.from < self.id;
                let leading = state.leader.is(&self.id);
                if leading && (outranked || self.totalitarian) {
                    // an incumbent answers challenges by re-announcing
                    self.assert_leadership_locked(&mut state);
                } else if outranked {
                    self.channel.emit(Event::Disagree, Some(msg.from.clone()));
                    if state.leader != Leader::Election {
                        self.campaign_locked(&mut state);
                    }
                } else if leading {
                    // superior challenger and we are not totalitarian:
                    // yield and re-enter the contest as a candidate
                    info!("Election: {} yields to {}", self.id, msg.from);
                    self.campaign_locked(&mut state);
                }
                // otherwise the caller outranks us and we are not leading;
                // its unanswered call wins by timeout
            }
            Event::Disagree => {
                self.cancel_timeouts_locked(&mut state);
                state.retry.schedule(self.retry_timeout);
                debug!("Election: {} backs off", self.id);
            }
            Event::Dead => {
                if state.leader.is(&msg.from) {
                    info!("Election: {} lost its leader {}", self.id, msg.from);
                    self.campaign_locked(&mut state);
                }
            }
        }
        drop(state);
        self.timer_wakeup.notify_one();
    }

    fn next_deadline(&self) -> Option<Instant> {
        let state = self.state.lock();
        match (state.lead.deadline, state.retry.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Fire whichever timeout is due. Deadlines are re-read under the
    /// lock, so anything cancelled while the timer slept simply does not
    /// fire.
    fn fire_due_timeouts(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        if !state.live {
            return;
        }
        if state.lead.fire_due(now) {
            debug!("Election: {} heard no objection", self.id);
            self.assert_leadership_locked(&mut state);
        } else if state.retry.fire_due(now) {
            self.campaign_locked(&mut state);
        }
    }
}

/// Sleeps until the engine's next deadline and fires it; parks while
/// nothing is scheduled. Every engine call that may move a deadline pokes
/// `timer_wakeup`, and [`Notify`] buffers one permit, so a wakeup racing
/// the loop is never lost.
async fn run_timeouts(engine: Weak<Inner>) {
    loop {
        let Some(inner) = engine.upgrade() else { return };
        match inner.next_deadline() {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => inner.fire_due_timeouts(),
                    _ = inner.timer_wakeup.notified() => {}
                }
            }
            None => inner.timer_wakeup.notified().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MessageHandler;
    use crate::protocol::PROTOCOL_VERSION;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::time::sleep;

    /// Channel stub that records emissions and delivers nothing.
    struct RecordingChannel {
        latency: Duration,
        emitted: Mutex<Vec<(Event, Option<PeerId>)>>,
        destroyed: AtomicBool,
    }

    impl RecordingChannel {
        fn new(latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                latency,
                emitted: Mutex::new(Vec::new()),
                destroyed: AtomicBool::new(false),
            })
        }

        fn take(&self) -> Vec<(Event, Option<PeerId>)> {
            std::mem::take(&mut *self.emitted.lock())
        }
    }

    impl Channel for RecordingChannel {
        fn emit(&self, event: Event, to: Option<PeerId>) {
            self.emitted.lock().push((event, to));
        }

        fn listen(&self, _handler: MessageHandler) -> Subscription {
            Subscription::new(|| {})
        }

        fn latency(&self) -> Duration {
            self.latency
        }

        fn destroy(&self) {
            self.destroyed.store(true, Ordering::SeqCst);
        }
    }

    const LATENCY: Duration = Duration::from_millis(100);
    const CLAIM: Duration = Duration::from_millis(200);
    const RETRY: Duration = Duration::from_millis(300);
    const EPSILON: Duration = Duration::from_millis(1);

    fn engine(id: &str, channel: Arc<RecordingChannel>, config: BullyConfig) -> Bully {
        Bully::new(id, channel, config)
    }

    fn broadcast(from: &str, event: Event) -> Message {
        Message {
            from: from.to_string(),
            to: None,
            event,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    fn directed(from: &str, to: &str, event: Event) -> Message {
        Message {
            from: from.to_string(),
            to: Some(to.to_string()),
            event,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    #[tokio::test]
    async fn test_engine_starts_detached() {
        let channel = RecordingChannel::new(LATENCY);
        let node = engine("a", channel.clone(), BullyConfig::default());

        assert_eq!(node.id(), "a");
        assert!(!node.is_live());
        assert!(node.is_electing());
        assert!(channel.take().is_empty());
    }

    #[tokio::test]
    async fn test_lone_peer_claims_leadership_without_campaigning() {
        let channel = RecordingChannel::new(LATENCY);
        let node = engine("a", channel.clone(), BullyConfig::default());

        node.become_live();

        assert!(node.is_live());
        assert!(node.is_leader());
        assert_eq!(node.leader(), Leader::Peer("a".to_string()));
        assert_eq!(channel.take(), vec![(Event::Leader, None)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_becoming_live_again_recontests() {
        let channel = RecordingChannel::new(LATENCY);
        let node = engine("a", channel.clone(), BullyConfig::default());

        node.become_live();
        channel.take();

        node.become_live();
        assert!(node.is_electing());
        assert_eq!(channel.take(), vec![(Event::Election, None)]);

        // nobody objects, so the claim window expires into leadership
        sleep(CLAIM + EPSILON).await;
        assert!(node.is_leader());
        assert_eq!(channel.take(), vec![(Event::Leader, None)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_window_is_two_latencies() {
        let channel = RecordingChannel::new(LATENCY);
        let node = engine("a", channel.clone(), BullyConfig::default());
        node.become_live();
        channel.take();

        node.campaign();
        channel.take();

        sleep(CLAIM - EPSILON).await;
        assert!(node.is_electing());
        assert!(channel.take().is_empty());

        sleep(EPSILON * 2).await;
        assert!(node.is_leader());
        assert_eq!(channel.take(), vec![(Event::Leader, None)]);
    }

    #[tokio::test]
    async fn test_announce_adopted_unconditionally() {
        let channel = RecordingChannel::new(LATENCY);
        let node = engine("b", channel.clone(), BullyConfig::default());
        node.become_live();
        assert!(node.is_leader());
        channel.take();

        // even an inferior announcer takes over
        node.handle_message(&broadcast("a", Event::Leader));

        assert_eq!(node.leader(), Leader::Peer("a".to_string()));
        assert!(!node.is_leader());
        assert!(channel.take().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_announce_notifies_once() {
        let channel = RecordingChannel::new(LATENCY);
        let node = engine("a", channel.clone(), BullyConfig::default());
        node.become_live();

        let changes = Arc::new(Mutex::new(Vec::new()));
        let seen = changes.clone();
        let _watch = node.on_leader_change(move |leader| {
            seen.lock().push(leader.clone());
        });

        node.handle_message(&broadcast("x", Event::Leader));
        node.handle_message(&broadcast("x", Event::Leader));

        assert_eq!(node.leader(), Leader::Peer("x".to_string()));
        assert_eq!(&*changes.lock(), &[Leader::Peer("x".to_string())]);
    }

    #[tokio::test]
    async fn test_objects_to_inferior_campaigner_and_recontests() {
        let channel = RecordingChannel::new(LATENCY);
        let node = engine("b", channel.clone(), BullyConfig::default());
        node.become_live();
        // settle into following somebody else first
        node.handle_message(&broadcast("c", Event::Leader));
        channel.take();

        node.handle_message(&broadcast("a", Event::Election));

        assert!(node.is_electing());
        assert_eq!(
            channel.take(),
            vec![
                (Event::Disagree, Some("a".to_string())),
                (Event::Election, None),
            ]
        );
    }

    #[tokio::test]
    async fn test_objection_is_not_repeated_while_already_contesting() {
        let channel = RecordingChannel::new(LATENCY);
        let node = engine("b", channel.clone(), BullyConfig::default());
        node.become_live();
        node.handle_message(&broadcast("c", Event::Leader));
        channel.take();

        node.handle_message(&broadcast("a", Event::Election));
        channel.take();

        // a second inferior call gets its rebuttal but no fresh campaign
        node.handle_message(&broadcast("a", Event::Election));
        assert_eq!(channel.take(), vec![(Event::Disagree, Some("a".to_string()))]);
    }

    #[tokio::test]
    async fn test_ignores_superior_campaigner_when_following() {
        let channel = RecordingChannel::new(LATENCY);
        let node = engine("a", channel.clone(), BullyConfig::default());
        node.become_live();
        node.handle_message(&broadcast("c", Event::Leader));
        channel.take();

        node.handle_message(&broadcast("b", Event::Election));

        assert_eq!(node.leader(), Leader::Peer("c".to_string()));
        assert!(channel.take().is_empty());
    }

    #[tokio::test]
    async fn test_totalitarian_leader_holds_ground() {
        let channel = RecordingChannel::new(LATENCY);
        let node = engine("a", channel.clone(), BullyConfig::default());
        node.become_live();
        channel.take();

        node.handle_message(&broadcast("z", Event::Election));

        assert!(node.is_leader());
        assert_eq!(channel.take(), vec![(Event::Leader, None)]);
    }

    #[tokio::test]
    async fn test_yielding_leader_concedes_to_superior() {
        let channel = RecordingChannel::new(LATENCY);
        let node = engine(
            "a",
            channel.clone(),
            BullyConfig {
                totalitarian: false,
                ..BullyConfig::default()
            },
        );
        node.become_live();
        channel.take();

        node.handle_message(&broadcast("z", Event::Election));

        assert!(node.is_electing());
        assert_eq!(channel.take(), vec![(Event::Election, None)]);
    }

    #[tokio::test]
    async fn test_yielding_leader_still_bullies_inferiors() {
        let channel = RecordingChannel::new(LATENCY);
        let node = engine(
            "b",
            channel.clone(),
            BullyConfig {
                totalitarian: false,
                ..BullyConfig::default()
            },
        );
        node.become_live();
        channel.take();

        node.handle_message(&broadcast("a", Event::Election));

        assert!(node.is_leader());
        assert_eq!(channel.take(), vec![(Event::Leader, None)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_objection_backs_off_then_recampaigns() {
        let channel = RecordingChannel::new(LATENCY);
        let node = engine("a", channel.clone(), BullyConfig::default());
        node.become_live();
        channel.take();
        node.campaign();
        channel.take();

        node.handle_message(&directed("b", "a", Event::Disagree));

        // the cancelled claim window must not fire
        sleep(CLAIM + EPSILON).await;
        assert!(node.is_electing());
        assert!(channel.take().is_empty());

        // the retry does, one latency later
        sleep(RETRY - CLAIM).await;
        assert!(node.is_electing());
        assert_eq!(channel.take(), vec![(Event::Election, None)]);
    }

    #[tokio::test]
    async fn test_reelects_when_leader_dies() {
        let channel = RecordingChannel::new(LATENCY);
        let node = engine("a", channel.clone(), BullyConfig::default());
        node.become_live();
        node.handle_message(&broadcast("c", Event::Leader));
        channel.take();

        node.handle_message(&broadcast("c", Event::Dead));

        assert!(node.is_electing());
        assert_eq!(channel.take(), vec![(Event::Election, None)]);
    }

    #[tokio::test]
    async fn test_ignores_death_of_non_leader() {
        let channel = RecordingChannel::new(LATENCY);
        let node = engine("a", channel.clone(), BullyConfig::default());
        node.become_live();
        node.handle_message(&broadcast("c", Event::Leader));
        channel.take();

        node.handle_message(&broadcast("x", Event::Dead));

        assert_eq!(node.leader(), Leader::Peer("c".to_string()));
        assert!(channel.take().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_addressed_elsewhere_is_ignored() {
        let channel = RecordingChannel::new(LATENCY);
        let node = engine("a", channel.clone(), BullyConfig::default());
        node.become_live();
        channel.take();

        node.handle_message(&directed("b", "z", Event::Disagree));

        // an absorbed objection would have armed the retry; nothing fires
        sleep(RETRY + EPSILON).await;
        assert!(node.is_leader());
        assert!(channel.take().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_goes_silent() {
        let channel = RecordingChannel::new(LATENCY);
        let node = engine("a", channel.clone(), BullyConfig::default());
        node.become_live();
        node.campaign();
        channel.take();

        node.shutdown();

        assert!(!node.is_live());
        assert!(node.is_electing());
        assert_eq!(channel.take(), vec![(Event::Dead, None)]);

        // dead engines neither campaign nor let stale timeouts fire
        node.campaign();
        node.handle_message(&broadcast("x", Event::Leader));
        sleep(RETRY + EPSILON).await;
        assert!(node.is_electing());
        assert!(channel.take().is_empty());

        node.shutdown();
        assert!(channel.take().is_empty());
    }

    #[tokio::test]
    async fn test_campaign_before_live_is_inert() {
        let channel = RecordingChannel::new(LATENCY);
        let node = engine("a", channel.clone(), BullyConfig::default());

        node.campaign();
        node.assert_leadership();

        assert!(node.is_electing());
        assert!(channel.take().is_empty());
    }

    #[tokio::test]
    async fn test_initial_leader_makes_first_live_campaign() {
        let channel = RecordingChannel::new(LATENCY);
        let node = engine(
            "a",
            channel.clone(),
            BullyConfig {
                initial_leader: Leader::Peer("b".to_string()),
                ..BullyConfig::default()
            },
        );

        node.become_live();

        assert!(node.is_electing());
        assert_eq!(channel.take(), vec![(Event::Election, None)]);
    }

    #[tokio::test]
    async fn test_change_listener_detaches() {
        let channel = RecordingChannel::new(LATENCY);
        let node = engine("a", channel.clone(), BullyConfig::default());
        node.become_live();

        let changes = Arc::new(Mutex::new(Vec::new()));
        let seen = changes.clone();
        let watch = node.on_leader_change(move |leader| {
            seen.lock().push(leader.clone());
        });

        node.handle_message(&broadcast("x", Event::Leader));
        watch.detach();
        node.handle_message(&broadcast("y", Event::Leader));

        assert_eq!(&*changes.lock(), &[Leader::Peer("x".to_string())]);
    }

    #[tokio::test]
    async fn test_destroy_releases_the_channel() {
        let channel = RecordingChannel::new(LATENCY);
        let node = engine("a", channel.clone(), BullyConfig::default());
        node.become_live();

        node.destroy();

        assert!(!node.is_live());
        assert!(channel.destroyed.load(Ordering::SeqCst));
    }
}
