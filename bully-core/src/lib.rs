//! Bully leader election over broadcast channels
//!
//! Peers sharing a latency-bounded broadcast channel agree on a single
//! leader without any coordinator: the lexicographically greatest peer id
//! wins every contest it takes part in. The engine tolerates loss,
//! duplication and reordering of individual messages, and re-elects when
//! the leader steps down.
//!
//! [`Bully`] is the engine, one instance per peer. It talks through any
//! [`Channel`]: [`MemoryHub`] connects peers inside one process,
//! [`UdpChannel`] connects one process per host over LAN broadcast.

pub mod channel;
pub mod election;
pub mod memory;
pub mod protocol;
pub mod udp;

pub use channel::{Channel, MessageHandler, Subscription};
pub use election::{Bully, BullyConfig, ChangeListener};
pub use memory::{MemoryChannel, MemoryHub};
pub use protocol::{Event, Leader, Message, PeerId, PROTOCOL_VERSION};
pub use udp::{UdpChannel, UdpConfig, UdpError};
