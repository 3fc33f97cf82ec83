//! UDP broadcast transport
//!
//! Every message rides a broadcast datagram, directed ones included;
//! receivers discard what is not theirs. One process per host: the group
//! shares a port, and the socket is bound without address reuse.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::channel::{Channel, MessageHandler, Subscription};
use crate::protocol::{Event, Message, PeerId, PROTOCOL_VERSION};

/// Default UDP port for election traffic.
pub const DEFAULT_PORT: u16 = 9944;

/// Default declared latency bound for LAN broadcast.
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(200);

/// Upper bound on a serialized message.
const MAX_MESSAGE_SIZE: usize = 1024;

/// Errors from setting up the broadcast socket.
#[derive(Error, Debug)]
pub enum UdpError {
    #[error("failed to bind election socket on port {port}: {source}")]
    Bind { port: u16, source: io::Error },

    #[error("failed to enable broadcast: {0}")]
    Broadcast(#[source] io::Error),
}

/// UDP channel configuration.
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Port shared by the whole election group.
    pub port: u16,
    /// Declared delivery bound used to size election timeouts.
    pub latency: Duration,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            latency: DEFAULT_LATENCY,
        }
    }
}

/// Broadcast channel for one peer on a LAN.
pub struct UdpChannel {
    peer: PeerId,
    version: String,
    latency: Duration,
    socket: Arc<UdpSocket>,
    outbound: mpsc::UnboundedSender<Message>,
    sender_task: JoinHandle<()>,
    destroyed: AtomicBool,
}

impl UdpChannel {
    /// Bind the broadcast socket for `peer` and start the sender task.
    pub async fn bind(peer: impl Into<PeerId>, config: UdpConfig) -> Result<Self, UdpError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
        let socket = UdpSocket::bind(addr).await.map_err(|source| UdpError::Bind {
            port: config.port,
            source,
        })?;
        socket.set_broadcast(true).map_err(UdpError::Broadcast)?;
        let socket = Arc::new(socket);

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let send_socket = socket.clone();
        let broadcast_addr = SocketAddr::from((Ipv4Addr::BROADCAST, config.port));
        let sender_task = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let bytes = match msg.to_bytes() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!("Udp: failed to encode {:?}: {}", msg.event, e);
                        continue;
                    }
                };
                debug!("Udp: sending {:?} (to {:?})", msg.event, msg.to);
                if let Err(e) = send_socket.send_to(&bytes, broadcast_addr).await {
                    warn!("Udp: send failed: {}", e);
                }
            }
        });

        Ok(Self {
            peer: peer.into(),
            version: PROTOCOL_VERSION.to_string(),
            latency: config.latency,
            socket,
            outbound,
            sender_task,
            destroyed: AtomicBool::new(false),
        })
    }

    /// Local address of the bound socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Channel for UdpChannel {
    fn emit(&self, event: Event, to: Option<PeerId>) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        let msg = Message {
            from: self.peer.clone(),
            to,
            event,
            version: self.version.clone(),
        };
        if self.outbound.send(msg).is_err() {
            warn!("Udp: emit after teardown");
        }
    }

    fn listen(&self, handler: MessageHandler) -> Subscription {
        let socket = self.socket.clone();
        let peer = self.peer.clone();
        let version = self.version.clone();
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, src)) => {
                        let msg = match Message::from_bytes(&buf[..len]) {
                            Ok(msg) => msg,
                            Err(e) => {
                                warn!("Udp: unparseable datagram from {}: {}", src, e);
                                continue;
                            }
                        };
                        if msg.from == peer {
                            // our own broadcast looping back
                            continue;
                        }
                        if msg.version != version {
                            debug!(
                                "Udp: dropping {:?} from {} (version {} != {})",
                                msg.event, msg.from, msg.version, version
                            );
                            continue;
                        }
                        if msg.to.as_ref().is_some_and(|to| to != &peer) {
                            continue;
                        }
                        debug!("Udp: received {:?} from {}", msg.event, msg.from);
                        handler(msg);
                    }
                    Err(e) => {
                        error!("Udp: receive error: {}", e);
                    }
                }
            }
        });

        Subscription::new(move || task.abort())
    }

    fn latency(&self) -> Duration {
        self.latency
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.sender_task.abort();
    }
}

impl Drop for UdpChannel {
    fn drop(&mut self) {
        self.destroy();
    }
}
