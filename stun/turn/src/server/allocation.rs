use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Permissions are valid for 5 minutes (RFC 5766 section 8)
pub(crate) const PERMISSION_LIFETIME: Duration = Duration::from_secs(300);

/// How the server reaches the client's control channel
#[derive(Clone)]
pub(crate) enum ClientLink {
    Udp {
        socket: Arc<UdpSocket>,
        client: SocketAddr,
    },
    Tcp {
        tx: mpsc::UnboundedSender<Vec<u8>>,
    },
}

impl ClientLink {
    /// Stream links pad ChannelData frames to 4 byte alignment
    pub(crate) fn is_stream(&self) -> bool {
        matches!(self, ClientLink::Tcp { .. })
    }

    pub(crate) async fn send(&self, frame: Vec<u8>) {
        match self {
            ClientLink::Udp { socket, client } => {
                if let Err(e) = socket.send_to(&frame, client).await {
                    log::warn!("failed to send to client {client}: {e}");
                }
            }
            ClientLink::Tcp { tx } => {
                // writer task is gone when the control connection closed
                let _ = tx.send(frame);
            }
        }
    }
}

/// The relay leg of an allocation
pub(crate) enum RelayKind {
    /// UDP relay socket, datagrams are forwarded in both directions
    Udp(Arc<UdpSocket>),

    /// TCP relay listener (RFC 6062); individual peer connections are
    /// tracked in [`Allocation::tcp_peers`]
    Tcp,
}

/// One TCP peer connection of a TCP allocation (RFC 6062)
pub(crate) struct TcpPeer {
    pub(crate) id: u32,
    pub(crate) peer: SocketAddr,

    /// Peer socket, taken by the copy task once the client binds
    pub(crate) stream: tokio::sync::Mutex<Option<TcpStream>>,

    /// Latches once the client paired a data connection, never resets
    pub(crate) is_bound: AtomicBool,
}

impl TcpPeer {
    pub(crate) fn new(id: u32, peer: SocketAddr, stream: Option<TcpStream>) -> Self {
        Self {
            id,
            peer,
            stream: tokio::sync::Mutex::new(stream),
            is_bound: AtomicBool::new(false),
        }
    }
}

#[derive(Default)]
struct Channels {
    by_number: HashMap<u16, SocketAddr>,
    by_peer: HashMap<SocketAddr, u16>,
}

/// Server side relay state for a single client
pub(crate) struct Allocation {
    /// The client's observed endpoint, key of the allocation
    pub(crate) client: SocketAddr,

    pub(crate) link: ClientLink,

    /// Address advertised in XOR-RELAYED-ADDRESS
    pub(crate) relay_addr: SocketAddr,

    pub(crate) relay: RelayKind,

    expires_at: Mutex<Instant>,

    /// peer IP -> permission expiry
    permissions: Mutex<HashMap<IpAddr, Instant>>,

    channels: Mutex<Channels>,

    pub(crate) tcp_peers: Mutex<HashMap<u32, Arc<TcpPeer>>>,
    next_connection_id: AtomicU32,

    /// Cancels the relay/accept/copy tasks of this allocation
    pub(crate) cancel: CancellationToken,
}

impl Allocation {
    pub(crate) fn new(
        client: SocketAddr,
        link: ClientLink,
        relay_addr: SocketAddr,
        relay: RelayKind,
        lifetime: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            link,
            relay_addr,
            relay,
            expires_at: Mutex::new(Instant::now() + lifetime),
            permissions: Mutex::new(HashMap::new()),
            channels: Mutex::new(Channels::default()),
            tcp_peers: Mutex::new(HashMap::new()),
            next_connection_id: AtomicU32::new(1),
            cancel,
        }
    }

    pub(crate) fn refresh(&self, lifetime: Duration) {
        *self.expires_at.lock() = Instant::now() + lifetime;
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        now >= *self.expires_at.lock()
    }

    pub(crate) fn add_permission(&self, peer: IpAddr) {
        self.permissions
            .lock()
            .insert(peer, Instant::now() + PERMISSION_LIFETIME);
    }

    pub(crate) fn has_permission(&self, peer: IpAddr) -> bool {
        self.permissions
            .lock()
            .get(&peer)
            .is_some_and(|&expiry| Instant::now() < expiry)
    }

    pub(crate) fn prune_permissions(&self, now: Instant) {
        self.permissions.lock().retain(|_, &mut expiry| now < expiry);
    }

    /// Install or refresh a channel binding. Fails when the number or the
    /// peer is already bound to something else.
    pub(crate) fn bind_channel(&self, number: u16, peer: SocketAddr) -> bool {
        let mut channels = self.channels.lock();

        match (
            channels.by_number.get(&number).copied(),
            channels.by_peer.get(&peer).copied(),
        ) {
            (None, None) => {
                channels.by_number.insert(number, peer);
                channels.by_peer.insert(peer, number);
                true
            }
            // rebinding the same pair refreshes it
            (Some(bound_peer), Some(bound_number)) => {
                bound_peer == peer && bound_number == number
            }
            _ => false,
        }
    }

    pub(crate) fn peer_for_channel(&self, number: u16) -> Option<SocketAddr> {
        self.channels.lock().by_number.get(&number).copied()
    }

    pub(crate) fn channel_for_peer(&self, peer: SocketAddr) -> Option<u16> {
        self.channels.lock().by_peer.get(&peer).copied()
    }

    pub(crate) fn next_connection_id(&self) -> u32 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn find_tcp_peer(&self, connection_id: u32) -> Option<Arc<TcpPeer>> {
        self.tcp_peers.lock().get(&connection_id).cloned()
    }

    pub(crate) fn has_tcp_peer_to(&self, peer: SocketAddr) -> bool {
        self.tcp_peers.lock().values().any(|conn| conn.peer == peer)
    }
}
