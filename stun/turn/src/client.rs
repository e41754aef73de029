//! TURN client.
//!
//! Acquires a relay endpoint from a TURN server over UDP, keeps the
//! allocation and its permissions refreshed and shuffles application
//! payload between the local socket and remote peers.

use crate::error::TurnError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stun_types::attr::{
    long_term_key, ChannelNumber, Data, ErrorCode, Lifetime, MessageIntegrity,
    MessageIntegrityKey, Nonce, Realm, RequestedTransport, Username, XorMappedAddress,
    XorPeerAddress, XorRelayedAddress,
};
use stun_types::{
    ChannelData, Class, FrameKind, Message, MessageWriter, StunMethod, TransactionId, CHANNEL_MIN,
};
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Retransmit attempts per request before giving up
const MAX_REQUESTS: u32 = 6;

/// 401 answers tolerated before the server is abandoned
const MAX_ERRORS: u32 = 5;

/// Permissions are re-issued on this period, safely under the server's
/// 300 second permission lifetime
const PERMISSION_REFRESH: Duration = Duration::from_secs(240);

/// The allocation is refreshed this long before it expires
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct TurnClientConfig {
    /// TURN server as `host:port`
    pub server: String,

    pub username: String,
    pub password: String,

    /// Bound on DNS resolution of the server name
    pub resolve_timeout: Duration,

    /// LIFETIME requested on Allocate and Refresh
    pub lifetime: Duration,
}

impl Default for TurnClientConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            username: String::new(),
            password: String::new(),
            resolve_timeout: Duration::from_secs(5),
            lifetime: Duration::from_secs(600),
        }
    }
}

/// Traffic and lifecycle notifications of a [`TurnClient`]
#[derive(Debug)]
pub enum TurnEvent {
    /// Payload from a peer, unwrapped from a Data indication or a
    /// ChannelData frame
    Data { peer: SocketAddr, data: Vec<u8> },

    /// The allocation could not be refreshed and is gone
    AllocationExpired,
}

#[derive(Clone)]
struct Auth {
    realm: String,
    nonce: Vec<u8>,
}

#[derive(Default)]
struct ChannelMaps {
    by_peer: HashMap<SocketAddr, u16>,
    by_number: HashMap<u16, SocketAddr>,
}

struct Inner {
    config: TurnClientConfig,
    socket: Arc<UdpSocket>,
    server: SocketAddr,

    auth: Mutex<Option<Auth>>,

    relayed: Mutex<Option<SocketAddr>>,
    mapped: Mutex<Option<SocketAddr>>,

    pending: Mutex<HashMap<TransactionId, oneshot::Sender<Message>>>,

    /// Peer IPs whose permissions we keep alive
    peers: Mutex<Vec<IpAddr>>,

    channels: Mutex<ChannelMaps>,
    next_channel: AtomicU16,

    events: mpsc::UnboundedSender<TurnEvent>,

    cancel: CancellationToken,
}

/// A live TURN allocation on a server
pub struct TurnClient {
    inner: Arc<Inner>,
    events: mpsc::UnboundedReceiver<TurnEvent>,
}

impl TurnClient {
    /// Resolve the server, run the Allocate handshake and spawn the
    /// background tasks keeping the allocation alive.
    #[tracing::instrument(level = "debug", skip(config), fields(server = %config.server))]
    pub async fn allocate(config: TurnClientConfig) -> Result<Self, TurnError> {
        let server = resolve(&config.server, config.resolve_timeout).await?;

        let socket = Arc::new(UdpSocket::bind(unspecified_of(server)).await?);

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            config,
            socket,
            server,
            auth: Mutex::new(None),
            relayed: Mutex::new(None),
            mapped: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            peers: Mutex::new(Vec::new()),
            channels: Mutex::new(ChannelMaps::default()),
            next_channel: AtomicU16::new(CHANNEL_MIN),
            events: events_tx,
            cancel: CancellationToken::new(),
        });

        tokio::spawn(recv_loop(inner.clone()));

        let client = Self {
            inner,
            events: events_rx,
        };

        let lifetime = client.do_allocate().await?;

        tokio::spawn(refresh_loop(client.inner.clone(), lifetime));
        tokio::spawn(permission_loop(client.inner.clone()));

        Ok(client)
    }

    /// The relay address peers can send to
    pub fn relayed_addr(&self) -> Option<SocketAddr> {
        *self.inner.relayed.lock()
    }

    /// Our own endpoint as the server saw it
    pub fn mapped_addr(&self) -> Option<SocketAddr> {
        *self.inner.mapped.lock()
    }

    /// Allow `peers` to exchange data with the relay. Permissions are
    /// re-issued periodically until the client is dropped.
    pub async fn create_permission(&self, peers: &[IpAddr]) -> Result<(), TurnError> {
        {
            let mut known = self.inner.peers.lock();

            for peer in peers {
                if !known.contains(peer) {
                    known.push(*peer);
                }
            }
        }

        self.inner.send_create_permission(peers).await
    }

    /// Bind a channel to `peer` for compact framing
    pub async fn bind_channel(&self, peer: SocketAddr) -> Result<u16, TurnError> {
        if let Some(number) = self.inner.channels.lock().by_peer.get(&peer) {
            return Ok(*number);
        }

        let number = self.inner.next_channel.fetch_add(1, Ordering::Relaxed);

        self.inner
            .authed_request(StunMethod::ChannelBind, |w| {
                w.add_attr(ChannelNumber(number)).unwrap();
                w.add_attr(XorPeerAddress(peer)).unwrap();
            })
            .await?;

        let mut channels = self.inner.channels.lock();
        channels.by_peer.insert(peer, number);
        channels.by_number.insert(number, peer);

        Ok(number)
    }

    /// Send application payload to `peer` through the relay
    pub async fn send_to(&self, peer: SocketAddr, data: &[u8]) -> Result<(), TurnError> {
        let bound = self.inner.channels.lock().by_peer.get(&peer).copied();

        let frame = match bound {
            Some(number) => ChannelData { number, data }.encode(false),
            None => {
                let mut writer = MessageWriter::new(
                    Class::Indication,
                    StunMethod::Send,
                    TransactionId::random(),
                );

                writer.add_attr(XorPeerAddress(peer)).unwrap();
                writer.add_attr(Data::new(data)).unwrap();

                writer.finish()
            }
        };

        self.inner.socket.send_to(&frame, self.inner.server).await?;

        Ok(())
    }

    /// Extend the allocation. Returns the granted lifetime.
    pub async fn refresh(&self, lifetime: Duration) -> Result<Duration, TurnError> {
        self.inner.refresh(lifetime).await
    }

    /// Release the allocation (`Refresh` with lifetime 0) and stop the
    /// background tasks.
    pub async fn release(&self) -> Result<(), TurnError> {
        let result = self.inner.refresh(Duration::ZERO).await;

        self.inner.cancel.cancel();

        result.map(|_| ())
    }

    /// Next inbound payload or lifecycle notification
    pub async fn next_event(&mut self) -> Option<TurnEvent> {
        self.events.recv().await
    }

    async fn do_allocate(&self) -> Result<Duration, TurnError> {
        let mut msg = self
            .inner
            .authed_request(StunMethod::Allocate, |w| {
                w.add_attr(RequestedTransport {
                    protocol_number: RequestedTransport::UDP,
                })
                .unwrap();
            })
            .await?;

        let relayed = match msg.attribute::<XorRelayedAddress>() {
            Some(Ok(relayed)) => relayed.0,
            _ => return Err(TurnError::Stun(stun_types::Error::InvalidData(
                "allocate response lacks XOR-RELAYED-ADDRESS",
            ))),
        };

        let mapped = match msg.attribute::<XorMappedAddress>() {
            Some(Ok(mapped)) => Some(mapped.0),
            _ => None,
        };

        let lifetime = match msg.attribute::<Lifetime>() {
            Some(Ok(lifetime)) => Duration::from_secs(u64::from(lifetime.0)),
            _ => self.inner.config.lifetime,
        };

        log::info!(
            "allocated relay {relayed} on {} (lifetime {}s)",
            self.inner.server,
            lifetime.as_secs()
        );

        *self.inner.relayed.lock() = Some(relayed);
        *self.inner.mapped.lock() = mapped;

        Ok(lifetime)
    }
}

impl Drop for TurnClient {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl Inner {
    /// One request with the retransmit schedule applied
    async fn request(&self, bytes: Vec<u8>, tsx_id: TransactionId) -> Result<Message, TurnError> {
        struct Unregister<'i>(&'i Inner, TransactionId);

        impl Drop for Unregister<'_> {
            fn drop(&mut self) {
                self.0.pending.lock().remove(&self.1);
            }
        }

        let (tx, mut rx) = oneshot::channel();
        self.pending.lock().insert(tsx_id, tx);

        let _unregister = Unregister(self, tsx_id);

        let mut delta = Duration::from_millis(500);

        for _ in 0..MAX_REQUESTS {
            self.socket.send_to(&bytes, self.server).await?;

            match timeout(delta, &mut rx).await {
                Ok(Ok(msg)) => return Ok(msg),
                Ok(Err(_)) => break,
                Err(_) => delta *= 2,
            }
        }

        Err(TurnError::Timeout)
    }

    /// Send a request under the long-term credential, absorbing 401
    /// challenges up to [`MAX_ERRORS`] times.
    async fn authed_request(
        &self,
        method: StunMethod,
        attrs: impl Fn(&mut MessageWriter),
    ) -> Result<Message, TurnError> {
        let mut errors = 0;

        loop {
            let auth = self.auth.lock().clone();

            let tsx_id = TransactionId::random();
            let mut writer = MessageWriter::new(Class::Request, method, tsx_id);

            attrs(&mut writer);

            if let Some(auth) = &auth {
                let key = long_term_key(&self.config.username, &auth.realm, &self.config.password);

                writer.add_attr(Username::new(&self.config.username)).unwrap();
                writer.add_attr(Realm::new(&auth.realm)).unwrap();
                writer.add_attr(Nonce::new(&auth.nonce)).unwrap();
                writer
                    .add_attr_with(MessageIntegrity, MessageIntegrityKey::new(&key))
                    .unwrap();
            }

            let mut msg = self.request(writer.finish(), tsx_id).await?;

            match msg.class() {
                Class::Success => return Ok(msg),
                Class::Error => {
                    let code = match msg.attribute::<ErrorCode>() {
                        Some(Ok(error)) => error.number,
                        _ => 0,
                    };

                    if code != 401 {
                        return Err(TurnError::Allocation(code));
                    }

                    errors += 1;

                    if errors >= MAX_ERRORS {
                        return Err(TurnError::Auth);
                    }

                    let realm = match msg.attribute::<Realm>() {
                        Some(Ok(realm)) => realm.0.to_owned(),
                        _ => return Err(TurnError::Auth),
                    };

                    let nonce = match msg.attribute::<Nonce>() {
                        Some(Ok(nonce)) => nonce.0.to_vec(),
                        _ => return Err(TurnError::Auth),
                    };

                    *self.auth.lock() = Some(Auth { realm, nonce });
                }
                _ => {
                    log::warn!("unexpected {:?} answering a request", msg.class());
                    return Err(TurnError::Timeout);
                }
            }
        }
    }

    async fn refresh(&self, lifetime: Duration) -> Result<Duration, TurnError> {
        let mut msg = self
            .authed_request(StunMethod::Refresh, |w| {
                w.add_attr(Lifetime(lifetime.as_secs() as u32)).unwrap();
            })
            .await?;

        let granted = match msg.attribute::<Lifetime>() {
            Some(Ok(granted)) => Duration::from_secs(u64::from(granted.0)),
            _ => lifetime,
        };

        Ok(granted)
    }

    async fn send_create_permission(&self, peers: &[IpAddr]) -> Result<(), TurnError> {
        if peers.is_empty() {
            return Ok(());
        }

        self.authed_request(StunMethod::CreatePermission, |w| {
            for peer in peers {
                // only the IP is significant for permissions
                w.add_attr(XorPeerAddress(SocketAddr::new(*peer, 0))).unwrap();
            }
        })
        .await?;

        Ok(())
    }
}

async fn resolve(server: &str, bound: Duration) -> Result<SocketAddr, TurnError> {
    let resolved = timeout(bound, lookup_host(server))
        .await
        .map_err(|_| TurnError::Resolve)?
        .map_err(|_| TurnError::Resolve)?;

    resolved.into_iter().next().ok_or(TurnError::Resolve)
}

fn unspecified_of(addr: SocketAddr) -> SocketAddr {
    if addr.is_ipv4() {
        "0.0.0.0:0".parse().unwrap()
    } else {
        "[::]:0".parse().unwrap()
    }
}

/// Demultiplex traffic from the server: request answers go to their
/// waiting transaction, Data indications and ChannelData frames surface
/// as [`TurnEvent::Data`].
async fn recv_loop(inner: Arc<Inner>) {
    let mut buf = vec![0u8; 65535];

    loop {
        let (len, from) = tokio::select! {
            _ = inner.cancel.cancelled() => return,
            result = inner.socket.recv_from(&mut buf) => match result {
                Ok(received) => received,
                Err(e) => {
                    log::warn!("turn client socket broke: {e}");
                    return;
                }
            },
        };

        if from != inner.server {
            continue;
        }

        let datagram = &buf[..len];

        match FrameKind::of(datagram) {
            FrameKind::Stun => {
                let Ok(mut msg) = Message::parse(datagram.to_vec()) else {
                    continue;
                };

                if let Some(waiter) = inner.pending.lock().remove(&msg.transaction_id()) {
                    let _ = waiter.send(msg);
                    continue;
                }

                if msg.class() == Class::Indication && msg.method() == StunMethod::Data {
                    let peer = match msg.attribute::<XorPeerAddress>() {
                        Some(Ok(peer)) => peer.0,
                        _ => continue,
                    };

                    let data = match msg.attribute::<Data>() {
                        Some(Ok(data)) => data.0.to_vec(),
                        _ => continue,
                    };

                    let _ = inner.events.send(TurnEvent::Data { peer, data });
                }
            }
            FrameKind::ChannelData => {
                let Ok(channel_data) = ChannelData::parse(datagram) else {
                    continue;
                };

                let peer = inner
                    .channels
                    .lock()
                    .by_number
                    .get(&channel_data.number)
                    .copied();

                if let Some(peer) = peer {
                    let _ = inner.events.send(TurnEvent::Data {
                        peer,
                        data: channel_data.data.to_vec(),
                    });
                }
            }
            FrameKind::Unknown => {}
        }
    }
}

/// Keep the allocation alive, refreshing ahead of expiry
async fn refresh_loop(inner: Arc<Inner>, mut lifetime: Duration) {
    loop {
        let wait = lifetime.saturating_sub(REFRESH_MARGIN).max(Duration::from_secs(1));

        tokio::select! {
            _ = inner.cancel.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        match inner.refresh(inner.config.lifetime).await {
            Ok(granted) => {
                log::debug!("allocation refreshed for {}s", granted.as_secs());
                lifetime = granted;
            }
            Err(e) => {
                log::warn!("allocation refresh failed: {e}");
                let _ = inner.events.send(TurnEvent::AllocationExpired);
                return;
            }
        }
    }
}

/// Re-issue permissions under the server's 300 second lifetime
async fn permission_loop(inner: Arc<Inner>) {
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => return,
            _ = tokio::time::sleep(PERMISSION_REFRESH) => {}
        }

        let peers = inner.peers.lock().clone();

        if let Err(e) = inner.send_create_permission(&peers).await {
            log::warn!("permission refresh failed: {e}");
        }
    }
}
