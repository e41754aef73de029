//! The TURN server.
//!
//! One task per listener accepts client control traffic (raw UDP
//! datagrams and framed TCP streams), one relay/accept task runs per
//! allocation and a cleanup task retires expired state every 30 seconds.

use crate::config::TurnConfig;
use crate::framing::{read_frame, Frame};
use self::allocation::{Allocation, ClientLink, RelayKind, TcpPeer};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use stun_types::attr::{
    long_term_key, Attr, ChannelNumber, ConnectionId, Data, ErrorCode, Lifetime, MessageIntegrity,
    MessageIntegrityKey, Nonce, Realm, RequestedTransport, Software, Username, XorMappedAddress,
    XorPeerAddress, XorRelayedAddress,
};
use stun_types::{
    ChannelData, Class, FrameKind, Message, MessageWriter, StunMethod, TransactionId, CHANNEL_MAX,
    CHANNEL_MIN,
};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

mod allocation;
mod relay;

const SOFTWARE: &str = "lark-turn";

/// Sweep period for expired allocations and permissions
const CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Dial timeout for RFC 6062 Connect requests
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A running TURN server. Cheap to clone.
#[derive(Clone)]
pub struct TurnServer {
    inner: Arc<Inner>,
}

struct Inner {
    config: TurnConfig,

    /// Long-term credential key, `MD5(username:realm:password)`
    key: Vec<u8>,

    /// Allocations by the client's observed endpoint
    allocations: Mutex<HashMap<SocketAddr, Arc<Allocation>>>,

    /// Outstanding nonces by client endpoint
    nonces: Mutex<HashMap<SocketAddr, Vec<u8>>>,

    udp_addr: Option<SocketAddr>,
    tcp_addr: Option<SocketAddr>,

    shutdown: CancellationToken,
}

impl TurnServer {
    /// Bind the configured listeners and spawn the server tasks
    pub async fn spawn(config: TurnConfig) -> io::Result<Self> {
        let key = long_term_key(&config.username, &config.realm, &config.password);

        let udp = if config.enable_udp {
            Some(Arc::new(
                UdpSocket::bind((config.listen_address, config.port)).await?,
            ))
        } else {
            None
        };

        let tcp = if config.enable_tcp {
            Some(TcpListener::bind((config.listen_address, config.port)).await?)
        } else {
            None
        };

        let server = Self {
            inner: Arc::new(Inner {
                udp_addr: udp.as_ref().map(|s| s.local_addr()).transpose()?,
                tcp_addr: tcp.as_ref().map(|l| l.local_addr()).transpose()?,
                config,
                key,
                allocations: Mutex::new(HashMap::new()),
                nonces: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        };

        if let Some(udp) = udp {
            tokio::spawn(server.clone().udp_loop(udp));
        }

        if let Some(tcp) = tcp {
            tokio::spawn(server.clone().tcp_accept_loop(tcp));
        }

        tokio::spawn(server.clone().cleanup_loop());

        log::info!(
            "turn server listening on udp {:?} / tcp {:?}",
            server.inner.udp_addr,
            server.inner.tcp_addr
        );

        Ok(server)
    }

    /// Local address of the UDP control socket
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.inner.udp_addr
    }

    /// Local address of the TCP control listener
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.inner.tcp_addr
    }

    /// Stop all tasks and drop every allocation
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.allocations.lock().clear();
    }

    pub fn allocation_count(&self) -> usize {
        self.inner.allocations.lock().len()
    }

    // === listeners ===

    async fn udp_loop(self, socket: Arc<UdpSocket>) {
        let mut buf = vec![0u8; 65535];

        loop {
            let (len, client) = tokio::select! {
                _ = self.inner.shutdown.cancelled() => return,
                result = socket.recv_from(&mut buf) => match result {
                    Ok(received) => received,
                    Err(e) => {
                        log::warn!("udp receive error: {e}");
                        continue;
                    }
                },
            };

            let datagram = &buf[..len];

            match FrameKind::of(datagram) {
                FrameKind::Stun => {
                    let link = ClientLink::Udp {
                        socket: socket.clone(),
                        client,
                    };

                    self.handle_stun(datagram.to_vec(), client, link).await;
                }
                FrameKind::ChannelData => {
                    self.handle_client_channel_data(datagram, client).await;
                }
                FrameKind::Unknown => {
                    log::debug!("unclassifiable datagram from {client}, dropping");
                }
            }
        }
    }

    async fn tcp_accept_loop(self, listener: TcpListener) {
        loop {
            let (stream, client) = tokio::select! {
                _ = self.inner.shutdown.cancelled() => return,
                result = listener.accept() => match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        log::warn!("tcp accept error: {e}");
                        continue;
                    }
                },
            };

            tokio::spawn(self.clone().tcp_client(stream, client));
        }
    }

    /// Serve one TCP connection from a client.
    ///
    /// The first message decides what the connection is: a ConnectionBind
    /// turns it into an RFC 6062 data conduit, everything else makes it a
    /// control connection.
    #[tracing::instrument(level = "debug", skip(self, stream))]
    async fn tcp_client(self, mut stream: TcpStream, client: SocketAddr) {
        let first = match read_frame(&mut stream).await {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("client {client} hung up before first frame: {e}");
                return;
            }
        };

        if let Frame::Stun(bytes) = &first {
            let is_connection_bind = Message::parse(bytes.clone())
                .map(|msg| {
                    msg.class() == Class::Request && msg.method() == StunMethod::ConnectionBind
                })
                .unwrap_or(false);

            if is_connection_bind {
                self.serve_data_connection(stream, bytes.clone(), client)
                    .await;
                return;
            }
        }

        // control connection: a writer task owns the write half so relay
        // tasks can push indications while we sit in the read loop
        let (mut read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if write_half.write_all(&frame).await.is_err() {
                    return;
                }
            }
        });

        let link = ClientLink::Tcp { tx };

        let mut next = Some(first);

        loop {
            let frame = match next.take() {
                Some(frame) => frame,
                None => match read_frame(&mut read_half).await {
                    Ok(frame) => frame,
                    Err(_) => break,
                },
            };

            match frame {
                Frame::Stun(bytes) => self.handle_stun(bytes, client, link.clone()).await,
                Frame::ChannelData(frame) => {
                    self.handle_client_channel_data(&frame, client).await
                }
            }
        }

        // tearing down the control connection retires the allocation
        if let Some(allocation) = self.inner.allocations.lock().remove(&client) {
            allocation.cancel.cancel();
            log::debug!("allocation of {client} dropped with its control connection");
        }
    }

    // === dispatch ===

    async fn handle_stun(&self, bytes: Vec<u8>, client: SocketAddr, link: ClientLink) {
        let mut msg = match Message::parse(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                log::debug!("undecodable stun message from {client}: {e}");
                return;
            }
        };

        match (msg.class(), msg.method()) {
            (Class::Request, StunMethod::Binding) => {
                let response = self.success(StunMethod::Binding, msg.transaction_id(), |w| {
                    w.add_attr(XorMappedAddress(client)).unwrap();
                });

                link.send(response).await;
            }
            (Class::Request, StunMethod::Allocate) => self.allocate(&mut msg, client, link).await,
            (Class::Request, StunMethod::Refresh) => self.refresh(&mut msg, client, link).await,
            (Class::Request, StunMethod::CreatePermission) => {
                self.create_permission(&mut msg, client, link).await
            }
            (Class::Request, StunMethod::ChannelBind) => {
                self.channel_bind(&mut msg, client, link).await
            }
            (Class::Indication, StunMethod::Send) => self.send_indication(&mut msg, client).await,
            (Class::Request, StunMethod::Connect) => self.connect(&mut msg, client, link).await,
            (Class::Request, StunMethod::ConnectionBind) => {
                // only valid as the first message of a fresh TCP connection
                let response = self.error(
                    StunMethod::ConnectionBind,
                    msg.transaction_id(),
                    ErrorCode::BAD_REQUEST,
                );

                link.send(response).await;
            }
            (class, method) => {
                log::debug!("ignoring {class:?} {method:?} from {client}");
            }
        }
    }

    // === operations ===

    #[tracing::instrument(level = "debug", skip(self, msg, link))]
    async fn allocate(&self, msg: &mut Message, client: SocketAddr, link: ClientLink) {
        if self.inner.allocations.lock().contains_key(&client) {
            let response = self.error(
                StunMethod::Allocate,
                msg.transaction_id(),
                ErrorCode::ALLOCATION_MISMATCH,
            );

            return link.send(response).await;
        }

        if let Err(response) = self.authenticate(msg, client) {
            return link.send(response).await;
        }

        let transport = match msg.attribute::<RequestedTransport>() {
            Some(Ok(requested)) => requested.protocol_number,
            _ => {
                let response = self.error(
                    StunMethod::Allocate,
                    msg.transaction_id(),
                    ErrorCode::BAD_REQUEST,
                );

                return link.send(response).await;
            }
        };

        let lifetime = self.inner.config.default_lifetime;

        let allocated = match transport {
            RequestedTransport::UDP => self.allocate_udp(client, link.clone(), lifetime).await,
            RequestedTransport::TCP => self.allocate_tcp(client, link.clone(), lifetime).await,
            _ => {
                let response = self.error(
                    StunMethod::Allocate,
                    msg.transaction_id(),
                    ErrorCode::UNSUPPORTED_TRANSPORT_PROTOCOL,
                );

                return link.send(response).await;
            }
        };

        let response = match allocated {
            Ok(relay_addr) => {
                log::info!("allocated {relay_addr} for client {client}");

                self.success(StunMethod::Allocate, msg.transaction_id(), |w| {
                    w.add_attr(XorRelayedAddress(relay_addr)).unwrap();
                    w.add_attr(XorMappedAddress(client)).unwrap();
                    w.add_attr(Lifetime(lifetime.as_secs() as u32)).unwrap();
                })
            }
            Err(e) => {
                log::warn!("failed to set up relay for {client}: {e}");

                self.error(
                    StunMethod::Allocate,
                    msg.transaction_id(),
                    ErrorCode::BAD_REQUEST,
                )
            }
        };

        link.send(response).await;
    }

    async fn allocate_udp(
        &self,
        client: SocketAddr,
        link: ClientLink,
        lifetime: Duration,
    ) -> io::Result<SocketAddr> {
        let relay_socket =
            Arc::new(UdpSocket::bind((self.inner.config.listen_address, 0)).await?);
        let port = relay_socket.local_addr()?.port();
        let relay_addr = SocketAddr::new(self.inner.config.relay_ip(), port);

        let allocation = Arc::new(Allocation::new(
            client,
            link,
            relay_addr,
            RelayKind::Udp(relay_socket.clone()),
            lifetime,
            self.inner.shutdown.child_token(),
        ));

        self.inner.allocations.lock().insert(client, allocation.clone());

        tokio::spawn(relay::udp_relay_loop(allocation, relay_socket));

        Ok(relay_addr)
    }

    async fn allocate_tcp(
        &self,
        client: SocketAddr,
        link: ClientLink,
        lifetime: Duration,
    ) -> io::Result<SocketAddr> {
        let listener = TcpListener::bind((self.inner.config.listen_address, 0)).await?;
        let port = listener.local_addr()?.port();
        let relay_addr = SocketAddr::new(self.inner.config.relay_ip(), port);

        let allocation = Arc::new(Allocation::new(
            client,
            link,
            relay_addr,
            RelayKind::Tcp,
            lifetime,
            self.inner.shutdown.child_token(),
        ));

        self.inner.allocations.lock().insert(client, allocation.clone());

        tokio::spawn(relay::tcp_relay_accept_loop(allocation, listener));

        Ok(relay_addr)
    }

    #[tracing::instrument(level = "debug", skip(self, msg, link))]
    async fn refresh(&self, msg: &mut Message, client: SocketAddr, link: ClientLink) {
        if let Err(response) = self.authenticate(msg, client) {
            return link.send(response).await;
        }

        let Some(allocation) = self.allocation_of(client) else {
            let response = self.error(
                StunMethod::Refresh,
                msg.transaction_id(),
                ErrorCode::ALLOCATION_MISMATCH,
            );

            return link.send(response).await;
        };

        let requested = match msg.attribute::<Lifetime>() {
            Some(Ok(lifetime)) => Duration::from_secs(u64::from(lifetime.0)),
            _ => self.inner.config.default_lifetime,
        };

        let response = if requested.is_zero() {
            log::info!("client {client} released its allocation");
            self.inner.allocations.lock().remove(&client);
            allocation.cancel.cancel();

            self.success(StunMethod::Refresh, msg.transaction_id(), |w| {
                w.add_attr(Lifetime(0)).unwrap();
            })
        } else {
            let granted = requested.min(self.inner.config.max_lifetime);
            allocation.refresh(granted);

            self.success(StunMethod::Refresh, msg.transaction_id(), |w| {
                w.add_attr(Lifetime(granted.as_secs() as u32)).unwrap();
            })
        };

        link.send(response).await;
    }

    #[tracing::instrument(level = "debug", skip(self, msg, link))]
    async fn create_permission(&self, msg: &mut Message, client: SocketAddr, link: ClientLink) {
        if let Err(response) = self.authenticate(msg, client) {
            return link.send(response).await;
        }

        let Some(allocation) = self.allocation_of(client) else {
            let response = self.error(
                StunMethod::CreatePermission,
                msg.transaction_id(),
                ErrorCode::ALLOCATION_MISMATCH,
            );

            return link.send(response).await;
        };

        // the attribute may repeat, only the IP of each peer matters
        let spans = msg.attribute_spans(XorPeerAddress::TYPE);

        if spans.is_empty() {
            let response = self.error(
                StunMethod::CreatePermission,
                msg.transaction_id(),
                ErrorCode::BAD_REQUEST,
            );

            return link.send(response).await;
        }

        for span in spans {
            match XorPeerAddress::decode_span(msg, span) {
                Ok(peer) => {
                    log::debug!("permission for {} on {client}", peer.0.ip());
                    allocation.add_permission(peer.0.ip());
                }
                Err(e) => {
                    log::debug!("bad XOR-PEER-ADDRESS in CreatePermission: {e}");
                }
            }
        }

        let response = self.success(StunMethod::CreatePermission, msg.transaction_id(), |_| {});

        link.send(response).await;
    }

    #[tracing::instrument(level = "debug", skip(self, msg, link))]
    async fn channel_bind(&self, msg: &mut Message, client: SocketAddr, link: ClientLink) {
        if let Err(response) = self.authenticate(msg, client) {
            return link.send(response).await;
        }

        let Some(allocation) = self.allocation_of(client) else {
            let response = self.error(
                StunMethod::ChannelBind,
                msg.transaction_id(),
                ErrorCode::ALLOCATION_MISMATCH,
            );

            return link.send(response).await;
        };

        let number = match msg.attribute::<ChannelNumber>() {
            Some(Ok(number)) => number.0,
            _ => 0,
        };

        let peer = match msg.attribute::<XorPeerAddress>() {
            Some(Ok(peer)) => Some(peer.0),
            _ => None,
        };

        let response = match peer {
            Some(peer)
                if (CHANNEL_MIN..=CHANNEL_MAX).contains(&number)
                    && allocation.bind_channel(number, peer) =>
            {
                // a channel binding includes a permission for the peer
                allocation.add_permission(peer.ip());

                log::debug!("channel {number:#06x} bound to {peer} on {client}");

                self.success(StunMethod::ChannelBind, msg.transaction_id(), |_| {})
            }
            _ => self.error(
                StunMethod::ChannelBind,
                msg.transaction_id(),
                ErrorCode::BAD_REQUEST,
            ),
        };

        link.send(response).await;
    }

    /// Send indication: unwrap DATA and pass it to the peer, silently
    /// dropped unless a live permission covers the peer's IP
    async fn send_indication(&self, msg: &mut Message, client: SocketAddr) {
        let Some(allocation) = self.allocation_of(client) else {
            return;
        };

        let peer = match msg.attribute::<XorPeerAddress>() {
            Some(Ok(peer)) => peer.0,
            _ => return,
        };

        if !allocation.has_permission(peer.ip()) {
            log::debug!("dropping Send indication to {peer}, no permission");
            return;
        }

        let payload = match msg.attribute::<Data>() {
            Some(Ok(data)) => data.0.to_vec(),
            _ => return,
        };

        if let RelayKind::Udp(socket) = &allocation.relay {
            if let Err(e) = socket.send_to(&payload, peer).await {
                log::warn!("relay send to {peer} failed: {e}");
            }
        }
    }

    /// ChannelData from the client: forward to the channel's peer
    async fn handle_client_channel_data(&self, frame: &[u8], client: SocketAddr) {
        let Some(allocation) = self.allocation_of(client) else {
            return;
        };

        let channel_data = match ChannelData::parse(frame) {
            Ok(channel_data) => channel_data,
            Err(e) => {
                log::debug!("bad ChannelData from {client}: {e}");
                return;
            }
        };

        let Some(peer) = allocation.peer_for_channel(channel_data.number) else {
            log::debug!(
                "ChannelData on unbound channel {:#06x} from {client}",
                channel_data.number
            );
            return;
        };

        if !allocation.has_permission(peer.ip()) {
            return;
        }

        if let RelayKind::Udp(socket) = &allocation.relay {
            if let Err(e) = socket.send_to(channel_data.data, peer).await {
                log::warn!("relay send to {peer} failed: {e}");
            }
        }
    }

    /// RFC 6062 Connect: dial the peer over TCP on behalf of the client
    #[tracing::instrument(level = "debug", skip(self, msg, link))]
    async fn connect(&self, msg: &mut Message, client: SocketAddr, link: ClientLink) {
        if let Err(response) = self.authenticate(msg, client) {
            return link.send(response).await;
        }

        let tsx_id = msg.transaction_id();

        let Some(allocation) = self.allocation_of(client) else {
            let response = self.error(
                StunMethod::Connect,
                tsx_id,
                ErrorCode::ALLOCATION_MISMATCH,
            );

            return link.send(response).await;
        };

        if !matches!(allocation.relay, RelayKind::Tcp) {
            let response = self.error(StunMethod::Connect, tsx_id, ErrorCode::BAD_REQUEST);
            return link.send(response).await;
        }

        let peer = match msg.attribute::<XorPeerAddress>() {
            Some(Ok(peer)) => peer.0,
            _ => {
                let response = self.error(StunMethod::Connect, tsx_id, ErrorCode::BAD_REQUEST);
                return link.send(response).await;
            }
        };

        if !allocation.has_permission(peer.ip()) {
            let response = self.error(StunMethod::Connect, tsx_id, ErrorCode::FORBIDDEN);
            return link.send(response).await;
        }

        if allocation.has_tcp_peer_to(peer) {
            let response = self.error(
                StunMethod::Connect,
                tsx_id,
                ErrorCode::CONNECTION_ALREADY_EXISTS,
            );

            return link.send(response).await;
        }

        // the dial may take up to CONNECT_TIMEOUT, don't stall the
        // control channel while it runs
        let server = self.clone();

        tokio::spawn(async move {
            let dialed = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(peer)).await;

            let response = match dialed {
                Ok(Ok(stream)) => {
                    let id = allocation.next_connection_id();

                    allocation
                        .tcp_peers
                        .lock()
                        .insert(id, Arc::new(TcpPeer::new(id, peer, Some(stream))));

                    log::debug!("connected to {peer} as connection {id}");

                    server.success(StunMethod::Connect, tsx_id, |w| {
                        w.add_attr(ConnectionId(id)).unwrap();
                    })
                }
                _ => server.error(
                    StunMethod::Connect,
                    tsx_id,
                    ErrorCode::CONNECTION_TIMEOUT_OR_FAILURE,
                ),
            };

            link.send(response).await;
        });
    }

    /// RFC 6062 ConnectionBind on a fresh TCP connection: pair the
    /// client's stream with the stored peer stream and fall through to
    /// raw bidirectional copying.
    #[tracing::instrument(level = "debug", skip(self, stream, bytes))]
    async fn serve_data_connection(
        &self,
        mut stream: TcpStream,
        bytes: Vec<u8>,
        client: SocketAddr,
    ) {
        let mut msg = match Message::parse(bytes) {
            Ok(msg) => msg,
            Err(_) => return,
        };

        let tsx_id = msg.transaction_id();

        // data connections arrive on a fresh 5-tuple, so only the
        // credential is checked, not the per-endpoint nonce
        if !self.verify_integrity(&mut msg) {
            let response = self.unauthorized(StunMethod::ConnectionBind, tsx_id, client);
            let _ = stream.write_all(&response).await;
            return;
        }

        let connection_id = match msg.attribute::<ConnectionId>() {
            Some(Ok(id)) => id.0,
            _ => {
                let response =
                    self.error(StunMethod::ConnectionBind, tsx_id, ErrorCode::BAD_REQUEST);
                let _ = stream.write_all(&response).await;
                return;
            }
        };

        let found = self
            .inner
            .allocations
            .lock()
            .values()
            .find_map(|allocation| {
                allocation
                    .find_tcp_peer(connection_id)
                    .map(|peer| (allocation.clone(), peer))
            });

        let Some((allocation, tcp_peer)) = found else {
            let response = self.error(StunMethod::ConnectionBind, tsx_id, ErrorCode::BAD_REQUEST);
            let _ = stream.write_all(&response).await;
            return;
        };

        let Some(mut peer_stream) = tcp_peer.stream.lock().await.take() else {
            // already bound once, is_bound never resets
            let response = self.error(StunMethod::ConnectionBind, tsx_id, ErrorCode::BAD_REQUEST);
            let _ = stream.write_all(&response).await;
            return;
        };

        tcp_peer
            .is_bound
            .store(true, std::sync::atomic::Ordering::Relaxed);

        let response = self.success(StunMethod::ConnectionBind, tsx_id, |_| {});

        if stream.write_all(&response).await.is_err() {
            return;
        }

        log::debug!(
            "connection {connection_id} bound, relaying bytes for {}",
            tcp_peer.peer
        );

        // from here on the connection is a raw data conduit
        tokio::select! {
            _ = allocation.cancel.cancelled() => {}
            result = tokio::io::copy_bidirectional(&mut stream, &mut peer_stream) => {
                if let Err(e) = result {
                    log::debug!("data connection {connection_id} closed: {e}");
                }
            }
        }

        allocation.tcp_peers.lock().remove(&connection_id);
    }

    // === authentication ===

    /// Verify MESSAGE-INTEGRITY and the username against the configured
    /// long-term credential
    fn verify_integrity(&self, msg: &mut Message) -> bool {
        let integrity_ok = matches!(
            msg.attribute_with::<MessageIntegrity>(MessageIntegrityKey::new(&self.inner.key)),
            Some(Ok(_))
        );

        if !integrity_ok {
            return false;
        }

        match msg.attribute::<Username>() {
            Some(Ok(username)) => username.0 == self.inner.config.username,
            _ => false,
        }
    }

    /// Long-term credential check of a request. On failure the caller
    /// sends the returned 401 carrying realm and a fresh nonce.
    fn authenticate(&self, msg: &mut Message, client: SocketAddr) -> Result<(), Vec<u8>> {
        if !self.verify_integrity(msg) {
            return Err(self.unauthorized(msg.method(), msg.transaction_id(), client));
        }

        let nonce_ok = match msg.attribute::<Nonce>() {
            Some(Ok(nonce)) => self
                .inner
                .nonces
                .lock()
                .get(&client)
                .is_some_and(|stored| stored.as_slice() == nonce.0),
            _ => false,
        };

        if !nonce_ok {
            return Err(self.unauthorized(msg.method(), msg.transaction_id(), client));
        }

        Ok(())
    }

    fn fresh_nonce(&self, client: SocketAddr) -> Vec<u8> {
        let mut raw = [0u8; 16];
        rand::rng().fill(&mut raw);

        let nonce: Vec<u8> = raw
            .iter()
            .flat_map(|b| format!("{b:02x}").into_bytes())
            .collect();

        self.inner.nonces.lock().insert(client, nonce.clone());

        nonce
    }

    // === responses ===

    fn success(
        &self,
        method: StunMethod,
        tsx_id: TransactionId,
        f: impl FnOnce(&mut MessageWriter),
    ) -> Vec<u8> {
        let mut writer = MessageWriter::new(Class::Success, method, tsx_id);

        f(&mut writer);

        writer.add_attr(Software::new(SOFTWARE)).unwrap();
        writer
            .add_attr_with(MessageIntegrity, MessageIntegrityKey::new(&self.inner.key))
            .unwrap();

        writer.finish()
    }

    fn error(&self, method: StunMethod, tsx_id: TransactionId, code: ErrorCode<'_>) -> Vec<u8> {
        let mut writer = MessageWriter::new(Class::Error, method, tsx_id);

        writer.add_attr(code).unwrap();
        writer.add_attr(Software::new(SOFTWARE)).unwrap();

        writer.finish()
    }

    fn unauthorized(
        &self,
        method: StunMethod,
        tsx_id: TransactionId,
        client: SocketAddr,
    ) -> Vec<u8> {
        let nonce = self.fresh_nonce(client);

        let mut writer = MessageWriter::new(Class::Error, method, tsx_id);

        writer.add_attr(ErrorCode::UNAUTHORIZED).unwrap();
        writer
            .add_attr(Realm::new(&self.inner.config.realm))
            .unwrap();
        writer.add_attr(Nonce::new(&nonce)).unwrap();
        writer.add_attr(Software::new(SOFTWARE)).unwrap();

        writer.finish()
    }

    fn allocation_of(&self, client: SocketAddr) -> Option<Arc<Allocation>> {
        self.inner.allocations.lock().get(&client).cloned()
    }

    // === housekeeping ===

    async fn cleanup_loop(self) {
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => return,
                _ = tokio::time::sleep(CLEANUP_INTERVAL) => {}
            }

            let now = Instant::now();

            let mut allocations = self.inner.allocations.lock();

            allocations.retain(|client, allocation| {
                let keep = !allocation.is_expired(now);

                if !keep {
                    log::info!("allocation of {client} expired");
                    allocation.cancel.cancel();
                } else {
                    allocation.prune_permissions(now);
                }

                keep
            });
        }
    }
}
