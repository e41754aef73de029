//! Raw STUN plumbing for driving the server without the client crate.

use std::net::SocketAddr;
use std::time::Duration;
use stun_types::attr::{
    long_term_key, MessageIntegrity, MessageIntegrityKey, Nonce, Realm, RequestedTransport,
    Username, XorRelayedAddress,
};
use stun_types::{Class, Message, MessageWriter, StunMethod, TransactionId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use lark_turn::TurnConfig;

pub const USERNAME: &str = "alice";
pub const PASSWORD: &str = "hunter2";
pub const REALM: &str = "lark";

pub fn test_config() -> TurnConfig {
    TurnConfig {
        listen_address: [127, 0, 0, 1].into(),
        port: 0,
        username: USERNAME.into(),
        password: PASSWORD.into(),
        realm: REALM.into(),
        ..Default::default()
    }
}

pub struct RawCredentials {
    pub realm: String,
    pub nonce: Vec<u8>,
}

impl RawCredentials {
    pub fn apply(&self, writer: &mut MessageWriter) {
        let key = long_term_key(USERNAME, &self.realm, PASSWORD);

        writer.add_attr(Username::new(USERNAME)).unwrap();
        writer.add_attr(Realm::new(&self.realm)).unwrap();
        writer.add_attr(Nonce::new(&self.nonce)).unwrap();
        writer
            .add_attr_with(MessageIntegrity, MessageIntegrityKey::new(&key))
            .unwrap();
    }
}

pub async fn udp_request(socket: &UdpSocket, server: SocketAddr, bytes: Vec<u8>) -> Message {
    socket.send_to(&bytes, server).await.unwrap();

    let mut buf = vec![0u8; 65535];
    let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("server answered")
        .unwrap();

    Message::parse(buf[..len].to_vec()).unwrap()
}

/// Run the 401 handshake of an Allocate over UDP; returns the cached
/// credentials and the relayed address.
pub async fn udp_allocate(
    socket: &UdpSocket,
    server: SocketAddr,
    transport: u8,
) -> (RawCredentials, SocketAddr) {
    let mut writer = MessageWriter::new(
        Class::Request,
        StunMethod::Allocate,
        TransactionId::random(),
    );
    writer
        .add_attr(RequestedTransport {
            protocol_number: transport,
        })
        .unwrap();

    let mut challenge = udp_request(socket, server, writer.finish()).await;
    assert_eq!(challenge.class(), Class::Error);

    let credentials = credentials_of(&mut challenge);

    let mut writer = MessageWriter::new(
        Class::Request,
        StunMethod::Allocate,
        TransactionId::random(),
    );
    writer
        .add_attr(RequestedTransport {
            protocol_number: transport,
        })
        .unwrap();
    credentials.apply(&mut writer);

    let mut granted = udp_request(socket, server, writer.finish()).await;
    assert_eq!(granted.class(), Class::Success);

    let relayed = granted
        .attribute::<XorRelayedAddress>()
        .unwrap()
        .unwrap()
        .0;

    (credentials, relayed)
}

pub fn credentials_of(challenge: &mut Message) -> RawCredentials {
    let realm = {
        let realm = challenge.attribute::<Realm>().unwrap().unwrap();
        realm.0.to_owned()
    };

    let nonce = {
        let nonce = challenge.attribute::<Nonce>().unwrap().unwrap();
        nonce.0.to_vec()
    };

    RawCredentials { realm, nonce }
}

// === framed TCP helpers ===

pub async fn tcp_send(stream: &mut TcpStream, bytes: Vec<u8>) {
    stream.write_all(&bytes).await.unwrap();
}

/// Read one framed message off a TURN TCP stream
pub async fn tcp_read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut header = [0u8; 4];

    timeout(Duration::from_secs(2), stream.read_exact(&mut header))
        .await
        .expect("frame arrived")
        .unwrap();

    let len = usize::from(u16::from_be_bytes([header[2], header[3]]));

    let total = if header[0] & 0xC0 == 0x40 {
        // ChannelData, padded to 4 byte alignment
        4 + len + (4 - len % 4) % 4
    } else {
        20 + len
    };

    let mut frame = vec![0u8; total];
    frame[..4].copy_from_slice(&header);
    stream.read_exact(&mut frame[4..]).await.unwrap();

    frame
}

pub async fn tcp_request(stream: &mut TcpStream, bytes: Vec<u8>) -> Message {
    tcp_send(stream, bytes).await;
    Message::parse(tcp_read_frame(stream).await).unwrap()
}
