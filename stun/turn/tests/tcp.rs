//! Framed TCP control channel and the RFC 6062 TCP relay.

mod common;

use common::{tcp_read_frame, tcp_request, test_config};
use std::time::Duration;
use stun_types::attr::{
    ConnectionId, Data, RequestedTransport, XorPeerAddress, XorRelayedAddress,
};
use stun_types::{Class, Message, MessageWriter, StunMethod, TransactionId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;
use lark_turn::TurnServer;

/// Allocate over a framed TCP control connection, requesting the given
/// relay transport. Returns the control stream, credentials and relay
/// address.
async fn tcp_allocate(
    server: &TurnServer,
    transport: u8,
) -> (TcpStream, common::RawCredentials, std::net::SocketAddr) {
    let mut control = TcpStream::connect(server.tcp_addr().unwrap()).await.unwrap();

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

    let mut challenge = tcp_request(&mut control, writer.finish()).await;
    assert_eq!(challenge.class(), Class::Error);

    let credentials = common::credentials_of(&mut challenge);

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

    let mut granted = tcp_request(&mut control, writer.finish()).await;
    assert_eq!(granted.class(), Class::Success);

    let relayed = granted
        .attribute::<XorRelayedAddress>()
        .unwrap()
        .unwrap()
        .0;

    (control, credentials, relayed)
}

async fn permit(
    control: &mut TcpStream,
    credentials: &common::RawCredentials,
    peer: std::net::SocketAddr,
) {
    let mut writer = MessageWriter::new(
        Class::Request,
        StunMethod::CreatePermission,
        TransactionId::random(),
    );
    writer.add_attr(XorPeerAddress(peer)).unwrap();
    credentials.apply(&mut writer);

    let granted = tcp_request(control, writer.finish()).await;
    assert_eq!(granted.class(), Class::Success);
}

/// Scenario: TCP control channel, UDP relay. The peer's datagram arrives
/// on the control stream as a framed Data indication.
#[tokio::test]
async fn tcp_control_with_udp_relay() {
    let server = TurnServer::spawn(test_config()).await.unwrap();

    let (mut control, credentials, relayed) =
        tcp_allocate(&server, RequestedTransport::UDP).await;

    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    permit(&mut control, &credentials, peer.local_addr().unwrap()).await;

    peer.send_to(b"hello", relayed).await.unwrap();

    let mut indication = Message::parse(tcp_read_frame(&mut control).await).unwrap();

    assert_eq!(indication.class(), Class::Indication);
    assert_eq!(indication.method(), StunMethod::Data);

    let from = indication.attribute::<XorPeerAddress>().unwrap().unwrap().0;
    assert_eq!(from, peer.local_addr().unwrap());

    let payload = {
        let data = indication.attribute::<Data>().unwrap().unwrap();
        data.0.to_vec()
    };
    assert_eq!(payload, b"hello");
}

/// RFC 6062: Connect dials the peer, ConnectionBind pairs a fresh client
/// connection with it and bytes flow both ways.
#[tokio::test]
async fn tcp_relay_connect_and_bind() {
    let server = TurnServer::spawn(test_config()).await.unwrap();

    let (mut control, credentials, _relayed) =
        tcp_allocate(&server, RequestedTransport::TCP).await;

    // the peer we will dial
    let peer_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer_addr = peer_listener.local_addr().unwrap();

    permit(&mut control, &credentials, peer_addr).await;

    let mut writer = MessageWriter::new(
        Class::Request,
        StunMethod::Connect,
        TransactionId::random(),
    );
    writer.add_attr(XorPeerAddress(peer_addr)).unwrap();
    credentials.apply(&mut writer);

    let accept = tokio::spawn(async move { peer_listener.accept().await.unwrap() });

    let mut connected = tcp_request(&mut control, writer.finish()).await;
    assert_eq!(connected.class(), Class::Success);

    let connection_id = connected.attribute::<ConnectionId>().unwrap().unwrap().0;

    let (mut peer_stream, _) = accept.await.unwrap();

    // bind a fresh connection to the peer stream
    let mut data = TcpStream::connect(server.tcp_addr().unwrap()).await.unwrap();

    let mut writer = MessageWriter::new(
        Class::Request,
        StunMethod::ConnectionBind,
        TransactionId::random(),
    );
    writer.add_attr(ConnectionId(connection_id)).unwrap();
    credentials.apply(&mut writer);

    let bound = tcp_request(&mut data, writer.finish()).await;
    assert_eq!(bound.class(), Class::Success);

    // from here the connection is a raw byte pipe
    data.write_all(b"ping").await.unwrap();

    let mut buf = [0u8; 4];
    timeout(Duration::from_secs(2), peer_stream.read_exact(&mut buf))
        .await
        .expect("peer got the bytes")
        .unwrap();
    assert_eq!(&buf, b"ping");

    peer_stream.write_all(b"pong").await.unwrap();

    timeout(Duration::from_secs(2), data.read_exact(&mut buf))
        .await
        .expect("client got the bytes")
        .unwrap();
    assert_eq!(&buf, b"pong");
}

/// RFC 6062: a peer connecting to the relay listener is announced with a
/// ConnectionAttempt indication and can then be bound.
#[tokio::test]
async fn inbound_peer_is_announced_and_bindable() {
    let server = TurnServer::spawn(test_config()).await.unwrap();

    let (mut control, credentials, relayed) =
        tcp_allocate(&server, RequestedTransport::TCP).await;

    // permission must exist before the peer dials in; only the IP counts
    permit(&mut control, &credentials, "127.0.0.1:9".parse().unwrap()).await;

    let mut peer_stream = TcpStream::connect(relayed).await.unwrap();

    let mut indication = Message::parse(tcp_read_frame(&mut control).await).unwrap();

    assert_eq!(indication.class(), Class::Indication);
    assert_eq!(indication.method(), StunMethod::ConnectionAttempt);

    let connection_id = indication.attribute::<ConnectionId>().unwrap().unwrap().0;
    let announced = indication.attribute::<XorPeerAddress>().unwrap().unwrap().0;
    assert_eq!(announced, peer_stream.local_addr().unwrap());

    // bind and exchange
    let mut data = TcpStream::connect(server.tcp_addr().unwrap()).await.unwrap();

    let mut writer = MessageWriter::new(
        Class::Request,
        StunMethod::ConnectionBind,
        TransactionId::random(),
    );
    writer.add_attr(ConnectionId(connection_id)).unwrap();
    credentials.apply(&mut writer);

    let bound = tcp_request(&mut data, writer.finish()).await;
    assert_eq!(bound.class(), Class::Success);

    peer_stream.write_all(b"knock").await.unwrap();

    let mut buf = [0u8; 5];
    timeout(Duration::from_secs(2), data.read_exact(&mut buf))
        .await
        .expect("client got the bytes")
        .unwrap();
    assert_eq!(&buf, b"knock");
}

/// A peer without a permission never reaches the relay listener's client
#[tokio::test]
async fn unpermitted_tcp_peer_is_closed() {
    let server = TurnServer::spawn(test_config()).await.unwrap();

    let (mut control, _credentials, relayed) =
        tcp_allocate(&server, RequestedTransport::TCP).await;

    // connection may establish, but no ConnectionAttempt is announced
    let _peer = TcpStream::connect(relayed).await.unwrap();

    let announced = timeout(Duration::from_millis(300), tcp_read_frame(&mut control)).await;
    assert!(announced.is_err(), "unpermitted peer was announced");
}
