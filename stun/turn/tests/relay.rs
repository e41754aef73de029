//! UDP relay behaviour over the loopback interface.

mod common;

use common::{test_config, udp_allocate, udp_request};
use std::time::Duration;
use stun_types::attr::{ErrorCode, Lifetime, RequestedTransport, XorPeerAddress};
use stun_types::{Class, FrameKind, MessageWriter, StunMethod, TransactionId};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use lark_turn::{TurnClient, TurnClientConfig, TurnError, TurnEvent, TurnServer};

async fn client_for(server: &TurnServer) -> TurnClient {
    TurnClient::allocate(TurnClientConfig {
        server: server.udp_addr().unwrap().to_string(),
        username: common::USERNAME.into(),
        password: common::PASSWORD.into(),
        ..Default::default()
    })
    .await
    .expect("allocation")
}

/// Scenario: allocate through the 401 challenge, install a permission and
/// receive a peer datagram as a Data indication.
#[tokio::test]
async fn allocate_and_relay_from_peer() {
    let server = TurnServer::spawn(test_config()).await.unwrap();
    let mut client = client_for(&server).await;

    let relayed = client.relayed_addr().unwrap();
    assert_eq!(server.allocation_count(), 1);

    client
        .create_permission(&[[127, 0, 0, 1].into()])
        .await
        .unwrap();

    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    peer.send_to(b"hello", relayed).await.unwrap();

    match timeout(Duration::from_secs(2), client.next_event())
        .await
        .expect("relayed payload")
    {
        Some(TurnEvent::Data { peer: from, data }) => {
            assert_eq!(from, peer.local_addr().unwrap());
            assert_eq!(data, b"hello");
        }
        other => panic!("unexpected event {other:?}"),
    }

    // and the reverse direction through a Send indication
    client
        .send_to(peer.local_addr().unwrap(), b"world")
        .await
        .unwrap();

    let mut buf = [0u8; 64];
    let (len, from) = timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
        .await
        .expect("datagram from relay")
        .unwrap();

    assert_eq!(&buf[..len], b"world");
    assert_eq!(from, relayed);
}

/// Scenario: a peer without a permission is silently dropped
#[tokio::test]
async fn peer_without_permission_is_dropped() {
    let server = TurnServer::spawn(test_config()).await.unwrap();
    let mut client = client_for(&server).await;

    let relayed = client.relayed_addr().unwrap();

    // no CreatePermission was issued
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    peer.send_to(b"sneaky", relayed).await.unwrap();

    let got = timeout(Duration::from_millis(300), client.next_event()).await;
    assert!(got.is_err(), "unpermitted payload reached the client");
}

/// Property: permitted traffic arrives as ChannelData iff a channel is
/// bound, as a Data indication otherwise.
#[tokio::test]
async fn channel_binding_switches_framing() {
    let server = TurnServer::spawn(test_config()).await.unwrap();

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr = server.udp_addr().unwrap();

    let (credentials, relayed) =
        udp_allocate(&socket, server_addr, RequestedTransport::UDP).await;

    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let peer_addr = peer.local_addr().unwrap();

    // permission only
    let mut writer = MessageWriter::new(
        Class::Request,
        StunMethod::CreatePermission,
        TransactionId::random(),
    );
    writer.add_attr(XorPeerAddress(peer_addr)).unwrap();
    credentials.apply(&mut writer);

    let granted = udp_request(&socket, server_addr, writer.finish()).await;
    assert_eq!(granted.class(), Class::Success);

    peer.send_to(b"plain", relayed).await.unwrap();

    let mut buf = vec![0u8; 1500];
    let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(FrameKind::of(&buf[..len]), FrameKind::Stun);

    // now bind a channel and observe the framing flip
    let mut writer = MessageWriter::new(
        Class::Request,
        StunMethod::ChannelBind,
        TransactionId::random(),
    );
    writer
        .add_attr(stun_types::attr::ChannelNumber(0x4000))
        .unwrap();
    writer.add_attr(XorPeerAddress(peer_addr)).unwrap();
    credentials.apply(&mut writer);

    let bound = udp_request(&socket, server_addr, writer.finish()).await;
    assert_eq!(bound.class(), Class::Success);

    peer.send_to(b"framed", relayed).await.unwrap();

    let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(FrameKind::of(&buf[..len]), FrameKind::ChannelData);

    let channel_data = stun_types::ChannelData::parse(&buf[..len]).unwrap();
    assert_eq!(channel_data.number, 0x4000);
    assert_eq!(channel_data.data, b"framed");
}

/// Property: Refresh with lifetime 0 deletes the allocation, later
/// operations answer 437.
#[tokio::test]
async fn refresh_zero_deletes_allocation() {
    let server = TurnServer::spawn(test_config()).await.unwrap();

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr = server.udp_addr().unwrap();

    let (credentials, _relayed) =
        udp_allocate(&socket, server_addr, RequestedTransport::UDP).await;
    assert_eq!(server.allocation_count(), 1);

    let mut writer = MessageWriter::new(
        Class::Request,
        StunMethod::Refresh,
        TransactionId::random(),
    );
    writer.add_attr(Lifetime(0)).unwrap();
    credentials.apply(&mut writer);

    let mut released = udp_request(&socket, server_addr, writer.finish()).await;
    assert_eq!(released.class(), Class::Success);
    assert_eq!(released.attribute::<Lifetime>().unwrap().unwrap().0, 0);
    assert_eq!(server.allocation_count(), 0);

    // the allocation is gone, a further refresh mismatches
    let mut writer = MessageWriter::new(
        Class::Request,
        StunMethod::Refresh,
        TransactionId::random(),
    );
    writer.add_attr(Lifetime(600)).unwrap();
    credentials.apply(&mut writer);

    let mut mismatch = udp_request(&socket, server_addr, writer.finish()).await;
    assert_eq!(mismatch.class(), Class::Error);
    assert_eq!(
        mismatch.attribute::<ErrorCode>().unwrap().unwrap().number,
        437
    );
}

/// A second Allocate from the same endpoint mismatches
#[tokio::test]
async fn second_allocate_mismatches() {
    let server = TurnServer::spawn(test_config()).await.unwrap();

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr = server.udp_addr().unwrap();

    let (credentials, _) = udp_allocate(&socket, server_addr, RequestedTransport::UDP).await;

    let mut writer = MessageWriter::new(
        Class::Request,
        StunMethod::Allocate,
        TransactionId::random(),
    );
    writer
        .add_attr(RequestedTransport {
            protocol_number: RequestedTransport::UDP,
        })
        .unwrap();
    credentials.apply(&mut writer);

    let mut again = udp_request(&socket, server_addr, writer.finish()).await;
    assert_eq!(again.class(), Class::Error);
    assert_eq!(again.attribute::<ErrorCode>().unwrap().unwrap().number, 437);
}

/// An unknown REQUESTED-TRANSPORT is answered with 442
#[tokio::test]
async fn unknown_transport_is_rejected() {
    let server = TurnServer::spawn(test_config()).await.unwrap();

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr = server.udp_addr().unwrap();

    // 401 challenge first
    let mut writer = MessageWriter::new(
        Class::Request,
        StunMethod::Allocate,
        TransactionId::random(),
    );
    writer
        .add_attr(RequestedTransport { protocol_number: 42 })
        .unwrap();

    let mut challenge = udp_request(&socket, server_addr, writer.finish()).await;
    assert_eq!(
        challenge.attribute::<ErrorCode>().unwrap().unwrap().number,
        401
    );

    let credentials = common::credentials_of(&mut challenge);

    let mut writer = MessageWriter::new(
        Class::Request,
        StunMethod::Allocate,
        TransactionId::random(),
    );
    writer
        .add_attr(RequestedTransport { protocol_number: 42 })
        .unwrap();
    credentials.apply(&mut writer);

    let mut rejected = udp_request(&socket, server_addr, writer.finish()).await;
    assert_eq!(rejected.class(), Class::Error);
    assert_eq!(
        rejected.attribute::<ErrorCode>().unwrap().unwrap().number,
        442
    );
}

/// Wrong credentials never get past the 401 loop
#[tokio::test]
async fn wrong_password_is_abandoned() {
    let server = TurnServer::spawn(test_config()).await.unwrap();

    let failed = TurnClient::allocate(TurnClientConfig {
        server: server.udp_addr().unwrap().to_string(),
        username: common::USERNAME.into(),
        password: "wrong".into(),
        ..Default::default()
    })
    .await;

    assert!(matches!(failed, Err(TurnError::Auth)));
    assert_eq!(server.allocation_count(), 0);
}

/// The client keeps its allocation alive and can release it
#[tokio::test]
async fn release_drops_the_allocation() {
    let server = TurnServer::spawn(test_config()).await.unwrap();
    let client = client_for(&server).await;

    assert_eq!(server.allocation_count(), 1);

    client.release().await.unwrap();
    assert_eq!(server.allocation_count(), 0);
}
