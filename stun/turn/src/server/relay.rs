//! Per-allocation relay tasks.
//!
//! A UDP allocation runs one relay task forwarding peer datagrams to the
//! client, a TCP allocation runs one accept task announcing inbound peer
//! connections. Both are cancelled through the allocation's token.

use super::allocation::{Allocation, TcpPeer};
use std::sync::Arc;
use stun_types::attr::{ConnectionId, Data, XorPeerAddress};
use stun_types::{ChannelData, Class, MessageWriter, StunMethod, TransactionId};
use tokio::net::{TcpListener, UdpSocket};

/// Forward datagrams arriving on the relay socket to the client.
///
/// Peers without a live permission are dropped. Peers with a bound
/// channel are framed as ChannelData, everyone else as a Data indication.
pub(super) async fn udp_relay_loop(allocation: Arc<Allocation>, socket: Arc<UdpSocket>) {
    let mut buf = vec![0u8; 65535];

    loop {
        let (len, peer) = tokio::select! {
            _ = allocation.cancel.cancelled() => return,
            result = socket.recv_from(&mut buf) => match result {
                Ok(received) => received,
                Err(e) => {
                    log::warn!("relay socket of {} broke: {e}", allocation.client);
                    return;
                }
            },
        };

        if !allocation.has_permission(peer.ip()) {
            log::debug!(
                "dropping {len} bytes from {peer}, no permission on {}",
                allocation.client
            );
            continue;
        }

        let frame = match allocation.channel_for_peer(peer) {
            Some(number) => ChannelData {
                number,
                data: &buf[..len],
            }
            .encode(allocation.link.is_stream()),
            None => data_indication(peer, &buf[..len]),
        };

        allocation.link.send(frame).await;
    }
}

fn data_indication(peer: std::net::SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut writer = MessageWriter::new(
        Class::Indication,
        StunMethod::Data,
        TransactionId::random(),
    );

    writer.add_attr(XorPeerAddress(peer)).unwrap();
    writer.add_attr(Data::new(payload)).unwrap();

    writer.finish()
}

/// Accept peer connections on a TCP relay listener (RFC 6062).
///
/// Permitted peers are announced to the client with a
/// ConnectionAttempt indication carrying a fresh CONNECTION-ID; the
/// connection is parked until the client binds it.
pub(super) async fn tcp_relay_accept_loop(allocation: Arc<Allocation>, listener: TcpListener) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = allocation.cancel.cancelled() => return,
            result = listener.accept() => match result {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::warn!("relay listener of {} broke: {e}", allocation.client);
                    return;
                }
            },
        };

        if !allocation.has_permission(peer.ip()) {
            log::debug!(
                "closing peer connection from {peer}, no permission on {}",
                allocation.client
            );
            continue;
        }

        let id = allocation.next_connection_id();

        allocation
            .tcp_peers
            .lock()
            .insert(id, Arc::new(TcpPeer::new(id, peer, Some(stream))));

        let mut writer = MessageWriter::new(
            Class::Indication,
            StunMethod::ConnectionAttempt,
            TransactionId::random(),
        );

        writer.add_attr(ConnectionId(id)).unwrap();
        writer.add_attr(XorPeerAddress(peer)).unwrap();

        allocation.link.send(writer.finish()).await;

        log::debug!(
            "peer {peer} connected to relay of {}, announced as connection {id}",
            allocation.client
        );
    }
}
