use super::addr::{addr_encode_len, decode_addr, encode_addr};
use super::{Attr, BytesAttr};
use crate::parse::{AttrSpan, Message};
use crate::write::MessageWriter;
use crate::{Error, COOKIE, NE};
use byteorder::ReadBytesExt;
use bytes::BufMut;
use std::net::SocketAddr;

const XOR16: u16 = (COOKIE >> 16) as u16;

/// [RFC5766](https://datatracker.ietf.org/doc/html/rfc5766#section-14.1)
pub struct ChannelNumber(pub u16);

impl Attr<'_> for ChannelNumber {
    type Context = ();
    const TYPE: u16 = 0x000C;

    fn decode(_: Self::Context, msg: &mut Message, attr: AttrSpan) -> Result<Self, Error> {
        Ok(Self(attr.get_value(msg.buffer()).read_u16::<NE>()?))
    }

    fn encode(&self, _: Self::Context, writer: &mut MessageWriter) {
        writer.buffer().put_u16(self.0);
        writer.buffer().put_u16(0);
    }

    fn encode_len(&self) -> Result<u16, Error> {
        Ok(4)
    }
}

/// [RFC5766](https://datatracker.ietf.org/doc/html/rfc5766#section-14.2)
pub struct Lifetime(pub u32);

impl Attr<'_> for Lifetime {
    type Context = ();
    const TYPE: u16 = 0x000D;

    fn decode(_: Self::Context, msg: &mut Message, attr: AttrSpan) -> Result<Self, Error> {
        Ok(Self(attr.get_value(msg.buffer()).read_u32::<NE>()?))
    }

    fn encode(&self, _: Self::Context, writer: &mut MessageWriter) {
        writer.buffer().put_u32(self.0);
    }

    fn encode_len(&self) -> Result<u16, Error> {
        Ok(4)
    }
}

/// [RFC5766](https://datatracker.ietf.org/doc/html/rfc5766#section-14.3)
pub struct XorPeerAddress(pub SocketAddr);

impl XorPeerAddress {
    /// Decode one occurrence of this attribute given its span.
    ///
    /// CreatePermission requests may carry the attribute multiple times,
    /// which the single-attribute accessor cannot express.
    pub fn decode_span(msg: &Message, attr: AttrSpan) -> Result<Self, Error> {
        decode_addr(attr.get_value(msg.buffer()), XOR16, COOKIE, msg.id()).map(Self)
    }
}

impl Attr<'_> for XorPeerAddress {
    type Context = ();
    const TYPE: u16 = 0x0012;

    fn decode(_: Self::Context, msg: &mut Message, attr: AttrSpan) -> Result<Self, Error> {
        Self::decode_span(msg, attr)
    }

    fn encode(&self, _: Self::Context, writer: &mut MessageWriter) {
        let xor128 = writer.id();
        encode_addr(self.0, writer.buffer(), XOR16, COOKIE, xor128);
    }

    fn encode_len(&self) -> Result<u16, Error> {
        Ok(addr_encode_len(self.0))
    }
}

/// [RFC5766](https://datatracker.ietf.org/doc/html/rfc5766#section-14.4)
pub type Data<'s> = BytesAttr<'s, 0x0013>;

/// [RFC5766](https://datatracker.ietf.org/doc/html/rfc5766#section-14.5)
pub struct XorRelayedAddress(pub SocketAddr);

impl Attr<'_> for XorRelayedAddress {
    type Context = ();
    const TYPE: u16 = 0x0016;

    fn decode(_: Self::Context, msg: &mut Message, attr: AttrSpan) -> Result<Self, Error> {
        decode_addr(attr.get_value(msg.buffer()), XOR16, COOKIE, msg.id()).map(Self)
    }

    fn encode(&self, _: Self::Context, writer: &mut MessageWriter) {
        let xor128 = writer.id();
        encode_addr(self.0, writer.buffer(), XOR16, COOKIE, xor128);
    }

    fn encode_len(&self) -> Result<u16, Error> {
        Ok(addr_encode_len(self.0))
    }
}

/// [RFC8656](https://datatracker.ietf.org/doc/html/rfc8656#section-18.8)
pub struct RequestedAddressFamily(pub u8);

impl RequestedAddressFamily {
    pub const IPV4: u8 = 0x01;
    pub const IPV6: u8 = 0x02;
}

impl Attr<'_> for RequestedAddressFamily {
    type Context = ();
    const TYPE: u16 = 0x0017;

    fn decode(_: Self::Context, msg: &mut Message, attr: AttrSpan) -> Result<Self, Error> {
        Ok(Self(attr.get_value(msg.buffer()).read_u8()?))
    }

    fn encode(&self, _: Self::Context, writer: &mut MessageWriter) {
        writer.buffer().put_u8(self.0);
        writer.buffer().put_u8(0);
        writer.buffer().put_u16(0);
    }

    fn encode_len(&self) -> Result<u16, Error> {
        Ok(4)
    }
}

/// [RFC5766](https://datatracker.ietf.org/doc/html/rfc5766#section-14.7)
pub struct RequestedTransport {
    // https://www.iana.org/assignments/protocol-numbers/protocol-numbers.xhtml
    pub protocol_number: u8,
}

impl RequestedTransport {
    pub const UDP: u8 = 0x11;
    pub const TCP: u8 = 0x06;
}

impl Attr<'_> for RequestedTransport {
    type Context = ();
    const TYPE: u16 = 0x0019;

    fn decode(_: Self::Context, msg: &mut Message, attr: AttrSpan) -> Result<Self, Error> {
        Ok(Self {
            protocol_number: attr.get_value(msg.buffer()).read_u8()?,
        })
    }

    fn encode(&self, _: Self::Context, writer: &mut MessageWriter) {
        writer.buffer().put_u8(self.protocol_number);
        writer.buffer().put_u8(0);
        writer.buffer().put_u16(0);
    }

    fn encode_len(&self) -> Result<u16, Error> {
        Ok(4)
    }
}

/// [RFC6062](https://datatracker.ietf.org/doc/html/rfc6062#section-6.2.1)
pub struct ConnectionId(pub u32);

impl Attr<'_> for ConnectionId {
    type Context = ();
    const TYPE: u16 = 0x002A;

    fn decode(_: Self::Context, msg: &mut Message, attr: AttrSpan) -> Result<Self, Error> {
        Ok(Self(attr.get_value(msg.buffer()).read_u32::<NE>()?))
    }

    fn encode(&self, _: Self::Context, writer: &mut MessageWriter) {
        writer.buffer().put_u32(self.0);
    }

    fn encode_len(&self) -> Result<u16, Error> {
        Ok(4)
    }
}
