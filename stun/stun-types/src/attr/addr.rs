use super::Attr;
use crate::parse::{AttrSpan, Message};
use crate::write::MessageWriter;
use crate::{Error, COOKIE, NE};
use byteorder::ReadBytesExt;
use bytes::BufMut;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

const XOR16: u16 = (COOKIE >> 16) as u16;

pub(crate) fn decode_addr(
    mut buf: &[u8],
    xor16: u16,
    xor32: u32,
    xor128: u128,
) -> Result<SocketAddr, Error> {
    if buf.read_u8()? != 0 {
        return Err(Error::InvalidData("first byte must be zero"));
    }

    let family = buf.read_u8()?;
    let port = buf.read_u16::<NE>()? ^ xor16;

    let addr = match family {
        1 => {
            let ip = buf.read_u32::<NE>()? ^ xor32;
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(ip), port))
        }
        2 => {
            let ip = buf.read_u128::<NE>()? ^ xor128;
            SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::from(ip), port, 0, 0))
        }
        _ => {
            return Err(Error::InvalidData("invalid address family"));
        }
    };

    Ok(addr)
}

pub(crate) fn encode_addr(addr: SocketAddr, buf: &mut Vec<u8>, xor16: u16, xor32: u32, xor128: u128) {
    buf.put_u8(0);

    match addr {
        SocketAddr::V4(addr) => {
            buf.put_u8(1);
            buf.put_u16(addr.port() ^ xor16);
            buf.put_u32(u32::from_be_bytes(addr.ip().octets()) ^ xor32);
        }
        SocketAddr::V6(addr) => {
            buf.put_u8(2);
            buf.put_u16(addr.port() ^ xor16);
            buf.put_u128(u128::from_be_bytes(addr.ip().octets()) ^ xor128);
        }
    }
}

pub(crate) fn addr_encode_len(addr: SocketAddr) -> u16 {
    match addr {
        SocketAddr::V4(_) => 8,
        SocketAddr::V6(_) => 20,
    }
}

/// [RFC8489](https://datatracker.ietf.org/doc/html/rfc8489#section-14.1)
pub struct MappedAddress(pub SocketAddr);

impl Attr<'_> for MappedAddress {
    type Context = ();
    const TYPE: u16 = 0x0001;

    fn decode(_: Self::Context, msg: &mut Message, attr: AttrSpan) -> Result<Self, Error> {
        decode_addr(attr.get_value(msg.buffer()), 0, 0, 0).map(Self)
    }

    fn encode(&self, _: Self::Context, writer: &mut MessageWriter) {
        encode_addr(self.0, writer.buffer(), 0, 0, 0);
    }

    fn encode_len(&self) -> Result<u16, Error> {
        Ok(addr_encode_len(self.0))
    }
}

/// [RFC8489](https://datatracker.ietf.org/doc/html/rfc8489#section-14.2)
pub struct XorMappedAddress(pub SocketAddr);

impl Attr<'_> for XorMappedAddress {
    type Context = ();
    const TYPE: u16 = 0x0020;

    fn decode(_: Self::Context, msg: &mut Message, attr: AttrSpan) -> Result<Self, Error> {
        let xor128 = msg.id();
        decode_addr(attr.get_value(msg.buffer()), XOR16, COOKIE, xor128).map(Self)
    }

    fn encode(&self, _: Self::Context, writer: &mut MessageWriter) {
        let xor128 = writer.id();
        encode_addr(self.0, writer.buffer(), XOR16, COOKIE, xor128);
    }

    fn encode_len(&self) -> Result<u16, Error> {
        Ok(addr_encode_len(self.0))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::header::{Class, StunMethod};
    use crate::{Message, MessageWriter, TransactionId};

    #[test]
    fn xor_addr_depends_on_transaction_id() {
        let addr: SocketAddr = "192.0.2.7:40000".parse().unwrap();

        let mut writer = MessageWriter::new(
            Class::Success,
            StunMethod::Binding,
            TransactionId::random(),
        );
        writer.add_attr(XorMappedAddress(addr)).unwrap();

        let bytes = writer.finish();

        // raw attribute value must not contain the plain address bytes
        assert!(!bytes
            .windows(4)
            .any(|w| w == [192, 0, 2, 7]));

        let mut msg = Message::parse(bytes).unwrap();
        let decoded = msg.attribute::<XorMappedAddress>().unwrap().unwrap();

        assert_eq!(decoded.0, addr);
    }
}
