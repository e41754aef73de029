use crate::parse::{AttrSpan, Message};
use crate::write::MessageWriter;
use crate::Error;
use std::str::from_utf8;

mod addr;
mod error_code;
mod integrity;
mod relay;

pub use addr::{MappedAddress, XorMappedAddress};
pub use error_code::ErrorCode;
pub use integrity::{long_term_key, MessageIntegrity, MessageIntegrityKey};
pub use relay::{
    ChannelNumber, ConnectionId, Data, Lifetime, RequestedAddressFamily, RequestedTransport,
    XorPeerAddress, XorRelayedAddress,
};

pub(crate) const ATTRIBUTE_HEADER_LEN: usize = 4;

/// A STUN attribute that can be decoded from and encoded into a message
pub trait Attr<'s> {
    type Context;
    const TYPE: u16;

    fn decode(ctx: Self::Context, msg: &'s mut Message, attr: AttrSpan) -> Result<Self, Error>
    where
        Self: Sized;

    fn encode(&self, ctx: Self::Context, writer: &mut MessageWriter);

    fn encode_len(&self) -> Result<u16, Error>;
}

pub struct StringAttr<'s, const TYPE: u16>(pub &'s str);

impl<'s, const TYPE: u16> StringAttr<'s, TYPE> {
    pub fn new(s: &'s str) -> Self {
        Self(s)
    }
}

impl<'s, const TYPE: u16> Attr<'s> for StringAttr<'s, TYPE> {
    type Context = ();
    const TYPE: u16 = TYPE;

    fn decode(_: Self::Context, msg: &'s mut Message, attr: AttrSpan) -> Result<Self, Error> {
        Ok(Self(from_utf8(attr.get_value(msg.buffer()))?))
    }

    fn encode(&self, _: Self::Context, writer: &mut MessageWriter) {
        writer.buffer().extend_from_slice(self.0.as_ref());
    }

    fn encode_len(&self) -> Result<u16, Error> {
        Ok(u16::try_from(self.0.len())?)
    }
}

pub struct BytesAttr<'s, const TYPE: u16>(pub &'s [u8]);

impl<'s, const TYPE: u16> BytesAttr<'s, TYPE> {
    pub fn new(s: &'s [u8]) -> Self {
        Self(s)
    }
}

impl<'s, const TYPE: u16> Attr<'s> for BytesAttr<'s, TYPE> {
    type Context = ();
    const TYPE: u16 = TYPE;

    fn decode(_: Self::Context, msg: &'s mut Message, attr: AttrSpan) -> Result<Self, Error> {
        Ok(Self(attr.get_value(msg.buffer())))
    }

    fn encode(&self, _: Self::Context, writer: &mut MessageWriter) {
        writer.buffer().extend_from_slice(self.0);
    }

    fn encode_len(&self) -> Result<u16, Error> {
        Ok(u16::try_from(self.0.len())?)
    }
}

/// [RFC8489](https://datatracker.ietf.org/doc/html/rfc8489#section-14.3)
pub type Username<'s> = StringAttr<'s, 0x0006>;

/// [RFC8489](https://datatracker.ietf.org/doc/html/rfc8489#section-14.9)
pub type Realm<'s> = StringAttr<'s, 0x0014>;

/// [RFC8489](https://datatracker.ietf.org/doc/html/rfc8489#section-14.10)
pub type Nonce<'s> = BytesAttr<'s, 0x0015>;

/// [RFC8489](https://datatracker.ietf.org/doc/html/rfc8489#section-14.14)
pub type Software<'s> = StringAttr<'s, 0x8022>;
