use super::Attr;
use crate::parse::{AttrSpan, Message};
use crate::write::MessageWriter;
use crate::{Error, NE};
use bitfield::bitfield;
use byteorder::ReadBytesExt;
use bytes::BufMut;
use std::str::from_utf8;

bitfield! {
    struct ErrorCodeHead(u32);
    number, set_number: 7, 0;
    class, set_class: 11, 8;
}

/// [RFC8489](https://datatracker.ietf.org/doc/html/rfc8489#section-14.8)
pub struct ErrorCode<'s> {
    pub number: u32,
    pub reason: &'s str,
}

impl ErrorCode<'static> {
    pub const BAD_REQUEST: Self = Self::new(400, "Bad Request");
    pub const UNAUTHORIZED: Self = Self::new(401, "Unauthorized");
    pub const FORBIDDEN: Self = Self::new(403, "Forbidden");
    pub const ALLOCATION_MISMATCH: Self = Self::new(437, "Allocation Mismatch");
    pub const UNSUPPORTED_TRANSPORT_PROTOCOL: Self =
        Self::new(442, "Unsupported Transport Protocol");
    pub const CONNECTION_ALREADY_EXISTS: Self = Self::new(446, "Connection Already Exists");
    pub const CONNECTION_TIMEOUT_OR_FAILURE: Self =
        Self::new(447, "Connection Timeout or Failure");

    const fn new(number: u32, reason: &'static str) -> Self {
        Self { number, reason }
    }
}

impl<'s> Attr<'s> for ErrorCode<'s> {
    type Context = ();
    const TYPE: u16 = 0x0009;

    fn decode(_: Self::Context, msg: &'s mut Message, attr: AttrSpan) -> Result<Self, Error> {
        let mut value = attr.get_value(msg.buffer());

        if value.len() < 4 {
            return Err(Error::InvalidData("error code must be at least 4 bytes"));
        }

        let head = ErrorCodeHead(value.read_u32::<NE>()?);

        let reason = if !value.is_empty() {
            from_utf8(value)?
        } else {
            ""
        };

        Ok(Self {
            number: head.class() * 100 + head.number(),
            reason,
        })
    }

    fn encode(&self, _: Self::Context, writer: &mut MessageWriter) {
        let mut head = ErrorCodeHead(0);

        head.set_class(self.number / 100);
        head.set_number(self.number % 100);

        writer.buffer().put_u32(head.0);
        writer.buffer().extend_from_slice(self.reason.as_ref());
    }

    fn encode_len(&self) -> Result<u16, Error> {
        Ok(u16::try_from(4 + self.reason.len())?)
    }
}
