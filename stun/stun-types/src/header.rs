use crate::Error;
use bitfield::bitfield;

pub const STUN_HEADER_LENGTH: usize = 20;

bitfield! {
    pub struct MessageHead(u32);

    u8;
    pub z, _: 31, 30;

    u16;
    pub typ, set_typ: 29, 16;

    #[allow(clippy::len_without_is_empty)]
    pub len, set_len: 15, 0;
}

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum Class {
    Request,
    Indication,
    Success,
    Error,
}

impl Class {
    const MASK: u16 = 0x110;

    const REQUEST: u16 = 0x000;
    const INDICATION: u16 = 0x010;
    const SUCCESS: u16 = 0x100;
    const ERROR: u16 = 0x110;

    pub fn set_bits(&self, typ: &mut u16) {
        *typ &= StunMethod::MASK;

        match self {
            Class::Request => *typ |= Self::REQUEST,
            Class::Indication => *typ |= Self::INDICATION,
            Class::Success => *typ |= Self::SUCCESS,
            Class::Error => *typ |= Self::ERROR,
        }
    }
}

impl TryFrom<u16> for Class {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Error> {
        match value & Self::MASK {
            Self::REQUEST => Ok(Self::Request),
            Self::INDICATION => Ok(Self::Indication),
            Self::SUCCESS => Ok(Self::Success),
            Self::ERROR => Ok(Self::Error),
            _ => Err(Error::InvalidData("unknown class")),
        }
    }
}

/// STUN/TURN methods used by the relay protocol
///
/// Covers RFC 5389 binding, the RFC 5766 allocation methods and
/// the RFC 6062 TCP relay methods.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum StunMethod {
    Binding,

    Allocate,
    Refresh,
    Send,
    Data,
    CreatePermission,
    ChannelBind,

    Connect,
    ConnectionBind,
    ConnectionAttempt,
}

impl StunMethod {
    const MASK: u16 = 0x3EEF;

    const BINDING: u16 = 0x001;

    const ALLOCATE: u16 = 0x003;
    const REFRESH: u16 = 0x004;
    const SEND: u16 = 0x006;
    const DATA: u16 = 0x007;
    const CREATE_PERMISSION: u16 = 0x008;
    const CHANNEL_BIND: u16 = 0x009;

    const CONNECT: u16 = 0x00A;
    const CONNECTION_BIND: u16 = 0x00B;
    const CONNECTION_ATTEMPT: u16 = 0x00C;

    pub fn set_bits(&self, typ: &mut u16) {
        *typ &= Class::MASK;

        match self {
            StunMethod::Binding => *typ |= Self::BINDING,
            StunMethod::Allocate => *typ |= Self::ALLOCATE,
            StunMethod::Refresh => *typ |= Self::REFRESH,
            StunMethod::Send => *typ |= Self::SEND,
            StunMethod::Data => *typ |= Self::DATA,
            StunMethod::CreatePermission => *typ |= Self::CREATE_PERMISSION,
            StunMethod::ChannelBind => *typ |= Self::CHANNEL_BIND,
            StunMethod::Connect => *typ |= Self::CONNECT,
            StunMethod::ConnectionBind => *typ |= Self::CONNECTION_BIND,
            StunMethod::ConnectionAttempt => *typ |= Self::CONNECTION_ATTEMPT,
        }
    }
}

impl TryFrom<u16> for StunMethod {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Error> {
        match value & Self::MASK {
            Self::BINDING => Ok(Self::Binding),
            Self::ALLOCATE => Ok(Self::Allocate),
            Self::REFRESH => Ok(Self::Refresh),
            Self::SEND => Ok(Self::Send),
            Self::DATA => Ok(Self::Data),
            Self::CREATE_PERMISSION => Ok(Self::CreatePermission),
            Self::CHANNEL_BIND => Ok(Self::ChannelBind),
            Self::CONNECT => Ok(Self::Connect),
            Self::CONNECTION_BIND => Ok(Self::ConnectionBind),
            Self::CONNECTION_ATTEMPT => Ok(Self::ConnectionAttempt),
            _ => Err(Error::InvalidData("unknown method")),
        }
    }
}
