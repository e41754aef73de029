#![warn(unreachable_pub)]

use rand::Rng;
use std::io;
use std::num::TryFromIntError;
use std::str::Utf8Error;

pub mod attr;
mod channel_data;
mod header;
mod parse;
mod write;

pub use channel_data::{ChannelData, CHANNEL_MAX, CHANNEL_MIN};
pub use header::{Class, MessageHead, StunMethod, STUN_HEADER_LENGTH};
pub use parse::{AttrSpan, Message};
pub use write::MessageWriter;

type NE = byteorder::NetworkEndian;

pub const COOKIE: u32 = 0x2112A442;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input data, {0}")]
    InvalidData(&'static str),
    #[error("failed to convert integer")]
    TryFromInt(#[from] TryFromIntError),
    #[error(transparent)]
    Utf8(#[from] Utf8Error),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Self::InvalidData("buffer seems incomplete"),
            _ => Self::InvalidData("failed to read from buffer"),
        }
    }
}

fn padding(n: usize) -> usize {
    match n % 4 {
        0 => 0,
        r => 4 - r,
    }
}

/// 96 bit STUN transaction id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub [u8; 12]);

impl TransactionId {
    pub fn random() -> Self {
        let mut bytes = [0u8; 12];
        rand::rng().fill(&mut bytes);
        Self(bytes)
    }
}

/// How the first bytes of a datagram classify it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// First two bits are `00`, datagram is a STUN message
    Stun,
    /// First two bits are `01`, datagram is a ChannelData message
    ChannelData,
    /// Anything else
    Unknown,
}

impl FrameKind {
    pub fn of(data: &[u8]) -> FrameKind {
        match data.first() {
            Some(b) if b & 0xC0 == 0x00 => FrameKind::Stun,
            Some(b) if b & 0xC0 == 0x40 => FrameKind::ChannelData,
            _ => FrameKind::Unknown,
        }
    }
}
