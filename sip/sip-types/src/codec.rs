use crate::msg::SipMessage;
use bytes::Bytes;

/// Error surfaced by a [`MessageCodec`] implementation.
///
/// The stack drops messages that fail to parse and keeps going.
#[derive(Debug, thiserror::Error)]
#[error("malformed sip message, {reason}")]
pub struct ParseError {
    pub reason: &'static str,
}

impl ParseError {
    pub fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

/// Contract of the parser/serialiser collaborator.
///
/// Implementations must round-trip every field of [`SipMessage`]:
/// `parse(print(msg))` yields a message the stack cannot tell apart
/// from `msg`.
pub trait MessageCodec: Send + Sync + 'static {
    fn parse(&self, bytes: Bytes) -> Result<SipMessage, ParseError>;

    fn print(&self, message: &SipMessage) -> Bytes;
}
