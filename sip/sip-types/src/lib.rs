#![warn(unreachable_pub)]

//! SIP message model.
//!
//! This crate only models SIP messages; parsing raw bytes into these types
//! and printing them back out is the job of a codec collaborator
//! implementing [`MessageCodec`].

mod code;
mod codec;
mod headers;
mod host;
mod method;
mod msg;
mod uri;

pub use code::{CodeKind, StatusCode};
pub use codec::{MessageCodec, ParseError};
pub use headers::{CSeq, CallId, Contact, NameAddr, RAck, RecordRoute, Route, Via};
pub use host::{Host, HostPort};
pub use method::Method;
pub use msg::{Request, Response, SipMessage};
pub use uri::SipUri;
