#![warn(unreachable_pub)]

//! SIP transaction layer.
//!
//! The [`Engine`] owns every active [transaction](transaction) and drives
//! retransmissions and expiry from a single background task. User agents
//! create transactions through the engine and observe them through
//! per-transaction event channels; the transport below is an injected
//! collaborator implementing [`Transport`].

mod engine;
mod error;
pub mod transaction;
mod transport;

pub use engine::{Engine, EngineConfig, IncomingCall, ServerTsxHandle, TsxHandle};
pub use error::{Error, FailureReason, TransportError};
pub use transport::{Transmit, Transport};

pub type Result<T, E = Error> = std::result::Result<T, E>;
