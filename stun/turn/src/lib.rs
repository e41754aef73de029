#![warn(unreachable_pub)]

//! TURN relay server (RFC 5766, RFC 6062) and the matching client used
//! to acquire a relay endpoint.
//!
//! The server authenticates clients with the long-term credential
//! mechanism, manages allocation lifecycles, permissions and channel
//! bindings and relays UDP datagrams as well as TCP byte streams between
//! the client's control channel and arbitrary peers.

pub mod client;
mod config;
mod error;
mod framing;
pub mod server;

pub use client::{TurnClient, TurnClientConfig, TurnEvent};
pub use config::TurnConfig;
pub use error::TurnError;
pub use server::TurnServer;
