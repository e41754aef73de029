//! Transaction state machines.
//!
//! A [`Transaction`] owns the state shared by all three variants; the
//! variant-specific behaviour dispatches on its [`TsxRole`] tag. All
//! mutation happens under the engine's per-transaction lock, socket work
//! is returned to the engine as [`Transmit`](crate::Transmit) values.

use bytesstr::BytesStr;
use sip_types::Response;

mod key;
mod tsx;

pub mod consts {
    use std::time::Duration;

    /// RTT estimate, base retransmit interval
    pub const T1: Duration = Duration::from_millis(500);

    /// Retransmit interval cap
    pub const T2: Duration = Duration::from_secs(4);

    /// Maximum datagram lifetime
    pub const T4: Duration = Duration::from_secs(5);

    /// Transaction lifetime, 64*T1
    pub const T6: Duration = Duration::from_secs(32);

    /// How long an INVITE may stay in `Proceeding`
    pub const MAX_RING_TIME: Duration = Duration::from_secs(600);

    pub const RFC3261_BRANCH_PREFIX: &str = "z9hG4bK";
}

pub use key::TsxId;
pub use tsx::{Transaction, TsxRole, TsxState};

pub(crate) use tsx::TsxTimers;

/// Event emitted by a transaction towards the user agent that owns it.
///
/// Delivered over an unbounded channel, so the engine's driver never
/// blocks on a slow consumer. Handlers that do real work should forward
/// the event to their own task.
#[derive(Debug)]
pub enum TsxEvent {
    /// A provisional response arrived (client transactions)
    Provisional(Response),

    /// A final response arrived (client transactions)
    Final(Response),

    /// The server INVITE transaction was cancelled by the peer
    Cancelled,

    /// A reliable provisional response was never PRACKed in time.
    /// The transaction is still alive and may send a final response.
    ProvisionalTimedOut,

    /// The transaction state changed
    StateChanged(TsxState),

    /// The transaction is dead
    Failed(crate::FailureReason),
}

pub(crate) fn generate_branch() -> BytesStr {
    use rand::distr::Alphanumeric;
    use rand::{rng, Rng};

    consts::RFC3261_BRANCH_PREFIX
        .bytes()
        .chain(rng().sample_iter(Alphanumeric).take(23))
        .map(char::from)
        .collect::<String>()
        .into()
}
