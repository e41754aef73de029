use std::io;

/// Fault of the transport collaborator while sending
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("send timed out")]
    TimedOut,
    #[error("connection reset")]
    ConnectionReset,
    #[error("destination unreachable")]
    Unreachable,
    #[error(transparent)]
    Other(#[from] io::Error),
}

/// Why a transaction failed
#[derive(Debug)]
pub enum FailureReason {
    /// No (final) response arrived within the transaction lifetime
    TimedOut,
    /// The transport failed to deliver
    Transport(TransportError),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("engine holds the maximum number of pending transactions")]
    CapacityExceeded,

    #[error("transaction no longer exists")]
    TransactionGone,

    /// The transport refused to deliver. The owning transaction received
    /// the detailed [`TransportError`] through its `Failed` event.
    #[error("transport failed to deliver")]
    TransportFailed,

    #[error("engine is shutting down")]
    Cancelled,
}
