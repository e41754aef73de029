use std::io;

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    /// The 401 loop exhausted our credentials
    #[error("authentication rejected by turn server")]
    Auth,

    /// The server answered a request with a TURN error code
    /// (437, 442, 446, 447, ...)
    #[error("turn request failed with code {0}")]
    Allocation(u32),

    /// A request was retransmitted to exhaustion without an answer
    #[error("turn request timed out")]
    Timeout,

    #[error("failed to resolve turn server address")]
    Resolve,

    #[error(transparent)]
    Stun(#[from] stun_types::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}
