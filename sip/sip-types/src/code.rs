use std::fmt;

/// Class of a SIP status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    Provisional,
    Success,
    Redirection,
    RequestFailure,
    ServerFailure,
    GlobalFailure,
}

/// SIP response status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const TRYING: Self = Self(100);
    pub const RINGING: Self = Self(180);
    pub const SESSION_PROGRESS: Self = Self(183);

    pub const OK: Self = Self(200);
    pub const ACCEPTED: Self = Self(202);

    pub const BAD_REQUEST: Self = Self(400);
    pub const REQUEST_TIMEOUT: Self = Self(408);
    pub const CALL_OR_TRANSACTION_DOES_NOT_EXIST: Self = Self(481);
    pub const REQUEST_TERMINATED: Self = Self(487);

    pub const SERVER_INTERNAL_ERROR: Self = Self(500);

    pub const DECLINE: Self = Self(603);

    pub fn new(code: u16) -> Self {
        assert!((100..700).contains(&code), "invalid status code {code}");
        Self(code)
    }

    pub fn into_u16(self) -> u16 {
        self.0
    }

    pub fn kind(&self) -> CodeKind {
        match self.0 {
            100..=199 => CodeKind::Provisional,
            200..=299 => CodeKind::Success,
            300..=399 => CodeKind::Redirection,
            400..=499 => CodeKind::RequestFailure,
            500..=599 => CodeKind::ServerFailure,
            _ => CodeKind::GlobalFailure,
        }
    }

    /// Default reason phrase, if one is known
    pub fn text(&self) -> Option<&'static str> {
        let text = match self.0 {
            100 => "Trying",
            180 => "Ringing",
            183 => "Session Progress",
            200 => "OK",
            202 => "Accepted",
            400 => "Bad Request",
            408 => "Request Timeout",
            481 => "Call/Transaction Does Not Exist",
            487 => "Request Terminated",
            500 => "Server Internal Error",
            603 => "Decline",
            _ => return None,
        };

        Some(text)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
