use crate::host::HostPort;
use crate::method::Method;
use crate::uri::SipUri;
use bytesstr::BytesStr;
use std::fmt;
use std::net::IpAddr;

/// `Via` header, reduced to the fields transactions route on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Via {
    /// Transport name as printed on the wire (e.g. `UDP`, `TCP`)
    pub transport: BytesStr,
    pub sent_by: HostPort,
    pub branch: BytesStr,
    pub received: Option<IpAddr>,
    pub rport: Option<u16>,
}

impl Via {
    pub fn new(transport: &str, sent_by: HostPort, branch: BytesStr) -> Self {
        Self {
            transport: BytesStr::from(transport),
            sent_by,
            branch,
            received: None,
            rport: None,
        }
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SIP/2.0/{} {};branch={}",
            self.transport, self.sent_by, self.branch
        )
    }
}

/// From/To style header: URI plus an optional tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAddr {
    pub uri: SipUri,
    pub tag: Option<BytesStr>,
}

impl NameAddr {
    pub fn new(uri: SipUri) -> Self {
        Self { uri, tag: None }
    }

    pub fn with_tag(uri: SipUri, tag: BytesStr) -> Self {
        Self {
            uri,
            tag: Some(tag),
        }
    }
}

/// `Contact` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub uri: SipUri,
}

impl Contact {
    pub fn new(uri: SipUri) -> Self {
        Self { uri }
    }
}

/// `CSeq` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSeq {
    pub cseq: u32,
    pub method: Method,
}

impl CSeq {
    pub const fn new(cseq: u32, method: Method) -> Self {
        Self { cseq, method }
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.cseq, self.method)
    }
}

/// `Call-ID` header
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallId(pub BytesStr);

impl CallId {
    pub fn new(id: impl Into<BytesStr>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `RAck` header acknowledging a reliable provisional response (RFC 3262)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RAck {
    pub rseq: u32,
    pub cseq: u32,
    pub method: Method,
}

impl RAck {
    pub const fn new(rseq: u32, cseq: u32, method: Method) -> Self {
        Self { rseq, cseq, method }
    }
}

impl fmt::Display for RAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.rseq, self.cseq, self.method)
    }
}

/// `Route` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route(pub SipUri);

/// `Record-Route` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRoute(pub SipUri);
