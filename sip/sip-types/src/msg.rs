use crate::code::StatusCode;
use crate::headers::{CSeq, CallId, Contact, NameAddr, RAck, RecordRoute, Route, Via};
use crate::method::Method;
use crate::uri::SipUri;
use bytes::Bytes;
use bytesstr::BytesStr;
use std::fmt;

/// A SIP request carrying the header set the stack consumes
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub uri: SipUri,

    /// Via stack, topmost first
    pub via: Vec<Via>,
    pub from: NameAddr,
    pub to: NameAddr,
    pub call_id: CallId,
    pub cseq: CSeq,
    pub contact: Option<Contact>,
    pub route: Vec<Route>,
    pub record_route: Vec<RecordRoute>,
    pub max_forwards: u32,

    /// `Require` option tags
    pub require: Vec<BytesStr>,
    /// `Supported` option tags
    pub supported: Vec<BytesStr>,
    pub rack: Option<RAck>,

    pub content_type: Option<BytesStr>,
    pub body: Bytes,
}

impl Request {
    pub fn new(
        method: Method,
        uri: SipUri,
        from: NameAddr,
        to: NameAddr,
        call_id: CallId,
        cseq: u32,
    ) -> Self {
        let cseq = CSeq::new(cseq, method.clone());

        Self {
            method,
            uri,
            via: vec![],
            from,
            to,
            call_id,
            cseq,
            contact: None,
            route: vec![],
            record_route: vec![],
            max_forwards: 70,
            require: vec![],
            supported: vec![],
            rack: None,
            content_type: None,
            body: Bytes::new(),
        }
    }

    /// Branch parameter of the topmost Via, if any
    pub fn top_via_branch(&self) -> Option<&BytesStr> {
        self.via.first().map(|via| &via.branch)
    }

    pub fn requires(&self, option: &str) -> bool {
        self.require.iter().any(|tag| tag == option)
    }

    pub fn supports(&self, option: &str) -> bool {
        self.supported.iter().any(|tag| tag == option)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.uri)
    }
}

/// A SIP response carrying the header set the stack consumes
#[derive(Debug, Clone)]
pub struct Response {
    pub code: StatusCode,
    pub reason: Option<BytesStr>,

    /// Via stack copied from the request this answers, topmost first
    pub via: Vec<Via>,
    pub from: NameAddr,
    pub to: NameAddr,
    pub call_id: CallId,
    pub cseq: CSeq,
    pub contact: Option<Contact>,
    pub record_route: Vec<RecordRoute>,

    pub require: Vec<BytesStr>,
    pub supported: Vec<BytesStr>,
    pub rseq: Option<u32>,

    pub content_type: Option<BytesStr>,
    pub body: Bytes,
}

impl Response {
    /// Create a response to `request` mirroring the headers a UAS must echo
    pub fn to_request(request: &Request, code: StatusCode) -> Self {
        Self {
            code,
            reason: code.text().map(BytesStr::from_static),
            via: request.via.clone(),
            from: request.from.clone(),
            to: request.to.clone(),
            call_id: request.call_id.clone(),
            cseq: request.cseq.clone(),
            contact: None,
            record_route: request.record_route.clone(),
            require: vec![],
            supported: vec![],
            rseq: None,
            content_type: None,
            body: Bytes::new(),
        }
    }

    pub fn top_via_branch(&self) -> Option<&BytesStr> {
        self.via.first().map(|via| &via.branch)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{} {}", self.code, reason),
            None => write!(f, "{}", self.code),
        }
    }
}

/// Either kind of SIP message
#[derive(Debug, Clone)]
pub enum SipMessage {
    Request(Request),
    Response(Response),
}

impl From<Request> for SipMessage {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

impl From<Response> for SipMessage {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}
