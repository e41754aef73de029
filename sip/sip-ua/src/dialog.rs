use crate::util::random_sequence_number;
use bytesstr::BytesStr;
use sip_core::{Engine, Result, TsxHandle};
use sip_types::{
    CallId, Contact, Method, NameAddr, Request, Response, Route, SipUri,
};
use std::net::SocketAddr;

/// Dialog lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    Early,
    Confirmed,
    Terminated,
}

/// Identity of a dialog
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DialogKey {
    pub call_id: CallId,
    pub local_tag: BytesStr,
    pub remote_tag: Option<BytesStr>,
}

/// A SIP dialog, derived from a completed INVITE transaction.
///
/// Owns the `(Call-ID, local tag, remote tag)` identity and the local
/// CSeq counter used to mint in-dialog requests.
#[derive(Debug)]
pub struct Dialog {
    pub state: DialogState,

    pub call_id: CallId,

    /// Local From header of minted requests, tag always set
    pub local: NameAddr,

    /// Remote To header of minted requests
    pub remote: NameAddr,

    /// Where in-dialog requests are sent, the peer's Contact
    pub remote_target: SipUri,

    /// Route set, stored in the order requests must traverse it
    /// (reversed Record-Route of the dialog forming response)
    pub route_set: Vec<Route>,

    /// CSeq of the next minted request, strictly increasing
    local_cseq: u32,

    /// Highest CSeq observed from the peer
    pub remote_cseq: Option<u32>,

    /// Local Contact announced to the peer
    pub local_contact: Option<Contact>,

    /// Endpoint the proxy saw our requests from, recorded for address
    /// mangling decisions by the owning application. Never applied here.
    pub proxy_send_from: Option<SocketAddr>,

    /// Observed remote transport endpoint
    pub remote_endpoint: Option<SocketAddr>,
}

impl Dialog {
    /// Dialog from the UAC side: the INVITE we sent and the (usually 2xx)
    /// response that formed the dialog.
    pub fn from_client_invite(
        request: &Request,
        response: &Response,
        remote_endpoint: Option<SocketAddr>,
    ) -> Self {
        let remote_target = response
            .contact
            .as_ref()
            .map(|contact| contact.uri.clone())
            .unwrap_or_else(|| request.uri.clone());

        let state = if response.code.kind() == sip_types::CodeKind::Success {
            DialogState::Confirmed
        } else {
            DialogState::Early
        };

        Self {
            state,
            call_id: request.call_id.clone(),
            local: request.from.clone(),
            remote: response.to.clone(),
            remote_target,
            route_set: reversed_route_set(response),
            local_cseq: request.cseq.cseq,
            remote_cseq: None,
            local_contact: request.contact.clone(),
            proxy_send_from: None,
            remote_endpoint,
        }
    }

    /// Dialog from the UAS side: the INVITE we received and the tag we
    /// answered with.
    pub fn from_server_invite(
        request: &Request,
        local_tag: BytesStr,
        local_contact: Option<Contact>,
        remote_endpoint: Option<SocketAddr>,
    ) -> Self {
        let remote_target = request
            .contact
            .as_ref()
            .map(|contact| contact.uri.clone())
            .unwrap_or_else(|| request.from.uri.clone());

        // From/To are mirrored on the server side
        let local = NameAddr::with_tag(request.to.uri.clone(), local_tag);

        Self {
            state: DialogState::Early,
            call_id: request.call_id.clone(),
            local,
            remote: request.from.clone(),
            remote_target,
            route_set: request
                .record_route
                .iter()
                .rev()
                .map(|rr| Route(rr.0.clone()))
                .collect(),
            local_cseq: random_sequence_number(),
            remote_cseq: Some(request.cseq.cseq),
            local_contact,
            proxy_send_from: None,
            remote_endpoint,
        }
    }

    pub fn key(&self) -> DialogKey {
        DialogKey {
            call_id: self.call_id.clone(),
            local_tag: self
                .local
                .tag
                .clone()
                .expect("dialog local tag is always set"),
            remote_tag: self.remote.tag.clone(),
        }
    }

    /// The INVITE transaction got its 2xx
    pub fn confirm(&mut self) {
        if self.state == DialogState::Early {
            self.state = DialogState::Confirmed;
        }
    }

    /// Does this in-dialog request belong to us?
    pub fn matches(&self, request: &Request) -> bool {
        request.call_id == self.call_id
            && request.to.tag == self.local.tag
            && request.from.tag == self.remote.tag
    }

    /// Record the CSeq of a received in-dialog request
    pub fn remote_cseq_seen(&mut self, cseq: u32) {
        self.remote_cseq = Some(cseq);
    }

    pub fn local_cseq(&self) -> u32 {
        self.local_cseq
    }

    /// Mint an in-dialog request.
    ///
    /// The local CSeq increases strictly with every call, From/To carry
    /// the dialog tags and the route set is attached. The transaction
    /// engine adds the Via when the request is sent.
    pub fn create_request(&mut self, method: Method, target: Option<SipUri>) -> Request {
        self.local_cseq += 1;

        let uri = target.unwrap_or_else(|| self.remote_target.clone());

        let mut request = Request::new(
            method,
            uri,
            self.local.clone(),
            self.remote.clone(),
            self.call_id.clone(),
            self.local_cseq,
        );

        request.route = self.route_set.clone();
        request.contact = self.local_contact.clone();

        request
    }

    /// Terminate the dialog with a BYE sent on a fresh non-INVITE
    /// transaction.
    pub async fn hangup(&mut self, engine: &Engine) -> Result<TsxHandle> {
        let bye = self.create_request(Method::BYE, None);

        self.state = DialogState::Terminated;
        log::debug!("hanging up dialog {}", self.call_id);

        engine.send_request(bye, None).await
    }

    /// A BYE for this dialog arrived
    pub fn bye_received(&mut self) {
        self.state = DialogState::Terminated;
    }
}

fn reversed_route_set(response: &Response) -> Vec<Route> {
    response
        .record_route
        .iter()
        .rev()
        .map(|rr| Route(rr.0.clone()))
        .collect()
}
