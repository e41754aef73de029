use sip_core::{Transport, TransportError};
use sip_types::{
    CallId, Contact, Host, HostPort, Method, NameAddr, Request, Response, SipUri, StatusCode, Via,
};
use std::net::SocketAddr;
use std::sync::Mutex;

use lark_sip_ua::util::generate_tag;

/// Transport double recording everything the engine sends
#[derive(Default)]
pub struct RecordingTransport {
    pub requests: Mutex<Vec<Request>>,
    pub responses: Mutex<Vec<Response>>,
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    fn via_template(&self) -> Via {
        Via::new(
            "UDP",
            HostPort::new(Host::from("10.0.0.1"), Some(5060)),
            "".into(),
        )
    }

    async fn send_request(
        &self,
        request: &Request,
        _destination: Option<SocketAddr>,
    ) -> Result<(), TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn send_response(&self, response: &Response) -> Result<(), TransportError> {
        self.responses.lock().unwrap().push(response.clone());
        Ok(())
    }
}

/// An INVITE and the 2xx answering it, enough to form a dialog
pub fn dialog_pair() -> (Request, Response) {
    let mut invite = Request::new(
        Method::INVITE,
        SipUri::sip("bob", "example.net"),
        NameAddr::with_tag(SipUri::sip("alice", "example.com"), generate_tag()),
        NameAddr::new(SipUri::sip("bob", "example.net")),
        CallId::new("dialog-test"),
        1,
    );
    invite.contact = Some(Contact::new(SipUri::sip("alice", "10.0.0.1")));

    let mut ok = Response::to_request(&invite, StatusCode::OK);
    ok.to.tag = Some(generate_tag());
    ok.contact = Some(Contact::new(SipUri::sip("bob", "10.0.0.2").with_port(5060)));

    (invite, ok)
}
