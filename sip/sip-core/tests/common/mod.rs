use parking_lot::Mutex;
use lark_sip_core::{Transport, TransportError};
use sip_types::{
    CallId, Host, HostPort, Method, NameAddr, Request, Response, SipMessage, SipUri, Via,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Transport double recording everything the engine sends
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<(SipMessage, Instant)>>,
    notify: Notify,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<SipMessage> {
        self.sent.lock().iter().map(|(msg, _)| msg.clone()).collect()
    }

    pub fn sent_requests(&self) -> Vec<Request> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(msg, _)| match msg {
                SipMessage::Request(request) => Some(request.clone()),
                SipMessage::Response(_) => None,
            })
            .collect()
    }

    pub fn sent_responses(&self) -> Vec<Response> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(msg, _)| match msg {
                SipMessage::Response(response) => Some(response.clone()),
                SipMessage::Request(_) => None,
            })
            .collect()
    }

    /// Timestamps of every sent request of `method`
    pub fn request_times(&self, method: &Method) -> Vec<Instant> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(msg, at)| match msg {
                SipMessage::Request(request) if request.method == *method => Some(*at),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    /// Wait until at least `n` messages were sent
    pub async fn wait_for(&self, n: usize) {
        loop {
            if self.sent.lock().len() >= n {
                return;
            }

            self.notify.notified().await;
        }
    }

    fn record(&self, message: SipMessage) {
        self.sent.lock().push((message, Instant::now()));
        self.notify.notify_waiters();
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
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
        self.record(SipMessage::Request(request.clone()));
        Ok(())
    }

    async fn send_response(&self, response: &Response) -> Result<(), TransportError> {
        self.record(SipMessage::Response(response.clone()));
        Ok(())
    }
}

/// An INVITE as a UAC would hand it to the engine (no Via yet)
pub fn uac_invite(call_id: &str) -> Request {
    let mut request = Request::new(
        Method::INVITE,
        SipUri::sip("bob", "example.net"),
        NameAddr::with_tag(SipUri::sip("alice", "example.com"), "t-alice".into()),
        NameAddr::new(SipUri::sip("bob", "example.net")),
        CallId::new(call_id),
        1,
    );

    request.contact = Some(sip_types::Contact::new(SipUri::sip("alice", "10.0.0.1")));

    request
}

/// An INVITE as it would arrive from the wire (Via with branch present)
pub fn uas_invite(call_id: &str, branch: &str) -> Request {
    let mut request = uac_invite(call_id);

    request.via = vec![Via::new(
        "UDP",
        HostPort::new(Host::from("10.0.0.2"), Some(5060)),
        branch.into(),
    )];

    request
}

/// Answer `request` with `code`, To-tag set
pub fn response_to(request: &Request, code: sip_types::StatusCode, to_tag: &str) -> Response {
    let mut response = Response::to_request(request, code);
    response.to.tag = Some(to_tag.into());
    response
}
