use crate::error::TransportError;
use sip_types::{Request, Response, SipMessage, Via};
use std::net::SocketAddr;

/// A message the engine wants on the wire
#[derive(Debug)]
pub struct Transmit {
    pub message: SipMessage,

    /// Explicit destination (e.g. an outbound proxy). `None` lets the
    /// transport derive the target from the message itself.
    pub destination: Option<SocketAddr>,
}

impl Transmit {
    pub(crate) fn request(request: Request, destination: Option<SocketAddr>) -> Self {
        Self {
            message: SipMessage::Request(request),
            destination,
        }
    }

    pub(crate) fn response(response: Response) -> Self {
        Self {
            message: SipMessage::Response(response),
            destination: None,
        }
    }
}

/// Contract of the transport collaborator below the transaction layer.
///
/// Serialisation, socket handling and DNS are all behind this trait. The
/// destination of a response is derived by the transport from the top Via
/// (`received`/`rport`, falling back to sent-by).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// A Via header naming this transport and its sent-by address.
    /// The engine fills in the branch before use.
    fn via_template(&self) -> Via;

    async fn send_request(
        &self,
        request: &Request,
        destination: Option<SocketAddr>,
    ) -> Result<(), TransportError>;

    async fn send_response(&self, response: &Response) -> Result<(), TransportError>;
}
