use crate::host::{Host, HostPort};
use bytesstr::BytesStr;
use std::fmt;
use std::net::SocketAddr;

/// A `sip:` / `sips:` URI, reduced to the parts the stack routes on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SipUri {
    pub secure: bool,
    pub user: Option<BytesStr>,
    pub host_port: HostPort,
}

impl SipUri {
    pub fn new(host_port: HostPort) -> Self {
        Self {
            secure: false,
            user: None,
            host_port,
        }
    }

    pub fn sip(user: &str, host: &str) -> Self {
        Self {
            secure: false,
            user: Some(BytesStr::from(user)),
            host_port: Host::from(host).into(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.host_port.port = Some(port);
        self
    }
}

impl From<SocketAddr> for SipUri {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.into())
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.secure {
            f.write_str("sips:")?;
        } else {
            f.write_str("sip:")?;
        }

        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }

        self.host_port.fmt(f)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn uri_display() {
        let uri = SipUri::sip("bob", "example.net").with_port(5060);

        assert_eq!(uri.to_string(), "sip:bob@example.net:5060");
    }
}
