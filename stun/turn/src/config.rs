use std::net::IpAddr;
use std::time::Duration;

/// TURN server configuration.
///
/// Constructed by the embedding application; loading it from a file or
/// the environment is not this crate's business.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Bind address of the control sockets
    pub listen_address: IpAddr,

    /// Control port, 3478 by default. `0` picks a free port, useful
    /// in tests.
    pub port: u16,

    pub enable_udp: bool,
    pub enable_tcp: bool,

    /// Address advertised in XOR-RELAYED-ADDRESS. Defaults to
    /// `listen_address`.
    pub relay_address: Option<IpAddr>,

    /// Long-term credential
    pub username: String,
    pub password: String,
    pub realm: String,

    /// Lifetime granted to fresh allocations
    pub default_lifetime: Duration,

    /// Upper bound a Refresh may extend an allocation to
    pub max_lifetime: Duration,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            listen_address: IpAddr::from([127, 0, 0, 1]),
            port: 3478,
            enable_udp: true,
            enable_tcp: true,
            relay_address: None,
            username: String::new(),
            password: String::new(),
            realm: String::new(),
            default_lifetime: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(3600),
        }
    }
}

impl TurnConfig {
    pub(crate) fn relay_ip(&self) -> IpAddr {
        self.relay_address.unwrap_or(self.listen_address)
    }
}
