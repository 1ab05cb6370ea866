use std::path::PathBuf;
use std::time::Duration;
use anyhow::bail;
use crate::packet::SessionParameters;

/// This is the largest data unit the receiver accepts, and therefore the largest payload length
///  it may request. It is the UDP payload of a full Ethernet frame over IPv4 without optional
///  IP headers (`1500 - 20 - 8`); larger payloads would rely on IP fragmentation, which
///  distorts arrival timestamps.
pub const MAX_PAYLOAD_LEN: usize = 1472;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Transport {
    /// UDP with a `NewSession` handshake and kernel receive timestamps
    Datagram,
    /// TCP, no handshake, application-level timestamps
    Stream,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionTimeouts {
    /// Time to wait for the first data packet before re-sending the `NewSession` request
    pub new_session_timeout: Duration,

    /// Lower bound for the silence after the most recent data packet that ends a session.
    ///  The effective timeout is the larger of this and the requested duration.
    pub default_timeout: Duration,

    /// Number of `NewSession` re-sends without any reply after which the handshake is
    ///  considered failed
    pub retransmission_threshold: u8,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        SessionTimeouts {
            new_session_timeout: Duration::from_secs(5),
            default_timeout: Duration::from_secs(60),
            retransmission_threshold: 10,
        }
    }
}

impl SessionTimeouts {
    pub fn steady_state_timeout(&self, parameters: &SessionParameters) -> Duration {
        parameters.duration().max(self.default_timeout)
    }
}

#[derive(Clone, Debug)]
pub struct ReceiverConfig {
    pub transport: Transport,
    pub bandwidth_mbps: u16,
    pub duration_secs: u16,
    pub payload_len: u16,

    /// Local address to bind to - an IP literal or a host name
    pub source_ip: String,
    pub sender_host: String,
    pub sender_port: u16,

    /// If present, one line per received data unit is written to this file
    pub output_file: Option<PathBuf>,

    pub timeouts: SessionTimeouts,
    pub max_payload_len: usize,
}

impl ReceiverConfig {
    pub fn new(transport: Transport, source_ip: &str, sender_host: &str, sender_port: u16) -> ReceiverConfig {
        ReceiverConfig {
            transport,
            bandwidth_mbps: 0,
            duration_secs: 0,
            payload_len: 0,
            source_ip: source_ip.to_string(),
            sender_host: sender_host.to_string(),
            sender_port,
            output_file: None,
            timeouts: SessionTimeouts::default(),
            max_payload_len: MAX_PAYLOAD_LEN,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.duration_secs == 0 {
            bail!("duration must be at least one second");
        }
        if self.source_ip.is_empty() {
            bail!("missing source IP");
        }
        if self.sender_host.is_empty() {
            bail!("missing destination address");
        }
        if self.sender_port == 0 {
            bail!("missing destination port");
        }
        if usize::from(self.payload_len) > self.max_payload_len {
            bail!("payload length {} exceeds limit ({})", self.payload_len, self.max_payload_len);
        }

        if self.transport == Transport::Datagram {
            if self.bandwidth_mbps == 0 {
                bail!("bandwidth is required for UDP");
            }
            if self.payload_len == 0 {
                bail!("payload length is required for UDP");
            }
            if self.timeouts.new_session_timeout.is_zero() {
                bail!("NEW_SESSION timeout must be positive");
            }
        }

        Ok(())
    }

    pub fn session_parameters(&self) -> SessionParameters {
        SessionParameters {
            bandwidth_mbps: self.bandwidth_mbps,
            duration_secs: self.duration_secs,
            payload_len: self.payload_len,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs.into())
    }
}
