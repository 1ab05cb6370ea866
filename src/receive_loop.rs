use std::net::SocketAddr;
use anyhow::Context;
use bytes::BytesMut;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, span, trace, warn, Instrument, Level};
use crate::config::SessionTimeouts;
use crate::datagram_socket::DatagramSocket;
use crate::packet::{Packet, SessionParameters};
use crate::receive_log::ReceiveLog;
use crate::session::{Session, SessionAction, SessionState, Termination};
use crate::statistics::ReceiveStatistics;
use crate::timestamp::ApplicationClock;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionReport {
    pub termination: Termination,
    pub statistics: ReceiveStatistics,
}

/// Drives one UDP measurement session: sends the `NewSession` request, then waits for packets
///  with a deadline that depends on the session state, re-sending the request while the
///  handshake is pending.
///
/// The receiver owns the socket, which is closed when `run` returns, whatever the outcome.
pub struct DatagramReceiver<S: DatagramSocket> {
    socket: S,
    sender_addr: SocketAddr,
    parameters: SessionParameters,
    timeouts: SessionTimeouts,
    max_payload_len: usize,
}

impl<S: DatagramSocket> DatagramReceiver<S> {
    pub fn new(socket: S, sender_addr: SocketAddr, parameters: SessionParameters, timeouts: SessionTimeouts, max_payload_len: usize) -> Self {
        DatagramReceiver {
            socket,
            sender_addr,
            parameters,
            timeouts,
            max_payload_len,
        }
    }

    /// Returns an error for a failed handshake (a [`crate::session::HandshakeFailed`] inside
    ///  the `anyhow::Error`) or if the initial request can not be sent. Everything else ends
    ///  the session with a report.
    pub async fn run(self, receive_log: &mut dyn ReceiveLog) -> anyhow::Result<SessionReport> {
        let span = span!(Level::INFO, "udp_session", sender = %self.sender_addr);
        self.do_run(receive_log).instrument(span).await
    }

    async fn do_run(self, receive_log: &mut dyn ReceiveLog) -> anyhow::Result<SessionReport> {
        let mut session = Session::new(&self.parameters, &self.timeouts);
        let clock = ApplicationClock::new();

        let mut request = BytesMut::with_capacity(SessionParameters::SERIALIZED_LEN);
        self.parameters.ser(&mut request);

        self.socket.send_to(&request, self.sender_addr).await
            .context("failed to send initial NEW_SESSION request")?;
        info!("sent first NEW_SESSION request: {:?}", Packet::NewSession(self.parameters));

        let mut buf = BytesMut::zeroed(self.max_payload_len);
        let mut deadline = Instant::now() + session.current_timeout();

        let termination = loop {
            let received = match timeout_at(deadline, self.socket.recv(buf.as_mut())).await {
                Ok(received) => received,
                Err(_elapsed) => {
                    match session.on_timeout()? {
                        SessionAction::Retransmit { .. } => {
                            if let Err(e) = self.socket.send_to(&request, self.sender_addr).await {
                                warn!("failed to re-send NEW_SESSION request: {}", e);
                            }
                            deadline = Instant::now() + session.current_timeout();
                            continue;
                        }
                        SessionAction::Terminate(termination) => break termination,
                        SessionAction::Continue => {
                            deadline = Instant::now() + session.current_timeout();
                            continue;
                        }
                    }
                }
            };

            let datagram = match received {
                Ok(datagram) => datagram,
                Err(e) => {
                    warn!("socket error: {}", e);
                    continue;
                }
            };

            let arrival = clock.resolve(datagram.kernel_timestamp);
            let packet = match Packet::deser(&buf[..datagram.len]) {
                Ok(packet) => packet,
                Err(e) => {
                    debug!("dropping malformed packet: {}", e);
                    continue;
                }
            };
            trace!("received {:?}", packet);

            match session.on_packet(&packet, arrival) {
                SessionAction::Continue => {
                    if let Packet::Data { len } = packet {
                        if let Err(e) = receive_log.record(&arrival, len) {
                            warn!("failed to write receive log: {}", e);
                        }
                        deadline = Instant::now() + session.current_timeout();
                    }
                }
                SessionAction::Terminate(termination) => break termination,
                SessionAction::Retransmit { .. } => {}
            }
        };

        if let Err(e) = receive_log.flush() {
            warn!("failed to flush receive log: {}", e);
        }

        debug_assert_eq!(session.state(), SessionState::Terminated);
        Ok(SessionReport {
            termination,
            statistics: session.into_statistics(),
        })
    }
}
