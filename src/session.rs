//! The receiver's side of a UDP measurement session as a pure state machine - no I/O, no
//!  clock. The receive loop feeds it timeouts and decoded packets and acts on the returned
//!  [`SessionAction`]s.
//!
//! ```ascii
//!             Data                     EndSession / timeout
//!  Starting ---------> Receiving ------------------------------> Terminated
//!     |                                                              ^
//!     |  SenderFull / EndSession / timeout after the last retry      |
//!     +--------------------------------------------------------------+
//! ```

use std::fmt::{Display, Formatter};
use std::time::Duration;
use tracing::{debug, info, warn};
use crate::config::SessionTimeouts;
use crate::packet::{Packet, SessionParameters};
use crate::statistics::ReceiveStatistics;
use crate::timestamp::ArrivalTime;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// The `NewSession` request was sent, no data arrived yet
    Starting,
    /// At least one data packet arrived
    Receiving,
    Terminated,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Termination {
    /// The sender signalled that it finished
    EndSession,
    /// No data arrived for the steady-state timeout after the most recent data packet
    ReceiveTimeout,
    /// The sender rejected the session because it is serving the maximum number of clients
    SenderFull,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionAction {
    Continue,
    /// The `NewSession` request should be sent again; `attempt` counts the re-sends
    Retransmit { attempt: u8 },
    Terminate(Termination),
}

/// The sender did not reply to any of the `NewSession` requests
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HandshakeFailed {
    pub requests_sent: u32,
}

impl Display for HandshakeFailed {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "did not receive any reply to {} NEW_SESSION requests", self.requests_sent)
    }
}

impl std::error::Error for HandshakeFailed {}

pub struct Session {
    state: SessionState,
    termination: Option<Termination>,
    consecutive_retransmissions: u8,
    retransmission_threshold: u8,
    new_session_timeout: Duration,
    steady_state_timeout: Duration,
    statistics: ReceiveStatistics,
}

impl Session {
    pub fn new(parameters: &SessionParameters, timeouts: &SessionTimeouts) -> Session {
        Session {
            state: SessionState::Starting,
            termination: None,
            consecutive_retransmissions: 0,
            retransmission_threshold: timeouts.retransmission_threshold,
            new_session_timeout: timeouts.new_session_timeout,
            steady_state_timeout: timeouts.steady_state_timeout(parameters),
            statistics: ReceiveStatistics::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }

    pub fn consecutive_retransmissions(&self) -> u8 {
        self.consecutive_retransmissions
    }

    pub fn statistics(&self) -> &ReceiveStatistics {
        &self.statistics
    }

    pub fn into_statistics(self) -> ReceiveStatistics {
        self.statistics
    }

    /// The time to wait for the next packet, measured from the most recent request (while
    ///  starting) or the most recent data packet (while receiving)
    pub fn current_timeout(&self) -> Duration {
        match self.state {
            SessionState::Starting => self.new_session_timeout,
            SessionState::Receiving | SessionState::Terminated => self.steady_state_timeout,
        }
    }

    pub fn on_timeout(&mut self) -> Result<SessionAction, HandshakeFailed> {
        match self.state {
            SessionState::Starting => {
                if self.consecutive_retransmissions >= self.retransmission_threshold {
                    warn!("did not receive any reply to NEW_SESSION, aborting");
                    self.state = SessionState::Terminated;
                    return Err(HandshakeFailed {
                        requests_sent: u32::from(self.consecutive_retransmissions) + 1,
                    });
                }
                self.consecutive_retransmissions += 1;
                info!("retransmitting NEW_SESSION, consecutive retransmissions {}", self.consecutive_retransmissions);
                Ok(SessionAction::Retransmit { attempt: self.consecutive_retransmissions })
            }
            SessionState::Receiving => {
                info!("{:?} passed without any traffic, ending session", self.steady_state_timeout);
                Ok(self.terminate(Termination::ReceiveTimeout))
            }
            SessionState::Terminated => Ok(self.terminated_action()),
        }
    }

    pub fn on_packet(&mut self, packet: &Packet, arrival: ArrivalTime) -> SessionAction {
        if self.state == SessionState::Terminated {
            debug!("session is terminated - ignoring {:?}", packet);
            return self.terminated_action();
        }

        match packet {
            Packet::Data { len } => {
                if self.state == SessionState::Starting {
                    debug!("first data packet - session established");
                    self.state = SessionState::Receiving;
                }
                self.statistics.record(arrival, *len);
                self.consecutive_retransmissions = 0;
                SessionAction::Continue
            }
            Packet::EndSession => {
                info!("end of session");
                self.terminate(Termination::EndSession)
            }
            Packet::SenderFull => {
                info!("sender is full, can't serve more clients");
                self.terminate(Termination::SenderFull)
            }
            Packet::NewSession(_) => {
                warn!("received unexpected {:?} - ignoring", packet);
                SessionAction::Continue
            }
        }
    }

    fn terminate(&mut self, termination: Termination) -> SessionAction {
        self.state = SessionState::Terminated;
        self.termination = Some(termination);
        SessionAction::Terminate(termination)
    }

    fn terminated_action(&self) -> SessionAction {
        // the only way to be terminated without a termination is a failed handshake
        SessionAction::Terminate(self.termination.unwrap_or(Termination::ReceiveTimeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;
    use rstest::rstest;
    use crate::statistics::BandwidthEstimate;

    fn parameters() -> SessionParameters {
        SessionParameters { bandwidth_mbps: 10, duration_secs: 5, payload_len: 1000 }
    }

    fn timeouts(retransmission_threshold: u8) -> SessionTimeouts {
        SessionTimeouts {
            new_session_timeout: Duration::from_secs(2),
            default_timeout: Duration::from_secs(30),
            retransmission_threshold,
        }
    }

    fn arrival(millis: u64) -> ArrivalTime {
        ArrivalTime::kernel(SystemTime::UNIX_EPOCH + Duration::from_millis(millis))
    }

    #[test]
    fn test_initial_state() {
        let session = Session::new(&parameters(), &timeouts(3));
        assert_eq!(session.state(), SessionState::Starting);
        assert_eq!(session.consecutive_retransmissions(), 0);
        assert_eq!(session.current_timeout(), Duration::from_secs(2));
        assert_eq!(session.statistics(), &ReceiveStatistics::default());
    }

    #[rstest]
    #[case::no_retransmission(0)]
    #[case::one(1)]
    #[case::three(3)]
    #[case::ten(10)]
    fn test_handshake_failure_after_threshold(#[case] threshold: u8) {
        let mut session = Session::new(&parameters(), &timeouts(threshold));

        for attempt in 1..=threshold {
            assert_eq!(session.on_timeout(), Ok(SessionAction::Retransmit { attempt }));
            assert!(session.consecutive_retransmissions() <= threshold);
        }
        assert_eq!(session.on_timeout(), Err(HandshakeFailed { requests_sent: u32::from(threshold) + 1 }));
        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(session.consecutive_retransmissions(), threshold);
        assert_eq!(session.statistics().estimate(), BandwidthEstimate::NoData);
    }

    #[test]
    fn test_first_data_establishes_session() {
        let mut session = Session::new(&parameters(), &timeouts(3));
        assert_eq!(session.on_timeout(), Ok(SessionAction::Retransmit { attempt: 1 }));
        assert_eq!(session.on_timeout(), Ok(SessionAction::Retransmit { attempt: 2 }));

        assert_eq!(session.on_packet(&Packet::Data { len: 1000 }, arrival(100)), SessionAction::Continue);

        assert_eq!(session.state(), SessionState::Receiving);
        assert_eq!(session.consecutive_retransmissions(), 0);
        assert_eq!(session.current_timeout(), Duration::from_secs(30));
        assert_eq!(session.statistics().first_arrival(), Some(arrival(100)));
    }

    #[test]
    fn test_steady_state_timeout_uses_requested_duration_if_longer() {
        let parameters = SessionParameters { bandwidth_mbps: 10, duration_secs: 45, payload_len: 1000 };
        let mut session = Session::new(&parameters, &timeouts(3));
        session.on_packet(&Packet::Data { len: 1000 }, arrival(0));
        assert_eq!(session.current_timeout(), Duration::from_secs(45));
    }

    #[test]
    fn test_data_accounting() {
        let mut session = Session::new(&parameters(), &timeouts(3));
        let lengths = [1000, 1472, 1, 999, 1000];
        for (i, len) in lengths.iter().enumerate() {
            session.on_packet(&Packet::Data { len: *len }, arrival(i as u64 * 10));
        }

        assert_eq!(session.statistics().total_bytes(), lengths.iter().sum::<usize>() as u64);
        assert_eq!(session.statistics().data_units(), 5);
        assert_eq!(session.statistics().first_arrival(), Some(arrival(0)));
        assert_eq!(session.statistics().last_arrival(), Some(arrival(40)));
    }

    #[rstest]
    #[case::end_session_while_starting(false, Packet::EndSession, Termination::EndSession)]
    #[case::end_session_while_receiving(true, Packet::EndSession, Termination::EndSession)]
    #[case::sender_full_while_starting(false, Packet::SenderFull, Termination::SenderFull)]
    #[case::sender_full_while_receiving(true, Packet::SenderFull, Termination::SenderFull)]
    fn test_terminating_packets(#[case] receiving: bool, #[case] packet: Packet, #[case] expected: Termination) {
        let mut session = Session::new(&parameters(), &timeouts(3));
        if receiving {
            session.on_packet(&Packet::Data { len: 100 }, arrival(0));
        }

        assert_eq!(session.on_packet(&packet, arrival(10)), SessionAction::Terminate(expected));
        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(session.termination(), Some(expected));
    }

    #[test]
    fn test_timeout_while_receiving_terminates_normally() {
        let mut session = Session::new(&parameters(), &timeouts(3));
        session.on_packet(&Packet::Data { len: 100 }, arrival(0));

        assert_eq!(session.on_timeout(), Ok(SessionAction::Terminate(Termination::ReceiveTimeout)));
        assert_eq!(session.statistics().total_bytes(), 100);
    }

    #[test]
    fn test_no_updates_after_termination() {
        let mut session = Session::new(&parameters(), &timeouts(3));
        session.on_packet(&Packet::Data { len: 100 }, arrival(0));
        session.on_packet(&Packet::EndSession, arrival(10));
        let before = session.statistics().clone();

        assert_eq!(session.on_packet(&Packet::Data { len: 100 }, arrival(20)), SessionAction::Terminate(Termination::EndSession));
        assert_eq!(session.on_timeout(), Ok(SessionAction::Terminate(Termination::EndSession)));
        assert_eq!(session.statistics(), &before);
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[test]
    fn test_unexpected_new_session_is_ignored() {
        let mut session = Session::new(&parameters(), &timeouts(3));
        assert_eq!(session.on_packet(&Packet::NewSession(parameters()), arrival(0)), SessionAction::Continue);
        assert_eq!(session.state(), SessionState::Starting);
        assert_eq!(session.statistics(), &ReceiveStatistics::default());
    }

    #[test]
    fn test_state_never_returns_to_starting() {
        let mut session = Session::new(&parameters(), &timeouts(3));
        session.on_packet(&Packet::Data { len: 100 }, arrival(0));
        session.on_packet(&Packet::NewSession(parameters()), arrival(1));
        session.on_packet(&Packet::Data { len: 100 }, arrival(2));
        assert_eq!(session.state(), SessionState::Receiving);
    }
}
