use std::time::Duration;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, span, trace, warn, Instrument, Level};
use crate::receive_log::ReceiveLog;
use crate::statistics::ReceiveStatistics;
use crate::timestamp::ApplicationClock;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StreamTermination {
    /// The sender closed the connection (or it broke down)
    PeerClosed,
    /// More than the requested duration passed since the first byte arrived
    DurationElapsed,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamReport {
    pub termination: StreamTermination,
    pub statistics: ReceiveStatistics,
}

/// Receives a TCP stream without any handshake - the sender starts sending when the connection
///  is established.
///
/// TCP coalesces and splits writes as it sees fit, so there are no packets to timestamp. Every
///  completed read is timestamped by the application instead, which makes the estimate less
///  precise than on the UDP path.
///
/// The stream ends when the sender closes the connection or when more than the requested
///  duration passed since the *first* byte. This differs from the UDP path, where the session
///  ends after a period of silence since the *last* data packet.
pub struct StreamReceiver<R: AsyncRead + Unpin> {
    reader: R,
    duration: Duration,
    max_read_len: usize,
}

impl<R: AsyncRead + Unpin> StreamReceiver<R> {
    pub fn new(reader: R, duration: Duration, max_read_len: usize) -> Self {
        StreamReceiver {
            reader,
            duration,
            max_read_len,
        }
    }

    pub async fn run(self, receive_log: &mut dyn ReceiveLog) -> StreamReport {
        let span = span!(Level::INFO, "tcp_session");
        self.do_run(receive_log).instrument(span).await
    }

    async fn do_run(mut self, receive_log: &mut dyn ReceiveLog) -> StreamReport {
        let clock = ApplicationClock::new();
        let mut statistics = ReceiveStatistics::default();
        let mut buf = BytesMut::zeroed(self.max_read_len);

        let termination = loop {
            let num_read = match self.reader.read(buf.as_mut()).await {
                Ok(0) => {
                    info!("sender closed the connection");
                    break StreamTermination::PeerClosed;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!("connection error: {} - ending session", e);
                    break StreamTermination::PeerClosed;
                }
            };

            let arrival = clock.now();
            trace!("read {} bytes", num_read);
            statistics.record(arrival, num_read);
            if let Err(e) = receive_log.record(&arrival, num_read) {
                warn!("failed to write receive log: {}", e);
            }

            if statistics.elapsed_since_first(arrival.at).unwrap_or(Duration::ZERO) > self.duration {
                debug!("requested duration of {:?} elapsed", self.duration);
                break StreamTermination::DurationElapsed;
            }
        };

        if let Err(e) = receive_log.flush() {
            warn!("failed to flush receive log: {}", e);
        }

        StreamReport {
            termination,
            statistics,
        }
    }
}
