//! Arrival timestamps for received data units.
//!
//! On UDP sockets the kernel attaches a receive timestamp to every datagram (`SO_TIMESTAMPNS`),
//!  which is taken as close to the wire as the network stack allows. Where that is not
//!  available - TCP (where read boundaries have nothing to do with packet boundaries), a
//!  platform without the socket option, or a datagram that arrived without ancillary data - the
//!  receiver samples the wall clock itself when the read completes. That fallback is
//!  considerably less precise, and [`ArrivalTime`] records which of the two was used.

use std::time::{Duration, SystemTime};
use tokio::time::Instant;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimestampSource {
    Kernel,
    Application,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ArrivalTime {
    pub at: SystemTime,
    pub source: TimestampSource,
}

impl ArrivalTime {
    pub fn kernel(at: SystemTime) -> ArrivalTime {
        ArrivalTime { at, source: TimestampSource::Kernel }
    }

    pub fn since_epoch(&self) -> Duration {
        self.at
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
    }
}

/// Application-level wall clock.
///
/// The wall clock is sampled once when the clock is created, and later readings add the
///  monotonic time that passed since then. This keeps the timestamps of one session monotonic
///  even if the system clock is adjusted while the session runs.
#[derive(Clone, Debug)]
pub struct ApplicationClock {
    wall_anchor: SystemTime,
    monotonic_anchor: Instant,
}

impl Default for ApplicationClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationClock {
    pub fn new() -> ApplicationClock {
        ApplicationClock {
            wall_anchor: SystemTime::now(),
            monotonic_anchor: Instant::now(),
        }
    }

    pub fn now(&self) -> ArrivalTime {
        ArrivalTime {
            at: self.wall_anchor + self.monotonic_anchor.elapsed(),
            source: TimestampSource::Application,
        }
    }

    /// Uses the kernel's receive timestamp if there is one, sampling the application clock
    ///  otherwise.
    pub fn resolve(&self, kernel_timestamp: Option<SystemTime>) -> ArrivalTime {
        match kernel_timestamp {
            Some(at) => ArrivalTime::kernel(at),
            None => self.now(),
        }
    }
}
