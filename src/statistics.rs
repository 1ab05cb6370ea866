use std::fmt::{Display, Formatter};
use std::time::{Duration, SystemTime};
use crate::timestamp::ArrivalTime;

/// Byte and time accounting for one session.
///
/// The measured interval runs from the first to the most recent *data* arrival, so handshake
///  latency and the silence before a receive timeout never enter the estimate.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReceiveStatistics {
    total_bytes: u64,
    data_units: u64,
    first_arrival: Option<ArrivalTime>,
    last_arrival: Option<ArrivalTime>,
}

impl ReceiveStatistics {
    pub fn record(&mut self, arrival: ArrivalTime, len: usize) {
        if self.first_arrival.is_none() {
            self.first_arrival = Some(arrival);
        }
        self.last_arrival = Some(arrival);
        self.total_bytes += len as u64;
        self.data_units += 1;
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn data_units(&self) -> u64 {
        self.data_units
    }

    pub fn first_arrival(&self) -> Option<ArrivalTime> {
        self.first_arrival
    }

    pub fn last_arrival(&self) -> Option<ArrivalTime> {
        self.last_arrival
    }

    /// Time between first and most recent arrival, zero if there was at most one arrival.
    ///  Timestamps that went backwards count as zero as well.
    pub fn interval(&self) -> Duration {
        match (self.first_arrival, self.last_arrival) {
            (Some(first), Some(last)) => last.at
                .duration_since(first.at)
                .unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        }
    }

    pub fn elapsed_since_first(&self, now: SystemTime) -> Option<Duration> {
        self.first_arrival
            .map(|first| now.duration_since(first.at).unwrap_or(Duration::ZERO))
    }

    pub fn estimate(&self) -> BandwidthEstimate {
        if self.total_bytes == 0 {
            return BandwidthEstimate::NoData;
        }

        let interval = self.interval();
        if interval.is_zero() {
            return BandwidthEstimate::SingleInstant { total_bytes: self.total_bytes };
        }

        BandwidthEstimate::Estimated {
            total_bytes: self.total_bytes,
            interval,
            mbps: ((self.total_bytes as f64 / 1_000_000.0) * 8.0) / interval.as_secs_f64(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BandwidthEstimate {
    NoData,
    /// All data arrived at the same instant, so there is no interval to divide by
    SingleInstant { total_bytes: u64 },
    Estimated {
        total_bytes: u64,
        interval: Duration,
        mbps: f64,
    },
}

impl Display for BandwidthEstimate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BandwidthEstimate::NoData => write!(f, "Received no data from sender"),
            BandwidthEstimate::SingleInstant { total_bytes } => write!(f, "Received {} bytes in a single data unit, cannot estimate bandwidth", total_bytes),
            BandwidthEstimate::Estimated { total_bytes, interval, mbps } => write!(f, "Received {} bytes in {:.2} seconds. Estimated bandwidth {:.2} Mbit/s",
                total_bytes,
                interval.as_secs_f64(),
                mbps,
            ),
        }
    }
}
