use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use anyhow::Context;
#[cfg(test)] use mockall::automock;
use crate::timestamp::ArrivalTime;

/// Sub-second resolution of the timestamps in a receive log. Kernel timestamps of datagrams
///  have nanosecond resolution, while TCP reads are timestamped with microsecond resolution.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimestampPrecision {
    Nanos,
    Micros,
}

impl TimestampPrecision {
    /// `<seconds>.<fraction> <byte count>`, the fraction zero padded to the precision's width
    pub fn format_line(&self, arrival: &ArrivalTime, len: usize) -> String {
        let since_epoch = arrival.since_epoch();
        match self {
            TimestampPrecision::Nanos => format!("{}.{:09} {}", since_epoch.as_secs(), since_epoch.subsec_nanos(), len),
            TimestampPrecision::Micros => format!("{}.{:06} {}", since_epoch.as_secs(), since_epoch.subsec_micros(), len),
        }
    }
}

/// Sink for one line per received data unit. Writing to disk takes time, so the sink is
///  optional and buffered.
#[cfg_attr(test, automock)]
pub trait ReceiveLog: Send {
    fn record(&mut self, arrival: &ArrivalTime, len: usize) -> anyhow::Result<()>;

    fn flush(&mut self) -> anyhow::Result<()>;
}

pub struct NoReceiveLog;

impl ReceiveLog for NoReceiveLog {
    fn record(&mut self, _arrival: &ArrivalTime, _len: usize) -> anyhow::Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct WriterReceiveLog<W: Write + Send> {
    writer: W,
    precision: TimestampPrecision,
}

impl WriterReceiveLog<BufWriter<File>> {
    pub fn create(path: &Path, precision: TimestampPrecision) -> anyhow::Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to open output file {:?}", path))?;
        Ok(Self::new(BufWriter::new(file), precision))
    }
}

impl<W: Write + Send> WriterReceiveLog<W> {
    pub fn new(writer: W, precision: TimestampPrecision) -> Self {
        WriterReceiveLog { writer, precision }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> ReceiveLog for WriterReceiveLog<W> {
    fn record(&mut self, arrival: &ArrivalTime, len: usize) -> anyhow::Result<()> {
        writeln!(self.writer, "{}", self.precision.format_line(arrival, len))?;
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
