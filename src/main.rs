use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use clap::Parser;
use clap_derive::Parser;
use tracing::{error, info, Level};
use bwrecv::config::{ReceiverConfig, SessionTimeouts, Transport, MAX_PAYLOAD_LEN};
use bwrecv::end_point::{EndPoint, MeasurementOutcome};
use bwrecv::session::HandshakeFailed;

/// Requests a timed data stream from a bandwidth measurement sender and estimates the
///  bandwidth from what arrives
#[derive(Parser)]
struct Args {
    /// requested bandwidth in Mbit/s (UDP only)
    #[clap(short, long, default_value_t = 0)]
    bandwidth: u16,

    /// requested duration in seconds
    #[clap(short = 't', long)]
    duration: u16,

    /// size of each data packet in bytes, header included (UDP only)
    #[clap(short = 'l', long, default_value_t = 0)]
    payload_len: u16,

    /// local address to bind to
    #[clap(short, long)]
    source_ip: String,

    /// address of the sender
    #[clap(short, long)]
    destination: String,

    /// port of the sender
    #[clap(short, long)]
    port: u16,

    /// use TCP instead of UDP
    #[clap(short, long, default_value_t = false)]
    reliable: bool,

    /// write one line per received data unit to this file
    #[clap(short = 'w', long)]
    output_file: Option<PathBuf>,

    /// seconds to wait for data before re-sending the session request
    #[clap(long, default_value_t = 5)]
    new_session_timeout: u64,

    /// minimum seconds of silence after the last data packet that end a session
    #[clap(long, default_value_t = 60)]
    default_timeout: u64,

    /// number of unanswered session request re-sends before giving up
    #[clap(long, default_value_t = 10)]
    retransmissions: u8,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

impl Args {
    fn to_config(&self) -> ReceiverConfig {
        let transport = if self.reliable { Transport::Stream } else { Transport::Datagram };
        ReceiverConfig {
            bandwidth_mbps: self.bandwidth,
            duration_secs: self.duration,
            payload_len: self.payload_len,
            output_file: self.output_file.clone(),
            timeouts: SessionTimeouts {
                new_session_timeout: Duration::from_secs(self.new_session_timeout),
                default_timeout: Duration::from_secs(self.default_timeout),
                retransmission_threshold: self.retransmissions,
            },
            max_payload_len: MAX_PAYLOAD_LEN,
            ..ReceiverConfig::new(transport, &self.source_ip, &self.destination, self.port)
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let config = args.to_config();
    println!("Bandwidth: {} Mbit/s, Duration: {} s, Payload length: {} bytes, Transport: {}",
             config.bandwidth_mbps,
             config.duration_secs,
             config.payload_len,
             match config.transport {
                 Transport::Datagram => "UDP",
                 Transport::Stream => "TCP",
             });

    match run(config).await {
        Ok(MeasurementOutcome::Measured(estimate)) => {
            println!("{}", estimate);
            ExitCode::SUCCESS
        }
        Ok(MeasurementOutcome::AdmissionRejected) => {
            info!("the sender is serving the maximum number of sessions - try again later");
            ExitCode::FAILURE
        }
        Err(e) => {
            if let Some(handshake_failed) = e.downcast_ref::<HandshakeFailed>() {
                error!("{} - is the sender running?", handshake_failed);
            }
            else {
                error!("{:#}", e);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ReceiverConfig) -> anyhow::Result<MeasurementOutcome> {
    EndPoint::new(config)?
        .run()
        .await
}
