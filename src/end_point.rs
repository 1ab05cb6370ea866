use std::net::{IpAddr, SocketAddr};
use anyhow::{anyhow, Context};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tracing::{debug, info};
use crate::config::{ReceiverConfig, Transport};
use crate::datagram_socket::TimestampingUdpSocket;
use crate::receive_log::{NoReceiveLog, ReceiveLog, TimestampPrecision, WriterReceiveLog};
use crate::receive_loop::DatagramReceiver;
use crate::session::Termination;
use crate::statistics::BandwidthEstimate;
use crate::stream_receiver::StreamReceiver;

#[derive(Clone, Debug, PartialEq)]
pub enum MeasurementOutcome {
    /// The session ended normally - this includes sessions that did not receive any data
    Measured(BandwidthEstimate),
    /// The sender refused the session because it is at capacity
    AdmissionRejected,
}

/// EndPoint is the place where the parts of the receiver come together: it validates the
///  configuration, resolves the sender's address, sets up the local socket for the configured
///  transport and runs one measurement session on it.
pub struct EndPoint {
    config: ReceiverConfig,
}

impl EndPoint {
    pub fn new(config: ReceiverConfig) -> anyhow::Result<EndPoint> {
        config.validate()?;
        Ok(EndPoint { config })
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    pub async fn run(&self) -> anyhow::Result<MeasurementOutcome> {
        let mut receive_log = self.create_receive_log()?;

        let source_ip = resolve_source_ip(&self.config.source_ip).await?;
        let sender_addr = resolve_sender_addr(&self.config.sender_host, self.config.sender_port, source_ip).await?;
        info!("sender {}", sender_addr);

        match self.config.transport {
            Transport::Datagram => self.run_datagram(source_ip, sender_addr, receive_log.as_mut()).await,
            Transport::Stream => self.run_stream(source_ip, sender_addr, receive_log.as_mut()).await,
        }
    }

    fn create_receive_log(&self) -> anyhow::Result<Box<dyn ReceiveLog>> {
        let precision = match self.config.transport {
            Transport::Datagram => TimestampPrecision::Nanos,
            Transport::Stream => TimestampPrecision::Micros,
        };
        Ok(match &self.config.output_file {
            Some(path) => Box::new(WriterReceiveLog::create(path, precision)?),
            None => Box::new(NoReceiveLog),
        })
    }

    async fn run_datagram(&self, source_ip: IpAddr, sender_addr: SocketAddr, receive_log: &mut dyn ReceiveLog) -> anyhow::Result<MeasurementOutcome> {
        let socket = TimestampingUdpSocket::bind(SocketAddr::new(source_ip, 0))
            .with_context(|| format!("binding to local IP {} failed", source_ip))?;
        info!("bound UDP socket to {:?}", socket.local_addr()?);

        let report = DatagramReceiver::new(
            socket,
            sender_addr,
            self.config.session_parameters(),
            self.config.timeouts.clone(),
            self.config.max_payload_len,
        )
            .run(receive_log)
            .await?;

        debug!("session ended: {:?}", report.termination);
        Ok(match report.termination {
            Termination::SenderFull => MeasurementOutcome::AdmissionRejected,
            Termination::EndSession | Termination::ReceiveTimeout => MeasurementOutcome::Measured(report.statistics.estimate()),
        })
    }

    async fn run_stream(&self, source_ip: IpAddr, sender_addr: SocketAddr, receive_log: &mut dyn ReceiveLog) -> anyhow::Result<MeasurementOutcome> {
        let stream = connect_stream(source_ip, sender_addr).await?;
        info!("connected to {} from {:?}", sender_addr, stream.local_addr()?);

        let report = StreamReceiver::new(stream, self.config.duration(), self.config.max_payload_len)
            .run(receive_log)
            .await;

        debug!("session ended: {:?}", report.termination);
        Ok(MeasurementOutcome::Measured(report.statistics.estimate()))
    }
}

async fn resolve_source_ip(source: &str) -> anyhow::Result<IpAddr> {
    if let Ok(ip) = source.parse::<IpAddr>() {
        return Ok(ip);
    }
    lookup_host((source, 0)).await
        .with_context(|| format!("failed to resolve source address {}", source))?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| anyhow!("no address found for source {}", source))
}

/// Picks the first resolved address of the same IP version as the local address, or the first
///  resolved address if there is none
async fn resolve_sender_addr(host: &str, port: u16, source_ip: IpAddr) -> anyhow::Result<SocketAddr> {
    let candidates: Vec<SocketAddr> = lookup_host((host, port)).await
        .with_context(|| format!("could not resolve sender address {}:{} - is the address correct?", host, port))?
        .collect();

    candidates.iter()
        .find(|addr| addr.is_ipv4() == source_ip.is_ipv4())
        .or(candidates.first())
        .copied()
        .ok_or_else(|| anyhow!("no address found for sender {}:{}", host, port))
}

async fn connect_stream(source_ip: IpAddr, sender_addr: SocketAddr) -> anyhow::Result<TcpStream> {
    let socket = if source_ip.is_ipv4() {
        TcpSocket::new_v4()?
    }
    else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::new(source_ip, 0))
        .with_context(|| format!("binding to local IP {} failed", source_ip))?;

    socket.connect(sender_addr).await
        .with_context(|| format!("could not connect to sender {}", sender_addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use rstest::rstest;

    #[tokio::test]
    async fn test_resolve_literal_source_ip() {
        assert_eq!(resolve_source_ip("127.0.0.1").await.unwrap(), IpAddr::from_str("127.0.0.1").unwrap());
        assert_eq!(resolve_source_ip("::1").await.unwrap(), IpAddr::from_str("::1").unwrap());
    }

    #[rstest]
    #[case::v4("127.0.0.1", "127.0.0.1", "127.0.0.1:7000")]
    #[case::v6("::1", "::1", "[::1]:7000")]
    #[case::mixed_falls_back_to_first("::1", "127.0.0.1", "127.0.0.1:7000")]
    #[tokio::test]
    async fn test_resolve_sender_addr(#[case] source: &str, #[case] host: &str, #[case] expected: &str) {
        let source_ip = IpAddr::from_str(source).unwrap();
        assert_eq!(
            resolve_sender_addr(host, 7000, source_ip).await.unwrap(),
            SocketAddr::from_str(expected).unwrap(),
        );
    }

    #[test]
    fn test_invalid_config_is_rejected_before_networking() {
        let config = ReceiverConfig::new(Transport::Datagram, "127.0.0.1", "127.0.0.1", 7000);
        assert!(EndPoint::new(config).is_err());
    }
}
