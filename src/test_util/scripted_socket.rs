use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use async_trait::async_trait;
use tokio::time::{sleep_until, Instant};
use crate::datagram_socket::{DatagramSocket, ReceivedDatagram};
use crate::packet::PacketKind;

struct ScriptedDatagram {
    at: Instant,
    payload: Result<Vec<u8>, io::ErrorKind>,
    kernel_timestamp: Option<SystemTime>,
}

/// Delivers each scripted datagram at its offset from the socket's creation time. A datagram
///  is only consumed when it is actually delivered, so a receive that is cancelled by a timeout
///  leaves it for the next receive. When the script is exhausted, receiving blocks forever.
///
/// Everything that is sent is recorded and can be inspected through [`ScriptedSocket::sent`].
pub struct ScriptedSocket {
    start: Instant,
    script: Mutex<VecDeque<ScriptedDatagram>>,
    sent: Arc<Mutex<Vec<(SocketAddr, Vec<u8>)>>>,
    fail_sends: bool,
}

impl ScriptedSocket {
    pub fn new() -> ScriptedSocket {
        ScriptedSocket {
            start: Instant::now(),
            script: Mutex::new(VecDeque::new()),
            sent: Default::default(),
            fail_sends: false,
        }
    }

    pub fn failing_sends() -> ScriptedSocket {
        ScriptedSocket {
            fail_sends: true,
            ..Self::new()
        }
    }

    /// offsets must be added in ascending order
    pub fn deliver_at(self, offset: Duration, datagram: Vec<u8>) -> Self {
        self.push(offset, Ok(datagram), None)
    }

    pub fn deliver_with_kernel_timestamp_at(self, offset: Duration, datagram: Vec<u8>, kernel_timestamp: SystemTime) -> Self {
        self.push(offset, Ok(datagram), Some(kernel_timestamp))
    }

    pub fn fail_at(self, offset: Duration, kind: io::ErrorKind) -> Self {
        self.push(offset, Err(kind), None)
    }

    fn push(self, offset: Duration, payload: Result<Vec<u8>, io::ErrorKind>, kernel_timestamp: Option<SystemTime>) -> Self {
        self.script.lock().unwrap().push_back(ScriptedDatagram {
            at: self.start + offset,
            payload,
            kernel_timestamp,
        });
        self
    }

    pub fn sent(&self) -> Arc<Mutex<Vec<(SocketAddr, Vec<u8>)>>> {
        self.sent.clone()
    }
}

#[async_trait]
impl DatagramSocket for ScriptedSocket {
    async fn send_to(&self, buf: &[u8], to: SocketAddr) -> io::Result<usize> {
        if self.fail_sends {
            return Err(io::ErrorKind::ConnectionRefused.into());
        }
        self.sent.lock().unwrap().push((to, buf.to_vec()));
        Ok(buf.len())
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<ReceivedDatagram> {
        let next_at = self.script.lock().unwrap()
            .front()
            .map(|d| d.at);

        let Some(at) = next_at else {
            return std::future::pending().await;
        };
        sleep_until(at).await;

        let datagram = self.script.lock().unwrap()
            .pop_front()
            .expect("script should only be consumed by one receiver");

        let payload = datagram.payload.map_err(io::Error::from)?;
        let len = payload.len().min(buf.len());
        buf[..len].copy_from_slice(&payload[..len]);
        Ok(ReceivedDatagram {
            len,
            kernel_timestamp: datagram.kernel_timestamp,
        })
    }
}

pub fn data_packet(len: usize) -> Vec<u8> {
    let mut datagram = vec![0xa5; len];
    datagram[0] = PacketKind::Data.into();
    datagram
}

pub fn end_session_packet() -> Vec<u8> {
    vec![PacketKind::EndSession.into()]
}

pub fn sender_full_packet() -> Vec<u8> {
    vec![PacketKind::SenderFull.into()]
}
