use std::io;
use std::net::SocketAddr;
use std::time::SystemTime;
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

/// A datagram as it came off the socket: its length in the receive buffer, and the kernel's
///  receive timestamp if the socket provided one
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ReceivedDatagram {
    pub len: usize,
    pub kernel_timestamp: Option<SystemTime>,
}

/// This is an abstraction for the UDP socket a session runs on, introduced to facilitate
///  replacing the I/O part for testing
#[async_trait]
pub trait DatagramSocket: Send + Sync + 'static {
    async fn send_to(&self, buf: &[u8], to: SocketAddr) -> io::Result<usize>;

    async fn recv(&self, buf: &mut [u8]) -> io::Result<ReceivedDatagram>;
}

/// A UDP socket that asks the kernel for a receive timestamp on every datagram
///  (`SO_TIMESTAMPNS`) and reads it from the ancillary data of `recvmsg`. If the platform does
///  not support this, the socket works without timestamps, and the receive loop falls back to
///  application timestamps.
pub struct TimestampingUdpSocket {
    inner: UdpSocket,
    kernel_timestamps: bool,
}

impl TimestampingUdpSocket {
    /// Binds to `local_addr` with `SO_REUSEADDR`. This must be called from inside a tokio
    ///  runtime.
    pub fn bind(local_addr: SocketAddr) -> anyhow::Result<TimestampingUdpSocket> {
        let socket = Socket::new(Domain::for_address(local_addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;

        let kernel_timestamps = match enable_kernel_timestamps(&socket) {
            Ok(()) => true,
            Err(e) => {
                warn!("kernel receive timestamps are not available ({}) - falling back to application timestamps", e);
                false
            }
        };

        socket.bind(&local_addr.into())?;
        socket.set_nonblocking(true)?;

        let inner = UdpSocket::from_std(socket.into())?;
        debug!("bound UDP socket to {:?}", inner.local_addr()?);
        Ok(TimestampingUdpSocket {
            inner,
            kernel_timestamps,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn has_kernel_timestamps(&self) -> bool {
        self.kernel_timestamps
    }
}

#[async_trait]
impl DatagramSocket for TimestampingUdpSocket {
    async fn send_to(&self, buf: &[u8], to: SocketAddr) -> io::Result<usize> {
        trace!("UDP socket: sending {} bytes to {:?}", buf.len(), to);
        self.inner.send_to(buf, to).await
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<ReceivedDatagram> {
        if !self.kernel_timestamps {
            let (len, _) = self.inner.recv_from(buf).await?;
            return Ok(ReceivedDatagram { len, kernel_timestamp: None });
        }

        loop {
            self.inner.readable().await?;
            match self.inner.try_io(tokio::io::Interest::READABLE, || recv_with_kernel_timestamp(&self.inner, &mut *buf)) {
                Ok(datagram) => return Ok(datagram),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn enable_kernel_timestamps(socket: &Socket) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let enable: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_TIMESTAMPNS,
            &enable as *const libc::c_int as *const libc::c_void,
            size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn enable_kernel_timestamps(_socket: &Socket) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "SO_TIMESTAMPNS is only supported on Linux"))
}

/// Non-blocking `recvmsg`, picking the `SCM_TIMESTAMPNS` control message from the ancillary data
#[cfg(target_os = "linux")]
fn recv_with_kernel_timestamp(socket: &UdpSocket, buf: &mut [u8]) -> io::Result<ReceivedDatagram> {
    use std::mem;
    use std::os::fd::AsRawFd;
    use std::time::Duration;

    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };
    // u64 for cmsghdr alignment; room for a timestamp and then some
    let mut control = [0u64; 16];

    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = mem::size_of_val(&control) as _;

    let num_read = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, libc::MSG_DONTWAIT) };
    if num_read < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut kernel_timestamp = None;
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_TIMESTAMPNS {
                let ts = std::ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const libc::timespec);
                kernel_timestamp = Some(SystemTime::UNIX_EPOCH + Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32));
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    Ok(ReceivedDatagram {
        len: num_read as usize,
        kernel_timestamp,
    })
}

#[cfg(not(target_os = "linux"))]
fn recv_with_kernel_timestamp(socket: &UdpSocket, buf: &mut [u8]) -> io::Result<ReceivedDatagram> {
    let (len, _) = socket.try_recv_from(buf)?;
    Ok(ReceivedDatagram { len, kernel_timestamp: None })
}
