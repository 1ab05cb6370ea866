//! The receiving side of a point-to-point bandwidth measurement: the receiver asks a sender for
//!  a timed stream of data at a given rate, collects it, and estimates the throughput from the
//!  arrival timestamps.
//!
//! ## UDP
//!
//! The receiver sends a `NEW_SESSION` request and re-sends it every few seconds until data
//!  arrives, giving up after a configured number of re-sends. The session ends when the sender
//!  signals the end of the session, or after a period of silence following the most recent data
//!  packet. Data packets are timestamped by the kernel (`SO_TIMESTAMPNS`) where possible.
//!
//! All numbers in network byte order (BE):
//!
//! ```ascii
//! 0: packet type (u8)
//!    * 0 NEW_SESSION  receiver -> sender
//!    * 1 DATA         sender -> receiver
//!    * 2 END_SESSION  sender -> receiver
//!    * 3 SENDER_FULL  sender -> receiver
//! ```
//!
//! *NEW_SESSION*
//!
//! ```ascii
//! 1: duration in seconds (u16)
//! 3: bandwidth in Mbit/s (u16)
//! 5: payload length in bytes (u16) - the size of each DATA datagram, header included
//! ```
//!
//! *DATA* is followed by opaque filler up to the requested payload length; *END_SESSION* and
//!  *SENDER_FULL* have no payload.
//!
//! ## TCP
//!
//! There is no handshake: the sender starts writing when the connection is established, and
//!  the receiver reads until the connection is closed or the requested duration has passed since
//!  the first byte. Reads are timestamped by the application, which is less precise.
//!
//! ## Estimate
//!
//! The estimate is `bytes * 8 / 1_000_000 / interval` where the interval runs from the first to
//!  the most recent data arrival.

pub mod config;
pub mod datagram_socket;
pub mod end_point;
pub mod packet;
pub mod receive_log;
pub mod receive_loop;
pub mod session;
pub mod statistics;
pub mod stream_receiver;
pub mod timestamp;

#[cfg(test)]
pub mod test_util;

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            // .with_max_level(Level::DEBUG)
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
