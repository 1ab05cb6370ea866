//! Utilities for testing receive loops without a network: a datagram socket that plays back a
//!  script of timed datagrams against tokio's (paused) clock.

pub mod scripted_socket;
