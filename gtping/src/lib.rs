//! GTP-C echo latency probe.
//!
//! Sends GTP echo requests to a single target over a connected UDP socket,
//! times the echo responses and keeps ping-style loss and RTT statistics.
//!
//! - [`packet`]    wire format of the 12 byte echo header
//! - [`tracker`]   send-time ring, duplicate/reorder detection, RTT stats
//! - [`transport`] the socket seen by the probe, and its UDP implementation
//! - [`probe`]     the send/receive loop and its state machine
//! - [`report`]    console and JSON rendering of results

pub mod clock;
pub mod config;
pub mod error;
pub mod packet;
pub mod probe;
pub mod report;
pub mod tracker;
pub mod transport;

pub use clock::{Clock, MonotonicClock};
pub use config::ProbeConfig;
pub use error::ProbeError;
pub use probe::{Probe, RunReport};
pub use report::{ConsoleReporter, JsonReporter, Reporter};
pub use transport::{Transport, UdpTransport};
