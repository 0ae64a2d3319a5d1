//! Errors that end a probe run.
//!
//! Soft failures (refused or unreachable destination, interrupted waits,
//! malformed replies) are absorbed by the probe loop and only show up in its
//! counters; whatever reaches the caller as a [`ProbeError`] is fatal.

use std::io;

use nix::libc;
use thiserror::Error;

use crate::packet::PacketError;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("send: {0}")]
    Send(#[source] io::Error),

    #[error("recv: {0}")]
    Recv(#[source] io::Error),

    #[error("poll: {0}")]
    Wait(#[source] io::Error),

    #[error("encoding echo request: {0}")]
    Encode(#[from] PacketError),

    #[error("writing report: {0}")]
    Report(#[source] io::Error),
}

pub type Result<T, E = ProbeError> = std::result::Result<T, E>;

/// Errors on send that mean "nobody listens there right now".
pub(crate) fn is_soft_send_error(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::ConnectionRefused
}

/// Errors on receive that are reported and counted but do not end the run.
pub(crate) fn is_soft_recv_error(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::ConnectionRefused
        || matches!(
            err.raw_os_error(),
            Some(libc::EHOSTUNREACH) | Some(libc::ENETUNREACH)
        )
}

/// Errors that just mean "try again".
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classification() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert!(is_soft_send_error(&refused));
        assert!(is_soft_recv_error(&refused));

        let unreachable = io::Error::from_raw_os_error(libc::EHOSTUNREACH);
        assert!(!is_soft_send_error(&unreachable));
        assert!(is_soft_recv_error(&unreachable));

        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(!is_soft_send_error(&denied));
        assert!(!is_soft_recv_error(&denied));
        assert!(!is_transient(&denied));

        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
    }
}
