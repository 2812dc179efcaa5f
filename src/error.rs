//! Error taxonomy for the TCP engine.
//!
//! The engine speaks `std::io::Error` at every public boundary, but the abstract error names
//! below (`NotConnected`, `ConnRefused`, ...) carry more precision than `std::io::ErrorKind`
//! alone can express, so a [`TcpErrorKind`] rides alongside as the error's `.get_ref()` payload.

use std::fmt;
use std::io;

/// Abstract error names a blocking API call can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpErrorKind {
    /// API call requires `ESTABLISHED`/half-open but the CCB is not.
    NotConnected,
    /// Open attempted on a non-`CLOSED` CCB.
    AlreadyConnected,
    /// Receive-buffer pool exhausted.
    NoMemory,
    /// Passive open collides on local port.
    AddrInUse,
    /// User timeout fired; the FSM is retained.
    TimedOut,
    /// Connection timeout fired; the FSM advanced to `CLOSED`.
    ConnAborted,
    /// SYN answered with RST.
    ConnRefused,
    /// Peer RST during an established session.
    ConnReset,
    /// Non-blocking `recv` with no data available.
    WouldBlock,
    /// Malformed endpoint, family mismatch, etc.
    InvalidArg,
    /// Address family other than IPv6.
    FamilyUnsupported,
    /// The checksum of an outgoing segment computed to zero.
    NoChecksum,
}

impl TcpErrorKind {
    fn io_kind(self) -> io::ErrorKind {
        use TcpErrorKind::*;
        match self {
            NotConnected => io::ErrorKind::NotConnected,
            AlreadyConnected => io::ErrorKind::AlreadyExists,
            NoMemory => io::ErrorKind::OutOfMemory,
            AddrInUse => io::ErrorKind::AddrInUse,
            TimedOut => io::ErrorKind::TimedOut,
            ConnAborted => io::ErrorKind::ConnectionAborted,
            ConnRefused => io::ErrorKind::ConnectionRefused,
            ConnReset => io::ErrorKind::ConnectionReset,
            WouldBlock => io::ErrorKind::WouldBlock,
            InvalidArg => io::ErrorKind::InvalidInput,
            FamilyUnsupported => io::ErrorKind::Unsupported,
            NoChecksum => io::ErrorKind::InvalidData,
        }
    }

    fn message(self) -> &'static str {
        use TcpErrorKind::*;
        match self {
            NotConnected => "connection is not established",
            AlreadyConnected => "open attempted on a connection that is not closed",
            NoMemory => "receive-buffer pool exhausted",
            AddrInUse => "local port already bound by a listener",
            TimedOut => "user-supplied timeout elapsed",
            ConnAborted => "connection timed out and was aborted",
            ConnRefused => "peer refused the connection (RST in response to SYN)",
            ConnReset => "peer reset the connection",
            WouldBlock => "operation would block",
            InvalidArg => "invalid argument",
            FamilyUnsupported => "only the IPv6 address family is supported",
            NoChecksum => "computed TCP checksum is zero",
        }
    }
}

impl fmt::Display for TcpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for TcpErrorKind {}

/// Builds the `io::Error` a public API call returns for a given abstract error.
pub fn tcp_error(kind: TcpErrorKind) -> io::Error {
    io::Error::new(kind.io_kind(), kind)
}

/// Extracts the [`TcpErrorKind`] from an `io::Error` previously built by [`tcp_error`], if any.
pub fn tcp_error_kind(err: &io::Error) -> Option<TcpErrorKind> {
    err.get_ref()?.downcast_ref::<TcpErrorKind>().copied()
}
