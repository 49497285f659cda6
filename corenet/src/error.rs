//! Error taxonomy (spec §7). Generalizes `flux::shared::NetworkError` with the kinds this crate
//! adds: connection admission, dispatch, and permission enforcement.
//!
//! The propagation policy is: the core swallows and logs every recoverable error (logged at
//! [`flux::logging::Verbosity::Exception`] by the call site) so the I/O loop never terminates
//! except through an explicit disconnect. Only [`Error::Fatal`] variants ever tear down a
//! connection or the whole endpoint; [`Error::Wait`] means "nothing happened yet, try again".

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// A non-blocking operation would have blocked. Never fatal, never logged.
    Wait,
    Fatal(Kind),
}

#[derive(Debug)]
pub enum Kind {
    /// Packet header's version fields are below the configured minimum (spec §7). The packet is
    /// dropped; on the stream transport the connection is also dropped.
    ProtocolMismatch,
    /// `senderSecret` in the header doesn't match the client record (spec §7). Dropped silently.
    HashMismatch,
    /// Surfaced to the peer as a `ConnectionResponseCode` rather than torn down locally.
    AdmissionRejected,
    /// A single message failed to decode; the rest of the packet must still be drained.
    DecodeFailure,
    /// A user RPC handler returned an error; dispatch continues with the next message.
    DispatchFailure,
    /// RPC caller not allowed for the permission class, or claimed caller doesn't match.
    PermissionViolation,
    /// Too many pending admissions, or a packet would overflow `bufferSize`.
    CapacityExceeded,
    /// A value did not fit the invariant it is required to uphold (e.g. a `StringId` over 64
    /// bytes, or a bounded container over its const-generic capacity).
    InvalidValue,
    /// The connection façade is in the wrong mode for the requested operation (e.g. calling
    /// `send`/`receive` directly while running in threaded mode).
    InvalidState,
    Io(io::ErrorKind),
}

impl From<io::Error> for Error {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => Error::Wait,
            kind => Error::Fatal(Kind::Io(kind)),
        }
    }
}

impl Error {
    #[inline]
    pub fn fatal(kind: Kind) -> Error {
        Error::Fatal(kind)
    }

    #[inline]
    pub fn is_wait(&self) -> bool {
        matches!(self, Error::Wait)
    }
}

impl From<flux::NetworkError> for Error {
    fn from(err: flux::NetworkError) -> Self {
        use flux::shared::ErrorType as F;
        match err {
            flux::NetworkError::Wait => Error::Wait,
            flux::NetworkError::Fatal(kind) => Error::Fatal(match kind {
                F::Expired => Kind::AdmissionRejected,
                F::Duplicate => Kind::CapacityExceeded,
                F::AlreadyConnected => Kind::CapacityExceeded,
                F::PayloadTooLarge => Kind::CapacityExceeded,
                F::EmptyPayload => Kind::DecodeFailure,
                F::IncorrectCategory => Kind::DecodeFailure,
                F::ProtocolMismatch => Kind::ProtocolMismatch,
                F::VersionMismatch => Kind::ProtocolMismatch,
                F::SequenceMismatch => Kind::DecodeFailure,
                F::HashMismatch => Kind::HashMismatch,
                F::Serialization => Kind::DecodeFailure,
                F::DecodeFailure => Kind::DecodeFailure,
                F::DispatchFailure => Kind::DispatchFailure,
                F::PermissionViolation => Kind::PermissionViolation,
                F::CapacityExceeded => Kind::CapacityExceeded,
                F::AdmissionRejected => Kind::AdmissionRejected,
                F::AddrParse => Kind::InvalidValue,
                F::Io(kind) => Kind::Io(kind),
            }),
        }
    }
}
