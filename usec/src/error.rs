//! Error types for usec.

use crate::protocol::cdb::Opcode;
use crate::protocol::sense::SenseInfo;
use std::io;
use thiserror::Error;

/// Result type for usec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for usec operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (opening the device node, the pass-through ioctl itself).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Pass-through call failed in a way the caller may retry.
    #[error("{command} failed transiently{}", fmt_sense(sense.as_ref()))]
    Transient {
        /// Command that failed.
        command: Opcode,
        /// Decoded sense data, when the device supplied any.
        sense: Option<SenseInfo>,
    },

    /// Controller reported a check condition for the command.
    #[error("{command} rejected by device{}", fmt_sense(sense.as_ref()))]
    Device {
        /// Command that failed.
        command: Opcode,
        /// Decoded sense data, when it could be parsed.
        sense: Option<SenseInfo>,
    },

    /// Controller response could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation did not complete in time. Controller state is unknown.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Caller violated a precondition (geometry, buffer size).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid device configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stopped because the embedding application asked to.
    #[error("Operation interrupted")]
    Interrupted,
}

/// Coarse failure classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport or OS failure; retryable by the caller.
    Io,
    /// Device-reported failure; needs caller intervention.
    Device,
    /// Timer expired; device state possibly incomplete.
    Timeout,
    /// Caller precondition violation.
    Precondition,
    /// Interrupted by the application.
    Interrupted,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::Transient { .. } => ErrorKind::Io,
            Self::Device { .. } | Self::Protocol(_) => ErrorKind::Device,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::InvalidArgument(_) | Self::Config(_) => ErrorKind::Precondition,
            Self::Interrupted => ErrorKind::Interrupted,
        }
    }

    /// Decoded sense data attached to this error, if any.
    pub fn sense(&self) -> Option<&SenseInfo> {
        match self {
            Self::Transient { sense, .. } | Self::Device { sense, .. } => sense.as_ref(),
            _ => None,
        }
    }

    /// Whether repeating the operation (after re-synchronizing) may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Io
    }
}

fn fmt_sense(sense: Option<&SenseInfo>) -> String {
    sense.map_or_else(String::new, |s| format!(": {s}"))
}
