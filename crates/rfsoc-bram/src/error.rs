//! Error types for the BRAM server and client

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for server-side BRAM operations
pub type BramResult<T> = Result<T, BramError>;

/// Errors raised while mapping, serving or validating BRAM access
#[derive(Error, Debug)]
pub enum BramError {
    /// Physical memory device could not be opened
    #[error("Failed to open {}: {source}", .path.display())]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Permission denied (e.g., /dev/mem access)
    #[error("Permission denied: {0}. Try running as root or add user to appropriate group.")]
    PermissionDenied(String),

    /// Memory mapping failed
    #[error("Memory map failed for '{name}' at 0x{address:08x}: {reason}")]
    MmapFailed {
        name: String,
        address: u64,
        reason: String,
    },

    /// Listening socket could not be created
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Region name is not in the table, or has no mapping
    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    /// Read started at or past the end of the region
    #[error("Offset {offset} out of range for '{name}' (size {size})")]
    OffsetOutOfRange {
        name: String,
        offset: u64,
        size: usize,
    },

    /// Access would leave the mapped window
    #[error("Range {offset}+{len} exceeds window of {size} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// Request line could not be parsed
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Other I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BramError {
    /// Per-request failures that are answered with the error marker
    /// while the connection stays open
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BramError::UnknownRegion(_)
                | BramError::OffsetOutOfRange { .. }
                | BramError::OutOfBounds { .. }
                | BramError::MalformedRequest(_)
        )
    }

    /// Check if this is a permission error
    pub fn is_permission_error(&self) -> bool {
        matches!(self, BramError::PermissionDenied(_))
    }
}

/// Errors surfaced by the client transport
#[derive(Error, Debug)]
pub enum ClientError {
    /// Address could not be resolved or reached
    #[error("Connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Request could not be written in full
    #[error("Failed to send request: {0}")]
    Send(#[source] io::Error),

    /// Socket error while receiving the response
    #[error("Failed to receive response: {0}")]
    Receive(#[source] io::Error),

    /// Peer closed before the expected byte count arrived
    #[error("Connection closed after {received} of {expected} bytes")]
    ShortRead { expected: usize, received: usize },

    /// Server answered with the error marker
    #[error("Server rejected request '{request}'")]
    ServerError { request: String },
}

impl ClientError {
    pub(crate) fn connect(addr: impl std::fmt::Display, source: io::Error) -> Self {
        ClientError::Connect {
            addr: addr.to_string(),
            source,
        }
    }

    /// Response stopped before the expected byte count, by close or timeout
    pub fn is_incomplete(&self) -> bool {
        match self {
            ClientError::ShortRead { .. } => true,
            ClientError::Receive(e) => {
                matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
            }
            _ => false,
        }
    }
}
