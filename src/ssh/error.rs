// ABOUTME: SSH-specific error types.
// ABOUTME: Covers connect, command execution, and file transfer failures.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read private key {path}: {source}")]
    KeyLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse private key {path}: {reason}")]
    KeyParse { path: PathBuf, reason: String },

    #[error("all {attempts} dial attempts to {host} failed: {source}")]
    DialExhausted {
        host: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("handshake with {host} failed: {source}")]
    Handshake {
        host: String,
        #[source]
        source: russh::Error,
    },

    #[error("authentication failed for {user}@{host}")]
    AuthenticationFailed { user: String, host: String },

    #[error("not connected; call connect() first")]
    NotConnected,

    #[error("failed to create session: {0}")]
    SessionCreation(#[source] russh::Error),

    #[error("remote command exited with status {status}")]
    ExecutionFailed { status: u32, output: Vec<u8> },

    #[error("session closed without reporting an exit status")]
    ChannelClosed,

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("client closed while the operation was in flight")]
    Stopped,

    #[error("gave up reconnecting to {host} after {cycles} cycles")]
    ReconnectExhausted {
        host: String,
        cycles: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("{tool} not found in search path: {source}")]
    ToolLookup {
        tool: String,
        #[source]
        source: which::Error,
    },

    #[error("failed to restrict permissions on {path}: {source}")]
    KeyPermissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transfer tool exited with status {status}")]
    TransferFailed { status: i32, output: Vec<u8> },

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Combined output captured before the failure, if the variant carries any.
    pub fn output(&self) -> Option<&[u8]> {
        match self {
            Error::ExecutionFailed { output, .. } | Error::TransferFailed { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
