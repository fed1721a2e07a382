// ABOUTME: SSH client module for driving commands against remote test hosts.
// ABOUTME: Connection lifecycle, command execution, and file transfer with retry.

mod client;
mod error;
mod options;
mod retry;
mod transfer;
mod trust;

pub use client::Client;
pub use error::{Error, Result};
pub use options::OpOptions;
pub use trust::HostTrust;
