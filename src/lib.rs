// ABOUTME: Library root for drover - resilient remote execution against test hosts.
// ABOUTME: Exposes the client configuration and the SSH client itself.

pub mod config;
pub mod ssh;
