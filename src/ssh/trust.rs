// ABOUTME: Server key trust policy and the russh handler enforcing it.
// ABOUTME: Supports known_hosts verification, TOFU, pinned fingerprints, and explicit bypass.

use russh::client;
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::ssh_key::{self, HashAlg};
use serde::Deserialize;
use std::path::PathBuf;

/// How to verify the remote host's key during the handshake.
///
/// There is no default: callers must state their policy. `AcceptAny` is the
/// explicit opt-out for throwaway hosts whose keys are generated at boot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostTrust {
    /// Accept any server key without verification.
    AcceptAny,
    /// Verify against a known_hosts file (default location when `path` is None).
    /// Unknown hosts and changed keys are rejected.
    KnownHosts { path: Option<PathBuf> },
    /// Accept and record unknown hosts, reject changed keys.
    TrustOnFirstUse { path: Option<PathBuf> },
    /// Accept only the key with this SHA-256 fingerprint
    /// (with or without the "SHA256:" prefix).
    Fingerprint(String),
}

/// russh client handler carrying the trust policy for one connection.
pub(crate) struct TrustHandler {
    host: String,
    port: u16,
    trust: HostTrust,
}

impl TrustHandler {
    pub(crate) fn new(host: String, port: u16, trust: HostTrust) -> Self {
        Self { host, port, trust }
    }
}

impl client::Handler for TrustHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match &self.trust {
            HostTrust::AcceptAny => {
                tracing::warn!(
                    host = %self.host,
                    port = self.port,
                    "accepting server key without verification"
                );
                Ok(true)
            }
            HostTrust::Fingerprint(pinned) => {
                let accepted = fingerprint_matches(pinned, server_public_key);
                if !accepted {
                    tracing::warn!(
                        host = %self.host,
                        fingerprint = %server_public_key.fingerprint(HashAlg::Sha256),
                        "server key does not match pinned fingerprint"
                    );
                }
                Ok(accepted)
            }
            HostTrust::KnownHosts { path } => {
                let check_result = match path {
                    Some(path) => {
                        check_known_hosts_path(&self.host, self.port, server_public_key, path)
                    }
                    None => check_known_hosts(&self.host, self.port, server_public_key),
                };
                match check_result {
                    Ok(known) => Ok(known),
                    Err(e) => {
                        tracing::warn!(
                            host = %self.host,
                            error = %e,
                            "known_hosts check failed, rejecting server key"
                        );
                        Ok(false)
                    }
                }
            }
            HostTrust::TrustOnFirstUse { path } => {
                let check_result = match path {
                    Some(path) => {
                        check_known_hosts_path(&self.host, self.port, server_public_key, path)
                    }
                    None => check_known_hosts(&self.host, self.port, server_public_key),
                };
                match check_result {
                    Ok(true) => Ok(true),
                    Ok(false) => {
                        tracing::warn!(
                            host = %self.host,
                            port = self.port,
                            "trust-on-first-use: accepting unknown server key"
                        );
                        let learn_result = match path {
                            Some(path) => learn_known_hosts_path(
                                &self.host,
                                self.port,
                                server_public_key,
                                path,
                            ),
                            None => learn_known_hosts(&self.host, self.port, server_public_key),
                        };
                        if let Err(e) = learn_result {
                            tracing::warn!(error = %e, "failed to record server key");
                        }
                        Ok(true)
                    }
                    Err(russh::keys::Error::KeyChanged { .. }) => Ok(false),
                    Err(e) => {
                        tracing::warn!(
                            host = %self.host,
                            error = %e,
                            "known_hosts check failed, accepting on first use"
                        );
                        Ok(true)
                    }
                }
            }
        }
    }
}

fn fingerprint_matches(pinned: &str, key: &ssh_key::PublicKey) -> bool {
    let actual = key.fingerprint(HashAlg::Sha256).to_string();
    actual == pinned || actual.strip_prefix("SHA256:") == Some(pinned)
}
