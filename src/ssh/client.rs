// ABOUTME: SSH client for one remote test host: bounded dial, run, send, download.
// ABOUTME: Owns the live connection, the lifetime scope, and the retry ledger.

use super::error::{Error, Result};
use super::options::OpOptions;
use super::retry::{RetryKey, RetryLedger, TransferDirection};
use super::transfer;
use super::trust::TrustHandler;
use crate::config::ClientConfig;
use russh::client::{self, Handle};
use russh::keys::{PrivateKeyWithHashAlg, decode_secret_key};
use russh::{ChannelMsg, Disconnect};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Client for one remote host, alive for the duration of a test run.
///
/// Freshly provisioned hosts may refuse connections for a while, accept and
/// then drop them, or die mid-command; `connect` dials with a bounded retry
/// loop, and `run`/`send`/`download` reconnect and retry within a per-call
/// budget. Operations take `&mut self`: one call at a time per client, one
/// client per host.
pub struct Client {
    config: ClientConfig,
    lifetime: CancellationToken,
    handle: Option<Handle<TrustHandler>>,
    ledger: RetryLedger,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            lifetime: CancellationToken::new(),
            handle: None,
            ledger: RetryLedger::default(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect to the remote host. `close` must be called after use.
    ///
    /// The key file is re-read and re-parsed on every connect; key failures
    /// are fatal and never retried. The dial loop makes up to
    /// `dial_attempts` attempts before giving up with `DialExhausted`.
    /// Handshake and authentication failures are returned without retry at
    /// this layer; the per-operation retry protocol owns reconnects.
    pub async fn connect(&mut self) -> Result<()> {
        let key_bytes =
            tokio::fs::read(&self.config.key_path)
                .await
                .map_err(|source| Error::KeyLoad {
                    path: self.config.key_path.clone(),
                    source,
                })?;
        let key = decode_secret_key(&String::from_utf8_lossy(&key_bytes), None).map_err(|e| {
            Error::KeyParse {
                path: self.config.key_path.clone(),
                reason: e.to_string(),
            }
        })?;

        self.lifetime = CancellationToken::new();

        info!(
            host = %self.config.host,
            dns_name = self.config.dns_name.as_deref().unwrap_or(""),
            "dialing"
        );
        let stream = self.dial().await?;
        info!(host = %self.config.host, "dialed");

        let russh_config = client::Config {
            keepalive_interval: Some(KEEPALIVE_INTERVAL),
            ..Default::default()
        };
        let handler = TrustHandler::new(
            self.config.host.clone(),
            self.config.port,
            self.config.trust.clone(),
        );
        let mut session = client::connect_stream(Arc::new(russh_config), stream, handler)
            .await
            .map_err(|source| Error::Handshake {
                host: self.config.host.clone(),
                source,
            })?;

        let hash_alg = session
            .best_supported_rsa_hash()
            .await
            .map_err(|source| Error::Handshake {
                host: self.config.host.clone(),
                source,
            })?
            .flatten();
        let auth = session
            .authenticate_publickey(
                &self.config.user,
                PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
            )
            .await
            .map_err(|source| Error::Handshake {
                host: self.config.host.clone(),
                source,
            })?;
        if !auth.success() {
            return Err(Error::AuthenticationFailed {
                user: self.config.user.clone(),
                host: self.config.host.clone(),
            });
        }

        self.handle = Some(session);
        info!(
            host = %self.config.host,
            user = %self.config.user,
            "connected"
        );
        Ok(())
    }

    /// Dial until a TCP connection is established or the attempt budget runs
    /// out. Connection-refused is the normal signature of a host that has
    /// not finished booting, so it is logged apart from other dial errors.
    async fn dial(&self) -> Result<TcpStream> {
        let host = self.config.host.as_str();
        let mut last_err = io::Error::other("no dial attempts were made");

        for attempt in 1..=self.config.dial_attempts {
            if self.lifetime.is_cancelled() {
                return Err(Error::Stopped);
            }

            match tokio::time::timeout(
                self.config.dial_timeout,
                TcpStream::connect((host, self.config.port)),
            )
            .await
            {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    warn!(
                        host,
                        attempt,
                        error = %e,
                        "failed to dial, host likely not ready yet"
                    );
                    last_err = e;
                }
                Ok(Err(e)) => {
                    warn!(host, attempt, error = %e, "failed to dial");
                    last_err = e;
                }
                Err(_) => {
                    warn!(
                        host,
                        attempt,
                        timeout = ?self.config.dial_timeout,
                        "dial attempt timed out"
                    );
                    last_err = io::Error::new(io::ErrorKind::TimedOut, "dial attempt timed out");
                }
            }

            if attempt < self.config.dial_attempts {
                tokio::time::sleep(self.config.dial_retry_delay).await;
            }
        }

        Err(Error::DialExhausted {
            host: host.to_string(),
            attempts: self.config.dial_attempts,
            source: last_err,
        })
    }

    /// Cancel the client lifetime and tear down the connection. Aborts any
    /// deadline derived from the lifetime. Idempotent when not connected.
    pub async fn close(&mut self) {
        self.lifetime.cancel();
        match self.handle.take() {
            Some(handle) => {
                match handle.disconnect(Disconnect::ByApplication, "", "en").await {
                    Ok(()) => info!(host = %self.config.target(), "closed connection"),
                    Err(e) => {
                        warn!(host = %self.config.target(), error = %e, "closed connection with error")
                    }
                }
            }
            None => info!(host = %self.config.target(), "close called while not connected"),
        }
    }

    /// Run a command with default options, returning its combined output.
    pub async fn run(&mut self, command: &str) -> Result<Vec<u8>> {
        self.run_with(command, OpOptions::default()).await
    }

    /// Run a command on the remote host, returning combined stdout/stderr.
    ///
    /// Each attempt opens a fresh session; sessions are never reused. On
    /// failure the retry protocol closes the connection, reconnects (bounded
    /// by `reconnect_cycles`), sleeps `retry_interval`, and tries again until
    /// the command succeeds or the call's retry budget is exhausted.
    pub async fn run_with(&mut self, command: &str, opts: OpOptions) -> Result<Vec<u8>> {
        let key = RetryKey::command(self.config.target(), command);
        self.ledger.seed(&key, opts.retries);

        loop {
            match self.run_once(command, &opts).await {
                Ok(output) => {
                    self.ledger.clear(&key);
                    return Ok(output);
                }
                Err(err) => {
                    warn!(
                        host = %self.config.target(),
                        user = %self.config.user,
                        %command,
                        error = %err,
                        "command failed"
                    );
                    if !self.retry_after_failure(&key, opts.retry_interval).await? {
                        return Err(err);
                    }
                }
            }
        }
    }

    async fn run_once(&self, command: &str, opts: &OpOptions) -> Result<Vec<u8>> {
        let handle = self.handle.as_ref().ok_or(Error::NotConnected)?;
        let started = Instant::now();

        // One session handles exactly one invocation.
        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(Error::SessionCreation)?;
        info!(host = %self.config.target(), %command, "created session, running command");

        for (name, value) in opts.merged_env(&self.config.env) {
            channel
                .set_env(false, name, value)
                .await
                .map_err(Error::SessionCreation)?;
        }

        let cmd = command.to_string();
        let mut task = tokio::spawn(async move { exec_and_collect(channel, &cmd).await });

        let deadline = opts.timeout;
        let result = tokio::select! {
            // Aborting drops the channel, which force-closes the session;
            // the task is still awaited so it never outlives the call.
            _ = self.lifetime.cancelled() => {
                task.abort();
                let _ = (&mut task).await;
                Err(Error::Stopped)
            }
            _ = tokio::time::sleep(deadline), if !deadline.is_zero() => {
                task.abort();
                let _ = (&mut task).await;
                Err(Error::Timeout(deadline))
            }
            joined = &mut task => match joined {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::ChannelClosed),
            },
        };

        if opts.verbose {
            info!(
                host = %self.config.target(),
                %command,
                elapsed = ?started.elapsed(),
                "ran command"
            );
        }
        result
    }

    /// Send a local file to the remote host with default options.
    pub async fn send(&mut self, local: impl AsRef<Path>, remote: &str) -> Result<Vec<u8>> {
        self.send_with(local, remote, OpOptions::default()).await
    }

    /// Send a local file to the remote host via the external secure-copy
    /// tool, returning the tool's combined output.
    pub async fn send_with(
        &mut self,
        local: impl AsRef<Path>,
        remote: &str,
        opts: OpOptions,
    ) -> Result<Vec<u8>> {
        self.transfer_with(TransferDirection::Send, local.as_ref(), remote, opts)
            .await
    }

    /// Download a remote file to a local path with default options.
    pub async fn download(&mut self, remote: &str, local: impl AsRef<Path>) -> Result<Vec<u8>> {
        self.download_with(remote, local, OpOptions::default())
            .await
    }

    /// Download a remote file via the external secure-copy tool, returning
    /// the tool's combined output.
    pub async fn download_with(
        &mut self,
        remote: &str,
        local: impl AsRef<Path>,
        opts: OpOptions,
    ) -> Result<Vec<u8>> {
        self.transfer_with(TransferDirection::Download, local.as_ref(), remote, opts)
            .await
    }

    async fn transfer_with(
        &mut self,
        direction: TransferDirection,
        local: &Path,
        remote: &str,
        opts: OpOptions,
    ) -> Result<Vec<u8>> {
        // Tool lookup and key permissions precede the ledger: both are fatal
        // and must leave no retry state behind.
        let tool = transfer::locate_tool()?;
        transfer::restrict_key_permissions(&self.config.key_path)?;

        let key = RetryKey::transfer(self.config.target(), direction, local, remote);
        self.ledger.seed(&key, opts.retries);

        loop {
            match self
                .transfer_once(&tool, direction, local, remote, &opts)
                .await
            {
                Ok(output) => {
                    self.ledger.clear(&key);
                    return Ok(output);
                }
                Err(err) => {
                    warn!(
                        host = %self.config.target(),
                        user = %self.config.user,
                        %direction,
                        local = %local.display(),
                        remote,
                        error = %err,
                        "transfer failed"
                    );
                    if !self.retry_after_failure(&key, opts.retry_interval).await? {
                        return Err(err);
                    }
                }
            }
        }
    }

    async fn transfer_once(
        &self,
        tool: &Path,
        direction: TransferDirection,
        local: &Path,
        remote: &str,
        opts: &OpOptions,
    ) -> Result<Vec<u8>> {
        let started = Instant::now();
        let args = transfer::transfer_args(
            direction,
            &self.config.key_path,
            &self.config.user,
            self.config.target(),
            local,
            remote,
        );

        let mut command = Command::new(tool);
        command.args(&args).kill_on_drop(true);

        let deadline = opts.timeout;
        let result = tokio::select! {
            // Dropping the output future kills the child.
            _ = self.lifetime.cancelled() => Err(Error::Stopped),
            _ = tokio::time::sleep(deadline), if !deadline.is_zero() => Err(Error::Timeout(deadline)),
            output = command.output() => match output {
                Ok(output) => {
                    let status = output.status;
                    let combined = transfer::combined_output(output);
                    if status.success() {
                        Ok(combined)
                    } else {
                        Err(Error::TransferFailed {
                            status: status.code().unwrap_or(-1),
                            output: combined,
                        })
                    }
                }
                Err(source) => Err(Error::Io(source)),
            },
        };

        if opts.verbose {
            self.log_transfer(direction, local, started, &result);
        }
        result
    }

    /// Report size and timing for a finished transfer. A stat failure here
    /// is cosmetic: it produces a failure-flavored log line but never
    /// changes the call's result.
    fn log_transfer(
        &self,
        direction: TransferDirection,
        local: &Path,
        started: Instant,
        result: &Result<Vec<u8>>,
    ) {
        let output = match result {
            Ok(out) => String::from_utf8_lossy(out).into_owned(),
            Err(err) => err
                .output()
                .map(|out| String::from_utf8_lossy(out).into_owned())
                .unwrap_or_default(),
        };
        match std::fs::metadata(local) {
            Ok(meta) => info!(
                host = %self.config.target(),
                %direction,
                size = meta.len(),
                elapsed = ?started.elapsed(),
                %output,
                "transfer finished"
            ),
            Err(e) => warn!(
                host = %self.config.target(),
                %direction,
                error = %e,
                elapsed = ?started.elapsed(),
                %output,
                "transfer finished but local file could not be inspected"
            ),
        }
    }

    /// Consult the ledger after a failure. `Ok(true)` means one retry was
    /// spent and a reconnect completed: attempt again. `Ok(false)` means the
    /// budget is exhausted (or was never granted) and the original error
    /// should surface. Reconnect exhaustion is its own error.
    async fn retry_after_failure(&mut self, key: &RetryKey, interval: Duration) -> Result<bool> {
        if !self.ledger.consume(key) {
            return Ok(false);
        }
        warn!(
            host = %self.config.target(),
            remaining = self.ledger.remaining(key).unwrap_or(0),
            "retrying after reconnect"
        );
        self.reconnect().await?;
        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
        Ok(true)
    }

    /// Close and re-establish the connection, giving up after
    /// `reconnect_cycles` full connect sequences.
    async fn reconnect(&mut self) -> Result<()> {
        self.close().await;

        let cycles = self.config.reconnect_cycles;
        let mut last = Error::NotConnected;
        for cycle in 1..=cycles {
            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(
                        host = %self.config.target(),
                        cycle,
                        cycles,
                        error = %err,
                        "reconnect cycle failed"
                    );
                    last = err;
                }
            }
        }
        Err(Error::ReconnectExhausted {
            host: self.config.target().to_string(),
            cycles,
            source: Box::new(last),
        })
    }
}

/// Request exec on the session and pump channel messages, folding stdout and
/// stderr into one buffer in arrival order, until the remote reports an exit
/// status. A session that dies without one is an abnormal termination.
async fn exec_and_collect(
    mut channel: russh::Channel<client::Msg>,
    command: &str,
) -> Result<Vec<u8>> {
    channel.exec(true, command).await?;

    let mut output = Vec::new();
    let mut exit_status: Option<u32> = None;
    let mut got_eof = false;

    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => output.extend_from_slice(&data),
            Some(ChannelMsg::ExtendedData { data, ext }) => {
                if ext == 1 {
                    output.extend_from_slice(&data);
                }
            }
            Some(ChannelMsg::ExitStatus { exit_status: status }) => {
                exit_status = Some(status);
                if got_eof {
                    break;
                }
            }
            Some(ChannelMsg::Eof) => {
                got_eof = true;
                if exit_status.is_some() {
                    break;
                }
            }
            Some(ChannelMsg::Close) => break,
            Some(_) => {}
            None => break,
        }
    }

    match exit_status {
        Some(0) => Ok(output),
        Some(status) => Err(Error::ExecutionFailed { status, output }),
        None => Err(Error::ChannelClosed),
    }
}
