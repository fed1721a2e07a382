// ABOUTME: Retry ledger tracking the remaining budget per operation key.
// ABOUTME: Scoped to one client instance; entries die with the client.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Direction of a file transfer. Part of the transfer retry key so a send
/// and a download touching the same paths never share a budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TransferDirection {
    Send,
    Download,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::Send => f.write_str("send"),
            TransferDirection::Download => f.write_str("download"),
        }
    }
}

/// Identity of one retryable operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum RetryKey {
    Command {
        target: String,
        command: String,
    },
    Transfer {
        target: String,
        direction: TransferDirection,
        local: PathBuf,
        remote: String,
    },
}

impl RetryKey {
    pub(crate) fn command(target: &str, command: &str) -> Self {
        RetryKey::Command {
            target: target.to_string(),
            command: command.to_string(),
        }
    }

    pub(crate) fn transfer(
        target: &str,
        direction: TransferDirection,
        local: &Path,
        remote: &str,
    ) -> Self {
        RetryKey::Transfer {
            target: target.to_string(),
            direction,
            local: local.to_path_buf(),
            remote: remote.to_string(),
        }
    }
}

/// Remaining retry budget per operation key.
#[derive(Debug, Default)]
pub(crate) struct RetryLedger {
    entries: HashMap<RetryKey, u32>,
}

impl RetryLedger {
    /// Record the requested budget the first time a key is seen. Zero
    /// budgets never create an entry, so a no-retry call leaves no state
    /// behind. An existing entry is left untouched.
    pub(crate) fn seed(&mut self, key: &RetryKey, budget: u32) {
        if budget > 0 {
            self.entries.entry(key.clone()).or_insert(budget);
        }
    }

    /// Spend one logical retry. Returns true (and decrements) while budget
    /// remains, false once it is exhausted or was never seeded.
    pub(crate) fn consume(&mut self, key: &RetryKey) -> bool {
        match self.entries.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    /// Forget a key after its operation succeeded.
    pub(crate) fn clear(&mut self, key: &RetryKey) {
        self.entries.remove(key);
    }

    pub(crate) fn remaining(&self, key: &RetryKey) -> Option<u32> {
        self.entries.get(key).copied()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
