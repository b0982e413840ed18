//! Append-only record of completed deployments.
//!
//! The ledger is a JSON Lines file. Each line is one tagged entry:
//!
//! - `deployed`: a [`DeploymentRecord`], written once per `(network, name)`.
//! - `pending`: a [`PendingSubmission`], journalled before a transaction is submitted.
//! - `dropped`: a [`DroppedSubmission`], closing a pending submission that will never
//!   produce a record.
//!
//! Lines are never rewritten, so ledgers from separate runs can be concatenated.
//! Writers hold an exclusive advisory lock on `<ledger>.lock` for the lifetime of the
//! [`DeploymentLedger`].

use std::{
    collections::{HashMap, HashSet},
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use alloy_core::primitives::{Address, Bytes, TxHash};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::DeployError;

/// A confirmed deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub network: String,
    pub name: String,
    pub address: Address,
    pub tx_hash: TxHash,
    pub deployed_at: DateTime<Utc>,
    /// Fingerprint of what was deployed, see [`crate::fingerprint`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// A signed transaction that was about to be submitted.
///
/// Carries the raw transaction so that a later run can re-submit it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSubmission {
    pub network: String,
    pub name: String,
    pub tx_hash: TxHash,
    pub from: Address,
    pub nonce: u64,
    pub raw: Bytes,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// Closes a pending submission that did not produce a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedSubmission {
    pub network: String,
    pub name: String,
    pub tx_hash: TxHash,
    pub reason: String,
    pub dropped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LedgerEntry {
    Deployed(DeploymentRecord),
    Pending(PendingSubmission),
    Dropped(DroppedSubmission),
}

/// Durable, network-scoped view over a ledger file.
#[derive(Debug)]
pub struct DeploymentLedger {
    path: PathBuf,
    network: String,
    records: Vec<DeploymentRecord>,
    index: HashMap<(String, String), usize>,
    pending: Vec<PendingSubmission>,
    dropped: HashSet<TxHash>,
    /// Where the file stops being whole-line entries, if a write was interrupted.
    tail: Option<Tail>,
    writer: Option<LedgerWriter>,
}

/// An interrupted final write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    /// The last entry parsed but has no newline.
    Unterminated,
    /// The last line is a partial entry starting at this byte offset.
    Torn(u64),
}

#[derive(Debug)]
struct LedgerWriter {
    file: File,
    lock: File,
}

impl Drop for LedgerWriter {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.lock);
    }
}

impl DeploymentLedger {
    /// Open a ledger for writing, taking the advisory lock.
    ///
    /// Fails with [`DeployError::LedgerLocked`] if another process holds the lock.
    pub fn open(path: impl Into<PathBuf>, network: impl Into<String>) -> Result<Self, DeployError> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ledger_error(&path, e))?;
        }

        let lock_path = lock_path(&path);
        let lock = File::create(&lock_path).map_err(|e| ledger_error(&lock_path, e))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(DeployError::LedgerLocked { path });
        }

        let mut ledger = Self::snapshot(path.clone(), network)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ledger_error(&path, e))?;

        match ledger.tail.take() {
            Some(Tail::Torn(offset)) => {
                tracing::warn!(path = %path.display(), offset, "Discarding partial ledger entry");
                file.set_len(offset)
                    .and_then(|_| file.sync_data())
                    .map_err(|e| ledger_error(&path, e))?;
            }
            Some(Tail::Unterminated) => {
                file.write_all(b"\n")
                    .and_then(|_| file.sync_data())
                    .map_err(|e| ledger_error(&path, e))?;
            }
            None => {}
        }

        ledger.writer = Some(LedgerWriter { file, lock });

        tracing::debug!(
            path = %path.display(),
            network = %ledger.network,
            records = ledger.records().count(),
            "Ledger opened"
        );

        Ok(ledger)
    }

    /// Load a read-only view of the ledger without locking. A missing file is an empty ledger.
    pub fn snapshot(path: impl Into<PathBuf>, network: impl Into<String>) -> Result<Self, DeployError> {
        let path = path.into();
        let mut ledger = Self {
            path,
            network: network.into(),
            records: Vec::new(),
            index: HashMap::new(),
            pending: Vec::new(),
            dropped: HashSet::new(),
            tail: None,
            writer: None,
        };

        if !ledger.path.exists() {
            return Ok(ledger);
        }

        let content = std::fs::read_to_string(&ledger.path).map_err(|e| ledger_error(&ledger.path, e))?;

        let mut offset = 0u64;
        for (line_no, raw) in content.split_inclusive('\n').enumerate() {
            let start = offset;
            offset += raw.len() as u64;

            let terminated = raw.ends_with('\n');
            let line = raw.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<LedgerEntry>(line) {
                Ok(entry) => {
                    if !terminated {
                        ledger.tail = Some(Tail::Unterminated);
                    }
                    ledger.apply(entry)?;
                }
                // Only the final line can be cut short by an interrupted append.
                Err(e) if !terminated => {
                    tracing::warn!(
                        path = %ledger.path.display(),
                        line = line_no + 1,
                        error = %e,
                        "Ignoring partial final ledger entry"
                    );
                    ledger.tail = Some(Tail::Torn(start));
                }
                Err(e) => {
                    return Err(DeployError::Ledger {
                        path: ledger.path.clone(),
                        message: format!("line {}: {e}", line_no + 1),
                    });
                }
            }
        }

        Ok(ledger)
    }

    fn apply(&mut self, entry: LedgerEntry) -> Result<(), DeployError> {
        match entry {
            LedgerEntry::Deployed(record) => {
                let key = (record.network.clone(), record.name.clone());
                match self.index.get(&key) {
                    Some(&existing) if self.records[existing] == record => {}
                    Some(_) => {
                        return Err(DeployError::LedgerConflict {
                            network: record.network,
                            name: record.name,
                        });
                    }
                    None => {
                        self.index.insert(key, self.records.len());
                        self.records.push(record);
                    }
                }
            }
            LedgerEntry::Pending(pending) => {
                if !self.pending.iter().any(|p| p.tx_hash == pending.tx_hash) {
                    self.pending.push(pending);
                }
            }
            LedgerEntry::Dropped(dropped) => {
                self.dropped.insert(dropped.tx_hash);
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn is_writable(&self) -> bool {
        self.writer.is_some()
    }

    /// Record for `name` on this ledger's network.
    pub fn get(&self, name: &str) -> Option<&DeploymentRecord> {
        self.index
            .get(&(self.network.clone(), name.to_string()))
            .map(|&i| &self.records[i])
    }

    /// Records on this ledger's network, in the order they were written.
    pub fn records(&self) -> impl Iterator<Item = &DeploymentRecord> {
        self.records.iter().filter(|r| r.network == self.network)
    }

    /// Pending submissions on this network that were neither recorded nor dropped.
    pub fn unresolved_pending(&self) -> Vec<PendingSubmission> {
        self.pending
            .iter()
            .filter(|p| p.network == self.network)
            .filter(|p| !self.dropped.contains(&p.tx_hash))
            .filter(|p| self.get(&p.name).is_none())
            .cloned()
            .collect()
    }

    /// Durably append a deployment record.
    ///
    /// Writing a record identical to an existing one is a no-op; a different record for
    /// the same key is a [`DeployError::LedgerConflict`].
    pub fn record_deployment(&mut self, record: DeploymentRecord) -> Result<(), DeployError> {
        if let Some(existing) = self
            .index
            .get(&(record.network.clone(), record.name.clone()))
            .map(|&i| &self.records[i])
        {
            if *existing == record {
                return Ok(());
            }
            return Err(DeployError::LedgerConflict {
                network: record.network,
                name: record.name,
            });
        }

        self.append(LedgerEntry::Deployed(record))
    }

    /// Durably journal a submission before it is sent to the network.
    pub fn record_pending(&mut self, pending: PendingSubmission) -> Result<(), DeployError> {
        self.append(LedgerEntry::Pending(pending))
    }

    /// Durably close a pending submission.
    pub fn record_dropped(&mut self, dropped: DroppedSubmission) -> Result<(), DeployError> {
        self.append(LedgerEntry::Dropped(dropped))
    }

    fn append(&mut self, entry: LedgerEntry) -> Result<(), DeployError> {
        let path = self.path.clone();
        let writer = self.writer.as_mut().ok_or_else(|| DeployError::Ledger {
            path: path.clone(),
            message: "ledger was opened read-only".to_string(),
        })?;

        let mut line = serde_json::to_string(&entry).map_err(|e| ledger_error(&path, e))?;
        line.push('\n');

        writer
            .file
            .write_all(line.as_bytes())
            .and_then(|_| writer.file.sync_data())
            .map_err(|e| ledger_error(&path, e))?;

        self.apply(entry)
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut lock = path.as_os_str().to_owned();
    lock.push(".lock");
    PathBuf::from(lock)
}

fn ledger_error(path: &Path, err: impl std::fmt::Display) -> DeployError {
    DeployError::Ledger {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
