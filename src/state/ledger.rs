//! Durable store of channels and received vouchers.
//!
//! The whole dataset is one JSON document. Every mutation is applied to a
//! copy, written to a temp file beside the ledger, fsynced and renamed over
//! it, and only then becomes visible in memory. A crash therefore leaves
//! either the old or the new snapshot on disk.

use crate::types::{Channel, LedgerError, LedgerStats, StoredVoucher};
use crate::utils::unix_now;
use ethers::types::{H256, U256};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// What to do with vouchers superseded by a later, larger one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep every voucher ever received (audit trail).
    #[default]
    RetainAll,
    /// Drop unclaimed vouchers once a dominating voucher is recorded.
    PruneSuperseded,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerSnapshot {
    #[serde(default)]
    vouchers: Vec<StoredVoucher>,
    #[serde(default)]
    channels: BTreeMap<H256, Channel>,
}

pub struct ChannelLedger {
    path: Option<PathBuf>,
    retention: RetentionPolicy,
    data: RwLock<LedgerSnapshot>,
    /// Serializes mutations so `data` is only write-locked for the swap.
    writer: Mutex<()>,
}

impl ChannelLedger {
    /// Open the ledger file at `path`, creating it on first write.
    ///
    /// A file that exists but cannot be parsed is moved aside and the ledger
    /// starts empty; it is never overwritten in place.
    pub fn open(path: impl Into<PathBuf>, retention: RetentionPolicy) -> Result<Self, LedgerError> {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<LedgerSnapshot>(&content) {
                Ok(snapshot) => {
                    info!(
                        path = %path.display(),
                        vouchers = snapshot.vouchers.len(),
                        channels = snapshot.channels.len(),
                        "Loaded channel ledger"
                    );
                    snapshot
                }
                Err(e) => {
                    let quarantine = quarantine_path(&path);
                    fs::rename(&path, &quarantine)?;
                    warn!(
                        path = %path.display(),
                        moved_to = %quarantine.display(),
                        error = %e,
                        "Ledger file unreadable, starting empty"
                    );
                    LedgerSnapshot::default()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "No ledger file yet, starting empty");
                LedgerSnapshot::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: Some(path),
            retention,
            data: RwLock::new(data),
            writer: Mutex::new(()),
        })
    }

    /// A ledger that never touches disk.
    pub fn in_memory(retention: RetentionPolicy) -> Self {
        Self {
            path: None,
            retention,
            data: RwLock::new(LedgerSnapshot::default()),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get_channel(&self, channel_id: H256) -> Option<Channel> {
        self.data.read().channels.get(&channel_id).cloned()
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.data.read().channels.values().cloned().collect()
    }

    pub fn vouchers_for(&self, channel_id: H256) -> Vec<StoredVoucher> {
        self.data
            .read()
            .vouchers
            .iter()
            .filter(|v| v.channel_id() == channel_id)
            .cloned()
            .collect()
    }

    /// Replace or create a channel record. Callers merge fields beforehand.
    pub fn upsert_channel(&self, channel: Channel) -> Result<(), LedgerError> {
        self.mutate(|snapshot| {
            snapshot.channels.insert(channel.channel_id, channel);
        })
    }

    /// Append a voucher record. The channel record is left untouched.
    pub fn record_voucher(&self, voucher: StoredVoucher) -> Result<(), LedgerError> {
        let retention = self.retention;
        self.mutate(|snapshot| append_voucher(snapshot, voucher, retention))
    }

    /// Persist an updated channel and the voucher that produced it together.
    pub fn commit(&self, channel: Channel, voucher: StoredVoucher) -> Result<(), LedgerError> {
        let retention = self.retention;
        self.mutate(|snapshot| {
            snapshot.channels.insert(channel.channel_id, channel);
            append_voucher(snapshot, voucher, retention);
        })
    }

    /// The best unclaimed voucher of every channel that has one.
    pub fn highest_unclaimed_per_channel(&self) -> BTreeMap<H256, StoredVoucher> {
        let data = self.data.read();
        let mut best: BTreeMap<H256, StoredVoucher> = BTreeMap::new();
        for voucher in data.vouchers.iter().filter(|v| !v.claimed) {
            match best.get(&voucher.channel_id()) {
                Some(current) if !voucher.outranks(current) => {}
                _ => {
                    best.insert(voucher.channel_id(), voucher.clone());
                }
            }
        }
        best
    }

    pub fn highest_unclaimed(&self, channel_id: H256) -> Option<StoredVoucher> {
        let data = self.data.read();
        let best = data
            .vouchers
            .iter()
            .filter(|v| !v.claimed && v.channel_id() == channel_id)
            .fold(None, |best: Option<&StoredVoucher>, v| match best {
                Some(current) if !v.outranks(current) => Some(current),
                _ => Some(v),
            })
            .cloned();
        best
    }

    /// Mark every unclaimed voucher of the channel as claimed by `tx_hash`.
    ///
    /// Superseded vouchers are marked too so they are never reconsidered.
    /// Returns how many records changed; a repeat call changes none.
    pub fn mark_claimed(&self, channel_id: H256, tx_hash: H256) -> Result<usize, LedgerError> {
        let already_settled = !self
            .data
            .read()
            .vouchers
            .iter()
            .any(|v| !v.claimed && v.channel_id() == channel_id);
        if already_settled {
            return Ok(0);
        }

        let now = unix_now();
        let marked = self.mutate(|snapshot| {
            let mut marked = 0;
            for voucher in snapshot
                .vouchers
                .iter_mut()
                .filter(|v| !v.claimed && v.channel_id() == channel_id)
            {
                voucher.claimed = true;
                voucher.claimed_at = Some(now);
                voucher.claim_tx_hash = Some(tx_hash);
                marked += 1;
            }
            marked
        })?;
        debug!(?channel_id, ?tx_hash, marked, "Marked vouchers claimed");
        Ok(marked)
    }

    pub fn stats(&self) -> LedgerStats {
        let data = self.data.read();
        let unclaimed: Vec<&StoredVoucher> = data.vouchers.iter().filter(|v| !v.claimed).collect();
        let mut active: Vec<H256> = unclaimed.iter().map(|v| v.channel_id()).collect();
        active.sort_unstable();
        active.dedup();

        LedgerStats {
            total_vouchers: data.vouchers.len(),
            unclaimed_count: unclaimed.len(),
            active_channels: active.len(),
            total_earned: data
                .channels
                .values()
                .fold(U256::zero(), |sum, c| sum.saturating_add(c.total_charged)),
        }
    }

    /// Apply `apply` to a copy, persist it, then publish it.
    ///
    /// The file write and fsync run on the calling thread while only the
    /// writer mutex is held; readers keep seeing the previous snapshot until
    /// the swap. Every paid request and every claim rewrites the whole file,
    /// so throughput is bounded by disk sync latency.
    fn mutate<T>(&self, apply: impl FnOnce(&mut LedgerSnapshot) -> T) -> Result<T, LedgerError> {
        let _writer = self.writer.lock();
        let mut next = self.data.read().clone();
        let output = apply(&mut next);
        if let Some(path) = &self.path {
            write_snapshot(path, &next)?;
        }
        *self.data.write() = next;
        Ok(output)
    }
}

fn append_voucher(snapshot: &mut LedgerSnapshot, voucher: StoredVoucher, retention: RetentionPolicy) {
    if retention == RetentionPolicy::PruneSuperseded {
        let newest = &voucher.voucher;
        snapshot.vouchers.retain(|old| {
            old.claimed
                || old.channel_id() != newest.channel_id
                || old.voucher.amount > newest.amount
                || old.voucher.nonce >= newest.nonce
        });
    }
    snapshot.vouchers.push(voucher);
}

fn write_snapshot(path: &Path, snapshot: &LedgerSnapshot) -> Result<(), LedgerError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, snapshot)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| LedgerError::Io(e.error))?;
    Ok(())
}

fn quarantine_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "ledger".to_string());
    path.with_file_name(format!("{name}.corrupt-{}", unix_now()))
}
