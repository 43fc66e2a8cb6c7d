//! Durable consensus state under the node's raft directory.
//!
//! Layout:
//! - `log.bin` — length-prefixed bincode frames, one per log entry
//! - `hardstate.bin` — current term and vote
//! - `snapshot.bin` — last compaction point plus the full applied map
//! - `peers.json` — peer list mirror, human-readable
//!
//! The KV map itself is never persisted separately; it is rebuilt by
//! replaying the snapshot plus the log tail.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use super::types::{LogEntry, LogIndex, Peer, Term};

const LOG_FILE: &str = "log.bin";
const HARD_STATE_FILE: &str = "hardstate.bin";
const SNAPSHOT_FILE: &str = "snapshot.bin";
const PEERS_FILE: &str = "peers.json";

/// Term and vote, persisted before any RPC that depends on them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardState {
    pub term: Term,
    pub voted_for: Option<String>,
}

/// A compaction point: everything applied up to `last_included_index`,
/// flattened into the full key map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotData {
    pub last_included_index: LogIndex,
    pub last_included_term: Term,
    pub peers: Vec<Peer>,
    pub data: Vec<(String, Vec<u8>)>,
}

/// Everything recovered from disk at startup.
#[derive(Debug, Default)]
pub struct PersistedState {
    pub hard_state: HardState,
    pub entries: Vec<LogEntry>,
    pub snapshot: Option<SnapshotData>,
    pub peers: Option<Vec<Peer>>,
}

/// File-backed store for the consensus log and its sidecar state.
pub struct LogStore {
    dir: PathBuf,
    log_file: File,
}

impl LogStore {
    /// Opens (creating if needed) the raft directory and recovers state.
    ///
    /// With `reset_peers` the persisted peer list is discarded, which lets a
    /// node rejoin a cluster whose membership has moved on.
    pub fn open(dir: &Path, reset_peers: bool) -> Result<(Self, PersistedState)> {
        fs::create_dir_all(dir).with_context(|| format!("creating raft dir {:?}", dir))?;

        let mut state = PersistedState::default();

        let hs_path = dir.join(HARD_STATE_FILE);
        if hs_path.exists() {
            let raw = fs::read(&hs_path).context("reading hard state")?;
            state.hard_state = bincode::deserialize(&raw).context("decoding hard state")?;
        }

        let snap_path = dir.join(SNAPSHOT_FILE);
        if snap_path.exists() {
            let raw = fs::read(&snap_path).context("reading snapshot")?;
            state.snapshot = Some(bincode::deserialize(&raw).context("decoding snapshot")?);
        }

        let peers_path = dir.join(PEERS_FILE);
        if reset_peers {
            if peers_path.exists() {
                fs::remove_file(&peers_path).context("removing peer list")?;
            }
        } else if peers_path.exists() {
            let raw = fs::read(&peers_path).context("reading peer list")?;
            state.peers = Some(serde_json::from_slice(&raw).context("decoding peer list")?);
        }

        let log_path = dir.join(LOG_FILE);
        if log_path.exists() {
            state.entries = read_entries(&log_path)?;
        }

        // Entries already folded into the snapshot are dead weight.
        if let Some(snap) = &state.snapshot {
            let cutoff = snap.last_included_index;
            state.entries.retain(|e| e.index > cutoff);
        }

        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("opening {:?}", log_path))?;

        Ok((Self { dir: dir.to_path_buf(), log_file }, state))
    }

    /// Appends entries to the log and syncs them to disk.
    pub fn append(&mut self, entries: &[LogEntry]) -> Result<()> {
        for entry in entries {
            let frame = bincode::serialize(entry).context("encoding log entry")?;
            self.log_file
                .write_all(&(frame.len() as u32).to_le_bytes())
                .context("writing frame length")?;
            self.log_file.write_all(&frame).context("writing frame")?;
        }
        self.log_file.sync_data().context("syncing log")?;
        Ok(())
    }

    /// Replaces the whole log with `entries`. Used after conflict
    /// truncation and after compaction.
    pub fn rewrite(&mut self, entries: &[LogEntry]) -> Result<()> {
        let log_path = self.dir.join(LOG_FILE);
        let tmp_path = self.dir.join(format!("{}.tmp", LOG_FILE));

        let mut tmp = File::create(&tmp_path).context("creating log rewrite tmp")?;
        for entry in entries {
            let frame = bincode::serialize(entry).context("encoding log entry")?;
            tmp.write_all(&(frame.len() as u32).to_le_bytes())?;
            tmp.write_all(&frame)?;
        }
        tmp.sync_data().context("syncing rewritten log")?;
        fs::rename(&tmp_path, &log_path).context("swapping rewritten log")?;

        self.log_file = OpenOptions::new()
            .append(true)
            .open(&log_path)
            .context("reopening rewritten log")?;
        Ok(())
    }

    pub fn save_hard_state(&self, hs: &HardState) -> Result<()> {
        let raw = bincode::serialize(hs).context("encoding hard state")?;
        write_atomic(&self.dir, HARD_STATE_FILE, &raw)
    }

    pub fn save_snapshot(&self, snap: &SnapshotData) -> Result<()> {
        let raw = bincode::serialize(snap).context("encoding snapshot")?;
        write_atomic(&self.dir, SNAPSHOT_FILE, &raw)
    }

    pub fn save_peers(&self, peers: &[Peer]) -> Result<()> {
        let raw = serde_json::to_vec_pretty(peers).context("encoding peer list")?;
        write_atomic(&self.dir, PEERS_FILE, &raw)
    }
}

fn read_entries(path: &Path) -> Result<Vec<LogEntry>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    let mut len_buf = [0u8; 4];

    loop {
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("reading frame length"),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut frame = vec![0u8; len];
        match reader.read_exact(&mut frame) {
            Ok(()) => {}
            // A torn tail frame from a crash mid-append: recover the prefix.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::warn!("log ends with a torn frame, dropping it");
                break;
            }
            Err(e) => return Err(e).context("reading frame"),
        }
        let entry: LogEntry = bincode::deserialize(&frame).context("decoding log entry")?;
        entries.push(entry);
    }

    Ok(entries)
}

fn write_atomic(dir: &Path, name: &str, raw: &[u8]) -> Result<()> {
    let tmp_path = dir.join(format!("{}.tmp", name));
    let final_path = dir.join(name);
    let mut tmp = File::create(&tmp_path).with_context(|| format!("creating {:?}", tmp_path))?;
    tmp.write_all(raw)?;
    tmp.sync_data()?;
    fs::rename(&tmp_path, &final_path).with_context(|| format!("swapping {:?}", final_path))?;
    Ok(())
}
