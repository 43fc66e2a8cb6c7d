//! Raft core: leader election, log replication, commit/apply, compaction.
//!
//! One mutex guards all consensus bookkeeping; the applied key map lives in
//! a `DashMap` next to it so reads never touch the consensus lock. Two
//! background loops drive the protocol: an election ticker that campaigns
//! when the leader goes quiet, and a replication loop that fans
//! AppendEntries out to peers on every heartbeat interval or proposal.
//! No lock is ever held across an RPC.

use dashmap::DashMap;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::StoreError;

use super::log::{HardState, LogStore, PersistedState, SnapshotData};
use super::protocol::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest,
    InstallSnapshotResponse, VoteRequest, VoteResponse, ENDPOINT_APPEND, ENDPOINT_SNAPSHOT,
    ENDPOINT_VOTE,
};
use super::types::{Command, LogEntry, LogIndex, Peer, Role, Term};

/// Entries shipped per AppendEntries round trip.
const MAX_APPEND_BATCH: usize = 512;
/// Outbound RPC deadline for votes and appends.
const RPC_TIMEOUT: Duration = Duration::from_secs(1);
/// Outbound RPC deadline for snapshot installs, which carry the full map.
const SNAPSHOT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Timing and sizing knobs, lifted from the node [`Config`].
#[derive(Debug, Clone)]
pub struct RaftConfig {
    pub heartbeat_interval: Duration,
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub apply_timeout: Duration,
    pub snapshot_threshold: usize,
    /// Allow a lone node to elect itself. Off for joining nodes so they
    /// wait for an invitation instead of forming a cluster of one.
    pub single_mode: bool,
}

impl RaftConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            election_timeout_min: Duration::from_millis(config.election_timeout_min_ms),
            election_timeout_max: Duration::from_millis(config.election_timeout_max_ms),
            apply_timeout: config.apply_timeout(),
            snapshot_threshold: config.snapshot_threshold,
            single_mode: config.run_in_single_server_mode,
        }
    }
}

struct RaftState {
    role: Role,
    hard_state: HardState,
    /// Log tail after the last snapshot, contiguous from
    /// `snapshot_index + 1`.
    entries: Vec<LogEntry>,
    snapshot_index: LogIndex,
    snapshot_term: Term,
    commit_index: LogIndex,
    last_applied: LogIndex,
    /// Current membership, self included.
    peers: Vec<Peer>,
    leader: Option<Peer>,
    election_deadline: Instant,
    next_index: HashMap<String, LogIndex>,
    match_index: HashMap<String, LogIndex>,
    votes: HashSet<String>,
    /// Commit waiters for proposals made on this node, by log index.
    pending: HashMap<LogIndex, oneshot::Sender<Result<(), StoreError>>>,
    store: LogStore,
}

impl RaftState {
    fn last_index(&self) -> LogIndex {
        self.snapshot_index + self.entries.len() as u64
    }

    fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index == 0 {
            return Some(0);
        }
        if index == self.snapshot_index {
            return Some(self.snapshot_term);
        }
        if index < self.snapshot_index {
            return None;
        }
        let offset = (index - self.snapshot_index - 1) as usize;
        self.entries.get(offset).map(|e| e.term)
    }

    fn entry_at(&self, index: LogIndex) -> Option<&LogEntry> {
        if index <= self.snapshot_index {
            return None;
        }
        let offset = (index - self.snapshot_index - 1) as usize;
        self.entries.get(offset)
    }

    fn last_log_pos(&self) -> (LogIndex, Term) {
        let last = self.last_index();
        (last, self.term_at(last).unwrap_or(self.snapshot_term))
    }

    fn reset_election_deadline(&mut self, config: &RaftConfig) {
        let min = config.election_timeout_min.as_millis() as u64;
        let max = config.election_timeout_max.as_millis() as u64;
        let timeout = rand::thread_rng().gen_range(min..=max.max(min + 1));
        self.election_deadline = Instant::now() + Duration::from_millis(timeout);
    }

    /// Drops to follower in `term`, persisting the vote reset and failing
    /// any commit waiters this node accumulated as leader.
    fn step_down(&mut self, term: Term, config: &RaftConfig) {
        if term > self.hard_state.term {
            self.hard_state.term = term;
            self.hard_state.voted_for = None;
            if let Err(e) = self.store.save_hard_state(&self.hard_state) {
                tracing::error!("failed to persist hard state: {}", e);
            }
        }
        self.role = Role::Follower;
        self.votes.clear();
        self.leader = None;
        self.reset_election_deadline(config);
        self.fail_pending();
    }

    fn fail_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let leader = self.leader.as_ref().map(|p| p.raft_addr.clone());
        for (_, tx) in self.pending.drain() {
            let _ = tx.send(Err(StoreError::NotLeader {
                leader: leader.clone(),
            }));
        }
    }

    fn quorum_reached(&self, acks: usize) -> bool {
        acks * 2 > self.peers.len()
    }
}

/// A replicated, linearizable key -> bytes map.
pub struct RaftNode {
    /// This node's identity (consensus + facade addresses).
    id: Peer,
    config: RaftConfig,
    state: Mutex<RaftState>,
    /// The applied state machine. Written only while the state mutex is
    /// held (apply paths); read lock-free by `get`.
    kv: DashMap<String, Vec<u8>>,
    client: reqwest::Client,
    /// Wakes the replication loop after a propose or a rejected append.
    replicate_kick: Notify,
    /// Peers with an AppendEntries or snapshot RPC currently in flight.
    inflight: Mutex<HashSet<String>>,
    shutdown: CancellationToken,
}

impl RaftNode {
    /// Recovers durable state from `dir` and builds the node. Call
    /// [`RaftNode::start`] afterwards to launch the protocol loops.
    pub fn new(
        id: Peer,
        dir: &Path,
        reset_peers: bool,
        config: RaftConfig,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Arc<Self>> {
        let (store, persisted) = LogStore::open(dir, reset_peers)?;
        let PersistedState {
            hard_state,
            entries,
            snapshot,
            peers,
        } = persisted;

        let kv = DashMap::new();
        let (snapshot_index, snapshot_term, snap_peers) = match snapshot {
            Some(snap) => {
                for (key, value) in snap.data {
                    kv.insert(key, value);
                }
                (snap.last_included_index, snap.last_included_term, Some(snap.peers))
            }
            None => (0, 0, None),
        };

        // Peer precedence: the peers file, then the snapshot's view, then
        // just ourselves. `reset_peers` already wiped the file and also
        // ignores the snapshot's view.
        let mut peers = if reset_peers {
            vec![id.clone()]
        } else {
            peers.or(snap_peers).unwrap_or_else(|| vec![id.clone()])
        };
        if !peers.iter().any(|p| p.raft_addr == id.raft_addr) {
            peers.push(id.clone());
        }

        if snapshot_index > 0 || !entries.is_empty() {
            tracing::info!(
                "recovered consensus state: snapshot@{} + {} log entries, {} peer(s)",
                snapshot_index,
                entries.len(),
                peers.len()
            );
        }

        let mut state = RaftState {
            role: Role::Follower,
            hard_state,
            entries,
            snapshot_index,
            snapshot_term,
            commit_index: snapshot_index,
            last_applied: snapshot_index,
            peers,
            leader: None,
            election_deadline: Instant::now(),
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            votes: HashSet::new(),
            pending: HashMap::new(),
            store,
        };
        state.reset_election_deadline(&config);

        Ok(Arc::new(Self {
            id,
            config,
            state: Mutex::new(state),
            kv,
            client: reqwest::Client::new(),
            replicate_kick: Notify::new(),
            inflight: Mutex::new(HashSet::new()),
            shutdown,
        }))
    }

    /// Launches the election and replication loops.
    pub fn start(self: &Arc<Self>) {
        let node = self.clone();
        tokio::spawn(async move {
            node.run_election_loop().await;
        });
        let node = self.clone();
        tokio::spawn(async move {
            node.run_replication_loop().await;
        });
    }

    fn lock(&self) -> MutexGuard<'_, RaftState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn identity(&self) -> &Peer {
        &self.id
    }

    /// Reads the locally applied value. Never blocks; stale on followers.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.kv.get(key).map(|v| v.clone())
    }

    pub fn is_leader(&self) -> bool {
        self.lock().role == Role::Leader
    }

    /// The current leader, as far as this node knows.
    pub fn leader(&self) -> Option<Peer> {
        let st = self.lock();
        match st.role {
            Role::Leader => Some(self.id.clone()),
            _ => st.leader.clone(),
        }
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.lock().peers.clone()
    }

    /// Replicates a command and waits until it is committed and applied
    /// locally. Fails fast on a follower.
    pub async fn propose(&self, command: Command) -> Result<(), StoreError> {
        let rx = {
            let mut st = self.lock();
            if st.role != Role::Leader {
                return Err(StoreError::NotLeader {
                    leader: st.leader.as_ref().map(|p| p.raft_addr.clone()),
                });
            }
            let index = st.last_index() + 1;
            let entry = LogEntry {
                term: st.hard_state.term,
                index,
                command,
            };
            st.store
                .append(std::slice::from_ref(&entry))
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            st.entries.push(entry);
            let (tx, rx) = oneshot::channel();
            st.pending.insert(index, tx);
            rx
        };

        self.replicate_kick.notify_one();

        match tokio::time::timeout(self.config.apply_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(StoreError::Unavailable("commit waiter dropped".to_string())),
            Err(_) => Err(StoreError::Unavailable(
                "timed out waiting for quorum".to_string(),
            )),
        }
    }

    /// Adds a peer to the cluster. Leader-only; idempotent by consensus
    /// address. Membership changes ship one peer at a time through the log.
    pub async fn join(&self, peer: Peer) -> Result<(), StoreError> {
        let new_peers = {
            let st = self.lock();
            if st.role != Role::Leader {
                return Err(StoreError::NotLeader {
                    leader: st.leader.as_ref().map(|p| p.raft_addr.clone()),
                });
            }
            if st.peers.iter().any(|p| p.raft_addr == peer.raft_addr) {
                return Ok(());
            }
            let mut peers = st.peers.clone();
            peers.push(peer.clone());
            peers
        };
        tracing::info!("adding peer {} to the cluster", peer.raft_addr);
        self.propose(Command::SetPeers { peers: new_peers }).await
    }

    // ---- protocol loops ----

    async fn run_election_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_millis(25));
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let campaign = {
                let st = self.lock();
                st.role != Role::Leader
                    && Instant::now() >= st.election_deadline
                    && (self.config.single_mode || st.peers.len() > 1)
            };
            if campaign {
                self.start_election();
            }
        }
    }

    fn start_election(self: &Arc<Self>) {
        let (request, peers) = {
            let mut st = self.lock();
            // The candidacy (new term + self-vote) only binds once it is
            // durable; without it this node must not solicit votes.
            let candidacy = HardState {
                term: st.hard_state.term + 1,
                voted_for: Some(self.id.raft_addr.clone()),
            };
            if let Err(e) = st.store.save_hard_state(&candidacy) {
                tracing::error!("failed to persist candidacy, not campaigning: {}", e);
                st.reset_election_deadline(&self.config);
                return;
            }
            st.hard_state = candidacy;
            st.role = Role::Candidate;
            st.votes = HashSet::from([self.id.raft_addr.clone()]);
            st.leader = None;
            st.reset_election_deadline(&self.config);
            let (last_log_index, last_log_term) = st.last_log_pos();
            (
                VoteRequest {
                    term: st.hard_state.term,
                    candidate: self.id.raft_addr.clone(),
                    last_log_index,
                    last_log_term,
                },
                st.peers.clone(),
            )
        };

        tracing::debug!("campaigning in term {}", request.term);

        if peers.len() == 1 {
            self.become_leader(request.term);
            return;
        }

        for peer in peers {
            if peer.raft_addr == self.id.raft_addr {
                continue;
            }
            let node = self.clone();
            let request = request.clone();
            tokio::spawn(async move {
                match node
                    .rpc::<_, VoteResponse>(&peer.raft_addr, ENDPOINT_VOTE, &request, RPC_TIMEOUT)
                    .await
                {
                    Ok(response) => node.on_vote_response(request.term, response),
                    Err(e) => tracing::debug!("vote request to {} failed: {}", peer.raft_addr, e),
                }
            });
        }
    }

    fn on_vote_response(&self, vote_term: Term, response: VoteResponse) {
        let won = {
            let mut st = self.lock();
            if response.term > st.hard_state.term {
                st.step_down(response.term, &self.config);
                return;
            }
            if st.role != Role::Candidate || st.hard_state.term != vote_term {
                return;
            }
            if response.granted {
                st.votes.insert(response.voter.clone());
            }
            let acks = st.votes.len();
            st.quorum_reached(acks)
        };
        if won {
            self.become_leader(vote_term);
        }
    }

    fn become_leader(&self, term: Term) {
        {
            let mut st = self.lock();
            if st.hard_state.term != term || st.role == Role::Leader {
                return;
            }
            st.role = Role::Leader;
            st.leader = None;
            let last = st.last_index();
            st.next_index.clear();
            st.match_index.clear();
            let peer_addrs: Vec<_> = st.peers.iter().map(|peer| peer.raft_addr.clone()).collect();
            for addr in peer_addrs {
                st.next_index.insert(addr.clone(), last + 1);
                st.match_index.insert(addr, 0);
            }
            tracing::info!("elected leader for term {}", term);

            // Barrier entry: republishing the membership under the new term
            // lets earlier-term entries commit (a leader may only count
            // replicas for entries of its own term).
            let entry = LogEntry {
                term,
                index: last + 1,
                command: Command::SetPeers {
                    peers: st.peers.clone(),
                },
            };
            match st.store.append(std::slice::from_ref(&entry)) {
                Ok(()) => st.entries.push(entry),
                Err(e) => tracing::error!("failed to append leadership barrier: {}", e),
            }
        }
        self.advance_commit();
        self.replicate_kick.notify_one();
    }

    async fn run_replication_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.heartbeat_interval) => {}
                _ = self.replicate_kick.notified() => {}
            }
            if !self.is_leader() {
                continue;
            }
            let peers = self.peers();
            for peer in peers {
                if peer.raft_addr == self.id.raft_addr {
                    continue;
                }
                let node = self.clone();
                tokio::spawn(async move {
                    node.replicate_to(peer).await;
                });
            }
            // A cluster of one commits on its own acknowledgement.
            self.advance_commit();
        }
    }

    async fn replicate_to(&self, peer: Peer) {
        // One RPC per peer at a time; heartbeats are cheap to skip.
        {
            let mut inflight = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
            if !inflight.insert(peer.raft_addr.clone()) {
                return;
            }
        }
        self.replicate_to_inner(&peer).await;
        let mut inflight = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
        inflight.remove(&peer.raft_addr);
    }

    async fn replicate_to_inner(&self, peer: &Peer) {
        enum Plan {
            Append(AppendEntriesRequest),
            Snapshot(InstallSnapshotRequest),
            Skip,
        }

        let plan = {
            let st = self.lock();
            if st.role != Role::Leader {
                Plan::Skip
            } else {
                let next = st
                    .next_index
                    .get(&peer.raft_addr)
                    .copied()
                    .unwrap_or(st.last_index() + 1);
                if next <= st.snapshot_index {
                    // The entries this follower needs were compacted away;
                    // ship the applied state instead.
                    Plan::Snapshot(InstallSnapshotRequest {
                        term: st.hard_state.term,
                        leader: self.id.clone(),
                        last_included_index: st.last_applied,
                        last_included_term: st
                            .term_at(st.last_applied)
                            .unwrap_or(st.snapshot_term),
                        peers: st.peers.clone(),
                        data: self.dump_kv(),
                    })
                } else {
                    let prev_log_index = next - 1;
                    let Some(prev_log_term) = st.term_at(prev_log_index) else {
                        return;
                    };
                    let entries: Vec<LogEntry> = st
                        .entries
                        .iter()
                        .filter(|e| e.index >= next)
                        .take(MAX_APPEND_BATCH)
                        .cloned()
                        .collect();
                    Plan::Append(AppendEntriesRequest {
                        term: st.hard_state.term,
                        leader: self.id.clone(),
                        prev_log_index,
                        prev_log_term,
                        entries,
                        leader_commit: st.commit_index,
                    })
                }
            }
        };

        match plan {
            Plan::Skip => {}
            Plan::Append(request) => {
                match self
                    .rpc::<_, AppendEntriesResponse>(
                        &peer.raft_addr,
                        ENDPOINT_APPEND,
                        &request,
                        RPC_TIMEOUT,
                    )
                    .await
                {
                    Ok(response) => self.on_append_response(peer, &request, response),
                    Err(e) => tracing::trace!("append to {} failed: {}", peer.raft_addr, e),
                }
            }
            Plan::Snapshot(request) => {
                let last_included = request.last_included_index;
                match self
                    .rpc::<_, InstallSnapshotResponse>(
                        &peer.raft_addr,
                        ENDPOINT_SNAPSHOT,
                        &request,
                        SNAPSHOT_RPC_TIMEOUT,
                    )
                    .await
                {
                    Ok(response) => {
                        let mut st = self.lock();
                        if response.term > st.hard_state.term {
                            st.step_down(response.term, &self.config);
                            return;
                        }
                        st.next_index
                            .insert(peer.raft_addr.clone(), last_included + 1);
                        st.match_index.insert(peer.raft_addr.clone(), last_included);
                        drop(st);
                        self.advance_commit();
                    }
                    Err(e) => tracing::debug!("snapshot to {} failed: {}", peer.raft_addr, e),
                }
            }
        }
    }

    fn on_append_response(
        &self,
        peer: &Peer,
        request: &AppendEntriesRequest,
        response: AppendEntriesResponse,
    ) {
        let retry = {
            let mut st = self.lock();
            if response.term > st.hard_state.term {
                st.step_down(response.term, &self.config);
                return;
            }
            if st.role != Role::Leader || request.term != st.hard_state.term {
                return;
            }
            if response.success {
                let new_match = request.prev_log_index + request.entries.len() as u64;
                let entry = st
                    .match_index
                    .entry(peer.raft_addr.clone())
                    .or_insert(0);
                *entry = (*entry).max(new_match);
                st.next_index.insert(peer.raft_addr.clone(), new_match + 1);
                false
            } else {
                // Walk back using the follower's last index as a hint.
                let next = st
                    .next_index
                    .get(&peer.raft_addr)
                    .copied()
                    .unwrap_or(st.last_index() + 1);
                let fallback = next.saturating_sub(1).min(response.last_log_index + 1).max(1);
                st.next_index.insert(peer.raft_addr.clone(), fallback);
                true
            }
        };
        if retry {
            self.replicate_kick.notify_one();
        } else {
            self.advance_commit();
        }
    }

    /// Advances the commit index to the highest entry of the current term
    /// replicated on a quorum, then applies everything newly committed.
    fn advance_commit(&self) {
        let mut st = self.lock();
        if st.role != Role::Leader {
            return;
        }
        let last = st.last_index();
        let mut new_commit = st.commit_index;
        for index in (st.commit_index + 1)..=last {
            if st.term_at(index) != Some(st.hard_state.term) {
                continue;
            }
            let acks = st
                .peers
                .iter()
                .filter(|p| {
                    p.raft_addr == self.id.raft_addr
                        || st.match_index.get(&p.raft_addr).copied().unwrap_or(0) >= index
                })
                .count();
            if st.quorum_reached(acks) {
                new_commit = index;
            }
        }
        if new_commit > st.commit_index {
            st.commit_index = new_commit;
            self.apply_committed(&mut st);
        }
    }

    /// Applies every committed-but-unapplied entry, resolves commit
    /// waiters, and compacts the log when the tail has grown enough.
    fn apply_committed(&self, st: &mut RaftState) {
        while st.last_applied < st.commit_index {
            let index = st.last_applied + 1;
            let Some(entry) = st.entry_at(index).cloned() else {
                tracing::error!("commit index {} points past the log", index);
                break;
            };
            match entry.command {
                Command::Set { key, value } => {
                    self.kv.insert(key, value);
                }
                Command::Delete { key } => {
                    self.kv.remove(&key);
                }
                Command::SetPeers { peers } => {
                    let last = st.last_index();
                    if st.role == Role::Leader {
                        for peer in &peers {
                            st.next_index.entry(peer.raft_addr.clone()).or_insert(last + 1);
                            st.match_index.entry(peer.raft_addr.clone()).or_insert(0);
                        }
                    }
                    st.peers = peers;
                    if let Err(e) = st.store.save_peers(&st.peers) {
                        tracing::warn!("failed to persist peer list: {}", e);
                    }
                }
            }
            st.last_applied = index;
            if let Some(tx) = st.pending.remove(&index) {
                let _ = tx.send(Ok(()));
            }
        }
        self.maybe_compact(st);
    }

    fn maybe_compact(&self, st: &mut RaftState) {
        let applied_tail = (st.last_applied - st.snapshot_index) as usize;
        if applied_tail < self.config.snapshot_threshold {
            return;
        }
        let snapshot = SnapshotData {
            last_included_index: st.last_applied,
            last_included_term: st.term_at(st.last_applied).unwrap_or(st.snapshot_term),
            peers: st.peers.clone(),
            data: self.dump_kv(),
        };
        if let Err(e) = st.store.save_snapshot(&snapshot) {
            tracing::warn!("snapshot write failed, keeping full log: {}", e);
            return;
        }
        st.snapshot_index = snapshot.last_included_index;
        st.snapshot_term = snapshot.last_included_term;
        let cutoff = st.snapshot_index;
        st.entries.retain(|e| e.index > cutoff);
        let tail = st.entries.clone();
        if let Err(e) = st.store.rewrite(&tail) {
            tracing::warn!("log truncation failed: {}", e);
        }
        tracing::info!(
            "compacted log through index {} ({} entries retained)",
            st.snapshot_index,
            st.entries.len()
        );
    }

    fn dump_kv(&self) -> Vec<(String, Vec<u8>)> {
        self.kv
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    // ---- RPC server side ----

    pub fn handle_vote(&self, request: &VoteRequest) -> VoteResponse {
        let voter = self.id.raft_addr.clone();
        let mut st = self.lock();
        if request.term > st.hard_state.term {
            st.step_down(request.term, &self.config);
        }
        let term = st.hard_state.term;
        if request.term < term {
            return VoteResponse { term, voter, granted: false };
        }

        let (last_log_index, last_log_term) = st.last_log_pos();
        let log_ok = request.last_log_term > last_log_term
            || (request.last_log_term == last_log_term
                && request.last_log_index >= last_log_index);
        let can_vote = match &st.hard_state.voted_for {
            None => true,
            Some(candidate) => candidate == &request.candidate,
        };

        if log_ok && can_vote {
            // The vote only binds once it is durable; an unpersisted grant
            // must not block this node from voting again in the same term.
            let vote = HardState {
                term,
                voted_for: Some(request.candidate.clone()),
            };
            if let Err(e) = st.store.save_hard_state(&vote) {
                tracing::error!("failed to persist vote: {}", e);
                return VoteResponse { term, voter, granted: false };
            }
            st.hard_state = vote;
            st.reset_election_deadline(&self.config);
            tracing::debug!("granted vote to {} in term {}", request.candidate, term);
            VoteResponse { term, voter, granted: true }
        } else {
            VoteResponse { term, voter, granted: false }
        }
    }

    pub fn handle_append(&self, request: AppendEntriesRequest) -> AppendEntriesResponse {
        let mut st = self.lock();
        if request.term > st.hard_state.term {
            st.step_down(request.term, &self.config);
        }
        let term = st.hard_state.term;
        if request.term < term {
            return AppendEntriesResponse {
                term,
                success: false,
                last_log_index: st.last_index(),
            };
        }

        if st.role != Role::Follower {
            st.role = Role::Follower;
            st.votes.clear();
            st.fail_pending();
        }
        st.leader = Some(request.leader.clone());
        st.reset_election_deadline(&self.config);

        // Log consistency check against the entry preceding the batch.
        if request.prev_log_index > 0
            && st.term_at(request.prev_log_index) != Some(request.prev_log_term)
        {
            return AppendEntriesResponse {
                term,
                success: false,
                last_log_index: st.last_index(),
            };
        }

        let mut appended: Vec<LogEntry> = Vec::new();
        let mut truncated = false;
        for entry in request.entries {
            if entry.index <= st.snapshot_index {
                continue;
            }
            if entry.index <= st.last_index() {
                if st.term_at(entry.index) == Some(entry.term) {
                    continue;
                }
                // Conflicting suffix from a deposed leader: drop it.
                st.entries.retain(|e| e.index < entry.index);
                truncated = true;
            }
            st.entries.push(entry.clone());
            appended.push(entry);
        }

        let persisted = if truncated {
            let entries = st.entries.clone();
            st.store.rewrite(&entries)
        } else if !appended.is_empty() {
            st.store.append(&appended)
        } else {
            Ok(())
        };
        if let Err(e) = persisted {
            tracing::error!("failed to persist replicated entries: {}", e);
            return AppendEntriesResponse {
                term,
                success: false,
                last_log_index: st.last_index(),
            };
        }

        let last = st.last_index();
        if request.leader_commit > st.commit_index {
            st.commit_index = request.leader_commit.min(last);
            self.apply_committed(&mut st);
        }

        AppendEntriesResponse {
            term,
            success: true,
            last_log_index: last,
        }
    }

    pub fn handle_install_snapshot(
        &self,
        request: InstallSnapshotRequest,
    ) -> InstallSnapshotResponse {
        let mut st = self.lock();
        if request.term > st.hard_state.term {
            st.step_down(request.term, &self.config);
        }
        let term = st.hard_state.term;
        if request.term < term {
            return InstallSnapshotResponse { term };
        }

        st.role = Role::Follower;
        st.leader = Some(request.leader.clone());
        st.reset_election_deadline(&self.config);

        if request.last_included_index <= st.snapshot_index {
            return InstallSnapshotResponse { term };
        }

        tracing::info!(
            "installing snapshot through index {} ({} keys)",
            request.last_included_index,
            request.data.len()
        );

        self.kv.clear();
        for (key, value) in &request.data {
            self.kv.insert(key.clone(), value.clone());
        }

        let snapshot = SnapshotData {
            last_included_index: request.last_included_index,
            last_included_term: request.last_included_term,
            peers: request.peers.clone(),
            data: request.data,
        };
        if let Err(e) = st.store.save_snapshot(&snapshot) {
            tracing::error!("failed to persist installed snapshot: {}", e);
        }

        st.entries.clear();
        if let Err(e) = st.store.rewrite(&[]) {
            tracing::warn!("failed to truncate log after snapshot: {}", e);
        }
        st.snapshot_index = snapshot.last_included_index;
        st.snapshot_term = snapshot.last_included_term;
        st.commit_index = snapshot.last_included_index;
        st.last_applied = snapshot.last_included_index;
        st.peers = snapshot.peers;
        if let Err(e) = st.store.save_peers(&st.peers) {
            tracing::warn!("failed to persist peer list: {}", e);
        }

        InstallSnapshotResponse { term }
    }

    // ---- RPC client side ----

    async fn rpc<Req, Resp>(
        &self,
        raft_addr: &str,
        endpoint: &str,
        request: &Req,
        timeout: Duration,
    ) -> anyhow::Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let url = format!("http://{}{}", raft_addr, endpoint);
        let body = bincode::serialize(request)?;
        let response = self
            .client
            .post(url)
            .body(body)
            .timeout(timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("rpc to {} returned {}", raft_addr, response.status());
        }
        let raw = response.bytes().await?;
        Ok(bincode::deserialize(&raw)?)
    }
}
