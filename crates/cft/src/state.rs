//! CFT-Log consensus state machine implementation.

use consort_core::{
    Action, Event, NodeStatus, OutboundMessage, RequestId, StateMachine, SubmitOutcome, TimerId,
};
use consort_types::message::{
    AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply,
};
use consort_types::{ClusterConfig, Command, HardState, LogEntry, NodeId, Role};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::CftConfig;

/// CFT-Log replication state machine.
///
/// Owns the durable tuple `(current_term, voted_for, log)` plus the
/// volatile commit/apply cursors and, while leader, the per-peer
/// replication indices. Constructed from WAL-recovered state; always
/// resumes as follower.
pub struct CftState {
    // ─── Identity ───
    id: NodeId,
    cluster: ClusterConfig,
    config: CftConfig,

    // ─── Persistent state (WAL-backed) ───
    hard: HardState,

    // ─── Volatile state ───
    role: Role,
    commit_index: u64,
    last_applied: u64,
    /// Last node observed acting as leader, offered to redirected clients.
    leader_hint: Option<NodeId>,

    // ─── Leader state (reinitialized on every election win) ───
    next_index: HashMap<NodeId, u64>,
    match_index: HashMap<NodeId, u64>,

    // ─── Candidate state ───
    votes_received: HashSet<NodeId>,

    // ─── Client bookkeeping ───
    /// Log index → submitter waiting for that entry to apply.
    pending_submits: HashMap<u64, RequestId>,

    /// Election timeout jitter. Seeded, so simulation runs are repeatable.
    rng: ChaCha8Rng,
}

impl CftState {
    /// Build a state machine from recovered hard state.
    pub fn new(
        id: NodeId,
        cluster: ClusterConfig,
        config: CftConfig,
        recovered: HardState,
        seed: u64,
    ) -> Self {
        Self {
            id,
            cluster,
            config,
            hard: recovered,
            role: Role::Follower,
            commit_index: 0,
            last_applied: 0,
            leader_hint: None,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            votes_received: HashSet::new(),
            pending_submits: HashMap::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    // ─── Accessors ───

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn current_term(&self) -> u64 {
        self.hard.current_term
    }

    pub fn voted_for(&self) -> Option<NodeId> {
        self.hard.voted_for
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.hard.log
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    pub fn leader_hint(&self) -> Option<NodeId> {
        self.leader_hint
    }

    /// Clone of the durable tuple, as the WAL will see it.
    pub fn hard_state(&self) -> HardState {
        self.hard.clone()
    }

    // ─── Internals ───

    fn random_election_timeout(&mut self) -> Duration {
        let min = self.config.election_timeout_min.as_millis() as u64;
        let max = self.config.election_timeout_max.as_millis() as u64;
        Duration::from_millis(self.rng.gen_range(min..=max))
    }

    fn arm_election_timer(&mut self) -> Action {
        Action::SetTimer {
            id: TimerId::Election,
            duration: self.random_election_timeout(),
        }
    }

    fn persist(&self) -> Action {
        Action::Persist {
            state: self.hard.clone(),
        }
    }

    fn peers(&self) -> Vec<NodeId> {
        self.cluster
            .node_ids()
            .into_iter()
            .filter(|id| *id != self.id)
            .collect()
    }

    /// Adopt a higher term and fall back to follower, persisting the
    /// demoted state. The caller still owes the sender any reply.
    fn step_down(&mut self, term: u64) -> Vec<Action> {
        let mut tail = self.demote(term);
        let mut actions = vec![self.persist()];
        actions.append(&mut tail);
        actions
    }

    /// The role/timer half of a step-down, without the persist. Callers
    /// that have more durable changes to fold in persist once afterwards.
    fn demote(&mut self, term: u64) -> Vec<Action> {
        debug_assert!(term > self.hard.current_term);
        info!(from = self.hard.current_term, to = term, "stepping down");

        let was_leader = matches!(self.role, Role::Leader);
        self.hard.current_term = term;
        self.hard.voted_for = None;
        self.role = Role::Follower;
        self.votes_received.clear();

        let mut actions = Vec::new();
        if was_leader {
            // Followers and candidates already have an election timer
            // running; an ex-leader must trade its heartbeat for one.
            // Not re-arming on every higher-term message also keeps a
            // rejoining node with an inflated term from suppressing the
            // cluster's elections.
            actions.push(Action::CancelTimer {
                id: TimerId::Heartbeat,
            });
            actions.push(self.arm_election_timer());
        }
        actions.extend(self.fail_pending_submits());
        actions
    }

    /// A deposed leader cannot promise commitment; tell waiting clients to
    /// retry elsewhere. The entries may still commit under the new leader.
    fn fail_pending_submits(&mut self) -> Vec<Action> {
        let hint = self.leader_hint.filter(|h| *h != self.id);
        self.pending_submits
            .drain()
            .map(|(index, request_id)| {
                trace!(index, ?request_id, "submission orphaned by step-down");
                Action::RespondSubmit {
                    request_id,
                    outcome: SubmitOutcome::NotLeader { hint },
                }
            })
            .collect()
    }

    fn start_election(&mut self) -> Vec<Action> {
        self.role = Role::Candidate;
        self.hard.current_term += 1;
        self.hard.voted_for = Some(self.id);
        self.votes_received.clear();
        self.votes_received.insert(self.id);
        self.leader_hint = None;

        info!(term = self.hard.current_term, "starting election");

        let args = RequestVoteArgs {
            term: self.hard.current_term,
            candidate_id: self.id,
            last_log_index: self.hard.last_log_index(),
            last_log_term: self.hard.last_log_term(),
        };

        let mut actions = vec![
            self.persist(),
            Action::Broadcast {
                message: OutboundMessage::RequestVote(args),
            },
            // Fresh randomized timer: a split vote re-triggers an election.
            self.arm_election_timer(),
        ];

        // Single-node cluster: the self-vote is already a majority.
        if self.votes_received.len() >= self.cluster.majority() {
            actions.extend(self.become_leader());
        }
        actions
    }

    fn become_leader(&mut self) -> Vec<Action> {
        info!(term = self.hard.current_term, "won election, now leader");
        self.role = Role::Leader;
        self.leader_hint = Some(self.id);

        let next = self.hard.last_log_index() + 1;
        self.next_index.clear();
        self.match_index.clear();
        for peer in self.peers() {
            self.next_index.insert(peer, next);
            self.match_index.insert(peer, 0);
        }

        let mut actions = vec![
            Action::CancelTimer {
                id: TimerId::Election,
            },
            Action::SetTimer {
                id: TimerId::Heartbeat,
                duration: self.config.heartbeat_interval,
            },
        ];
        // Assert leadership immediately rather than waiting a tick.
        actions.extend(self.replication_sends());
        actions
    }

    /// One tailored `AppendEntries` per peer, driven by `next_index`.
    fn replication_sends(&self) -> Vec<Action> {
        self.peers()
            .into_iter()
            .map(|peer| Action::Send {
                to: peer,
                message: OutboundMessage::AppendEntries(self.append_args_for(peer)),
            })
            .collect()
    }

    fn append_args_for(&self, peer: NodeId) -> AppendEntriesArgs {
        let next = *self
            .next_index
            .get(&peer)
            .unwrap_or(&(self.hard.last_log_index() + 1));
        let prev_log_index = next.saturating_sub(1);
        let prev_log_term = if prev_log_index == 0 {
            0
        } else {
            self.hard
                .log
                .get(prev_log_index as usize - 1)
                .map(|e| e.term)
                .unwrap_or(0)
        };
        let entries = if next <= self.hard.last_log_index() {
            self.hard.log[next as usize - 1..].to_vec()
        } else {
            Vec::new()
        };

        AppendEntriesArgs {
            term: self.hard.current_term,
            leader_id: self.id,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: self.commit_index,
        }
    }

    /// Leader-side commit rule: the highest `n` replicated on a majority
    /// counts only if `log[n].term == current_term`. Old-term entries are
    /// never committed by count alone; they ride along once a current-term
    /// entry above them commits.
    fn advance_commit(&mut self) -> Vec<Action> {
        if !matches!(self.role, Role::Leader) {
            return Vec::new();
        }

        for n in (self.commit_index + 1..=self.hard.last_log_index()).rev() {
            if self.hard.log[n as usize - 1].term != self.hard.current_term {
                continue;
            }
            let replicas = 1 + self
                .match_index
                .values()
                .filter(|&&matched| matched >= n)
                .count();
            if replicas >= self.cluster.majority() {
                debug!(index = n, "commit index advanced");
                self.commit_index = n;
                break;
            }
        }
        self.drain_applies()
    }

    /// Stream newly committed entries to the key-value store in strict
    /// index order, resolving any submissions waiting on them.
    fn drain_applies(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        while self.last_applied < self.commit_index {
            self.last_applied += 1;
            let entry = &self.hard.log[self.last_applied as usize - 1];
            actions.push(Action::ApplyCommand {
                index: entry.index,
                command: entry.command.clone(),
            });
            if let Some(request_id) = self.pending_submits.remove(&entry.index) {
                actions.push(Action::RespondSubmit {
                    request_id,
                    outcome: SubmitOutcome::Committed { index: entry.index },
                });
            }
        }
        actions
    }

    // ─── Event handlers ───

    fn on_election_timeout(&mut self) -> Vec<Action> {
        match self.role {
            // A stale timer fire; leaders keep no election timer.
            Role::Leader => Vec::new(),
            Role::Follower | Role::Candidate => self.start_election(),
        }
    }

    fn on_heartbeat_tick(&mut self) -> Vec<Action> {
        if !matches!(self.role, Role::Leader) {
            return Vec::new();
        }
        let mut actions = self.replication_sends();
        actions.push(Action::SetTimer {
            id: TimerId::Heartbeat,
            duration: self.config.heartbeat_interval,
        });
        actions
    }

    fn on_request_vote(&mut self, args: RequestVoteArgs) -> Vec<Action> {
        let mut actions = Vec::new();

        if args.term < self.hard.current_term {
            trace!(
                candidate = %args.candidate_id,
                term = args.term,
                current = self.hard.current_term,
                "rejecting stale vote request"
            );
            actions.push(self.reply_vote(args.candidate_id, false));
            return actions;
        }

        let mut need_persist = false;
        if args.term > self.hard.current_term {
            actions.extend(self.demote(args.term));
            need_persist = true;
        }

        let log_ok = args.last_log_term > self.hard.last_log_term()
            || (args.last_log_term == self.hard.last_log_term()
                && args.last_log_index >= self.hard.last_log_index());
        let vote_free = self
            .hard
            .voted_for
            .map(|v| v == args.candidate_id)
            .unwrap_or(true);
        let granted = vote_free && log_ok;

        if granted {
            info!(candidate = %args.candidate_id, term = args.term, "granting vote");
            self.hard.voted_for = Some(args.candidate_id);
            need_persist = true;
            actions.push(self.arm_election_timer());
        }
        if need_persist {
            // The vote (and any adopted term) must be durable before the
            // reply leaves, or a crash-restart could double-vote.
            actions.push(self.persist());
        }
        actions.push(self.reply_vote(args.candidate_id, granted));
        actions
    }

    fn reply_vote(&self, to: NodeId, granted: bool) -> Action {
        Action::Send {
            to,
            message: OutboundMessage::RequestVoteReply(RequestVoteReply {
                term: self.hard.current_term,
                vote_granted: granted,
                voter: self.id,
            }),
        }
    }

    fn on_vote_reply(&mut self, reply: RequestVoteReply) -> Vec<Action> {
        if reply.term > self.hard.current_term {
            return self.step_down(reply.term);
        }
        if !matches!(self.role, Role::Candidate) || reply.term != self.hard.current_term {
            // Late answer from an abandoned election.
            return Vec::new();
        }
        if !reply.vote_granted {
            return Vec::new();
        }

        self.votes_received.insert(reply.voter);
        trace!(
            votes = self.votes_received.len(),
            needed = self.cluster.majority(),
            "vote counted"
        );
        if self.votes_received.len() >= self.cluster.majority() {
            return self.become_leader();
        }
        Vec::new()
    }

    fn on_append_entries(&mut self, args: AppendEntriesArgs) -> Vec<Action> {
        let mut actions = Vec::new();

        if args.term < self.hard.current_term {
            actions.push(self.reply_append(args.leader_id, false, 0));
            return actions;
        }

        let mut need_persist = false;
        if args.term > self.hard.current_term {
            self.hard.current_term = args.term;
            self.hard.voted_for = None;
            need_persist = true;
        }

        // Same-or-higher-term leader traffic always demotes us; a
        // candidate yields to the winner of its own term.
        self.leader_hint = Some(args.leader_id);
        if !matches!(self.role, Role::Follower) {
            if matches!(self.role, Role::Leader) {
                actions.push(Action::CancelTimer {
                    id: TimerId::Heartbeat,
                });
            }
            self.role = Role::Follower;
            self.votes_received.clear();
            actions.extend(self.fail_pending_submits());
        }
        actions.push(self.arm_election_timer());

        // Consistency check at the attachment point.
        if args.prev_log_index > 0 {
            let local_term = self
                .hard
                .log
                .get(args.prev_log_index as usize - 1)
                .map(|e| e.term);
            if local_term != Some(args.prev_log_term) {
                if local_term.is_some() {
                    // The entry at prev conflicts with the leader; drop it
                    // and everything after it.
                    self.hard.log.truncate(args.prev_log_index as usize - 1);
                    need_persist = true;
                }
                debug!(
                    prev_log_index = args.prev_log_index,
                    prev_log_term = args.prev_log_term,
                    "log inconsistency, asking leader to back off"
                );
                if need_persist {
                    actions.push(self.persist());
                }
                actions.push(self.reply_append(args.leader_id, false, 0));
                return actions;
            }
        }

        // Truncate on conflict, append what is missing, skip what matches.
        for entry in &args.entries {
            let idx = entry.index as usize;
            match self.hard.log.get(idx - 1) {
                Some(existing) if existing.term == entry.term => {}
                Some(_) => {
                    self.hard.log.truncate(idx - 1);
                    self.hard.log.push(entry.clone());
                    need_persist = true;
                }
                None => {
                    self.hard.log.push(entry.clone());
                    need_persist = true;
                }
            }
        }

        if need_persist {
            actions.push(self.persist());
        }

        let last_new_entry = args.prev_log_index + args.entries.len() as u64;
        if args.leader_commit > self.commit_index {
            self.commit_index = args.leader_commit.min(last_new_entry);
        }

        actions.push(self.reply_append(args.leader_id, true, last_new_entry));
        actions.extend(self.drain_applies());
        actions
    }

    fn reply_append(&self, to: NodeId, success: bool, match_index: u64) -> Action {
        Action::Send {
            to,
            message: OutboundMessage::AppendEntriesReply(AppendEntriesReply {
                term: self.hard.current_term,
                success,
                match_index,
                follower: self.id,
            }),
        }
    }

    fn on_append_reply(&mut self, reply: AppendEntriesReply) -> Vec<Action> {
        if reply.term > self.hard.current_term {
            return self.step_down(reply.term);
        }
        if !matches!(self.role, Role::Leader) || reply.term != self.hard.current_term {
            return Vec::new();
        }

        if reply.success {
            self.next_index.insert(reply.follower, reply.match_index + 1);
            let matched = self.match_index.entry(reply.follower).or_insert(0);
            *matched = (*matched).max(reply.match_index);
            self.advance_commit()
        } else {
            // Back off one step; the next heartbeat retries from there.
            let next = self.next_index.entry(reply.follower).or_insert(1);
            *next = next.saturating_sub(1).max(1);
            trace!(follower = %reply.follower, next_index = *next, "replication backoff");
            Vec::new()
        }
    }

    fn on_submit(&mut self, command: Command, request_id: RequestId) -> Vec<Action> {
        if !matches!(self.role, Role::Leader) {
            let hint = self.leader_hint.filter(|h| *h != self.id);
            return vec![Action::RespondSubmit {
                request_id,
                outcome: SubmitOutcome::NotLeader { hint },
            }];
        }

        let index = self.hard.last_log_index() + 1;
        info!(index, %command, "appending client command");
        self.hard.log.push(LogEntry {
            term: self.hard.current_term,
            index,
            command,
        });
        self.pending_submits.insert(index, request_id);

        let mut actions = vec![self.persist()];
        actions.extend(self.replication_sends());
        // A single-node cluster commits on its own majority.
        actions.extend(self.advance_commit());
        actions
    }
}

impl StateMachine for CftState {
    fn bootstrap(&mut self) -> Vec<Action> {
        info!(
            id = %self.id,
            term = self.hard.current_term,
            log_len = self.hard.log.len(),
            "CFT-Log started"
        );
        vec![self.arm_election_timer()]
    }

    fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::ElectionTimeout => self.on_election_timeout(),
            Event::HeartbeatTick => self.on_heartbeat_tick(),
            Event::RequestVoteReceived(args) => self.on_request_vote(args),
            Event::RequestVoteReplyReceived(reply) => self.on_vote_reply(reply),
            Event::AppendEntriesReceived(args) => self.on_append_entries(args),
            Event::AppendEntriesReplyReceived(reply) => self.on_append_reply(reply),
            Event::SubmitCommand {
                command,
                request_id,
            } => self.on_submit(command, request_id),
            other => {
                warn!(event = other.type_name(), "unexpected event for CFT-Log");
                Vec::new()
            }
        }
    }

    fn status(&self) -> NodeStatus {
        NodeStatus {
            node_id: self.id,
            role: self.role,
            term: self.hard.current_term,
            log_length: self.hard.last_log_index(),
            commit_index: self.commit_index,
            last_applied: self.last_applied,
            leader: self.leader_hint,
        }
    }
}
