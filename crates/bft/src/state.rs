//! BFT-3P consensus state machine implementation.

use consort_core::{
    Action, Event, NodeStatus, OutboundMessage, RequestId, StateMachine, SubmitOutcome, TimerId,
};
use consort_types::message::{CommitMsg, Prepare, PrePrepare, ViewChange};
use consort_types::{ClusterConfig, Command, ConfigError, Digest, NodeId, Role};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, trace, warn};

use crate::BftConfig;

/// Key of a protocol slot.
type Slot = (u64, u64); // (view, seq)

/// BFT-3P agreement state machine.
///
/// Tracks, per `(view, seq)` slot, the accepted pre-prepare and the
/// prepare/commit sender sets, and applies committed requests in strict
/// sequence order within each view.
pub struct BftState {
    // ─── Identity ───
    id: NodeId,
    cluster: ClusterConfig,
    config: BftConfig,
    /// Fault budget from `n = 3f+1`.
    f: usize,
    /// Agreement quorum `2f+1`.
    quorum: usize,

    // ─── View state ───
    view: u64,
    /// Last sequence number this node assigned while primary of the
    /// current view. Sequences are per-view, starting at 1.
    next_seq: u64,
    /// Vote sets for pending view changes, keyed by proposed view.
    view_change_votes: HashMap<u64, HashSet<NodeId>>,
    in_view_change: bool,

    // ─── Slot state ───
    /// Accepted pre-prepares (the primary's own included).
    pre_prepares: HashMap<Slot, PrePrepare>,
    /// Prepare senders per (view, seq, digest).
    prepares: HashMap<(u64, u64, Digest), HashSet<NodeId>>,
    /// Commit senders per (view, seq, digest).
    commits: HashMap<(u64, u64, Digest), HashSet<NodeId>>,
    /// Slots whose COMMIT we have already broadcast.
    commit_sent: HashSet<Slot>,
    /// Slots that are committed-local.
    committed: HashSet<Slot>,
    /// Highest contiguously applied sequence per view.
    applied_seq: HashMap<u64, u64>,
    /// Total requests applied across views.
    applied_count: u64,

    // ─── Client bookkeeping ───
    pending_submits: HashMap<Slot, RequestId>,
}

impl BftState {
    /// Build a BFT-3P state machine.
    ///
    /// Fails when the cluster size does not satisfy `n = 3f+1` or the
    /// node is not a member: both are startup-refusing misconfigurations.
    pub fn new(id: NodeId, cluster: ClusterConfig, config: BftConfig) -> Result<Self, ConfigError> {
        let f = cluster.byzantine_f()?;
        if cluster.peer(id).is_none() {
            return Err(ConfigError::UnknownNode(id));
        }
        Ok(Self {
            id,
            config,
            f,
            quorum: 2 * f + 1,
            cluster,
            view: 0,
            next_seq: 0,
            view_change_votes: HashMap::new(),
            in_view_change: false,
            pre_prepares: HashMap::new(),
            prepares: HashMap::new(),
            commits: HashMap::new(),
            commit_sent: HashSet::new(),
            committed: HashSet::new(),
            applied_seq: HashMap::new(),
            applied_count: 0,
            pending_submits: HashMap::new(),
        })
    }

    // ─── Accessors ───

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn view(&self) -> u64 {
        self.view
    }

    pub fn f(&self) -> usize {
        self.f
    }

    /// Primary of the current view: round-robin over sorted ids.
    pub fn primary(&self) -> NodeId {
        self.cluster.primary_for_view(self.view)
    }

    pub fn is_primary(&self) -> bool {
        self.primary() == self.id
    }

    /// Highest contiguously applied sequence in the current view.
    pub fn applied_seq(&self) -> u64 {
        self.applied_seq.get(&self.view).copied().unwrap_or(0)
    }

    /// Total requests applied since start.
    pub fn applied_count(&self) -> u64 {
        self.applied_count
    }

    /// The request applied at `(view, seq)`, if any.
    pub fn applied_request(&self, view: u64, seq: u64) -> Option<&Command> {
        if self.applied_seq.get(&view).copied().unwrap_or(0) >= seq {
            self.pre_prepares.get(&(view, seq)).map(|pp| &pp.request)
        } else {
            None
        }
    }

    // ─── Internals ───

    fn arm_watchdog(&self) -> Action {
        Action::SetTimer {
            id: TimerId::ViewChange,
            duration: self.config.view_change_timeout,
        }
    }

    fn digest_for(&self, command: &Command) -> Digest {
        if self.config.byzantine {
            // Tampered digest: honest replicas must refuse the slot.
            Digest::of_bytes(b"garbage")
        } else {
            Digest::of_command(command)
        }
    }

    /// Record a prepare vote. Returns any actions unlocked by it.
    fn record_prepare(&mut self, view: u64, seq: u64, digest: Digest, sender: NodeId) -> Vec<Action> {
        self.prepares
            .entry((view, seq, digest))
            .or_default()
            .insert(sender);
        self.try_prepared(view, seq, digest)
    }

    /// Once `2f+1` matching prepares exist for an *accepted* pre-prepare,
    /// broadcast our commit (exactly once).
    fn try_prepared(&mut self, view: u64, seq: u64, digest: Digest) -> Vec<Action> {
        if self.commit_sent.contains(&(view, seq)) {
            return Vec::new();
        }
        match self.pre_prepares.get(&(view, seq)) {
            Some(pp) if pp.digest == digest => {}
            // Prepares for digests we never accepted stay buffered and
            // inert; a quorum of them proves nothing without the request.
            _ => return Vec::new(),
        }
        let count = self
            .prepares
            .get(&(view, seq, digest))
            .map(|s| s.len())
            .unwrap_or(0);
        if count < self.quorum {
            return Vec::new();
        }

        debug!(view, seq, prepares = count, "prepared");
        self.commit_sent.insert((view, seq));

        if self.config.byzantine {
            // Withhold the commit entirely.
            return Vec::new();
        }

        self.commits
            .entry((view, seq, digest))
            .or_default()
            .insert(self.id);

        let mut actions = vec![Action::Broadcast {
            message: OutboundMessage::Commit(CommitMsg {
                view,
                seq,
                digest,
                sender: self.id,
            }),
        }];
        // Buffered commits may already complete the quorum.
        actions.extend(self.try_committed(view, seq, digest));
        actions
    }

    /// Once `2f+1` matching commits exist for an accepted pre-prepare, the
    /// slot is committed-local; apply everything that became contiguous.
    fn try_committed(&mut self, view: u64, seq: u64, digest: Digest) -> Vec<Action> {
        if self.committed.contains(&(view, seq)) {
            return Vec::new();
        }
        match self.pre_prepares.get(&(view, seq)) {
            Some(pp) if pp.digest == digest => {}
            _ => return Vec::new(),
        }
        let count = self
            .commits
            .get(&(view, seq, digest))
            .map(|s| s.len())
            .unwrap_or(0);
        if count < self.quorum {
            return Vec::new();
        }

        info!(view, seq, commits = count, "committed-local");
        self.committed.insert((view, seq));
        self.drain_applies(view)
    }

    /// Apply committed slots in strict sequence order within `view`.
    fn drain_applies(&mut self, view: u64) -> Vec<Action> {
        let mut actions = Vec::new();
        loop {
            let next = self.applied_seq.get(&view).copied().unwrap_or(0) + 1;
            if !self.committed.contains(&(view, next)) {
                break;
            }
            let Some(pp) = self.pre_prepares.get(&(view, next)) else {
                break;
            };
            self.applied_seq.insert(view, next);
            self.applied_count += 1;
            info!(view, seq = next, request = %pp.request, "applying request");
            actions.push(Action::ApplyCommand {
                index: next,
                command: pp.request.clone(),
            });
            if let Some(request_id) = self.pending_submits.remove(&(view, next)) {
                actions.push(Action::RespondSubmit {
                    request_id,
                    outcome: SubmitOutcome::Committed { index: next },
                });
            }
        }
        actions
    }

    // ─── Event handlers ───

    fn on_submit(&mut self, command: Command, request_id: RequestId) -> Vec<Action> {
        if !self.is_primary() {
            return vec![Action::RespondSubmit {
                request_id,
                outcome: SubmitOutcome::NotLeader {
                    hint: Some(self.primary()),
                },
            }];
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        let view = self.view;
        let digest = self.digest_for(&command);

        info!(view, seq, %command, "primary ordering request");

        let pp = PrePrepare {
            view,
            seq,
            digest,
            request: command,
            primary: self.id,
        };
        self.pre_prepares.insert((view, seq), pp.clone());
        self.pending_submits.insert((view, seq), request_id);

        let mut actions = vec![Action::Broadcast {
            message: OutboundMessage::PrePrepare(pp),
        }];
        // The pre-prepare doubles as the primary's prepare vote: together
        // with 2f votes from backups that makes the 2f+1 certificate.
        actions.extend(self.record_prepare(view, seq, digest, self.id));
        actions
    }

    fn on_pre_prepare(&mut self, pp: PrePrepare) -> Vec<Action> {
        let mut actions = vec![self.arm_watchdog()];

        if pp.view != self.view {
            trace!(got = pp.view, ours = self.view, "pre-prepare for other view");
            return actions;
        }
        if pp.primary != self.primary() {
            warn!(
                claimed = %pp.primary,
                expected = %self.primary(),
                "pre-prepare from non-primary, dropping"
            );
            return actions;
        }
        if Digest::of_command(&pp.request) != pp.digest {
            warn!(view = pp.view, seq = pp.seq, "digest mismatch, dropping (byzantine?)");
            return actions;
        }
        match self.pre_prepares.get(&(pp.view, pp.seq)) {
            Some(existing) if existing.digest != pp.digest => {
                warn!(
                    view = pp.view,
                    seq = pp.seq,
                    "conflicting pre-prepare for an occupied slot, dropping"
                );
                return actions;
            }
            Some(_) => return actions, // duplicate
            None => {}
        }

        debug!(view = pp.view, seq = pp.seq, "accepted pre-prepare");
        let (view, seq, digest) = (pp.view, pp.seq, pp.digest);
        self.pre_prepares.insert((view, seq), pp);

        // The accepted pre-prepare is the primary's vote; ours goes on the
        // wire.
        actions.extend(self.record_prepare(view, seq, digest, self.primary()));

        if self.config.byzantine {
            // Equivocate: a different digest for every recipient.
            for peer in self.cluster.node_ids() {
                if peer == self.id {
                    continue;
                }
                actions.push(Action::Send {
                    to: peer,
                    message: OutboundMessage::Prepare(Prepare {
                        view,
                        seq,
                        digest: digest.perturbed(peer.0),
                        sender: self.id,
                    }),
                });
            }
            return actions;
        }

        actions.push(Action::Broadcast {
            message: OutboundMessage::Prepare(Prepare {
                view,
                seq,
                digest,
                sender: self.id,
            }),
        });
        actions.extend(self.record_prepare(view, seq, digest, self.id));
        actions
    }

    fn on_prepare(&mut self, prepare: Prepare) -> Vec<Action> {
        let mut actions = vec![self.arm_watchdog()];
        if prepare.view != self.view {
            return actions;
        }
        trace!(
            view = prepare.view,
            seq = prepare.seq,
            sender = %prepare.sender,
            "prepare received"
        );
        actions.extend(self.record_prepare(
            prepare.view,
            prepare.seq,
            prepare.digest,
            prepare.sender,
        ));
        actions
    }

    fn on_commit(&mut self, commit: CommitMsg) -> Vec<Action> {
        let mut actions = vec![self.arm_watchdog()];
        if commit.view != self.view {
            return actions;
        }
        trace!(
            view = commit.view,
            seq = commit.seq,
            sender = %commit.sender,
            "commit received"
        );
        self.commits
            .entry((commit.view, commit.seq, commit.digest))
            .or_default()
            .insert(commit.sender);
        actions.extend(self.try_committed(commit.view, commit.seq, commit.digest));
        actions
    }

    fn on_watchdog_timeout(&mut self) -> Vec<Action> {
        if self.is_primary() {
            // The primary does not depose itself.
            return vec![self.arm_watchdog()];
        }

        let new_view = self.view + 1;
        warn!(
            view = self.view,
            new_view, "no progress under current primary, voting for view change"
        );
        self.in_view_change = true;
        self.view_change_votes
            .entry(new_view)
            .or_default()
            .insert(self.id);

        let mut actions = vec![
            self.arm_watchdog(),
            Action::Broadcast {
                message: OutboundMessage::ViewChange(ViewChange {
                    new_view,
                    last_seq: self.next_seq,
                    sender: self.id,
                }),
            },
        ];
        actions.extend(self.try_complete_view_change(new_view));
        actions
    }

    fn on_view_change(&mut self, vc: ViewChange) -> Vec<Action> {
        if vc.new_view <= self.view {
            return Vec::new();
        }
        debug!(new_view = vc.new_view, sender = %vc.sender, "view-change vote");
        self.view_change_votes
            .entry(vc.new_view)
            .or_default()
            .insert(vc.sender);
        self.try_complete_view_change(vc.new_view)
    }

    fn try_complete_view_change(&mut self, new_view: u64) -> Vec<Action> {
        let votes = self
            .view_change_votes
            .get(&new_view)
            .map(|s| s.len())
            .unwrap_or(0);
        if new_view <= self.view || votes < self.quorum {
            return Vec::new();
        }

        self.view = new_view;
        self.in_view_change = false;
        self.next_seq = 0;
        self.view_change_votes.retain(|v, _| *v > new_view);
        info!(view = new_view, primary = %self.primary(), "view change complete");

        // Unresolved submissions belonged to the deposed primary's view.
        let primary = self.primary();
        let mut actions: Vec<Action> = self
            .pending_submits
            .drain()
            .map(|(_, request_id)| Action::RespondSubmit {
                request_id,
                outcome: SubmitOutcome::NotLeader {
                    hint: Some(primary),
                },
            })
            .collect();
        actions.push(self.arm_watchdog());
        actions
    }
}

impl StateMachine for BftState {
    fn bootstrap(&mut self) -> Vec<Action> {
        info!(
            id = %self.id,
            view = self.view,
            primary = %self.primary(),
            f = self.f,
            byzantine = self.config.byzantine,
            "BFT-3P started"
        );
        vec![self.arm_watchdog()]
    }

    fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::ViewChangeTimeout => self.on_watchdog_timeout(),
            Event::PrePrepareReceived(pp) => self.on_pre_prepare(pp),
            Event::PrepareReceived(prepare) => self.on_prepare(prepare),
            Event::CommitReceived(commit) => self.on_commit(commit),
            Event::ViewChangeReceived(vc) => self.on_view_change(vc),
            Event::SubmitCommand {
                command,
                request_id,
            } => self.on_submit(command, request_id),
            other => {
                warn!(event = other.type_name(), "unexpected event for BFT-3P");
                Vec::new()
            }
        }
    }

    fn status(&self) -> NodeStatus {
        NodeStatus {
            node_id: self.id,
            role: if self.is_primary() {
                Role::Leader
            } else {
                Role::Follower
            },
            term: self.view,
            log_length: self.applied_count,
            commit_index: self.applied_seq(),
            last_applied: self.applied_seq(),
            leader: Some(self.primary()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consort_types::Peer;

    fn cluster(n: u64) -> ClusterConfig {
        ClusterConfig::new(
            (1..=n)
                .map(|i| Peer {
                    id: NodeId(i),
                    host: "127.0.0.1".into(),
                    port: 8000 + i as u16,
                })
                .collect(),
        )
        .unwrap()
    }

    fn replica(id: u64) -> BftState {
        BftState::new(NodeId(id), cluster(4), BftConfig::default()).unwrap()
    }

    fn pre_prepare(seq: u64, command: Command) -> PrePrepare {
        PrePrepare {
            view: 0,
            seq,
            digest: Digest::of_command(&command),
            request: command,
            primary: NodeId(1),
        }
    }

    fn prepare(seq: u64, digest: Digest, sender: u64) -> Event {
        Event::PrepareReceived(Prepare {
            view: 0,
            seq,
            digest,
            sender: NodeId(sender),
        })
    }

    fn commit(seq: u64, digest: Digest, sender: u64) -> Event {
        Event::CommitReceived(CommitMsg {
            view: 0,
            seq,
            digest,
            sender: NodeId(sender),
        })
    }

    fn broadcasts(actions: &[Action]) -> Vec<&OutboundMessage> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Broadcast { message } => Some(message),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn rejects_cluster_sizes_off_3f_plus_1() {
        for n in [1, 2, 3, 5, 6] {
            assert!(BftState::new(NodeId(1), cluster(n), BftConfig::default()).is_err());
        }
        let state = BftState::new(NodeId(1), cluster(7), BftConfig::default()).unwrap();
        assert_eq!(state.f(), 2);
        assert_eq!(state.quorum, 5);
    }

    #[test]
    fn primary_is_view_mod_n() {
        let mut state = replica(2);
        assert_eq!(state.primary(), NodeId(1));
        state.view = 1;
        assert_eq!(state.primary(), NodeId(2));
        assert!(state.is_primary());
        state.view = 4;
        assert_eq!(state.primary(), NodeId(1));
    }

    #[test]
    fn primary_assigns_sequences_and_broadcasts() {
        let mut primary = replica(1);
        let actions = primary.handle(Event::SubmitCommand {
            command: Command::set("k", "v"),
            request_id: RequestId(1),
        });

        let msgs = broadcasts(&actions);
        assert_eq!(msgs.len(), 1);
        match msgs[0] {
            OutboundMessage::PrePrepare(pp) => {
                assert_eq!(pp.seq, 1);
                assert_eq!(pp.view, 0);
                assert_eq!(pp.digest, Digest::of_command(&pp.request));
            }
            other => panic!("expected PrePrepare, got {}", other.type_name()),
        }

        // Sequences increase monotonically per view.
        let actions = primary.handle(Event::SubmitCommand {
            command: Command::set("k2", "v2"),
            request_id: RequestId(2),
        });
        match broadcasts(&actions)[0] {
            OutboundMessage::PrePrepare(pp) => assert_eq!(pp.seq, 2),
            _ => panic!("expected PrePrepare"),
        }
    }

    #[test]
    fn backup_refuses_submissions_with_primary_hint() {
        let mut backup = replica(2);
        let actions = backup.handle(Event::SubmitCommand {
            command: Command::Noop,
            request_id: RequestId(1),
        });
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::RespondSubmit {
                outcome: SubmitOutcome::NotLeader {
                    hint: Some(NodeId(1))
                },
                ..
            }
        )));
    }

    #[test]
    fn accepting_pre_prepare_broadcasts_prepare() {
        let mut backup = replica(2);
        let actions = backup.handle(Event::PrePrepareReceived(pre_prepare(
            1,
            Command::set("k", "v"),
        )));
        let msgs = broadcasts(&actions);
        assert!(
            matches!(msgs[..], [OutboundMessage::Prepare(ref p)] if p.seq == 1),
            "one prepare broadcast expected"
        );
    }

    #[test]
    fn tampered_digest_is_dropped() {
        let mut backup = replica(2);
        let command = Command::set("k", "v");
        let mut pp = pre_prepare(1, command);
        pp.digest = Digest::of_bytes(b"garbage");

        let actions = backup.handle(Event::PrePrepareReceived(pp));
        assert!(broadcasts(&actions).is_empty(), "no prepare for tampered request");
        assert!(backup.pre_prepares.is_empty());
    }

    #[test]
    fn pre_prepare_from_non_primary_is_dropped() {
        let mut backup = replica(2);
        let command = Command::set("k", "v");
        let mut pp = pre_prepare(1, command);
        pp.primary = NodeId(3);

        let actions = backup.handle(Event::PrePrepareReceived(pp));
        assert!(broadcasts(&actions).is_empty());
    }

    #[test]
    fn conflicting_pre_prepare_at_occupied_slot_is_dropped() {
        let mut backup = replica(2);
        backup.handle(Event::PrePrepareReceived(pre_prepare(
            1,
            Command::set("k", "v"),
        )));
        backup.handle(Event::PrePrepareReceived(pre_prepare(
            1,
            Command::set("k", "DIFFERENT"),
        )));

        // The slot still holds the first request.
        let held = &backup.pre_prepares[&(0, 1)].request;
        assert_eq!(held, &Command::set("k", "v"));
    }

    #[test]
    fn quorum_of_prepares_triggers_commit() {
        let mut backup = replica(2);
        let command = Command::set("k", "v");
        let digest = Digest::of_command(&command);

        backup.handle(Event::PrePrepareReceived(pre_prepare(1, command)));
        // Accepted pre-prepare carries primary's + our own vote (2 of 3).
        let actions = backup.handle(prepare(1, digest, 3));
        let msgs = broadcasts(&actions);
        assert!(
            matches!(msgs[..], [OutboundMessage::Commit(ref c)] if c.seq == 1),
            "2f+1 prepares must produce exactly one commit broadcast"
        );
    }

    #[test]
    fn duplicate_prepares_from_one_sender_count_once() {
        let mut backup = replica(2);
        let command = Command::set("k", "v");
        let digest = Digest::of_command(&command);

        // Two copies from node 3 before the pre-prepare arrives: at most
        // one vote, and nothing fires without the accepted request.
        backup.handle(prepare(1, digest, 3));
        let actions = backup.handle(prepare(1, digest, 3));
        assert!(broadcasts(&actions).is_empty());
        assert_eq!(backup.prepares[&(0, 1, digest)].len(), 1);
    }

    #[test]
    fn buffered_prepares_fire_once_pre_prepare_arrives() {
        let mut backup = replica(2);
        let command = Command::set("k", "v");
        let digest = Digest::of_command(&command);

        backup.handle(prepare(1, digest, 3));
        backup.handle(prepare(1, digest, 4));
        let actions = backup.handle(Event::PrePrepareReceived(pre_prepare(1, command)));

        // Acceptance adds primary's + own votes to the two buffered ones;
        // the commit must go out in the same batch.
        assert!(
            broadcasts(&actions)
                .iter()
                .any(|m| matches!(m, OutboundMessage::Commit(_))),
            "commit should fire from buffered prepares"
        );
    }

    #[test]
    fn commit_quorum_applies_in_order() {
        let mut backup = replica(2);
        let cmd1 = Command::set("a", "1");
        let cmd2 = Command::set("b", "2");
        let d1 = Digest::of_command(&cmd1);
        let d2 = Digest::of_command(&cmd2);

        backup.handle(Event::PrePrepareReceived(pre_prepare(1, cmd1)));
        backup.handle(Event::PrePrepareReceived(pre_prepare(2, cmd2)));

        // Prepare quorums for both slots.
        backup.handle(prepare(1, d1, 3));
        backup.handle(prepare(2, d2, 3));

        // Commit quorum for seq 2 FIRST: nothing may apply yet.
        backup.handle(commit(2, d2, 1));
        let actions = backup.handle(commit(2, d2, 3));
        assert!(
            !actions
                .iter()
                .any(|a| matches!(a, Action::ApplyCommand { .. })),
            "seq 2 must wait for seq 1"
        );
        assert_eq!(backup.applied_seq(), 0);

        // Commit quorum for seq 1: both apply, in order.
        backup.handle(commit(1, d1, 1));
        let actions = backup.handle(commit(1, d1, 3));
        let applied: Vec<u64> = actions
            .iter()
            .filter_map(|a| match a {
                Action::ApplyCommand { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(applied, vec![1, 2]);
        assert_eq!(backup.applied_seq(), 2);
    }

    #[test]
    fn commits_for_unaccepted_digests_never_apply() {
        let mut backup = replica(2);
        let bogus = Digest::of_bytes(b"bogus");
        for sender in [1, 3, 4] {
            backup.handle(commit(1, bogus, sender));
        }
        assert_eq!(backup.applied_seq(), 0);
        assert!(backup.committed.is_empty());
    }

    #[test]
    fn primary_pipeline_completes_with_backup_votes() {
        // Drive the primary end to end: submit, then backup prepares and
        // commits arrive. 4 nodes, f=1, quorum 3.
        let mut primary = replica(1);
        let command = Command::set("k", "v");
        let digest = Digest::of_command(&command);

        primary.handle(Event::SubmitCommand {
            command,
            request_id: RequestId(9),
        });

        // Own pre-prepare counts as one prepare; two backups complete it.
        primary.handle(prepare(1, digest, 2));
        let actions = primary.handle(prepare(1, digest, 3));
        assert!(broadcasts(&actions)
            .iter()
            .any(|m| matches!(m, OutboundMessage::Commit(_))));

        // Own commit plus two backups: committed and applied, client told.
        primary.handle(commit(1, digest, 2));
        let actions = primary.handle(commit(1, digest, 3));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::ApplyCommand { index: 1, .. })));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::RespondSubmit {
                request_id: RequestId(9),
                outcome: SubmitOutcome::Committed { index: 1 },
            }
        )));
    }

    #[test]
    fn byzantine_primary_sends_tampered_digest() {
        let mut bad_primary =
            BftState::new(NodeId(1), cluster(4), BftConfig::byzantine_mode()).unwrap();
        let actions = bad_primary.handle(Event::SubmitCommand {
            command: Command::set("k", "v"),
            request_id: RequestId(1),
        });
        match broadcasts(&actions)[0] {
            OutboundMessage::PrePrepare(pp) => {
                assert_ne!(pp.digest, Digest::of_command(&pp.request));
            }
            _ => panic!("expected PrePrepare"),
        }
    }

    #[test]
    fn byzantine_backup_equivocates_prepares() {
        let mut bad_backup =
            BftState::new(NodeId(2), cluster(4), BftConfig::byzantine_mode()).unwrap();
        let actions = bad_backup.handle(Event::PrePrepareReceived(pre_prepare(
            1,
            Command::set("k", "v"),
        )));

        assert!(broadcasts(&actions).is_empty(), "no honest broadcast");
        let mut digests = HashSet::new();
        for action in &actions {
            if let Action::Send {
                message: OutboundMessage::Prepare(p),
                ..
            } = action
            {
                digests.insert(p.digest);
            }
        }
        assert_eq!(digests.len(), 3, "a distinct digest per recipient");
    }

    #[test]
    fn view_change_quorum_rotates_primary() {
        let mut backup = replica(3);
        assert_eq!(backup.primary(), NodeId(1));

        // Watchdog fires: we vote for view 1 and keep waiting.
        let actions = backup.handle(Event::ViewChangeTimeout);
        assert!(broadcasts(&actions)
            .iter()
            .any(|m| matches!(m, OutboundMessage::ViewChange(vc) if vc.new_view == 1)));
        assert_eq!(backup.view(), 0);

        // Two more distinct votes complete the 2f+1 quorum.
        backup.handle(Event::ViewChangeReceived(ViewChange {
            new_view: 1,
            last_seq: 0,
            sender: NodeId(2),
        }));
        backup.handle(Event::ViewChangeReceived(ViewChange {
            new_view: 1,
            last_seq: 0,
            sender: NodeId(4),
        }));

        assert_eq!(backup.view(), 1);
        assert_eq!(backup.primary(), NodeId(2));
        assert!(!backup.in_view_change);
    }

    #[test]
    fn stale_view_change_votes_are_ignored() {
        let mut backup = replica(3);
        backup.view = 2;
        let actions = backup.handle(Event::ViewChangeReceived(ViewChange {
            new_view: 1,
            last_seq: 0,
            sender: NodeId(2),
        }));
        assert!(actions.is_empty());
        assert_eq!(backup.view(), 2);
    }

    #[test]
    fn four_honest_nodes_agree_end_to_end() {
        // Route actions between four in-memory replicas until quiescent.
        let mut nodes: Vec<BftState> = (1..=4).map(replica).collect();
        let mut inbox: Vec<(usize, Event)> = vec![(
            0,
            Event::SubmitCommand {
                command: Command::set("k", "v"),
                request_id: RequestId(1),
            },
        )];

        while let Some((target, event)) = inbox.pop() {
            let actions = nodes[target].handle(event);
            for action in actions {
                match action {
                    Action::Broadcast { message } => {
                        for i in 0..nodes.len() {
                            if i != target {
                                inbox.push((
                                    i,
                                    consort_core::event_for_message(message.clone()),
                                ));
                            }
                        }
                    }
                    Action::Send { to, message } => {
                        let i = (to.0 - 1) as usize;
                        inbox.push((i, consort_core::event_for_message(message)));
                    }
                    _ => {}
                }
            }
        }

        for node in &nodes {
            assert_eq!(node.applied_seq(), 1, "{} must apply seq 1", node.id());
            assert_eq!(
                node.applied_request(0, 1),
                Some(&Command::set("k", "v"))
            );
        }
    }

    #[test]
    fn one_byzantine_node_cannot_block_agreement() {
        // Node 4 is byzantine; 1..3 honest. Submit via honest primary 1.
        let mut nodes: Vec<BftState> = vec![
            replica(1),
            replica(2),
            replica(3),
            BftState::new(NodeId(4), cluster(4), BftConfig::byzantine_mode()).unwrap(),
        ];
        let mut inbox: Vec<(usize, Event)> = vec![(
            0,
            Event::SubmitCommand {
                command: Command::set("k", "v"),
                request_id: RequestId(1),
            },
        )];

        while let Some((target, event)) = inbox.pop() {
            let actions = nodes[target].handle(event);
            for action in actions {
                match action {
                    Action::Broadcast { message } => {
                        for i in 0..nodes.len() {
                            if i != target {
                                inbox.push((
                                    i,
                                    consort_core::event_for_message(message.clone()),
                                ));
                            }
                        }
                    }
                    Action::Send { to, message } => {
                        inbox.push(((to.0 - 1) as usize, consort_core::event_for_message(message)));
                    }
                    _ => {}
                }
            }
        }

        for node in nodes.iter().take(3) {
            assert_eq!(node.applied_seq(), 1, "honest {} must apply", node.id());
            assert_eq!(
                node.applied_request(0, 1),
                Some(&Command::set("k", "v"))
            );
        }
    }
}
