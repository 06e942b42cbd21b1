//! Linear undo/redo history over the cluster state.
//!
//! Every mutation of the [`ClusterState`] goes through the [`ActionStack`],
//! which publishes a [`ClusterChange`] to its subscribers after each
//! successful execute, undo, redo or load. Subscribers receive the changes
//! through queues and consume them on their own schedule.
use std::collections::VecDeque;

use async_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::{
    cluster::{ClusterId, ClusterState, CurationRecord, Delta},
    command::{Command, CommandKind, Operation},
    error::DataError,
};

const DEFAULT_MAX_DEPTH: fn() -> usize = || 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Number of commands kept for undo; older ones are forgotten.
    #[serde(default = "DEFAULT_MAX_DEPTH")]
    pub max_depth: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH(),
        }
    }
}

/// What caused a [`ClusterChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeCause {
    Execute(CommandKind),
    Undo(CommandKind),
    Redo(CommandKind),
    Load,
}

/// Notification of a change of the cluster state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterChange {
    pub cause: ChangeCause,
    pub added: Vec<ClusterId>,
    pub removed: Vec<ClusterId>,
    pub metadata_changed: Vec<ClusterId>,
}

impl ClusterChange {
    fn from_delta(cause: ChangeCause, delta: &Delta) -> Self {
        Self {
            cause,
            added: delta.added.iter().map(|r| r.id).collect(),
            removed: delta.removed.iter().map(|r| r.id).collect(),
            metadata_changed: delta.relabeled.iter().map(|c| c.cluster).collect(),
        }
    }

    /// Every cluster mentioned by the change.
    pub fn affected(&self) -> impl Iterator<Item = ClusterId> + '_ {
        self.removed
            .iter()
            .chain(&self.added)
            .chain(&self.metadata_changed)
            .copied()
    }

    /// Whether the partition itself changed.
    pub fn is_structural(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

#[derive(Debug)]
pub struct ActionStack {
    state: ClusterState,
    undo_stack: VecDeque<Command>,
    redo_stack: Vec<Command>,
    config: HistoryConfig,
    subscribers: Vec<Sender<ClusterChange>>,
}

impl ActionStack {
    pub fn new(state: ClusterState, config: HistoryConfig) -> Self {
        Self {
            state,
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            config,
            subscribers: Vec::new(),
        }
    }

    pub fn state(&self) -> &ClusterState {
        &self.state
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Registers a new subscriber; it receives every change from now on.
    pub fn subscribe(&mut self) -> Receiver<ClusterChange> {
        let (sender, receiver) = async_channel::unbounded();
        self.subscribers.push(sender);
        receiver
    }

    fn publish(&mut self, change: &ClusterChange) {
        // Dropped receivers close their channel and are forgotten.
        self.subscribers
            .retain(|subscriber| subscriber.try_send(change.clone()).is_ok());
    }

    /// Validates and applies an operation, clearing the redo history.
    ///
    /// An invalid operation leaves the state and the history untouched, and
    /// so does one that changes nothing.
    pub fn execute(&mut self, operation: Operation) -> Result<ClusterChange, DataError> {
        let command = Command::plan(&self.state, &operation)?;
        if command.forward().is_empty() {
            return Ok(ClusterChange::from_delta(
                ChangeCause::Execute(command.kind()),
                command.forward(),
            ));
        }
        self.state.apply(command.forward());
        tracing::info!("{command}");

        let change = ClusterChange::from_delta(ChangeCause::Execute(command.kind()), command.forward());
        self.redo_stack.clear();
        self.undo_stack.push_back(command);
        while self.undo_stack.len() > self.config.max_depth {
            self.undo_stack.pop_front();
        }

        self.publish(&change);
        Ok(change)
    }

    /// Reverts the last command, if any.
    pub fn undo(&mut self) -> Option<ClusterChange> {
        let command = self.undo_stack.pop_back()?;
        self.state.apply(command.backward());
        tracing::info!("undo {command}");

        let change = ClusterChange::from_delta(ChangeCause::Undo(command.kind()), command.backward());
        self.redo_stack.push(command);
        self.publish(&change);
        Some(change)
    }

    /// Applies the last undone command again, with the same cluster ids.
    pub fn redo(&mut self) -> Option<ClusterChange> {
        let command = self.redo_stack.pop()?;
        self.state.apply(command.forward());
        tracing::info!("redo {command}");

        let change = ClusterChange::from_delta(ChangeCause::Redo(command.kind()), command.forward());
        self.undo_stack.push_back(command);
        self.publish(&change);
        Some(change)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    /// Replaces the state by a persisted one and clears the history.
    pub fn load(&mut self, record: &CurationRecord) -> Result<ClusterChange, DataError> {
        let state = ClusterState::from_record(record)?;
        let change = ClusterChange {
            cause: ChangeCause::Load,
            added: state.cluster_ids().collect(),
            removed: self.state.cluster_ids().collect(),
            metadata_changed: Vec::new(),
        };
        tracing::info!(
            "loaded {} clusters over {} spikes",
            state.n_clusters(),
            state.n_spikes()
        );

        self.state = state;
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.publish(&change);
        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::cluster::{LabelField, SpikeId};

    fn stack(assignments: &[u32]) -> ActionStack {
        ActionStack::new(ClusterState::new(assignments).unwrap(), HistoryConfig::default())
    }

    #[test]
    fn undo_and_redo_on_empty_stacks_do_nothing() {
        let mut stack = stack(&[0, 1]);
        assert_eq!(stack.undo(), None);
        assert_eq!(stack.redo(), None);
    }

    #[test]
    fn redo_reuses_the_ids_of_the_first_application() {
        let mut stack = stack(&[0, 1, 2]);
        let first = stack.execute(Operation::merge([ClusterId(0), ClusterId(1)])).unwrap();
        assert_eq!(first.added, vec![ClusterId(3)]);

        let undone = stack.undo().unwrap();
        assert_eq!(undone.added, vec![ClusterId(0), ClusterId(1)]);
        assert_eq!(undone.removed, vec![ClusterId(3)]);

        let redone = stack.redo().unwrap();
        assert_eq!(redone.added, first.added);
        assert_eq!(stack.state().cluster_of(SpikeId(0)), Ok(ClusterId(3)));
    }

    #[test]
    fn undoing_a_merge_restores_its_parents() {
        // Cluster 3 holds spikes 1 and 2, cluster 7 holds spike 5.
        let mut stack = stack(&[0, 3, 3, 0, 0, 7]);
        let change = stack.execute(Operation::merge([ClusterId(3), ClusterId(7)])).unwrap();
        let merged = change.added[0];
        assert_eq!(stack.state().spikes(merged).unwrap(), &[SpikeId(1), SpikeId(2), SpikeId(5)]);

        stack.undo();
        assert_eq!(stack.state().spikes(ClusterId(3)).unwrap(), &[SpikeId(1), SpikeId(2)]);
        assert_eq!(stack.state().spikes(ClusterId(7)).unwrap(), &[SpikeId(5)]);
        assert!(!stack.state().is_live(merged));
    }

    #[test]
    fn redoing_a_split_reproduces_its_ids() {
        let mut stack = stack(&[0, 3, 3, 3, 3]);
        let first = stack
            .execute(Operation::split(ClusterId(3), [SpikeId(1), SpikeId(2)]))
            .unwrap();
        let [subset, rest] = first.added[..] else {
            panic!("a split in two creates two clusters");
        };
        assert_eq!(stack.state().spikes(subset).unwrap(), &[SpikeId(1), SpikeId(2)]);
        assert_eq!(stack.state().spikes(rest).unwrap(), &[SpikeId(3), SpikeId(4)]);

        stack.undo();
        let redone = stack.redo().unwrap();
        assert_eq!(redone.cause, ChangeCause::Redo(CommandKind::Split));
        assert_eq!(redone.added, first.added);
        assert_eq!(stack.state().spikes(subset).unwrap(), &[SpikeId(1), SpikeId(2)]);
    }

    #[test]
    fn executing_clears_the_redo_history() {
        let mut stack = stack(&[0, 1, 2]);
        stack.execute(Operation::merge([ClusterId(0), ClusterId(1)])).unwrap();
        stack.undo();
        assert!(stack.can_redo());

        let change = stack.execute(Operation::merge([ClusterId(1), ClusterId(2)])).unwrap();
        assert!(!stack.can_redo());
        // Id 3 was issued before, even though its command was undone.
        assert_eq!(change.added, vec![ClusterId(4)]);
    }

    #[test]
    fn failed_operations_leave_everything_untouched() {
        let mut stack = stack(&[0, 1]);
        stack.execute(Operation::merge([ClusterId(0), ClusterId(1)])).unwrap();
        stack.undo();
        let receiver = stack.subscribe();

        let err = stack.execute(Operation::merge([ClusterId(0), ClusterId(7)]));
        assert_eq!(err, Err(DataError::UnknownCluster(ClusterId(7))));
        assert!(stack.can_redo());
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn operations_without_effect_are_not_recorded() {
        let mut stack = stack(&[0, 1]);
        stack.execute(Operation::merge([ClusterId(0), ClusterId(1)])).unwrap();
        stack.undo();
        let receiver = stack.subscribe();

        let change = stack
            .execute(Operation::Move {
                clusters: vec![ClusterId(0)],
                group: None,
            })
            .unwrap();
        assert!(change.metadata_changed.is_empty());
        assert!(!stack.can_undo());
        assert!(stack.can_redo());
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn subscribers_receive_every_change() {
        let mut stack = stack(&[0, 1]);
        let receiver = stack.subscribe();
        let dropped = stack.subscribe();
        drop(dropped);

        stack
            .execute(Operation::Label {
                clusters: vec![ClusterId(0)],
                field: LabelField::Quality,
                value: Some("good".into()),
            })
            .unwrap();
        stack.undo();

        let first = receiver.try_recv().unwrap();
        assert_eq!(first.cause, ChangeCause::Execute(CommandKind::Label));
        assert_eq!(first.metadata_changed, vec![ClusterId(0)]);
        assert!(!first.is_structural());
        let second = receiver.try_recv().unwrap();
        assert_eq!(second.cause, ChangeCause::Undo(CommandKind::Label));
        assert_eq!(stack.subscribers.len(), 1);
    }

    #[test]
    fn history_depth_is_bounded() {
        let mut stack = ActionStack::new(
            ClusterState::new(&[0, 1]).unwrap(),
            HistoryConfig { max_depth: 2 },
        );
        for quality in ["1", "2", "3"] {
            stack
                .execute(Operation::Label {
                    clusters: vec![ClusterId(0)],
                    field: LabelField::Quality,
                    value: Some(quality.into()),
                })
                .unwrap();
        }

        assert_eq!(stack.undo_depth(), 2);
        stack.undo();
        stack.undo();
        assert_eq!(stack.undo(), None);
        let metadata = stack.state().metadata(ClusterId(0)).unwrap();
        assert_eq!(metadata.quality.as_deref(), Some("1"));
    }

    #[test]
    fn loading_replaces_state_and_history() {
        let mut stack = stack(&[0, 1]);
        stack.execute(Operation::merge([ClusterId(0), ClusterId(1)])).unwrap();
        let record = CurationRecord {
            spike_clusters: vec![5, 6],
            metadata: Vec::new(),
            next_cluster_id: 10,
        };

        let change = stack.load(&record).unwrap();
        assert_eq!(change.removed, vec![ClusterId(2)]);
        assert_eq!(change.added, vec![ClusterId(5), ClusterId(6)]);
        assert!(!stack.can_undo());
        assert_eq!(stack.state().next_id(), ClusterId(10));
    }

    proptest! {
        #[test]
        fn undoing_everything_restores_the_initial_partition(
            assignments in proptest::collection::vec(0u32..5, 2..40),
            picks in proptest::collection::vec((0usize..32, 0usize..32, 0u8..4), 1..12),
        ) {
            let mut stack = stack(&assignments);
            let initial = stack.state().to_record();

            let mut executed = 0;
            for (a, b, kind) in picks {
                let ids = stack.state().cluster_ids().collect::<Vec<_>>();
                let first = ids[a % ids.len()];
                let operation = match kind {
                    0 => Operation::merge([first, ids[b % ids.len()]]),
                    1 => {
                        let members = stack.state().spikes(first).unwrap().to_vec();
                        Operation::split(first, members[..b % (members.len() + 1)].to_vec())
                    }
                    2 => Operation::Move {
                        clusters: vec![first],
                        group: ["good", "mua", "noise"].get(b % 4).map(|g| g.to_string()),
                    },
                    _ => Operation::Label {
                        clusters: vec![first],
                        field: if b % 2 == 0 { LabelField::Quality } else { LabelField::Notes },
                        value: Some(format!("{b}")),
                    },
                };
                let undo_depth = stack.undo_depth();
                if stack.execute(operation).is_ok() && stack.undo_depth() > undo_depth {
                    executed += 1;
                }
            }
            let after = stack.state().to_record();

            for _ in 0..executed {
                prop_assert!(stack.undo().is_some());
            }
            prop_assert!(!stack.can_undo());
            let mut restored = stack.state().to_record();
            // Ids issued by undone commands are never handed out again.
            prop_assert!(restored.next_cluster_id >= initial.next_cluster_id);
            restored.next_cluster_id = initial.next_cluster_id;
            prop_assert_eq!(restored, initial);

            for _ in 0..executed {
                prop_assert!(stack.redo().is_some());
            }
            prop_assert_eq!(stack.state().to_record(), after);
        }
    }
}
