//! Reversible curation commands.
use std::fmt;

use crate::{
    cluster::{ClusterId, ClusterState, Delta, LabelField, SpikeId},
    error::DataError,
};

/// A curation request, before validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Merge {
        clusters: Vec<ClusterId>,
    },
    Split {
        cluster: ClusterId,
        subset: Vec<SpikeId>,
        /// Label of every spike of `subset`, one new cluster per label.
        labels: Option<Vec<u32>>,
    },
    Move {
        clusters: Vec<ClusterId>,
        group: Option<String>,
    },
    Label {
        clusters: Vec<ClusterId>,
        field: LabelField,
        value: Option<String>,
    },
}

impl Operation {
    pub fn merge(clusters: impl IntoIterator<Item = ClusterId>) -> Self {
        Operation::Merge {
            clusters: clusters.into_iter().collect(),
        }
    }

    pub fn split(cluster: ClusterId, subset: impl IntoIterator<Item = SpikeId>) -> Self {
        Operation::Split {
            cluster,
            subset: subset.into_iter().collect(),
            labels: None,
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Operation::Merge { .. } => CommandKind::Merge,
            Operation::Split { .. } => CommandKind::Split,
            Operation::Move { .. } => CommandKind::Move,
            Operation::Label { .. } => CommandKind::Label,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Merge,
    Split,
    Move,
    Label,
}

impl CommandKind {
    pub fn name(self) -> &'static str {
        match self {
            CommandKind::Merge => "merge",
            CommandKind::Split => "split",
            CommandKind::Move => "move",
            CommandKind::Label => "label",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An operation validated against a state, with both of its deltas.
///
/// Replaying `forward` reproduces the exact same cluster ids as the first
/// application.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    kind: CommandKind,
    forward: Delta,
    backward: Delta,
}

impl Command {
    pub fn plan(state: &ClusterState, operation: &Operation) -> Result<Self, DataError> {
        let forward = match operation {
            Operation::Merge { clusters } => state.plan_merge(clusters)?,
            Operation::Split {
                cluster,
                subset,
                labels,
            } => state.plan_split(*cluster, subset, labels.as_deref())?,
            Operation::Move { clusters, group } => state.plan_move(clusters, group.as_deref())?,
            Operation::Label {
                clusters,
                field,
                value,
            } => state.plan_label(clusters, field, value.as_deref())?,
        };

        Ok(Self {
            kind: operation.kind(),
            backward: forward.inverse(),
            forward,
        })
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn forward(&self) -> &Delta {
        &self.forward
    }

    pub fn backward(&self) -> &Delta {
        &self.backward
    }

    /// Clusters created by the command.
    pub fn created(&self) -> impl Iterator<Item = ClusterId> + '_ {
        self.forward.added.iter().map(|r| r.id)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = |records: &[crate::cluster::ClusterRecord]| {
            records.iter().map(|r| r.id.0).collect::<Vec<_>>()
        };
        match self.kind {
            CommandKind::Merge | CommandKind::Split => write!(
                f,
                "{} {:?} -> {:?}",
                self.kind,
                ids(&self.forward.removed),
                ids(&self.forward.added)
            ),
            CommandKind::Move | CommandKind::Label => write!(
                f,
                "{} {:?}",
                self.kind,
                self.forward
                    .relabeled
                    .iter()
                    .map(|c| c.cluster.0)
                    .collect::<Vec<_>>()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backward_undoes_forward() {
        let mut state = ClusterState::new(&[0, 1, 1, 2]).unwrap();
        let initial = state.to_record();
        let command = Command::plan(&state, &Operation::merge([ClusterId(1), ClusterId(2)])).unwrap();
        assert_eq!(command.created().collect::<Vec<_>>(), vec![ClusterId(3)]);
        assert_eq!(command.to_string(), "merge [1, 2] -> [3]");

        state.apply(command.forward());
        state.apply(command.backward());
        let mut restored = state.to_record();
        restored.next_cluster_id = initial.next_cluster_id;
        assert_eq!(restored, initial);
    }

    #[test]
    fn invalid_operations_are_not_planned() {
        let state = ClusterState::new(&[0, 1]).unwrap();
        let operation = Operation::Label {
            clusters: vec![ClusterId(9)],
            field: LabelField::Quality,
            value: Some("good".into()),
        };
        assert_eq!(
            Command::plan(&state, &operation),
            Err(DataError::UnknownCluster(ClusterId(9)))
        );
    }
}
