//! Authoritative partition of the spikes into clusters.
//!
//! The state is only mutated by applying [`Delta`]s, which are planned (and
//! validated) ahead of time against the current state. Planning never mutates,
//! and applying a planned delta cannot fail.
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::error::{DataError, Error};

/// Group of clusters excluded from the wizard rankings.
pub const NOISE_GROUP: &str = "noise";
pub const MUA_GROUP: &str = "mua";
pub const GOOD_GROUP: &str = "good";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SpikeId(pub u32);

impl SpikeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ClusterId(pub u32);

/// Labels attached to a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, String>,
}

/// A field of [`ClusterMetadata`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LabelField {
    Group,
    Quality,
    Notes,
    Custom(String),
}

impl LabelField {
    pub fn from_name(name: &str) -> Self {
        match name {
            "group" => LabelField::Group,
            "quality" => LabelField::Quality,
            "notes" => LabelField::Notes,
            other => LabelField::Custom(other.to_string()),
        }
    }
}

impl ClusterMetadata {
    pub fn get(&self, field: &LabelField) -> Option<&str> {
        match field {
            LabelField::Group => self.group.as_deref(),
            LabelField::Quality => self.quality.as_deref(),
            LabelField::Notes => self.notes.as_deref(),
            LabelField::Custom(key) => self.custom.get(key).map(String::as_str),
        }
    }

    pub fn set(&mut self, field: &LabelField, value: Option<String>) {
        match field {
            LabelField::Group => self.group = value,
            LabelField::Quality => self.quality = value,
            LabelField::Notes => self.notes = value,
            LabelField::Custom(key) => match value {
                Some(value) => {
                    self.custom.insert(key.clone(), value);
                }
                None => {
                    self.custom.remove(key);
                }
            },
        }
    }

    /// Whether the wizard should skip the cluster.
    pub fn is_ignored(&self) -> bool {
        matches!(self.group.as_deref(), Some(NOISE_GROUP | MUA_GROUP))
    }

    /// Fields on which all the parents agree.
    pub fn inherit<'a>(parents: impl IntoIterator<Item = &'a ClusterMetadata>) -> Self {
        let mut parents = parents.into_iter();
        let Some(first) = parents.next() else {
            return Self::default();
        };

        let mut inherited = first.clone();
        for parent in parents {
            if inherited.group != parent.group {
                inherited.group = None;
            }
            if inherited.quality != parent.quality {
                inherited.quality = None;
            }
            if inherited.notes != parent.notes {
                inherited.notes = None;
            }
            inherited
                .custom
                .retain(|key, value| parent.custom.get(key) == Some(value));
        }
        inherited
    }
}

/// A cluster as it enters or leaves the partition.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterRecord {
    pub id: ClusterId,
    pub spikes: Arc<[SpikeId]>,
    pub metadata: ClusterMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataChange {
    pub cluster: ClusterId,
    pub before: ClusterMetadata,
    pub after: ClusterMetadata,
}

/// A change of the partition and its metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    pub removed: Vec<ClusterRecord>,
    pub added: Vec<ClusterRecord>,
    pub relabeled: Vec<MetadataChange>,
}

impl Delta {
    pub fn inverse(&self) -> Self {
        Self {
            removed: self.added.clone(),
            added: self.removed.clone(),
            relabeled: self
                .relabeled
                .iter()
                .map(|change| MetadataChange {
                    cluster: change.cluster,
                    before: change.after.clone(),
                    after: change.before.clone(),
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty() && self.relabeled.is_empty()
    }
}

/// Immutable view of the partition, cheap to clone and to send to workers.
#[derive(Debug, Clone)]
pub struct PartitionSnapshot {
    spike_clusters: Arc<Vec<ClusterId>>,
    members: Arc<BTreeMap<ClusterId, Arc<[SpikeId]>>>,
    metadata: Arc<BTreeMap<ClusterId, ClusterMetadata>>,
}

impl PartitionSnapshot {
    pub fn n_spikes(&self) -> usize {
        self.spike_clusters.len()
    }

    pub fn n_clusters(&self) -> usize {
        self.members.len()
    }

    pub fn cluster_ids(&self) -> impl Iterator<Item = ClusterId> + '_ {
        self.members.keys().copied()
    }

    pub fn is_live(&self, cluster: ClusterId) -> bool {
        self.members.contains_key(&cluster)
    }

    pub fn cluster_of(&self, spike: SpikeId) -> Option<ClusterId> {
        self.spike_clusters.get(spike.index()).copied()
    }

    /// Spikes of a live cluster, in ascending order.
    pub fn spikes(&self, cluster: ClusterId) -> Option<&Arc<[SpikeId]>> {
        self.members.get(&cluster)
    }

    pub fn metadata(&self, cluster: ClusterId) -> Option<&ClusterMetadata> {
        self.metadata.get(&cluster)
    }

    /// Cluster of every spike, indexed by spike.
    pub fn spike_clusters(&self) -> &[ClusterId] {
        &self.spike_clusters
    }
}

#[derive(Debug, Clone)]
pub struct ClusterState {
    partition: PartitionSnapshot,
    next_id: u32,
}

impl ClusterState {
    /// Builds the partition from the cluster of every spike.
    pub fn new(assignments: &[u32]) -> Result<Self, DataError> {
        let next_id = match assignments.iter().max() {
            Some(&max) => max.checked_add(1).ok_or(DataError::IdSpaceExhausted)?,
            None => 0,
        };
        u32::try_from(assignments.len()).map_err(|_| DataError::IdSpaceExhausted)?;

        let mut members = BTreeMap::<ClusterId, Vec<SpikeId>>::new();
        for (spike, &cluster) in assignments.iter().enumerate() {
            members
                .entry(ClusterId(cluster))
                .or_default()
                .push(SpikeId(spike as u32));
        }

        Ok(Self {
            partition: PartitionSnapshot {
                spike_clusters: Arc::new(assignments.iter().copied().map(ClusterId).collect()),
                metadata: Arc::new(
                    members
                        .keys()
                        .map(|id| (*id, ClusterMetadata::default()))
                        .collect(),
                ),
                members: Arc::new(
                    members
                        .into_iter()
                        .map(|(id, spikes)| (id, spikes.into()))
                        .collect(),
                ),
            },
            next_id,
        })
    }

    pub fn from_record(record: &CurationRecord) -> Result<Self, DataError> {
        let mut state = Self::new(&record.spike_clusters)?;
        if record.next_cluster_id < state.next_id {
            return Err(DataError::MalformedRecord(format!(
                "next cluster id {} is not above the largest cluster id {}",
                record.next_cluster_id,
                state.next_id - 1
            )));
        }
        state.next_id = record.next_cluster_id;

        let metadata = Arc::make_mut(&mut state.partition.metadata);
        let mut seen = BTreeSet::new();
        for row in &record.metadata {
            if !seen.insert(row.cluster) {
                return Err(DataError::MalformedRecord(format!(
                    "cluster {} has several metadata rows",
                    row.cluster.0
                )));
            }
            let Some(entry) = metadata.get_mut(&row.cluster) else {
                return Err(DataError::MalformedRecord(format!(
                    "metadata row for cluster {} which owns no spike",
                    row.cluster.0
                )));
            };
            *entry = row.metadata.clone();
        }

        Ok(state)
    }

    pub fn to_record(&self) -> CurationRecord {
        CurationRecord {
            spike_clusters: self.partition.spike_clusters.iter().map(|c| c.0).collect(),
            metadata: self
                .partition
                .metadata
                .iter()
                .filter(|(_, metadata)| **metadata != ClusterMetadata::default())
                .map(|(cluster, metadata)| MetadataRow {
                    cluster: *cluster,
                    metadata: metadata.clone(),
                })
                .collect(),
            next_cluster_id: self.next_id,
        }
    }

    pub fn snapshot(&self) -> PartitionSnapshot {
        self.partition.clone()
    }

    pub fn n_spikes(&self) -> usize {
        self.partition.n_spikes()
    }

    pub fn n_clusters(&self) -> usize {
        self.partition.n_clusters()
    }

    pub fn cluster_ids(&self) -> impl Iterator<Item = ClusterId> + '_ {
        self.partition.cluster_ids()
    }

    pub fn is_live(&self, cluster: ClusterId) -> bool {
        self.partition.is_live(cluster)
    }

    /// Id the next new cluster will receive.
    pub fn next_id(&self) -> ClusterId {
        ClusterId(self.next_id)
    }

    pub fn cluster_of(&self, spike: SpikeId) -> Result<ClusterId, DataError> {
        self.partition
            .cluster_of(spike)
            .ok_or(DataError::UnknownSpike {
                spike,
                n_spikes: self.n_spikes(),
            })
    }

    pub fn spikes(&self, cluster: ClusterId) -> Result<&[SpikeId], DataError> {
        self.partition
            .spikes(cluster)
            .map(|spikes| &spikes[..])
            .ok_or(DataError::UnknownCluster(cluster))
    }

    pub fn metadata(&self, cluster: ClusterId) -> Result<&ClusterMetadata, DataError> {
        self.partition
            .metadata(cluster)
            .ok_or(DataError::UnknownCluster(cluster))
    }

    fn record(&self, cluster: ClusterId) -> ClusterRecord {
        ClusterRecord {
            id: cluster,
            spikes: self.partition.members[&cluster].clone(),
            metadata: self.partition.metadata[&cluster].clone(),
        }
    }

    /// Checks that the clusters are live and pairwise distinct.
    fn check_clusters(&self, clusters: &[ClusterId]) -> Result<(), DataError> {
        if clusters.is_empty() {
            return Err(DataError::NoClusters);
        }

        let mut seen = BTreeSet::new();
        for &cluster in clusters {
            if !self.is_live(cluster) {
                return Err(DataError::UnknownCluster(cluster));
            }
            if !seen.insert(cluster) {
                return Err(DataError::DuplicateCluster(cluster));
            }
        }
        Ok(())
    }

    /// Ids for `count` new clusters.
    fn allocate(&self, count: usize) -> Result<impl Iterator<Item = ClusterId>, DataError> {
        let count = u32::try_from(count).map_err(|_| DataError::IdSpaceExhausted)?;
        let end = self
            .next_id
            .checked_add(count)
            .ok_or(DataError::IdSpaceExhausted)?;
        Ok((self.next_id..end).map(ClusterId))
    }

    /// Plans the merge of at least two clusters into a new one.
    pub fn plan_merge(&self, clusters: &[ClusterId]) -> Result<Delta, DataError> {
        self.check_clusters(clusters)?;
        if clusters.len() < 2 {
            return Err(DataError::NotEnoughClusters(clusters.len()));
        }

        let mut spikes = clusters
            .iter()
            .flat_map(|c| self.partition.members[c].iter().copied())
            .collect::<Vec<_>>();
        spikes.sort_unstable();
        let removed = clusters.iter().map(|c| self.record(*c)).collect::<Vec<_>>();
        let metadata = ClusterMetadata::inherit(removed.iter().map(|r| &r.metadata));

        let mut ids = self.allocate(1)?;
        let added = ids.next().map(|id| ClusterRecord {
            id,
            spikes: spikes.into(),
            metadata,
        });

        Ok(Delta {
            removed,
            added: added.into_iter().collect(),
            relabeled: Vec::new(),
        })
    }

    /// Plans the split of a cluster.
    ///
    /// The spikes of `subset` are grouped by their label (all in one group
    /// without labels); the groups become new clusters in ascending label
    /// order, followed by the remaining spikes of the cluster.
    pub fn plan_split(
        &self,
        cluster: ClusterId,
        subset: &[SpikeId],
        labels: Option<&[u32]>,
    ) -> Result<Delta, DataError> {
        if !self.is_live(cluster) {
            return Err(DataError::UnknownCluster(cluster));
        }
        if let Some(labels) = labels {
            if labels.len() != subset.len() {
                return Err(DataError::LengthMismatch {
                    what: "split labels",
                    expected: subset.len(),
                    got: labels.len(),
                });
            }
        }

        let mut groups = BTreeMap::<u32, Vec<SpikeId>>::new();
        let mut taken = BTreeSet::new();
        for (i, &spike) in subset.iter().enumerate() {
            if self.cluster_of(spike)? != cluster {
                return Err(DataError::SpikeNotInCluster { spike, cluster });
            }
            if !taken.insert(spike) {
                return Err(DataError::DuplicateSpike(spike));
            }
            let label = labels.map_or(0, |labels| labels[i]);
            groups.entry(label).or_default().push(spike);
        }

        let remainder = self.partition.members[&cluster]
            .iter()
            .copied()
            .filter(|spike| !taken.contains(spike))
            .collect::<Vec<_>>();
        let mut children = groups.into_values().collect::<Vec<_>>();
        if !remainder.is_empty() {
            children.push(remainder);
        }
        if children.len() < 2 {
            return Err(DataError::DegenerateSplit(cluster));
        }

        let parent = self.record(cluster);
        let added = self
            .allocate(children.len())?
            .zip(children)
            .map(|(id, mut spikes)| {
                spikes.sort_unstable();
                ClusterRecord {
                    id,
                    spikes: spikes.into(),
                    metadata: parent.metadata.clone(),
                }
            })
            .collect();

        Ok(Delta {
            removed: vec![parent],
            added,
            relabeled: Vec::new(),
        })
    }

    /// Plans setting one metadata field of several clusters.
    pub fn plan_label(
        &self,
        clusters: &[ClusterId],
        field: &LabelField,
        value: Option<&str>,
    ) -> Result<Delta, DataError> {
        self.check_clusters(clusters)?;

        let relabeled = clusters
            .iter()
            .filter_map(|cluster| {
                let before = &self.partition.metadata[cluster];
                if before.get(field) == value {
                    return None;
                }
                let mut after = before.clone();
                after.set(field, value.map(str::to_string));
                Some(MetadataChange {
                    cluster: *cluster,
                    before: before.clone(),
                    after,
                })
            })
            .collect();

        Ok(Delta {
            relabeled,
            ..Default::default()
        })
    }

    /// Plans assigning clusters to a group.
    pub fn plan_move(&self, clusters: &[ClusterId], group: Option<&str>) -> Result<Delta, DataError> {
        self.plan_label(clusters, &LabelField::Group, group)
    }

    /// Applies a delta planned against the current state.
    ///
    /// # Panics
    ///
    /// Panics if the delta does not match the state, e.g. if it removes a
    /// cluster which is not live.
    pub fn apply(&mut self, delta: &Delta) {
        let members = Arc::make_mut(&mut self.partition.members);
        let metadata = Arc::make_mut(&mut self.partition.metadata);
        for record in &delta.removed {
            if members.remove(&record.id).is_none() {
                panic!("delta removes cluster {:?} which is not live", record.id);
            }
            metadata.remove(&record.id);
        }

        let spike_clusters = Arc::make_mut(&mut self.partition.spike_clusters);
        for record in &delta.added {
            if members.insert(record.id, record.spikes.clone()).is_some() {
                panic!("delta adds cluster {:?} which is already live", record.id);
            }
            metadata.insert(record.id, record.metadata.clone());
            for spike in record.spikes.iter() {
                spike_clusters[spike.index()] = record.id;
            }
            // Ids are never reused, not even after undoing their allocation.
            self.next_id = self.next_id.max(record.id.0 + 1);
        }

        for change in &delta.relabeled {
            let Some(entry) = metadata.get_mut(&change.cluster) else {
                panic!("delta relabels cluster {:?} which is not live", change.cluster);
            };
            *entry = change.after.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRow {
    pub cluster: ClusterId,
    #[serde(flatten)]
    pub metadata: ClusterMetadata,
}

/// Minimal persisted form of a curation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurationRecord {
    pub spike_clusters: Vec<u32>,
    #[serde(default)]
    pub metadata: Vec<MetadataRow>,
    pub next_cluster_id: u32,
}

impl CurationRecord {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn spikes(ids: &[u32]) -> Vec<SpikeId> {
        ids.iter().copied().map(SpikeId).collect()
    }

    fn assignments(state: &ClusterState) -> Vec<u32> {
        state.to_record().spike_clusters
    }

    #[test]
    fn construction_groups_spikes() {
        let state = ClusterState::new(&[3, 7, 3, 1]).unwrap();
        assert_eq!(state.n_clusters(), 3);
        assert_eq!(state.spikes(ClusterId(3)).unwrap(), &spikes(&[0, 2])[..]);
        assert_eq!(state.next_id(), ClusterId(8));
        assert_eq!(
            state.cluster_of(SpikeId(9)),
            Err(DataError::UnknownSpike {
                spike: SpikeId(9),
                n_spikes: 4
            })
        );
        assert_eq!(
            ClusterState::new(&[u32::MAX]).unwrap_err(),
            DataError::IdSpaceExhausted
        );
    }

    #[test]
    fn merge_creates_a_new_cluster() {
        let mut state = ClusterState::new(&[3, 7, 3, 1, 7]).unwrap();
        let delta = state.plan_merge(&[ClusterId(3), ClusterId(7)]).unwrap();
        state.apply(&delta);

        assert!(!state.is_live(ClusterId(3)));
        assert!(!state.is_live(ClusterId(7)));
        assert_eq!(state.spikes(ClusterId(8)).unwrap(), &spikes(&[0, 1, 2, 4])[..]);
        assert_eq!(assignments(&state), vec![8, 8, 8, 1, 8]);

        state.apply(&delta.inverse());
        assert_eq!(assignments(&state), vec![3, 7, 3, 1, 7]);
        // The undone id is not handed out again.
        assert_eq!(state.next_id(), ClusterId(9));
    }

    #[test]
    fn invalid_merges_are_rejected() {
        let state = ClusterState::new(&[0, 1]).unwrap();
        assert_eq!(state.plan_merge(&[]), Err(DataError::NoClusters));
        assert_eq!(
            state.plan_merge(&[ClusterId(0)]),
            Err(DataError::NotEnoughClusters(1))
        );
        assert_eq!(
            state.plan_merge(&[ClusterId(0), ClusterId(0)]),
            Err(DataError::DuplicateCluster(ClusterId(0)))
        );
        assert_eq!(
            state.plan_merge(&[ClusterId(0), ClusterId(5)]),
            Err(DataError::UnknownCluster(ClusterId(5)))
        );
    }

    #[test]
    fn split_orders_children_by_label_then_remainder() {
        let mut state = ClusterState::new(&[3, 3, 3, 3, 3, 0]).unwrap();
        let delta = state
            .plan_split(ClusterId(3), &spikes(&[4, 1, 2]), Some(&[5, 2, 5]))
            .unwrap();
        state.apply(&delta);

        assert_eq!(state.spikes(ClusterId(4)).unwrap(), &spikes(&[1])[..]);
        assert_eq!(state.spikes(ClusterId(5)).unwrap(), &spikes(&[2, 4])[..]);
        assert_eq!(state.spikes(ClusterId(6)).unwrap(), &spikes(&[0, 3])[..]);
        assert_eq!(state.next_id(), ClusterId(7));
    }

    #[test]
    fn degenerate_splits_are_rejected() {
        let state = ClusterState::new(&[3, 3, 4]).unwrap();
        assert_eq!(
            state.plan_split(ClusterId(3), &spikes(&[0, 1]), None),
            Err(DataError::DegenerateSplit(ClusterId(3)))
        );
        assert_eq!(
            state.plan_split(ClusterId(3), &spikes(&[]), None),
            Err(DataError::DegenerateSplit(ClusterId(3)))
        );
        assert_eq!(
            state.plan_split(ClusterId(3), &spikes(&[2]), None),
            Err(DataError::SpikeNotInCluster {
                spike: SpikeId(2),
                cluster: ClusterId(3)
            })
        );
        assert_eq!(
            state.plan_split(ClusterId(3), &spikes(&[0, 0]), None),
            Err(DataError::DuplicateSpike(SpikeId(0)))
        );
        assert_eq!(
            state.plan_split(ClusterId(3), &spikes(&[0]), Some(&[])),
            Err(DataError::LengthMismatch {
                what: "split labels",
                expected: 1,
                got: 0
            })
        );
        // Labels alone may split the whole cluster.
        assert!(state
            .plan_split(ClusterId(3), &spikes(&[0, 1]), Some(&[1, 2]))
            .is_ok());
    }

    #[test]
    fn metadata_is_inherited_when_parents_agree() {
        let mut state = ClusterState::new(&[0, 1, 2]).unwrap();
        let good = state
            .plan_label(&[ClusterId(0), ClusterId(1)], &LabelField::Group, Some("good"))
            .unwrap();
        state.apply(&good);
        let note = state
            .plan_label(&[ClusterId(0)], &LabelField::Notes, Some("bursty"))
            .unwrap();
        state.apply(&note);

        let merged = state.plan_merge(&[ClusterId(0), ClusterId(1)]).unwrap();
        let metadata = &merged.added[0].metadata;
        assert_eq!(metadata.group.as_deref(), Some("good"));
        assert_eq!(metadata.notes, None);

        let merged = state.plan_merge(&[ClusterId(0), ClusterId(2)]).unwrap();
        assert_eq!(merged.added[0].metadata, ClusterMetadata::default());
    }

    #[test]
    fn unchanged_labels_produce_no_change() {
        let state = ClusterState::new(&[0]).unwrap();
        let delta = state.plan_move(&[ClusterId(0)], None).unwrap();
        assert!(delta.is_empty());

        let delta = state
            .plan_label(&[ClusterId(0)], &LabelField::from_name("snr"), Some("high"))
            .unwrap();
        assert_eq!(delta.relabeled[0].after.custom["snr"], "high");
    }

    #[test]
    fn snapshots_are_not_affected_by_later_changes() {
        let mut state = ClusterState::new(&[0, 1]).unwrap();
        let snapshot = state.snapshot();
        state.apply(&state.plan_merge(&[ClusterId(0), ClusterId(1)]).unwrap());

        assert_eq!(snapshot.cluster_of(SpikeId(0)), Some(ClusterId(0)));
        assert_eq!(snapshot.n_clusters(), 2);
        assert_eq!(state.cluster_of(SpikeId(0)), Ok(ClusterId(2)));
    }

    #[test]
    fn records_round_trip_through_json() {
        let mut state = ClusterState::new(&[0, 1, 1]).unwrap();
        state.apply(
            &state
                .plan_label(&[ClusterId(1)], &LabelField::Quality, Some("3"))
                .unwrap(),
        );
        state.apply(&state.plan_merge(&[ClusterId(0), ClusterId(1)]).unwrap());
        state.apply(&state.plan_split(ClusterId(2), &spikes(&[0]), None).unwrap());

        let json = state.to_record().to_json().unwrap();
        let restored = ClusterState::from_record(&CurationRecord::from_json(&json).unwrap()).unwrap();
        assert_eq!(restored.to_record(), state.to_record());
        assert_eq!(restored.next_id(), ClusterId(5));
    }

    #[test]
    fn malformed_records_are_rejected() {
        let record = CurationRecord {
            spike_clusters: vec![0, 4],
            metadata: Vec::new(),
            next_cluster_id: 3,
        };
        assert!(matches!(
            ClusterState::from_record(&record),
            Err(DataError::MalformedRecord(_))
        ));

        let record = CurationRecord {
            spike_clusters: vec![0],
            metadata: vec![MetadataRow {
                cluster: ClusterId(2),
                metadata: ClusterMetadata::default(),
            }],
            next_cluster_id: 3,
        };
        assert!(matches!(
            ClusterState::from_record(&record),
            Err(DataError::MalformedRecord(_))
        ));
        assert!(CurationRecord::from_json("{\"spike_clusters\": 3}").is_err());
    }

    proptest! {
        #[test]
        fn applying_inverses_restores_the_partition(
            assignments in proptest::collection::vec(0u32..6, 1..60),
            picks in proptest::collection::vec((0usize..64, 0usize..64, any::<bool>()), 1..12),
        ) {
            let mut state = ClusterState::new(&assignments).unwrap();
            let initial = state.to_record();
            let mut applied = Vec::new();

            for (a, b, merge) in picks {
                let ids = state.cluster_ids().collect::<Vec<_>>();
                let first = ids[a % ids.len()];
                let delta = if merge {
                    let second = ids[b % ids.len()];
                    state.plan_merge(&[first, second])
                } else {
                    let members = state.spikes(first).unwrap().to_vec();
                    let subset = &members[..b % (members.len() + 1)];
                    state.plan_split(first, subset, None)
                };
                if let Ok(delta) = delta {
                    let ids_before = state.next_id();
                    state.apply(&delta);
                    prop_assert!(delta.added.iter().all(|r| r.id >= ids_before));
                    applied.push(delta);
                }

                // Every spike belongs to exactly one live cluster.
                let total = state.cluster_ids().map(|c| state.spikes(c).unwrap().len()).sum::<usize>();
                prop_assert_eq!(total, state.n_spikes());
            }

            for delta in applied.iter().rev() {
                state.apply(&delta.inverse());
            }
            let mut restored = state.to_record();
            restored.next_cluster_id = initial.next_cluster_id;
            prop_assert_eq!(restored, initial);
        }
    }
}
