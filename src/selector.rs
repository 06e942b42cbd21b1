//! Which clusters and spikes the views show.
use std::{cmp::Ordering, collections::HashMap};

use crate::{
    cluster::{ClusterId, ClusterState, SpikeId},
    history::ClusterChange,
};

/// Up to `budget` members chosen by even striding; member `floor(i * n / budget)`
/// for `i` in `0..budget`.
pub fn subsample(members: &[SpikeId], budget: usize) -> Vec<SpikeId> {
    let n = members.len();
    if n <= budget {
        return members.to_vec();
    }

    (0..budget)
        .map(|i| members[(i as u128 * n as u128 / budget as u128) as usize])
        .collect()
}

/// Ordered set of focused clusters.
#[derive(Debug, Clone)]
pub struct Selector {
    selected: Vec<ClusterId>,
    generation: u64,
    budget: usize,
}

impl Selector {
    pub fn new(budget: usize) -> Self {
        Self {
            selected: Vec::new(),
            generation: 0,
            budget,
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn set_budget(&mut self, budget: usize) {
        if budget != self.budget {
            self.budget = budget;
            self.generation += 1;
        }
    }

    pub fn selected(&self) -> &[ClusterId] {
        &self.selected
    }

    /// Incremented by every change of what is shown.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replaces the selection, dropping repeated clusters.
    pub fn select(&mut self, clusters: impl IntoIterator<Item = ClusterId>) -> u64 {
        let mut selected = Vec::new();
        for cluster in clusters {
            if !selected.contains(&cluster) {
                selected.push(cluster);
            }
        }
        self.selected = selected;
        self.generation += 1;
        self.generation
    }

    /// Follows a change of the partition: removed clusters leave the
    /// selection, and the clusters that replace them take the place of the
    /// first one. Returns whether the selection changed.
    pub fn apply_change(&mut self, change: &ClusterChange) -> bool {
        let Some(position) = self
            .selected
            .iter()
            .position(|c| change.removed.contains(c))
        else {
            return false;
        };

        let mut selected = Vec::with_capacity(self.selected.len() + change.added.len());
        for (i, cluster) in self.selected.iter().enumerate() {
            if i == position {
                selected.extend(change.added.iter().filter(|c| !self.selected.contains(c)));
            }
            if !change.removed.contains(cluster) {
                selected.push(*cluster);
            }
        }

        self.selected = selected;
        self.generation += 1;
        true
    }

    /// Spikes to draw for every selected live cluster.
    pub fn spikes(&self, state: &ClusterState) -> Vec<(ClusterId, Vec<SpikeId>)> {
        self.selected
            .iter()
            .filter_map(|cluster| {
                let members = state.spikes(*cluster).ok()?;
                Some((*cluster, subsample(members, self.budget)))
            })
            .collect()
    }
}

/// Similarity between clusters, provided by the clustering.
pub trait SimilarityTable {
    fn similarity(&self, a: ClusterId, b: ClusterId) -> Option<f64>;
}

impl<F: Fn(ClusterId, ClusterId) -> Option<f64>> SimilarityTable for F {
    fn similarity(&self, a: ClusterId, b: ClusterId) -> Option<f64> {
        self(a, b)
    }
}

impl SimilarityTable for HashMap<(ClusterId, ClusterId), f64> {
    fn similarity(&self, a: ClusterId, b: ClusterId) -> Option<f64> {
        self.get(&(a, b)).or_else(|| self.get(&(b, a))).copied()
    }
}

fn descending(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.total_cmp(&a),
    }
}

/// Live clusters by decreasing quality, without noise and multi-unit clusters.
///
/// Ties are broken by ascending id; clusters with a NaN score come last.
pub fn best_clusters(state: &ClusterState, quality: impl Fn(ClusterId) -> f64) -> Vec<ClusterId> {
    let mut ranked = state
        .cluster_ids()
        .filter(|c| state.metadata(*c).is_ok_and(|m| !m.is_ignored()))
        .map(|c| (c, quality(c)))
        .collect::<Vec<_>>();
    ranked.sort_by(|(a, qa), (b, qb)| descending(*qa, *qb).then(a.cmp(b)));
    ranked.into_iter().map(|(c, _)| c).collect()
}

/// Live clusters ranked by decreasing similarity to `cluster`.
///
/// Clusters without a similarity, and noise or multi-unit clusters, are
/// left out.
pub fn most_similar(
    state: &ClusterState,
    cluster: ClusterId,
    table: &impl SimilarityTable,
) -> Vec<(ClusterId, f64)> {
    let mut ranked = state
        .cluster_ids()
        .filter(|c| *c != cluster)
        .filter(|c| state.metadata(*c).is_ok_and(|m| !m.is_ignored()))
        .filter_map(|c| Some((c, table.similarity(cluster, c)?)))
        .collect::<Vec<_>>();
    ranked.sort_by(|(a, sa), (b, sb)| descending(*sa, *sb).then(a.cmp(b)));
    ranked
}
