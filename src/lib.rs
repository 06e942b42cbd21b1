//! Visualization and manual curation of spike sorting results.
//!
//! A [`Session`] wires the curation engine to the views: every mutation of
//! the partition goes through the [`ActionStack`](history::ActionStack),
//! whose change notifications update the [`Selector`](selector::Selector),
//! which decides what the views of the [`Canvas`](canvas::Canvas) draw.
//! Per-cluster statistics are computed in the background and picked up at
//! the start of the next frame.
use std::collections::BTreeMap;

use async_channel::Receiver;

use crate::{
    action::{InteractMode, KeyEvent, PointerEvent, WheelEvent},
    canvas::{Canvas, FrameOutcome},
    cluster::{ClusterId, ClusterState, CurationRecord, LabelField, SpikeId},
    command::Operation,
    error::DataError,
    event::Invalidation,
    gpu::Device,
    history::{ActionStack, ChangeCause, ClusterChange},
    selector::{Selector, SimilarityTable},
    stats::{ClusterStatistics, StatsConfig},
    tasks::TaskQueue,
    views::{ShownStatistics, Views},
};

#[cfg(target_arch = "wasm32")]
mod webgpu;
pub mod wgsl;

pub mod action;
pub mod buffers;
pub mod canvas;
pub mod cluster;
pub mod colors;
pub mod command;
pub mod config;
pub mod coordinates;
pub mod error;
pub mod event;
pub mod gpu;
pub mod headless;
pub mod history;
pub mod lasso;
mod lerp;
pub mod panzoom;
pub mod programs;
pub mod selector;
pub mod shader;
pub mod spikes;
pub mod stats;
pub mod tasks;
pub mod transform;
pub mod views;
pub mod visual;
#[cfg(target_arch = "wasm32")]
mod wasm_bridge;

pub use config::SessionConfig;
pub use error::Error;
pub use spikes::SpikeData;

/// A curation session over one clustering.
#[derive(Debug)]
pub struct Session<D: Device> {
    config: SessionConfig,
    canvas: Canvas<D>,
    history: ActionStack,
    selector: Selector,
    spikes: SpikeData,
    changes: Receiver<ClusterChange>,
    tasks: TaskQueue<Vec<ClusterStatistics>>,
    statistics: BTreeMap<ClusterId, ClusterStatistics>,
    views: Views,
    shown_generation: Option<u64>,
}

impl<D: Device> Session<D> {
    /// Starts a session from the cluster of every spike.
    pub fn new(
        device: D,
        width: u32,
        height: u32,
        assignments: &[u32],
        spikes: SpikeData,
        config: SessionConfig,
    ) -> Result<Self, Error> {
        if assignments.len() != spikes.n_spikes() {
            return Err(DataError::LengthMismatch {
                what: "spike assignments",
                expected: spikes.n_spikes(),
                got: assignments.len(),
            }
            .into());
        }

        config.validate()?;
        let background = config.background()?;
        let state = ClusterState::new(assignments)?;
        let mut history = ActionStack::new(state, config.history());
        let changes = history.subscribe();

        let mut canvas = Canvas::new(device, width, height);
        canvas.set_background(background);
        let views = Views::new(&mut canvas, &config);

        tracing::debug!(
            "session over {} spikes in {} clusters",
            spikes.n_spikes(),
            history.state().n_clusters()
        );

        Ok(Self {
            selector: Selector::new(config.spikes_per_cluster),
            config,
            canvas,
            history,
            spikes,
            changes,
            tasks: TaskQueue::new(),
            statistics: BTreeMap::new(),
            views,
            shown_generation: None,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> &ClusterState {
        self.history.state()
    }

    pub fn history(&self) -> &ActionStack {
        &self.history
    }

    pub fn spikes(&self) -> &SpikeData {
        &self.spikes
    }

    pub fn canvas(&self) -> &Canvas<D> {
        &self.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut Canvas<D> {
        &mut self.canvas
    }

    pub fn views(&self) -> &Views {
        &self.views
    }

    /// Receives every change of the partition from now on.
    pub fn subscribe(&mut self) -> Receiver<ClusterChange> {
        self.history.subscribe()
    }
}

// Curation
impl<D: Device> Session<D> {
    /// Merges the clusters, returning the id of the new cluster.
    pub fn merge(&mut self, clusters: &[ClusterId]) -> Result<ClusterId, Error> {
        let change = self
            .history
            .execute(Operation::merge(clusters.iter().copied()))?;
        Ok(*change
            .added
            .first()
            .expect("a merge creates exactly one cluster"))
    }

    /// Moves `subset` out of `cluster`, returning the new clusters with the
    /// one of `subset` first.
    pub fn split(&mut self, cluster: ClusterId, subset: &[SpikeId]) -> Result<Vec<ClusterId>, Error> {
        let change = self
            .history
            .execute(Operation::split(cluster, subset.iter().copied()))?;
        Ok(change.added)
    }

    /// Splits the spikes inside the lasso out of their clusters and clears
    /// the lasso.
    ///
    /// Every cluster touched by the lasso is split by its own command;
    /// clusters lying entirely inside the lasso are left alone.
    pub fn split_lasso(&mut self) -> Result<Vec<ClusterId>, Error> {
        let state = self.history.state();
        let mut subsets = BTreeMap::<ClusterId, Vec<SpikeId>>::new();
        for spike in self.canvas.spikes_in_lasso() {
            subsets.entry(state.cluster_of(spike)?).or_default().push(spike);
        }
        subsets.retain(|cluster, subset| {
            state
                .spikes(*cluster)
                .is_ok_and(|members| members.len() > subset.len())
        });

        let mut created = Vec::new();
        for (cluster, subset) in subsets {
            created.extend(self.split(cluster, &subset)?);
        }
        self.canvas.clear_lasso();
        Ok(created)
    }

    /// Assigns the clusters to a group, `None` removing them from theirs.
    pub fn move_to(&mut self, clusters: &[ClusterId], group: Option<&str>) -> Result<(), Error> {
        self.history.execute(Operation::Move {
            clusters: clusters.to_vec(),
            group: group.map(str::to_string),
        })?;
        Ok(())
    }

    pub fn label(
        &mut self,
        clusters: &[ClusterId],
        field: LabelField,
        value: Option<&str>,
    ) -> Result<(), Error> {
        self.history.execute(Operation::Label {
            clusters: clusters.to_vec(),
            field,
            value: value.map(str::to_string),
        })?;
        Ok(())
    }

    pub fn undo(&mut self) -> Option<ClusterChange> {
        self.history.undo()
    }

    pub fn redo(&mut self) -> Option<ClusterChange> {
        self.history.redo()
    }

    /// The curation record of the current partition.
    pub fn save(&self) -> CurationRecord {
        self.history.state().to_record()
    }

    /// Replaces the partition by a saved one; the history is cleared.
    pub fn load(&mut self, record: &CurationRecord) -> Result<(), Error> {
        if record.spike_clusters.len() != self.spikes.n_spikes() {
            return Err(DataError::LengthMismatch {
                what: "saved spike assignments",
                expected: self.spikes.n_spikes(),
                got: record.spike_clusters.len(),
            }
            .into());
        }
        self.history.load(record)?;
        Ok(())
    }
}

// Selection
impl<D: Device> Session<D> {
    /// Focuses the clusters, returning the new selection generation.
    pub fn select(&mut self, clusters: impl IntoIterator<Item = ClusterId>) -> u64 {
        self.canvas.signal(Invalidation::SELECTION_CHANGE);
        self.selector.select(clusters)
    }

    pub fn selection(&self) -> &[ClusterId] {
        self.selector.selected()
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Live clusters by decreasing quality, noise and multi-unit clusters
    /// left out.
    pub fn best_clusters(&self, quality: impl Fn(ClusterId) -> f64) -> Vec<ClusterId> {
        selector::best_clusters(self.history.state(), quality)
    }

    /// Clusters most similar to `cluster`, most similar first.
    pub fn most_similar(
        &self,
        cluster: ClusterId,
        table: &impl SimilarityTable,
    ) -> Result<Vec<(ClusterId, f64)>, Error> {
        let state = self.history.state();
        if !state.is_live(cluster) {
            return Err(DataError::UnknownCluster(cluster).into());
        }
        Ok(selector::most_similar(state, cluster, table))
    }

    /// Statistics of a cluster, once computed.
    pub fn statistics(&self, cluster: ClusterId) -> Option<&ClusterStatistics> {
        self.statistics.get(&cluster)
    }
}

// Input
impl<D: Device> Session<D> {
    pub fn resize(&mut self, width: u32, height: u32) {
        self.canvas.resize(width, height);
    }

    pub fn set_mode(&mut self, mode: InteractMode) -> Invalidation {
        self.canvas.set_mode(mode)
    }

    pub fn pointer_down(&mut self, event: &PointerEvent) -> Invalidation {
        self.canvas.pointer_down(event)
    }

    pub fn pointer_move(&mut self, event: &PointerEvent) -> Invalidation {
        self.canvas.pointer_move(event)
    }

    pub fn pointer_up(&mut self, event: &PointerEvent) -> Invalidation {
        self.canvas.pointer_up(event)
    }

    pub fn wheel(&mut self, event: &WheelEvent) -> Invalidation {
        self.canvas.wheel(event)
    }

    pub fn key(&mut self, event: &KeyEvent) -> Invalidation {
        self.canvas.key(event)
    }
}

// Frame
impl<D: Device> Session<D> {
    /// Applies the pending changes and draws a frame if anything changed.
    pub fn frame(&mut self) -> FrameOutcome {
        self.update();
        self.canvas.render()
    }

    /// Blocks until the statistics of every selected cluster are available.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn wait_for_statistics(&mut self) {
        self.update();
        if self
            .selector
            .selected()
            .iter()
            .all(|cluster| self.statistics.contains_key(cluster))
        {
            return;
        }

        let batch = self.tasks.wait(self.selector.generation());
        self.statistics
            .extend(batch.into_iter().map(|s| (s.cluster, s)));
        self.show_statistics();
    }

    fn update(&mut self) {
        self.apply_changes();

        let generation = self.selector.generation();
        if self.shown_generation != Some(generation) {
            self.shown_generation = Some(generation);
            self.show_selection();
        }

        let completed = self.tasks.drain(generation);
        if !completed.is_empty() {
            self.statistics.extend(
                completed
                    .into_iter()
                    .flatten()
                    .map(|s| (s.cluster, s)),
            );
            self.show_statistics();
        }
    }

    /// Drains the change notifications of the action stack.
    fn apply_changes(&mut self) {
        let mut relabeled = false;
        while let Ok(change) = self.changes.try_recv() {
            self.canvas.signal(Invalidation::CLUSTER_CHANGE);
            for cluster in &change.removed {
                self.statistics.remove(cluster);
            }

            if change.cause == ChangeCause::Load {
                let state = self.history.state();
                let kept = self
                    .selector
                    .selected()
                    .iter()
                    .copied()
                    .filter(|c| state.is_live(*c))
                    .collect::<Vec<_>>();
                self.selector.select(kept);
            } else {
                self.selector.apply_change(&change);
            }
            relabeled |= change
                .metadata_changed
                .iter()
                .any(|c| self.selector.selected().contains(c));
        }

        if relabeled {
            self.show_statistics();
        }
    }

    fn show_selection(&mut self) {
        let shown = self.selector.spikes(self.history.state());
        self.views
            .show_spikes(&mut self.canvas, &self.spikes, &shown, &self.config);
        self.show_statistics();
        self.spawn_statistics();
    }

    fn spawn_statistics(&mut self) {
        let missing = self
            .selector
            .selected()
            .iter()
            .copied()
            .filter(|cluster| !self.statistics.contains_key(cluster))
            .collect::<Vec<_>>();
        if missing.is_empty() {
            self.tasks.cancel();
            return;
        }

        let snapshot = self.history.state().snapshot();
        let spikes = self.spikes.clone();
        let config = StatsConfig {
            chunk_size: self.config.stats_chunk_size,
            histogram_bins: self.config.histogram_bins,
            amplitude_range: self.spikes.amplitude_range(),
        };
        tracing::debug!("computing the statistics of {} clusters", missing.len());
        self.tasks.spawn(self.selector.generation(), move |token| {
            stats::compute(&snapshot, &spikes, &missing, &config, token)
        });
    }

    fn show_statistics(&mut self) {
        let state = self.history.state();
        let shown = self
            .selector
            .selected()
            .iter()
            .enumerate()
            .filter_map(|(index, cluster)| {
                Some(ShownStatistics {
                    index,
                    statistics: self.statistics.get(cluster)?,
                    metadata: state.metadata(*cluster).ok()?,
                })
            })
            .collect::<Vec<_>>();
        self.views
            .show_statistics(&mut self.canvas, &shown, self.spikes.amplitude_range());
    }
}
