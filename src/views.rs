//! The curation views of a session.
//!
//! The canvas is split into a 2x2 grid: feature projection (top left),
//! waveforms (top right), amplitudes over time (bottom left) and amplitude
//! histograms with one label per cluster (bottom right). Every selected
//! cluster is drawn in the palette color of its position in the selection.
use crate::{
    canvas::{Canvas, SubplotId, VisualId},
    cluster::{ClusterId, ClusterMetadata, SpikeId},
    colors::selection_color,
    config::SessionConfig,
    gpu::Device,
    selector::subsample,
    spikes::SpikeData,
    stats::ClusterStatistics,
    visual::{Histogram, Scatter, Text, TextLabel, Trace, TraceSegment, Visual},
};

const POINT_ALPHA: f32 = 0.8;
const WAVEFORM_ALPHA: f32 = 0.3;
const HISTOGRAM_ALPHA: f32 = 0.5;
/// Vertical distance between two labels, relative to the highest bar.
const LABEL_SPACING: f32 = 0.12;

/// Position of a spike in the feature view.
///
/// Uses the first two features; missing features are replaced by the
/// amplitude and the time of the spike.
pub fn feature_position(spikes: &SpikeData, spike: SpikeId) -> [f32; 2] {
    match spikes.features(spike) {
        [x, y, ..] => [*x, *y],
        [x] => [*x, spikes.amplitude(spike)],
        [] => [spikes.time(spike) as f32, spikes.amplitude(spike)],
    }
}

/// Points of the selected spikes, with one color per point.
fn points(
    shown: &[(ClusterId, Vec<SpikeId>)],
    position: impl Fn(SpikeId) -> [f32; 2],
    config: &SessionConfig,
) -> Scatter {
    let mut positions = Vec::new();
    let mut colors = Vec::new();
    let mut spike_ids = Vec::new();
    for (index, (_, members)) in shown.iter().enumerate() {
        let color = selection_color(index, POINT_ALPHA).to_array();
        for &spike in members {
            positions.push(position(spike));
            colors.push(color);
            spike_ids.push(spike);
        }
    }

    Scatter::new(positions)
        .with_colors(colors)
        .with_spike_ids(spike_ids)
        .with_size(config.marker_size)
        .with_max_points(config.max_points)
}

/// One line strip per channel of every shown waveform, channels stacked
/// from top to bottom.
fn waveforms(spikes: &SpikeData, shown: &[(ClusterId, Vec<SpikeId>)], config: &SessionConfig) -> Trace {
    let Some(layout) = spikes.waveforms() else {
        return Trace::default();
    };
    let (n_samples, n_channels) = (layout.n_samples(), layout.n_channels());

    let shown = shown
        .iter()
        .map(|(_, members)| subsample(members, config.waveforms_per_cluster))
        .collect::<Vec<_>>();
    let peak = shown
        .iter()
        .flatten()
        .filter_map(|spike| spikes.waveform(*spike))
        .flatten()
        .fold(0.0f32, |peak, v| peak.max(v.abs()));
    let spacing = if peak > 0.0 { 2.0 * peak } else { 1.0 };

    let mut segments = Vec::new();
    for (index, members) in shown.iter().enumerate() {
        let color = selection_color(index, WAVEFORM_ALPHA);
        for waveform in members.iter().filter_map(|spike| spikes.waveform(*spike)) {
            for channel in 0..n_channels {
                let samples = (0..n_samples)
                    .map(|sample| waveform[sample * n_channels + channel])
                    .collect::<Vec<_>>();
                segments.push(
                    TraceSegment::new(0.0, 1.0, samples)
                        .with_offset(-(channel as f32) * spacing, 1.0)
                        .with_color(color),
                );
            }
        }
    }

    Trace::new(segments).with_max_vertices(config.max_vertices)
}

/// Replaces the visuals listed in `ids` by `visuals`, reusing the slots that
/// already exist.
fn sync_visuals<D: Device>(
    canvas: &mut Canvas<D>,
    subplot: SubplotId,
    ids: &mut Vec<VisualId>,
    visuals: Vec<Visual>,
) {
    for id in ids.drain(visuals.len().min(ids.len())..) {
        canvas.remove_visual(id);
    }
    for (i, visual) in visuals.into_iter().enumerate() {
        match ids.get(i) {
            Some(id) => canvas.set_visual(*id, visual),
            None => ids.push(canvas.add_visual(subplot, visual)),
        }
    }
}

/// Statistics of a selected cluster together with its position in the
/// selection.
#[derive(Debug, Clone, Copy)]
pub struct ShownStatistics<'a> {
    pub index: usize,
    pub statistics: &'a ClusterStatistics,
    pub metadata: &'a ClusterMetadata,
}

#[derive(Debug)]
pub struct Views {
    features: SubplotId,
    waveforms: SubplotId,
    amplitudes: SubplotId,
    histograms: SubplotId,
    feature_points: VisualId,
    waveform_lines: VisualId,
    amplitude_points: VisualId,
    histogram_bars: Vec<VisualId>,
    labels: VisualId,
}

impl Views {
    pub fn new<D: Device>(canvas: &mut Canvas<D>, config: &SessionConfig) -> Self {
        let grid = canvas.add_grid((2, 2), config.grid_margin);
        let [features, waveforms, amplitudes, histograms] = grid[..] else {
            unreachable!("a 2x2 grid has four subplots");
        };

        Self {
            features,
            waveforms,
            amplitudes,
            histograms,
            feature_points: canvas.add_visual(features, Scatter::default()),
            waveform_lines: canvas.add_visual(waveforms, Trace::default()),
            amplitude_points: canvas.add_visual(amplitudes, Scatter::default()),
            histogram_bars: Vec::new(),
            labels: canvas.add_visual(histograms, Text::default()),
        }
    }

    pub fn features(&self) -> SubplotId {
        self.features
    }

    pub fn waveforms(&self) -> SubplotId {
        self.waveforms
    }

    pub fn amplitudes(&self) -> SubplotId {
        self.amplitudes
    }

    pub fn histograms(&self) -> SubplotId {
        self.histograms
    }

    /// Draws the spikes of the selected clusters.
    pub fn show_spikes<D: Device>(
        &mut self,
        canvas: &mut Canvas<D>,
        spikes: &SpikeData,
        shown: &[(ClusterId, Vec<SpikeId>)],
        config: &SessionConfig,
    ) {
        canvas.set_visual(
            self.feature_points,
            points(shown, |spike| feature_position(spikes, spike), config),
        );
        canvas.set_visual(
            self.amplitude_points,
            points(
                shown,
                |spike| [spikes.time(spike) as f32, spikes.amplitude(spike)],
                config,
            ),
        );
        canvas.set_visual(self.waveform_lines, waveforms(spikes, shown, config));
    }

    /// Draws the amplitude histograms over `range` and labels every cluster
    /// with its id, group and spike count.
    pub fn show_statistics<D: Device>(
        &mut self,
        canvas: &mut Canvas<D>,
        shown: &[ShownStatistics<'_>],
        (min, max): (f32, f32),
    ) {
        let bars = shown
            .iter()
            .map(|s| {
                let counts = s
                    .statistics
                    .amplitude_histogram
                    .iter()
                    .map(|c| *c as f32)
                    .collect::<Vec<_>>();
                Histogram::new(counts, min as f64, max as f64)
                    .with_color(selection_color(s.index, HISTOGRAM_ALPHA))
                    .into()
            })
            .collect();
        sync_visuals(canvas, self.histograms, &mut self.histogram_bars, bars);

        let top = shown
            .iter()
            .flat_map(|s| s.statistics.amplitude_histogram.iter())
            .max()
            .map_or(1.0, |c| (*c).max(1) as f32);
        let labels = shown
            .iter()
            .enumerate()
            .map(|(row, s)| {
                let mut text = format!("{}", s.statistics.cluster.0);
                if let Some(group) = &s.metadata.group {
                    text.push(' ');
                    text.push_str(group);
                }
                text.push_str(&format!(" {}", s.statistics.count));
                TextLabel::new([max, top * (1.0 - LABEL_SPACING * row as f32)], text)
                    .with_color(selection_color(s.index, 1.0))
            })
            .collect::<Vec<_>>();
        canvas.set_visual(self.labels, Text::new(labels).with_anchor([1.0, 0.0]));
    }
}
