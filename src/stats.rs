//! Per-cluster statistics, computed in the background.
use crate::{
    cluster::{ClusterId, PartitionSnapshot},
    error::ConcurrencyError,
    spikes::SpikeData,
    tasks::CancellationToken,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsConfig {
    /// Spikes processed between two cancellation checks.
    pub chunk_size: usize,
    pub histogram_bins: usize,
    /// Range of the amplitude histograms.
    pub amplitude_range: (f32, f32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterStatistics {
    pub cluster: ClusterId,
    pub count: usize,
    pub mean_amplitude: f32,
    pub amplitude_histogram: Vec<u32>,
    pub mean_waveform: Option<Vec<f32>>,
}

/// Bin of `value` among `bins` equal bins over `[min, max]`; the last bin is
/// closed. Values outside the range or NaN fall in no bin.
pub fn bin_index(value: f32, bins: usize, min: f32, max: f32) -> Option<usize> {
    if bins == 0 || !(min..=max).contains(&value) {
        return None;
    }
    if max <= min {
        return Some(0);
    }

    let t = (value - min) / (max - min);
    Some(((t * bins as f32) as usize).min(bins - 1))
}

pub fn bin_counts(values: impl IntoIterator<Item = f32>, bins: usize, min: f32, max: f32) -> Vec<u32> {
    let mut counts = vec![0; bins];
    for value in values {
        if let Some(bin) = bin_index(value, bins, min, max) {
            counts[bin] += 1;
        }
    }
    counts
}

/// Statistics of the given clusters over the partition at the time of the
/// snapshot; clusters that are not live in the snapshot are skipped.
pub fn compute(
    snapshot: &PartitionSnapshot,
    spikes: &SpikeData,
    clusters: &[ClusterId],
    config: &StatsConfig,
    token: &CancellationToken,
) -> Result<Vec<ClusterStatistics>, ConcurrencyError> {
    let (min, max) = config.amplitude_range;
    let chunk_size = config.chunk_size.max(1);
    let waveform_len = spikes
        .waveforms()
        .map(|w| w.n_samples() * w.n_channels());

    let mut statistics = Vec::with_capacity(clusters.len());
    for &cluster in clusters {
        let Some(members) = snapshot.spikes(cluster) else {
            continue;
        };

        let mut amplitude_sum = 0.0f64;
        let mut histogram = vec![0; config.histogram_bins];
        let mut waveform_sum = waveform_len.map(|len| vec![0.0f64; len]);
        for chunk in members.chunks(chunk_size) {
            token.check()?;
            for &spike in chunk {
                let amplitude = spikes.amplitude(spike);
                amplitude_sum += amplitude as f64;
                if let Some(bin) = bin_index(amplitude, config.histogram_bins, min, max) {
                    histogram[bin] += 1;
                }
                if let (Some(sum), Some(waveform)) = (&mut waveform_sum, spikes.waveform(spike)) {
                    for (s, v) in sum.iter_mut().zip(waveform) {
                        *s += *v as f64;
                    }
                }
            }
        }

        let count = members.len();
        let mean = |sum: f64| if count == 0 { 0.0 } else { (sum / count as f64) as f32 };
        statistics.push(ClusterStatistics {
            cluster,
            count,
            mean_amplitude: mean(amplitude_sum),
            amplitude_histogram: histogram,
            mean_waveform: waveform_sum.map(|sum| sum.into_iter().map(mean).collect()),
        });
    }

    Ok(statistics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cluster::ClusterState, tasks::CancellationSource};

    fn config() -> StatsConfig {
        StatsConfig {
            chunk_size: 2,
            histogram_bins: 4,
            amplitude_range: (0.0, 4.0),
        }
    }

    #[test]
    fn values_are_binned_with_a_closed_last_bin() {
        assert_eq!(bin_counts([0.0, 0.9, 1.0, 4.0, 4.5, f32::NAN], 4, 0.0, 4.0), vec![2, 1, 0, 1]);
        assert_eq!(bin_counts([2.0, 2.0], 3, 2.0, 2.0), vec![2, 0, 0]);
        assert!(bin_counts([1.0], 0, 0.0, 1.0).is_empty());
    }

    #[test]
    fn statistics_cover_every_live_cluster() {
        let state = ClusterState::new(&[0, 1, 0, 0]).unwrap();
        let spikes = SpikeData::new(vec![0.0; 4], vec![1.0, 3.5, 2.0, 3.0])
            .unwrap()
            .with_waveforms(vec![1.0, 2.0, 0.0, 0.0, 3.0, 4.0, 2.0, 0.0], 2, 1)
            .unwrap();
        let source = CancellationSource::new();

        let stats = compute(
            &state.snapshot(),
            &spikes,
            &[ClusterId(0), ClusterId(5)],
            &config(),
            &source.token(),
        )
        .unwrap();

        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].count, 3);
        assert_eq!(stats[0].mean_amplitude, 2.0);
        assert_eq!(stats[0].amplitude_histogram, vec![0, 1, 1, 1]);
        assert_eq!(stats[0].mean_waveform, Some(vec![2.0, 2.0]));
    }

    #[test]
    fn cancelled_computations_stop() {
        let state = ClusterState::new(&[0, 0, 0]).unwrap();
        let spikes = SpikeData::new(vec![0.0; 3], vec![1.0; 3]).unwrap();
        let source = CancellationSource::new();
        source.cancel();

        let result = compute(&state.snapshot(), &spikes, &[ClusterId(0)], &config(), &source.token());
        assert_eq!(result, Err(ConcurrencyError::Cancelled));
    }
}
