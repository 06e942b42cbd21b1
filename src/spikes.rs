//! Per-spike arrays supplied by the clustering.
use std::sync::Arc;

use crate::{cluster::SpikeId, error::DataError};

fn check_finite<T: Copy + Into<f64>>(what: &'static str, values: &[T]) -> Result<(), DataError> {
    match values.iter().position(|v| !(*v).into().is_finite()) {
        Some(index) => Err(DataError::NonFinite { what, index }),
        None => Ok(()),
    }
}

fn check_len(what: &'static str, expected: usize, got: usize) -> Result<(), DataError> {
    if expected != got {
        return Err(DataError::LengthMismatch {
            what,
            expected,
            got,
        });
    }
    Ok(())
}

/// Waveform of every spike, `n_samples x n_channels` values per spike with the
/// channels varying fastest.
#[derive(Debug, Clone)]
pub struct Waveforms {
    data: Arc<[f32]>,
    n_samples: usize,
    n_channels: usize,
}

impl Waveforms {
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    fn stride(&self) -> usize {
        self.n_samples * self.n_channels
    }
}

/// Validated spike times, amplitudes, features and waveforms.
///
/// All arrays are shared, cloning is cheap.
#[derive(Debug, Clone)]
pub struct SpikeData {
    times: Arc<[f64]>,
    amplitudes: Arc<[f32]>,
    features: Arc<[f32]>,
    n_features: usize,
    waveforms: Option<Waveforms>,
}

impl SpikeData {
    pub fn new(times: impl Into<Arc<[f64]>>, amplitudes: impl Into<Arc<[f32]>>) -> Result<Self, DataError> {
        let times = times.into();
        let amplitudes = amplitudes.into();
        check_len("spike amplitudes", times.len(), amplitudes.len())?;
        check_finite("spike times", &times)?;
        check_finite("spike amplitudes", &amplitudes)?;

        Ok(Self {
            times,
            amplitudes,
            features: Vec::new().into(),
            n_features: 0,
            waveforms: None,
        })
    }

    /// Attaches a row major `n_spikes x n_features` feature matrix.
    pub fn with_features(mut self, features: impl Into<Arc<[f32]>>, n_features: usize) -> Result<Self, DataError> {
        let features = features.into();
        check_len("feature matrix", self.n_spikes() * n_features, features.len())?;
        check_finite("feature matrix", &features)?;

        self.features = features;
        self.n_features = n_features;
        Ok(self)
    }

    pub fn with_waveforms(
        mut self,
        data: impl Into<Arc<[f32]>>,
        n_samples: usize,
        n_channels: usize,
    ) -> Result<Self, DataError> {
        let data = data.into();
        check_len("waveforms", self.n_spikes() * n_samples * n_channels, data.len())?;
        check_finite("waveforms", &data)?;

        self.waveforms = Some(Waveforms {
            data,
            n_samples,
            n_channels,
        });
        Ok(self)
    }

    pub fn n_spikes(&self) -> usize {
        self.times.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn time(&self, spike: SpikeId) -> f64 {
        self.times[spike.index()]
    }

    pub fn amplitude(&self, spike: SpikeId) -> f32 {
        self.amplitudes[spike.index()]
    }

    pub fn features(&self, spike: SpikeId) -> &[f32] {
        let start = spike.index() * self.n_features;
        &self.features[start..start + self.n_features]
    }

    pub fn waveforms(&self) -> Option<&Waveforms> {
        self.waveforms.as_ref()
    }

    pub fn waveform(&self, spike: SpikeId) -> Option<&[f32]> {
        let waveforms = self.waveforms.as_ref()?;
        let start = spike.index() * waveforms.stride();
        Some(&waveforms.data[start..start + waveforms.stride()])
    }

    /// Smallest and largest amplitude, `(0, 0)` without spikes.
    pub fn amplitude_range(&self) -> (f32, f32) {
        if self.amplitudes.is_empty() {
            return (0.0, 0.0);
        }
        self.amplitudes
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), a| {
                (min.min(*a), max.max(*a))
            })
    }

    pub fn time_range(&self) -> (f64, f64) {
        match (self.times.first(), self.times.last()) {
            (Some(first), Some(last)) => self
                .times
                .iter()
                .fold((*first, *last), |(min, max), t| (min.min(*t), max.max(*t))),
            _ => (0.0, 0.0),
        }
    }
}
