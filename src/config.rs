//! Session configuration.
use serde::{Deserialize, Serialize};

use crate::{
    colors::{self, ColorParseError, Rgba},
    error::{ConfigError, Error},
    history::HistoryConfig,
};

const DEFAULT_MAX_VERTICES: fn() -> usize = || crate::visual::trace::DEFAULT_MAX_VERTICES;
const DEFAULT_MAX_POINTS: fn() -> usize = || crate::visual::scatter::DEFAULT_MAX_POINTS;
const DEFAULT_SPIKES_PER_CLUSTER: fn() -> usize = || 2_500;
const DEFAULT_WAVEFORMS_PER_CLUSTER: fn() -> usize = || 100;
const DEFAULT_HISTORY_DEPTH: fn() -> usize = || HistoryConfig::default().max_depth;
const DEFAULT_STATS_CHUNK_SIZE: fn() -> usize = || 4096;
const DEFAULT_HISTOGRAM_BINS: fn() -> usize = || 50;
const DEFAULT_MARKER_SIZE: fn() -> f32 = || crate::visual::scatter::DEFAULT_MARKER_SIZE;
const DEFAULT_BACKGROUND_COLOR: fn() -> String = || "rgb(255 255 255)".into();
const DEFAULT_GRID_MARGIN: fn() -> f64 = || 0.02;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Vertex budget of a trace visual.
    #[serde(default = "DEFAULT_MAX_VERTICES")]
    pub max_vertices: usize,
    /// Point budget of a scatter visual.
    #[serde(default = "DEFAULT_MAX_POINTS")]
    pub max_points: usize,
    /// Spikes drawn per selected cluster in the feature and amplitude views.
    #[serde(default = "DEFAULT_SPIKES_PER_CLUSTER")]
    pub spikes_per_cluster: usize,
    #[serde(default = "DEFAULT_WAVEFORMS_PER_CLUSTER")]
    pub waveforms_per_cluster: usize,
    #[serde(default = "DEFAULT_HISTORY_DEPTH")]
    pub history_depth: usize,
    #[serde(default = "DEFAULT_STATS_CHUNK_SIZE")]
    pub stats_chunk_size: usize,
    #[serde(default = "DEFAULT_HISTOGRAM_BINS")]
    pub histogram_bins: usize,
    #[serde(default = "DEFAULT_MARKER_SIZE")]
    pub marker_size: f32,
    /// CSS color, e.g. `rgb(255 255 255)` or `white`.
    #[serde(default = "DEFAULT_BACKGROUND_COLOR")]
    pub background_color: String,
    /// Margin around the subplots, in clip space units.
    #[serde(default = "DEFAULT_GRID_MARGIN")]
    pub grid_margin: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_vertices: DEFAULT_MAX_VERTICES(),
            max_points: DEFAULT_MAX_POINTS(),
            spikes_per_cluster: DEFAULT_SPIKES_PER_CLUSTER(),
            waveforms_per_cluster: DEFAULT_WAVEFORMS_PER_CLUSTER(),
            history_depth: DEFAULT_HISTORY_DEPTH(),
            stats_chunk_size: DEFAULT_STATS_CHUNK_SIZE(),
            histogram_bins: DEFAULT_HISTOGRAM_BINS(),
            marker_size: DEFAULT_MARKER_SIZE(),
            background_color: DEFAULT_BACKGROUND_COLOR(),
            grid_margin: DEFAULT_GRID_MARGIN(),
        }
    }
}

impl SessionConfig {
    /// Parses a configuration, missing keys take their default value.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the budgets, sizes and colors of the configuration.
    pub fn validate(&self) -> Result<(), Error> {
        for (what, budget) in [
            ("max_vertices", self.max_vertices),
            ("max_points", self.max_points),
            ("spikes_per_cluster", self.spikes_per_cluster),
            ("waveforms_per_cluster", self.waveforms_per_cluster),
            ("stats_chunk_size", self.stats_chunk_size),
            ("histogram_bins", self.histogram_bins),
        ] {
            if budget == 0 {
                return Err(ConfigError::ZeroBudget(what).into());
            }
        }
        for (what, value) in [
            ("marker_size", self.marker_size as f64),
            ("grid_margin", self.grid_margin),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidValue { what, value }.into());
            }
        }
        self.background()?;
        Ok(())
    }

    pub fn background(&self) -> Result<Rgba, ColorParseError> {
        colors::parse_css(&self.background_color)
    }

    pub fn history(&self) -> HistoryConfig {
        HistoryConfig {
            max_depth: self.history_depth,
        }
    }

    pub fn with_max_vertices(mut self, max_vertices: usize) -> Self {
        self.max_vertices = max_vertices;
        self
    }

    pub fn with_max_points(mut self, max_points: usize) -> Self {
        self.max_points = max_points;
        self
    }

    pub fn with_spikes_per_cluster(mut self, spikes_per_cluster: usize) -> Self {
        self.spikes_per_cluster = spikes_per_cluster;
        self
    }

    pub fn with_waveforms_per_cluster(mut self, waveforms_per_cluster: usize) -> Self {
        self.waveforms_per_cluster = waveforms_per_cluster;
        self
    }

    pub fn with_history_depth(mut self, history_depth: usize) -> Self {
        self.history_depth = history_depth;
        self
    }

    pub fn with_stats_chunk_size(mut self, stats_chunk_size: usize) -> Self {
        self.stats_chunk_size = stats_chunk_size;
        self
    }

    pub fn with_histogram_bins(mut self, histogram_bins: usize) -> Self {
        self.histogram_bins = histogram_bins;
        self
    }

    pub fn with_marker_size(mut self, marker_size: f32) -> Self {
        self.marker_size = marker_size;
        self
    }

    pub fn with_background_color(mut self, css: impl Into<String>) -> Self {
        self.background_color = css.into();
        self
    }

    pub fn with_grid_margin(mut self, grid_margin: f64) -> Self {
        self.grid_margin = grid_margin;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let config = SessionConfig::from_json(r#"{ "spikes_per_cluster": 10 }"#).unwrap();
        assert_eq!(config.spikes_per_cluster, 10);
        assert_eq!(config.histogram_bins, DEFAULT_HISTOGRAM_BINS());
        assert_eq!(config.background().unwrap(), Rgba::WHITE);
    }

    #[test]
    fn invalid_colors_are_rejected() {
        let err = SessionConfig::from_json(r#"{ "background_color": "rgb(1 2)" }"#).unwrap_err();
        assert!(matches!(err, Error::Color(_)));
        assert!(matches!(SessionConfig::from_json("{"), Err(Error::Encoding(_))));
        assert!(matches!(
            SessionConfig::from_json(r#"{ "max_points": "x" }"#),
            Err(Error::Encoding(_))
        ));

        let config = SessionConfig::default().with_background_color("rgb(0 0 0 0.5)");
        assert_eq!(config.background().unwrap(), Rgba::new(0.0, 0.0, 0.0, 0.5));
    }

    #[test]
    fn zero_budgets_are_rejected() {
        let err = SessionConfig::from_json(r#"{ "max_points": 0 }"#).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::ZeroBudget("max_points"))));
        assert!(SessionConfig::from_json(r#"{ "max_vertices": 0 }"#).is_err());

        let config = SessionConfig::default().with_stats_chunk_size(0);
        assert!(matches!(
            config.validate(),
            Err(Error::Config(ConfigError::ZeroBudget("stats_chunk_size")))
        ));
        let config = SessionConfig::default().with_marker_size(f32::NAN);
        assert!(matches!(
            config.validate(),
            Err(Error::Config(ConfigError::InvalidValue { what: "marker_size", .. }))
        ));
        assert!(SessionConfig::default().validate().is_ok());
    }
}
