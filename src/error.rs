//! Error taxonomy of the crate.
//!
//! Programming errors (stale handles, mismatched buffer types, broken built-in
//! shaders) are not represented here; they panic at the point of misuse.
use thiserror::Error;

use crate::cluster::{ClusterId, SpikeId};

/// Invalid data at the boundary of the curation engine.
///
/// Operations returning a [`DataError`] never mutate any state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    #[error("spike {spike:?} is out of range, only {n_spikes} spikes are known")]
    UnknownSpike { spike: SpikeId, n_spikes: usize },
    #[error("cluster {0:?} does not exist or is no longer live")]
    UnknownCluster(ClusterId),
    #[error("cluster {0:?} was listed more than once")]
    DuplicateCluster(ClusterId),
    #[error("spike {0:?} was listed more than once")]
    DuplicateSpike(SpikeId),
    #[error("merging requires at least two clusters, got {0}")]
    NotEnoughClusters(usize),
    #[error("no clusters were given")]
    NoClusters,
    #[error("spike {spike:?} does not belong to cluster {cluster:?}")]
    SpikeNotInCluster { spike: SpikeId, cluster: ClusterId },
    #[error("splitting cluster {0:?} would not produce at least two clusters")]
    DegenerateSplit(ClusterId),
    #[error("{what} has length {got}, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{what} contains a non-finite value at index {index}")]
    NonFinite { what: &'static str, index: usize },
    #[error("the cluster id space is exhausted")]
    IdSpaceExhausted,
    #[error("malformed curation record: {0}")]
    MalformedRecord(String),
}

/// GPU resource failures.
///
/// The affected visual is skipped for the current frame and retried on the
/// next invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("buffer {label:?} of {size} bytes exceeds the device limit of {limit} bytes")]
    ExceedsLimit {
        label: String,
        size: usize,
        limit: usize,
    },
    #[error("allocation of buffer {label:?} ({size} bytes) failed")]
    AllocationFailed { label: String, size: usize },
    #[error("the device was lost")]
    DeviceLost,
}

/// Failure to compile a shader program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShaderCompileError {
    #[error("{label}:{line}: {message}")]
    Syntax {
        label: String,
        line: usize,
        message: String,
    },
    #[error("{label}: missing @{stage} entry point")]
    MissingEntryPoint { label: String, stage: &'static str },
    #[error("{label}: unresolved include <{name}>")]
    UnresolvedInclude { label: String, name: String },
    #[error("{label}: interface does not match the program signature: {detail}")]
    SignatureMismatch { label: String, detail: String },
    #[error("{label}: {message}")]
    Backend { label: String, message: String },
}

/// Results of background work that can no longer be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConcurrencyError {
    #[error("result of generation {result} is stale, the current generation is {current}")]
    StaleResult { result: u64, current: u64 },
    #[error("the task was cancelled")]
    Cancelled,
}

/// A [`SessionConfig`](crate::SessionConfig) value the session cannot work with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{0} must be positive")]
    ZeroBudget(&'static str),
    #[error("{what} must be a finite non-negative number, got {value}")]
    InvalidValue { what: &'static str, value: f64 },
}

/// Umbrella error returned by the session level API.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Shader(#[from] ShaderCompileError),
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),
    #[error(transparent)]
    Color(#[from] crate::colors::ColorParseError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid json: {0}")]
    Encoding(#[from] serde_json::Error),
}
