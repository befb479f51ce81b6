//! Error taxonomy shared by the waveform and routing halves.

use std::path::PathBuf;

use thiserror::Error;

/// Failures of a waveform decode job.
#[derive(Error, Debug)]
pub enum WaveError {
    /// Header could not be read. The engine degrades this to an empty
    /// waveform; it only surfaces from explicit probes.
    #[error("probe failed for {path}: {message}")]
    Probe { path: PathBuf, message: String },

    /// Mid-stream read or decode failure. The job is aborted.
    #[error("decode failed for {path}: {message}")]
    Decode { path: PathBuf, message: String },
}

impl WaveError {
    pub fn decode(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            path: path.to_path_buf(),
            message: format!("{err:#}"),
        }
    }
}

/// Failures of a routing render. Callers fall back to the source path.
#[derive(Error, Debug)]
pub enum RouteError {
    #[error("probe failed for {path}: {message}")]
    Probe { path: PathBuf, message: String },

    #[error("routing matrix is {rows}x{cols} but source has {channels} channels")]
    Shape {
        rows: usize,
        cols: usize,
        channels: usize,
    },

    #[error("routing read failed: {0}")]
    Read(String),

    #[error("routing io: {0}")]
    Io(#[from] std::io::Error),

    #[error("routing wav write: {0}")]
    Wav(#[from] hound::Error),
}

pub type RouteResult<T> = Result<T, RouteError>;
