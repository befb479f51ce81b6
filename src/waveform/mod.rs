pub mod cache;
pub mod engine;
pub mod render;
pub mod scheduler;

pub use cache::{PartialWaveform, WaveCache};
pub use engine::{decimate, Decimation, JobControl, ProgressSnapshot, WaveformResult};
pub use scheduler::{RequestOutcome, WaveObserver, WaveformScheduler};
