use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::audio_io::{self, ChunkReader};
use crate::error::WaveError;

pub const MIN_CHUNK_FRAMES: usize = 8_192;
pub const MAX_CHUNK_FRAMES: usize = 262_144;
pub const ACTIVE_PROGRESS_INTERVAL: Duration = Duration::from_millis(120);
pub const PRELOAD_PROGRESS_INTERVAL: Duration = Duration::from_millis(160);

/// Decimated peak envelope of one file.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WaveformResult {
    /// Seconds, one entry per bin.
    pub time_axis: Vec<f32>,
    /// `[bin][channel]` absolute peaks in `[0, 1]`.
    pub amplitude: Vec<Vec<f32>>,
}

impl WaveformResult {
    /// One silent bin at t=0; what empty or unreadable files decimate to.
    pub fn silent(channels: usize) -> Self {
        Self {
            time_axis: vec![0.0],
            amplitude: vec![vec![0.0; channels.max(1)]],
        }
    }

    pub fn bins(&self) -> usize {
        self.time_axis.len()
    }

    pub fn channels(&self) -> usize {
        self.amplitude.first().map(|row| row.len()).unwrap_or(0)
    }

    pub fn duration_secs(&self) -> f32 {
        self.time_axis.last().copied().unwrap_or(0.0)
    }
}

/// Copy of the accumulator handed to progress observers.
#[derive(Clone, Debug)]
pub struct ProgressSnapshot {
    pub time_axis: Vec<f32>,
    pub amplitude: Vec<Vec<f32>>,
    pub filled_bins: usize,
    pub total_bins: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Decimation {
    Finished(WaveformResult),
    Cancelled,
}

/// Flags a running job polls between chunks. Shared between the owner and
/// the worker thread.
#[derive(Debug)]
pub struct JobControl {
    cancel: AtomicBool,
    emit_progress: AtomicBool,
    progress_interval: Duration,
}

impl JobControl {
    pub fn new(emit_progress: bool, progress_interval: Duration) -> Self {
        Self {
            cancel: AtomicBool::new(false),
            emit_progress: AtomicBool::new(emit_progress),
            progress_interval,
        }
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn set_emit_progress(&self, on: bool) {
        self.emit_progress.store(on, Ordering::Relaxed);
    }

    pub fn emits_progress(&self) -> bool {
        self.emit_progress.load(Ordering::Relaxed)
    }

    pub fn progress_interval(&self) -> Duration {
        self.progress_interval
    }
}

/// Frames per bin and resulting bin count for a stream of `frames`.
pub fn bucket_layout(frames: u64, target_bins: usize) -> (u64, usize) {
    let target = target_bins.max(1) as u64;
    let bucket = frames.div_ceil(target).max(1);
    let bins = frames.div_ceil(bucket).max(1);
    (bucket, bins as usize)
}

pub fn chunk_frames_for(bucket: u64) -> usize {
    let want = bucket.saturating_mul(24).min(MAX_CHUNK_FRAMES as u64) as usize;
    want.clamp(MIN_CHUNK_FRAMES, MAX_CHUNK_FRAMES)
}

/// `bins` evenly spaced points from 0 to `duration`, inclusive.
pub fn linspace(duration: f64, bins: usize) -> Vec<f32> {
    match bins {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => {
            let step = duration / (bins - 1) as f64;
            (0..bins).map(|i| (i as f64 * step) as f32).collect()
        }
    }
}

fn rows_from_flat(flat: &[f32], channels: usize) -> Vec<Vec<f32>> {
    flat.chunks(channels).map(|row| row.to_vec()).collect()
}

fn sanitize_peak(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Streams `path` once and reduces it to at most `target_bins` per-channel
/// peak bins.
///
/// Progress snapshots are delivered through `on_progress` while
/// `control.emits_progress()` holds, no more often than the control's
/// interval. Cancellation is polled between chunk reads; a cancelled run
/// never yields a result. An unreadable header degrades to a one-bin silent
/// waveform instead of failing.
pub fn decimate<P>(
    path: &Path,
    target_bins: usize,
    control: &JobControl,
    mut on_progress: P,
) -> Result<Decimation, WaveError>
where
    P: FnMut(ProgressSnapshot),
{
    let info = match audio_io::probe_stream_info(path) {
        Ok(info) => info,
        Err(err) => {
            let err = WaveError::Probe {
                path: path.to_path_buf(),
                message: format!("{err:#}"),
            };
            log::warn!("wave_degraded_to_empty {err}");
            return Ok(Decimation::Finished(WaveformResult::silent(1)));
        }
    };
    let channels = info.channels.max(1) as usize;
    if info.is_empty() {
        return Ok(Decimation::Finished(WaveformResult::silent(channels)));
    }

    let (bucket, bins) = bucket_layout(info.frames, target_bins);
    let time_axis = linspace(info.duration_secs(), bins);
    let mut acc = vec![0.0f32; bins * channels];
    let chunk_frames = chunk_frames_for(bucket);
    log::debug!(
        "wave_decimate_start path=\"{}\" frames={} sr={} ch={channels} bucket={bucket} bins={bins} chunk={chunk_frames}",
        path.display(),
        info.frames,
        info.sample_rate
    );

    let mut reader =
        ChunkReader::open(path, channels).map_err(|err| WaveError::decode(path, err))?;
    let mut buf: Vec<f32> = Vec::with_capacity(chunk_frames * channels);
    let mut frame_pos: u64 = 0;
    let mut last_emit: Option<Instant> = None;
    let last_bin = (bins - 1) as u64;

    while !control.is_cancelled() {
        let read = reader
            .read_chunk(chunk_frames, &mut buf)
            .map_err(|err| WaveError::decode(path, err))?;
        if read == 0 {
            break;
        }
        for (i, frame) in buf.chunks_exact(channels).enumerate() {
            let bin = ((frame_pos + i as u64) / bucket).min(last_bin) as usize;
            let row = &mut acc[bin * channels..(bin + 1) * channels];
            for (slot, &v) in row.iter_mut().zip(frame) {
                let a = v.abs();
                if a > *slot {
                    *slot = a;
                }
            }
        }
        frame_pos += read as u64;

        if control.emits_progress() {
            let now = Instant::now();
            let due = last_emit
                .map(|t| now.duration_since(t) >= control.progress_interval())
                .unwrap_or(true);
            if due {
                let filled = (frame_pos.div_ceil(bucket) as usize).min(bins);
                on_progress(ProgressSnapshot {
                    time_axis: time_axis.clone(),
                    amplitude: rows_from_flat(&acc, channels),
                    filled_bins: filled,
                    total_bins: bins,
                });
                last_emit = Some(now);
            }
        }
    }

    if control.is_cancelled() {
        log::debug!("wave_decimate_cancelled path=\"{}\"", path.display());
        return Ok(Decimation::Cancelled);
    }
    if reader.decode_errors() > 0 {
        log::debug!(
            "wave_decimate_skipped_packets path=\"{}\" count={}",
            path.display(),
            reader.decode_errors()
        );
    }
    for v in acc.iter_mut() {
        *v = sanitize_peak(*v);
    }
    Ok(Decimation::Finished(WaveformResult {
        time_axis,
        amplitude: rows_from_flat(&acc, channels),
    }))
}
