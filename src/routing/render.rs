use std::path::{Path, PathBuf};

use crate::audio_io::{self, ChunkReader, StreamLayout};
use crate::error::{RouteError, RouteResult};

use super::runtime::{requires_processing, RuntimeMatrix};

pub const ROUTE_CHUNK_FRAMES: usize = 262_144;
pub const ROUTED_BITS_PER_SAMPLE: u16 = 24;
const PCM24_MAX: f32 = 8_388_607.0;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    Routed(PathBuf),
    /// Nothing to do; play the source as-is.
    Passthrough,
}

/// `<dest>` with its extension swapped for `tmp.wav`.
pub fn temp_path_for(dest: &Path) -> PathBuf {
    dest.with_extension("tmp.wav")
}

fn to_pcm24(v: f32) -> i32 {
    (v.clamp(-1.0, 1.0) * PCM24_MAX).round() as i32
}

fn render_into(
    source: &Path,
    matrix: &RuntimeMatrix,
    layout: StreamLayout,
    tmp: &Path,
) -> RouteResult<u64> {
    let spec = hound::WavSpec {
        channels: matrix.outputs() as u16,
        sample_rate: layout.sample_rate,
        bits_per_sample: ROUTED_BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    };
    let mut reader = ChunkReader::open(source, layout.channels as usize)
        .map_err(|e| RouteError::Read(format!("{e:#}")))?;
    let channels = reader.channels();
    let mut writer = hound::WavWriter::create(tmp, spec)?;
    let mut buf: Vec<f32> = Vec::with_capacity(ROUTE_CHUNK_FRAMES * channels);
    let mut mixed = vec![0.0f32; matrix.outputs()];
    let mut frames = 0u64;
    loop {
        let read = reader
            .read_chunk(ROUTE_CHUNK_FRAMES, &mut buf)
            .map_err(|e| RouteError::Read(format!("{e:#}")))?;
        if read == 0 {
            break;
        }
        for frame in buf.chunks_exact(channels) {
            matrix.apply_frame(frame, &mut mixed);
            for &v in &mixed {
                writer.write_sample(to_pcm24(v))?;
            }
        }
        frames += read as u64;
    }
    writer.finalize()?;
    Ok(frames)
}

/// Channel count and rate of `source`, read from the header only.
pub fn probe_layout(source: &Path) -> RouteResult<StreamLayout> {
    let layout = audio_io::probe_layout(source).map_err(|e| RouteError::Probe {
        path: source.to_path_buf(),
        message: format!("{e:#}"),
    })?;
    if layout.sample_rate == 0 {
        return Err(RouteError::Probe {
            path: source.to_path_buf(),
            message: "unknown sample rate".to_string(),
        });
    }
    Ok(layout)
}

fn check_shape(matrix: &RuntimeMatrix, channels: usize) -> RouteResult<()> {
    if matrix.sources() > channels || matrix.outputs() == 0 {
        return Err(RouteError::Shape {
            rows: matrix.sources(),
            cols: matrix.outputs(),
            channels,
        });
    }
    Ok(())
}

/// Renders `source` through `matrix` into a 24-bit WAV at `dest`.
///
/// An identity matrix over the source's own layout is a passthrough and
/// writes nothing.
pub fn route(source: &Path, matrix: &RuntimeMatrix, dest: &Path) -> RouteResult<RouteOutcome> {
    let layout = probe_layout(source)?;
    let channels = layout.channels.max(1) as usize;
    check_shape(matrix, channels)?;
    if !requires_processing(channels, matrix) {
        return Ok(RouteOutcome::Passthrough);
    }
    render(source, layout, matrix, dest).map(RouteOutcome::Routed)
}

/// Writes the render unconditionally, identity matrices included.
///
/// The render goes to a sibling temp file that is renamed over `dest` only
/// once complete; on failure the temp file is removed.
pub fn render(
    source: &Path,
    layout: StreamLayout,
    matrix: &RuntimeMatrix,
    dest: &Path,
) -> RouteResult<PathBuf> {
    let channels = layout.channels.max(1) as usize;
    check_shape(matrix, channels)?;
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = temp_path_for(dest);
    let rendered = render_into(source, matrix, layout, &tmp)
        .and_then(|frames| std::fs::rename(&tmp, dest).map(|_| frames).map_err(Into::into));
    match rendered {
        Ok(frames) => {
            log::debug!(
                "route_rendered src=\"{}\" dst=\"{}\" in_ch={channels} out_ch={} frames={frames}",
                source.display(),
                dest.display(),
                matrix.outputs()
            );
            Ok(dest.to_path_buf())
        }
        Err(err) => {
            let _ = std::fs::remove_file(&tmp);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm24_scaling_is_symmetric_and_clipped() {
        assert_eq!(to_pcm24(0.0), 0);
        assert_eq!(to_pcm24(1.0), 8_388_607);
        assert_eq!(to_pcm24(-1.0), -8_388_607);
        assert_eq!(to_pcm24(3.0), 8_388_607);
    }

    #[test]
    fn temp_path_sits_next_to_dest() {
        let tmp = temp_path_for(Path::new("/x/routed/abcd.wav"));
        assert_eq!(tmp, PathBuf::from("/x/routed/abcd.tmp.wav"));
    }
}
