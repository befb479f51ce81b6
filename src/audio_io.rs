use std::fs::File;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

pub const SUPPORTED_EXTS: &[&str] = &["wav", "wave", "flac", "ogg", "mp3", "m4a", "aac"];

fn io_trace_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| {
        std::env::var("WAVEROUTE_IO_TRACE")
            .ok()
            .map(|v| {
                let v = v.trim().to_ascii_lowercase();
                !(v.is_empty() || v == "0" || v == "false" || v == "off")
            })
            .unwrap_or(false)
    })
}

fn io_trace(event: &str, path: &Path, sample_rate: u32, channels: u16, frames: Option<u64>) {
    if !io_trace_enabled() {
        return;
    }
    let frames_text = frames
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string());
    log::debug!(
        "io_trace event={event} path=\"{}\" sr={sample_rate} ch={channels} frames={frames_text}",
        path.display()
    );
}

/// Header-level facts about a stream, read once per job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioStreamInfo {
    pub frames: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioStreamInfo {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0 || self.sample_rate == 0
    }
}

pub fn is_supported_extension(ext: &str) -> bool {
    SUPPORTED_EXTS.iter().any(|e| ext.eq_ignore_ascii_case(e))
}

pub fn is_supported_audio_path(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(is_supported_extension)
        .unwrap_or(false)
}

fn probe_format(path: &Path) -> Result<Box<dyn FormatReader>> {
    let ext_hint = path.extension().and_then(|s| s.to_str());
    let probe_once = |hint_ext: Option<&str>| -> Result<Box<dyn FormatReader>> {
        let file = File::open(path).with_context(|| format!("open audio: {}", path.display()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let mut hint = Hint::new();
        if let Some(ext) = hint_ext {
            hint.with_extension(ext);
        }
        let probed = get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        Ok(probed.format)
    };
    match probe_once(ext_hint) {
        Ok(v) => Ok(v),
        Err(first_err) => {
            if ext_hint.is_some() {
                probe_once(None).with_context(|| {
                    format!(
                        "probe audio failed with and without hint: {}",
                        path.display()
                    )
                })
            } else {
                Err(first_err)
            }
        }
    }
}

fn open_decoder(path: &Path) -> Result<(Box<dyn FormatReader>, Box<dyn Decoder>, u32)> {
    let format = probe_format(path)?;
    let track = format.default_track().context("no default track")?.clone();
    let decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;
    Ok((format, decoder, track.id))
}

/// Channel count and rate from the first decodable packet, for containers
/// whose header leaves them blank.
fn decode_head_spec(path: &Path) -> Option<(u16, u32)> {
    let (mut format, mut decoder, track_id) = open_decoder(path).ok()?;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) => return None,
            Err(SymphoniaError::ResetRequired) => return None,
            Err(_) => continue,
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(_) => return None,
        };
        let spec = decoded.spec();
        return Some((spec.channels.count().max(1) as u16, spec.rate));
    }
}

/// Sums packet durations when the container does not report a frame count.
fn count_frames_by_packets(path: &Path) -> Result<u64> {
    let mut format = probe_format(path)?;
    let track_id = format.default_track().context("no default track")?.id;
    let mut frames = 0u64;
    loop {
        match format.next_packet() {
            Ok(packet) => {
                if packet.track_id() == track_id {
                    frames = frames.saturating_add(packet.dur());
                }
            }
            Err(SymphoniaError::IoError(err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(frames)
}

/// Channel count and sample rate, without the frame count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamLayout {
    pub sample_rate: u32,
    pub channels: u16,
}

fn probe_header(path: &Path) -> Result<(StreamLayout, Option<u64>)> {
    let format = probe_format(path)?;
    let track = format.default_track().context("no default track")?;
    let cp = &track.codec_params;
    let mut channels = cp.channels.map(|c| c.count() as u16).unwrap_or(0);
    let mut sample_rate = cp.sample_rate.unwrap_or(0);
    let n_frames = cp.n_frames;
    drop(format);
    if channels == 0 || sample_rate == 0 {
        if let Some((head_channels, head_sr)) = decode_head_spec(path) {
            if channels == 0 {
                channels = head_channels;
            }
            if sample_rate == 0 {
                sample_rate = head_sr;
            }
        }
    }
    let layout = StreamLayout {
        sample_rate,
        channels: channels.max(1),
    };
    Ok((layout, n_frames))
}

/// Header-only probe. Never walks the packets, so it stays cheap for
/// containers that do not report a frame count.
pub fn probe_layout(path: &Path) -> Result<StreamLayout> {
    let (layout, _) = probe_header(path)?;
    io_trace("layout", path, layout.sample_rate, layout.channels, None);
    Ok(layout)
}

pub fn probe_stream_info(path: &Path) -> Result<AudioStreamInfo> {
    let (layout, n_frames) = probe_header(path)?;
    let frames = match n_frames {
        Some(n) => n,
        None => count_frames_by_packets(path)?,
    };
    io_trace("probe", path, layout.sample_rate, layout.channels, Some(frames));
    Ok(AudioStreamInfo {
        frames,
        sample_rate: layout.sample_rate,
        channels: layout.channels,
    })
}

/// Sequential decoder handing out interleaved f32 frames in caller-sized chunks.
pub struct ChunkReader {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    pending: Vec<f32>,
    pending_pos: usize,
    decode_errors: u32,
    eof: bool,
}

impl ChunkReader {
    /// `channels` fixes the width of every frame handed out; decoded packets
    /// with a different layout are truncated or zero padded to it.
    pub fn open(path: &Path, channels: usize) -> Result<Self> {
        let (format, decoder, track_id) = open_decoder(path)?;
        io_trace("open", path, 0, channels as u16, None);
        Ok(Self {
            format,
            decoder,
            track_id,
            channels: channels.max(1),
            pending: Vec::new(),
            pending_pos: 0,
            decode_errors: 0,
            eof: false,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn decode_errors(&self) -> u32 {
        self.decode_errors
    }

    fn pending_frames(&self) -> usize {
        (self.pending.len() - self.pending_pos) / self.channels
    }

    fn fill_pending(&mut self) -> Result<()> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::DecodeError(_)) => {
                    self.decode_errors = self.decode_errors.saturating_add(1);
                    continue;
                }
                Err(SymphoniaError::IoError(err))
                    if err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.eof = true;
                    return Ok(());
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.eof = true;
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(_)) => {
                    self.decode_errors = self.decode_errors.saturating_add(1);
                    continue;
                }
                Err(SymphoniaError::IoError(err))
                    if err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.eof = true;
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };
            let spec = *decoded.spec();
            let capacity = decoded.capacity() as u64;
            let src_channels = spec.channels.count().max(1);
            let mut buf = SampleBuffer::<f32>::new(capacity, spec);
            buf.copy_interleaved_ref(decoded);
            if self.pending_pos > 0 {
                self.pending.drain(..self.pending_pos);
                self.pending_pos = 0;
            }
            if src_channels == self.channels {
                self.pending.extend_from_slice(buf.samples());
            } else {
                for frame in buf.samples().chunks(src_channels) {
                    for ci in 0..self.channels {
                        self.pending.push(frame.get(ci).copied().unwrap_or(0.0));
                    }
                }
            }
            if self.pending_frames() > 0 {
                return Ok(());
            }
        }
    }

    /// Reads up to `frames` frames into `out` (cleared first). Returns the
    /// number of frames read; 0 means end of stream.
    pub fn read_chunk(&mut self, frames: usize, out: &mut Vec<f32>) -> Result<usize> {
        out.clear();
        let want = frames.max(1);
        let mut got = 0usize;
        while got < want {
            if self.pending_frames() == 0 {
                if self.eof {
                    break;
                }
                self.fill_pending()?;
                if self.pending_frames() == 0 {
                    break;
                }
            }
            let take = (want - got).min(self.pending_frames());
            let end = self.pending_pos + take * self.channels;
            out.extend_from_slice(&self.pending[self.pending_pos..end]);
            self.pending_pos = end;
            got += take;
        }
        Ok(got)
    }
}
