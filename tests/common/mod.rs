#![allow(dead_code)]

use std::path::{Path, PathBuf};

/// Writes `channels` (one Vec per channel, equal lengths) as 16-bit PCM.
pub fn write_wav(path: &Path, sample_rate: u32, channels: &[Vec<f32>]) {
    let spec = hound::WavSpec {
        channels: channels.len() as u16,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
    let frames = channels.first().map(Vec::len).unwrap_or(0);
    for i in 0..frames {
        for ch in channels {
            let v = (ch[i].clamp(-1.0, 1.0) * 32767.0).round() as i16;
            writer.write_sample(v).expect("write sample");
        }
    }
    writer.finalize().expect("finalize wav");
}

pub fn sine(sample_rate: u32, secs: f32, freq: f32, amp: f32) -> Vec<f32> {
    let frames = (sample_rate as f32 * secs) as usize;
    (0..frames)
        .map(|i| (i as f32 / sample_rate as f32 * freq * std::f32::consts::TAU).sin() * amp)
        .collect()
}

/// `count` channels, channel `i` a constant DC level of `levels[i]`.
pub fn dc_channels(frames: usize, levels: &[f32]) -> Vec<Vec<f32>> {
    levels.iter().map(|&l| vec![l; frames]).collect()
}

pub fn fixture(dir: &Path, name: &str, sample_rate: u32, channels: &[Vec<f32>]) -> PathBuf {
    let path = dir.join(name);
    write_wav(&path, sample_rate, channels);
    path
}

pub fn read_wav(path: &Path) -> (hound::WavSpec, Vec<i32>) {
    let mut reader = hound::WavReader::open(path).expect("open wav");
    let spec = reader.spec();
    let samples = reader
        .samples::<i32>()
        .collect::<Result<Vec<_>, _>>()
        .expect("read samples");
    (spec, samples)
}
