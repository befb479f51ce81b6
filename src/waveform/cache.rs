use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::engine::{ProgressSnapshot, WaveformResult};

pub const WAVE_CACHE_CAPACITY: usize = 40;

struct CachedWave {
    signature: String,
    result: Arc<WaveformResult>,
}

/// Finished waveforms keyed by path, valid only for a matching signature.
pub struct WaveCache {
    capacity: usize,
    entries: HashMap<PathBuf, CachedWave>,
    order: VecDeque<PathBuf>,
}

impl Default for WaveCache {
    fn default() -> Self {
        Self::new(WAVE_CACHE_CAPACITY)
    }
}

impl WaveCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn touch(&mut self, path: &Path) {
        if let Some(pos) = self.order.iter().position(|p| p.as_path() == path) {
            self.order.remove(pos);
        }
        self.order.push_back(path.to_path_buf());
    }

    pub fn get(&mut self, path: &Path, signature: &str) -> Option<Arc<WaveformResult>> {
        let hit = self
            .entries
            .get(path)
            .filter(|c| c.signature == signature)
            .map(|c| Arc::clone(&c.result))?;
        self.touch(path);
        Some(hit)
    }

    pub fn contains(&self, path: &Path, signature: &str) -> bool {
        self.entries
            .get(path)
            .map(|c| c.signature == signature)
            .unwrap_or(false)
    }

    pub fn store(&mut self, path: &Path, signature: &str, result: Arc<WaveformResult>) {
        self.entries.insert(
            path.to_path_buf(),
            CachedWave {
                signature: signature.to_string(),
                result,
            },
        );
        self.touch(path);
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// In-flight accumulator copy for one path.
#[derive(Clone, Debug)]
pub struct PartialWaveform {
    pub signature: String,
    pub time_axis: Vec<f32>,
    pub amplitude: Vec<Vec<f32>>,
    pub filled_bins: usize,
    pub total_bins: usize,
}

impl PartialWaveform {
    pub fn from_snapshot(signature: &str, snap: ProgressSnapshot) -> Self {
        let total_bins = if snap.total_bins == 0 {
            snap.amplitude.len().max(1)
        } else {
            snap.total_bins
        };
        Self {
            signature: signature.to_string(),
            filled_bins: snap.filled_bins.min(total_bins),
            total_bins,
            time_axis: snap.time_axis,
            amplitude: snap.amplitude,
        }
    }

    /// Only the filled prefix is meaningful.
    pub fn visible(&self) -> (&[f32], &[Vec<f32>]) {
        let upto = self
            .filled_bins
            .min(self.time_axis.len())
            .min(self.amplitude.len());
        (&self.time_axis[..upto], &self.amplitude[..upto])
    }

    pub fn percent(&self) -> u8 {
        let pct = (self.filled_bins as f64 / self.total_bins.max(1) as f64) * 100.0;
        pct.clamp(0.0, 100.0) as u8
    }
}

/// At most one partial entry per path; overwritten on each tick.
#[derive(Default)]
pub struct PartialStore {
    entries: HashMap<PathBuf, PartialWaveform>,
}

impl PartialStore {
    pub fn put(&mut self, path: &Path, partial: PartialWaveform) {
        self.entries.insert(path.to_path_buf(), partial);
    }

    /// Partial for `path` if it was produced under `signature`.
    pub fn get(&self, path: &Path, signature: &str) -> Option<&PartialWaveform> {
        self.entries.get(path).filter(|p| p.signature == signature)
    }

    pub fn remove(&mut self, path: &Path) -> Option<PartialWaveform> {
        self.entries.remove(path)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(v: f32) -> Arc<WaveformResult> {
        Arc::new(WaveformResult {
            time_axis: vec![0.0],
            amplitude: vec![vec![v]],
        })
    }

    #[test]
    fn hit_requires_matching_signature() {
        let mut cache = WaveCache::new(4);
        cache.store(Path::new("a.wav"), "1:1|p100", wave(0.5));
        assert!(cache.get(Path::new("a.wav"), "1:1|p100").is_some());
        assert!(cache.get(Path::new("a.wav"), "1:2|p100").is_none());
        assert!(cache.get(Path::new("b.wav"), "1:1|p100").is_none());
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = WaveCache::new(2);
        cache.store(Path::new("a"), "s", wave(0.1));
        cache.store(Path::new("b"), "s", wave(0.2));
        assert!(cache.get(Path::new("a"), "s").is_some());
        cache.store(Path::new("c"), "s", wave(0.3));
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(Path::new("a"), "s"));
        assert!(!cache.contains(Path::new("b"), "s"));
        assert!(cache.contains(Path::new("c"), "s"));
    }

    #[test]
    fn partial_visible_prefix_and_percent() {
        let partial = PartialWaveform::from_snapshot(
            "sig",
            ProgressSnapshot {
                time_axis: vec![0.0, 1.0, 2.0, 3.0],
                amplitude: vec![vec![0.1], vec![0.2], vec![0.0], vec![0.0]],
                filled_bins: 2,
                total_bins: 4,
            },
        );
        let (axis, amp) = partial.visible();
        assert_eq!(axis, &[0.0, 1.0]);
        assert_eq!(amp.len(), 2);
        assert_eq!(partial.percent(), 50);

        let mut store = PartialStore::default();
        store.put(Path::new("x"), partial);
        assert!(store.get(Path::new("x"), "sig").is_some());
        assert!(store.get(Path::new("x"), "other").is_none());
        assert!(store.remove(Path::new("x")).is_some());
        assert!(store.is_empty());
    }
}
