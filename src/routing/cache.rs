use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};

use crate::fingerprint;

use super::matrix::RoutingConfig;
use super::render;
use super::runtime::{build_runtime_matrix, requires_processing, RuntimeMatrix};

pub const ROUTED_CACHE_CAPACITY: usize = 16;
pub const STALE_ROUTED_AGE: Duration = Duration::from_secs(18 * 3600);

pub fn default_routed_dir() -> PathBuf {
    std::env::temp_dir().join("AudioPlayer").join("routed")
}

/// What `resolve` handed back to the player.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    pub path: PathBuf,
    /// The path is a routed render rather than the source.
    pub routed: bool,
    /// The render came from cache without touching the disk.
    pub reused: bool,
}

impl Resolved {
    fn passthrough(source: &Path) -> Self {
        Self {
            path: source.to_path_buf(),
            routed: false,
            reused: false,
        }
    }
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    bytes
        .iter()
        .take(len)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Content-addressed key: file signature, routing token, and the effective
/// gains. Configurations that compute the same gains share a key.
pub fn cache_key(file_signature: &str, token: &str, matrix: &RuntimeMatrix) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_signature.as_bytes());
    hasher.update(b"|");
    hasher.update(token.as_bytes());
    hasher.update(b"|");
    hasher.update(matrix.digest_bytes());
    hex_prefix(&hasher.finalize(), 16)
}

fn is_temp_render(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(".tmp.wav") || n.ends_with(".tmp"))
        .unwrap_or(false)
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("wav"))
        .unwrap_or(false)
}

/// Routed renders on disk, keyed by fingerprint, bounded in count.
///
/// Touched only synchronously by its owner. The file currently loaded for
/// playback is never evicted or deleted.
pub struct RoutedFileCache {
    dir: PathBuf,
    capacity: usize,
    entries: HashMap<String, PathBuf>,
    order: VecDeque<String>,
    session_files: HashSet<PathBuf>,
    renders: u64,
}

impl RoutedFileCache {
    pub fn open(dir: impl Into<PathBuf>, capacity: usize) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
            session_files: HashSet::new(),
            renders: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of renders written since the cache was opened.
    pub fn renders(&self) -> u64 {
        self.renders
    }

    pub fn session_files(&self) -> impl Iterator<Item = &Path> {
        self.session_files.iter().map(PathBuf::as_path)
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.to_string());
    }

    fn forget(&mut self, key: &str) -> Option<PathBuf> {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.entries.remove(key)
    }

    /// Path the player should load for `source` under `cfg`.
    ///
    /// Never fails: any probe, render, or I/O problem falls back to the
    /// source itself. `playing` is the file currently loaded for playback
    /// and is protected from eviction. The source plays as-is only when no
    /// preset or patchbay is active and the gains are an identity; an active
    /// override always gets a render.
    pub fn resolve(&mut self, source: &Path, cfg: &RoutingConfig, playing: Option<&Path>) -> Resolved {
        let layout = match render::probe_layout(source) {
            Ok(layout) => layout,
            Err(err) => {
                log::warn!("route_probe_failed src=\"{}\" err={err}", source.display());
                return Resolved::passthrough(source);
            }
        };
        let source_channels = layout.channels.max(1) as usize;
        let output_channels = cfg.effective_output_channels(source_channels);
        let matrix = build_runtime_matrix(source_channels, output_channels, cfg);
        if !cfg.is_override() && !requires_processing(source_channels, &matrix) {
            return Resolved::passthrough(source);
        }

        let signature = match fingerprint::file_signature(source) {
            Ok(sig) => sig,
            Err(err) => {
                log::warn!(
                    "route_signature_failed src=\"{}\" err={err}",
                    source.display()
                );
                return Resolved::passthrough(source);
            }
        };
        let token = cfg.token(source_channels, output_channels);
        let key = cache_key(&signature, &token, &matrix);

        if let Some(path) = self.entries.get(&key).cloned() {
            if path.is_file() {
                self.touch(&key);
                return Resolved {
                    path,
                    routed: true,
                    reused: true,
                };
            }
            log::debug!("route_cache_stale key={key} path=\"{}\"", path.display());
            self.forget(&key);
        }

        let dest = self.dir.join(format!("{key}.wav"));
        match render::render(source, layout, &matrix, &dest) {
            Ok(path) => {
                self.renders += 1;
                self.entries.insert(key.clone(), path.clone());
                self.touch(&key);
                self.session_files.insert(path.clone());
                self.evict_over_capacity(&[playing, Some(path.as_path())]);
                Resolved {
                    path,
                    routed: true,
                    reused: false,
                }
            }
            Err(err) => {
                log::warn!(
                    "route_failed src=\"{}\" out_ch={output_channels} err={err}",
                    source.display()
                );
                Resolved::passthrough(source)
            }
        }
    }

    /// Evicts oldest entries until within capacity, skipping `playing`.
    pub fn trim(&mut self, playing: Option<&Path>) {
        self.evict_over_capacity(&[playing]);
    }

    fn evict_over_capacity(&mut self, protected: &[Option<&Path>]) {
        while self.entries.len() > self.capacity {
            let victim = self
                .order
                .iter()
                .find(|key| {
                    self.entries
                        .get(*key)
                        .map(|p| !protected.contains(&Some(p.as_path())))
                        .unwrap_or(true)
                })
                .cloned();
            let Some(key) = victim else {
                break;
            };
            if let Some(path) = self.forget(&key) {
                let _ = std::fs::remove_file(&path);
                self.session_files.remove(&path);
                log::debug!("route_cache_evict key={key} path=\"{}\"", path.display());
            }
        }
    }

    /// Startup janitor: deletes leftover temp renders and any render older
    /// than `max_age`. Returns how many files were removed.
    pub fn cleanup_stale(&mut self, max_age: Duration) -> usize {
        let Ok(read_dir) = std::fs::read_dir(&self.dir) else {
            return 0;
        };
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in read_dir.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let stale = if is_temp_render(&path) {
                true
            } else if is_wav(&path) {
                entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| now.duration_since(t).ok())
                    .map(|age| age > max_age)
                    .unwrap_or(false)
            } else {
                false
            };
            if stale && std::fs::remove_file(&path).is_ok() {
                removed += 1;
                let keys: Vec<String> = self
                    .entries
                    .iter()
                    .filter(|(_, p)| **p == path)
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in keys {
                    self.forget(&key);
                }
                self.session_files.remove(&path);
            }
        }
        if removed > 0 {
            log::info!(
                "route_janitor dir=\"{}\" removed={removed}",
                self.dir.display()
            );
        }
        removed
    }

    /// Shutdown cleanup: deletes this session's renders except `playing`,
    /// which the next startup janitor picks up instead.
    pub fn cleanup_session(&mut self, playing: Option<&Path>) -> usize {
        let mut removed = 0;
        let files: Vec<PathBuf> = self.session_files.drain().collect();
        for path in files {
            if Some(path.as_path()) == playing {
                continue;
            }
            if std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
            let keys: Vec<String> = self
                .entries
                .iter()
                .filter(|(_, p)| **p == path)
                .map(|(k, _)| k.clone())
                .collect();
            for key in keys {
                self.forget(&key);
            }
        }
        removed
    }
}
