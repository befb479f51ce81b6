use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::PlayerConfig;
use crate::routing::cache::{Resolved, RoutedFileCache};
use crate::routing::matrix::RoutingConfig;
use crate::waveform::cache::WaveCache;
use crate::waveform::scheduler::{
    FileWaveSource, RequestOutcome, WaveObserver, WaveSource, WaveformScheduler,
};

/// The two cores wired together the way a player host drives them.
///
/// Owned by one thread. The host calls [`pump`](Self::pump) from its event
/// loop so waveform callbacks reach the observer.
pub struct PlayerSession<O: WaveObserver> {
    config: PlayerConfig,
    scheduler: WaveformScheduler<O>,
    routed: RoutedFileCache,
    playlist: Vec<PathBuf>,
    loaded_source: Option<PathBuf>,
    playing: Option<PathBuf>,
    shut_down: bool,
}

impl<O: WaveObserver> PlayerSession<O> {
    pub fn open(config: PlayerConfig, observer: O) -> Result<Self> {
        let source: Arc<dyn WaveSource> = Arc::new(FileWaveSource);
        Self::open_with_source(config, observer, source)
    }

    pub fn open_with_source(
        config: PlayerConfig,
        observer: O,
        source: Arc<dyn WaveSource>,
    ) -> Result<Self> {
        let dir = config.routed_dir();
        let mut routed = RoutedFileCache::open(&dir, config.routed_cache_capacity)
            .with_context(|| format!("open routed dir: {}", dir.display()))?;
        let removed = routed.cleanup_stale(config.routed_max_age());
        log::info!(
            "session_open routed_dir=\"{}\" stale_removed={removed} points={}",
            dir.display(),
            config.waveform_points
        );
        let scheduler = WaveformScheduler::with_source(
            observer,
            config.waveform_points,
            WaveCache::new(config.wave_cache_capacity),
            source,
        );
        Ok(Self {
            config,
            scheduler,
            routed,
            playlist: Vec::new(),
            loaded_source: None,
            playing: None,
            shut_down: false,
        })
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &WaveformScheduler<O> {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut WaveformScheduler<O> {
        &mut self.scheduler
    }

    pub fn routed_cache(&self) -> &RoutedFileCache {
        &self.routed
    }

    pub fn loaded_source(&self) -> Option<&Path> {
        self.loaded_source.as_deref()
    }

    /// File currently handed to playback: the routed render or the source.
    pub fn playing(&self) -> Option<&Path> {
        self.playing.as_deref()
    }

    /// Resolves what playback should open for `source` and starts its
    /// waveform. The previously playing file stays protected while the new
    /// render is written.
    pub fn load_track(&mut self, source: &Path) -> (Resolved, RequestOutcome) {
        let routing = self.config.routing();
        let resolved = self
            .routed
            .resolve(source, &routing, self.playing.as_deref());
        log::debug!(
            "session_load src=\"{}\" play=\"{}\" routed={} reused={}",
            source.display(),
            resolved.path.display(),
            resolved.routed,
            resolved.reused
        );
        self.loaded_source = Some(source.to_path_buf());
        self.playing = Some(resolved.path.clone());
        let outcome = self.scheduler.request_for_track(source);
        (resolved, outcome)
    }

    /// Replaces the playlist and queues waveforms for everything not loaded.
    pub fn set_playlist<P: AsRef<Path>>(&mut self, paths: &[P]) {
        self.playlist = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
        let loaded = self.loaded_source.clone();
        let rest: Vec<&Path> = self
            .playlist
            .iter()
            .map(PathBuf::as_path)
            .filter(|p| Some(*p) != loaded.as_deref())
            .collect();
        self.scheduler.enqueue_preload(&rest);
    }

    pub fn playlist(&self) -> &[PathBuf] {
        &self.playlist
    }

    pub fn remove_track(&mut self, path: &Path) {
        self.playlist.retain(|p| p.as_path() != path);
        self.scheduler.on_track_removed(path);
        if self.loaded_source.as_deref() == Some(path) {
            self.loaded_source = None;
            self.playing = None;
        }
    }

    /// Stores a new routing setup. Returns true when it differs from the
    /// current one, meaning the loaded track should be loaded again.
    pub fn set_routing(&mut self, routing: RoutingConfig) -> bool {
        if self.config.routing() == routing {
            return false;
        }
        self.config.routing_mode = routing.mode;
        self.config.routing_matrix_enabled = routing.matrix_enabled;
        self.config.routing_matrix = routing.matrix;
        self.loaded_source.is_some()
    }

    pub fn set_waveform_points(&mut self, points: usize) -> bool {
        let changed = self.scheduler.set_resolution(points, &self.playlist);
        self.config.waveform_points = self.scheduler.points();
        changed
    }

    pub fn pump(&mut self) -> usize {
        self.scheduler.pump()
    }

    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        self.scheduler.wait_idle(timeout)
    }

    /// Stops decoding, then deletes this session's renders except the one
    /// still open for playback. Safe to call more than once.
    pub fn shutdown(&mut self) -> usize {
        if self.shut_down {
            return 0;
        }
        self.shut_down = true;
        self.scheduler.shutdown();
        let removed = self.routed.cleanup_session(self.playing.as_deref());
        log::info!("session_shutdown routed_removed={removed}");
        removed
    }
}

impl<O: WaveObserver> Drop for PlayerSession<O> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
