use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::routing::cache::{default_routed_dir, ROUTED_CACHE_CAPACITY};
use crate::routing::matrix::{RoutingConfig, RoutingMatrix, RoutingMode};
use crate::waveform::cache::WAVE_CACHE_CAPACITY;
use crate::waveform::scheduler::{clamp_points, DEFAULT_WAVEFORM_POINTS};

const ENV_ROUTED_DIR: &str = "WAVEROUTE_ROUTED_DIR";
const ENV_WAVEFORM_POINTS: &str = "WAVEROUTE_WAVEFORM_POINTS";

/// Persisted player settings that the cores read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub waveform_points: usize,
    pub wave_cache_capacity: usize,
    pub routing_mode: RoutingMode,
    pub routing_matrix_enabled: bool,
    pub routing_matrix: RoutingMatrix,
    pub routed_dir: Option<PathBuf>,
    pub routed_cache_capacity: usize,
    pub routed_max_age_hours: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            waveform_points: DEFAULT_WAVEFORM_POINTS,
            wave_cache_capacity: WAVE_CACHE_CAPACITY,
            routing_mode: RoutingMode::Auto,
            routing_matrix_enabled: false,
            routing_matrix: RoutingMatrix::identity(),
            routed_dir: None,
            routed_cache_capacity: ROUTED_CACHE_CAPACITY,
            routed_max_age_hours: 18,
        }
    }
}

impl PlayerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: PlayerConfig = toml::from_str(text).context("parse player config")?;
        Ok(cfg.normalized())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serialize player config")
    }

    /// Reads `path` if it exists, otherwise defaults; env overrides apply
    /// either way.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) if p.is_file() => {
                let text = std::fs::read_to_string(p)
                    .with_context(|| format!("read config: {}", p.display()))?;
                Self::from_toml_str(&text)?
            }
            _ => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg.normalized())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create config dir: {}", parent.display()))?;
        }
        std::fs::write(path, self.to_toml_string()?)
            .with_context(|| format!("write config: {}", path.display()))
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(ENV_ROUTED_DIR) {
            let dir = dir.trim();
            if !dir.is_empty() {
                self.routed_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(raw) = std::env::var(ENV_WAVEFORM_POINTS) {
            if let Ok(n) = raw.trim().parse::<usize>() {
                self.waveform_points = n;
            }
        }
    }

    fn normalized(mut self) -> Self {
        self.waveform_points = clamp_points(self.waveform_points);
        self.wave_cache_capacity = self.wave_cache_capacity.max(1);
        self.routed_cache_capacity = self.routed_cache_capacity.max(1);
        self
    }

    pub fn routing(&self) -> RoutingConfig {
        RoutingConfig {
            mode: self.routing_mode,
            matrix_enabled: self.routing_matrix_enabled,
            matrix: self.routing_matrix.clone(),
        }
    }

    pub fn routed_dir(&self) -> PathBuf {
        self.routed_dir.clone().unwrap_or_else(default_routed_dir)
    }

    pub fn routed_max_age(&self) -> Duration {
        Duration::from_secs(self.routed_max_age_hours.saturating_mul(3600))
    }
}
