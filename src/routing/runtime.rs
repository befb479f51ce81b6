use super::matrix::{RoutingConfig, RoutingMatrix, RoutingMode};

const GAIN_EPSILON: f32 = 1e-6;

/// Float gains `[source][output]` applied per frame.
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeMatrix {
    sources: usize,
    outputs: usize,
    gains: Vec<f32>,
}

impl RuntimeMatrix {
    pub fn zeros(sources: usize, outputs: usize) -> Self {
        Self {
            sources,
            outputs,
            gains: vec![0.0; sources * outputs],
        }
    }

    pub fn identity(channels: usize) -> Self {
        let mut m = Self::zeros(channels, channels);
        for i in 0..channels {
            m.set(i, i, 1.0);
        }
        m
    }

    pub fn sources(&self) -> usize {
        self.sources
    }

    pub fn outputs(&self) -> usize {
        self.outputs
    }

    pub fn get(&self, source: usize, output: usize) -> f32 {
        self.gains[source * self.outputs + output]
    }

    pub fn set(&mut self, source: usize, output: usize, gain: f32) {
        self.gains[source * self.outputs + output] = gain;
    }

    pub fn row(&self, source: usize) -> &[f32] {
        &self.gains[source * self.outputs..(source + 1) * self.outputs]
    }

    pub fn row_sum(&self, source: usize) -> f32 {
        self.row(source).iter().sum()
    }

    pub fn column_sum(&self, output: usize) -> f32 {
        (0..self.sources).map(|s| self.get(s, output)).sum()
    }

    pub fn is_identity(&self) -> bool {
        self.sources == self.outputs && *self == Self::identity(self.sources)
    }

    /// Dimensions followed by little-endian gains; what the render cache
    /// hashes so equal effective matrices share one render.
    pub fn digest_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.gains.len() * 4);
        out.extend_from_slice(&(self.sources as u64).to_le_bytes());
        out.extend_from_slice(&(self.outputs as u64).to_le_bytes());
        for g in &self.gains {
            out.extend_from_slice(&g.to_le_bytes());
        }
        out
    }

    /// Mixes one interleaved input frame into `out` (length `outputs`),
    /// clipping to [-1, 1]. Input channels beyond `sources` are ignored.
    pub fn apply_frame(&self, input: &[f32], out: &mut [f32]) {
        out.fill(0.0);
        for (s, &x) in input.iter().take(self.sources).enumerate() {
            if x == 0.0 {
                continue;
            }
            for (o, acc) in out.iter_mut().enumerate() {
                *acc += x * self.get(s, o);
            }
        }
        for v in out.iter_mut() {
            *v = if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 };
        }
    }

    /// Row pass then column pass: any row or column summing above 1.0 is
    /// scaled back to 1.0. This only avoids clipping; it is not a
    /// loudness-preserving downmix.
    fn normalize(&mut self) {
        for s in 0..self.sources {
            let sum = self.row_sum(s);
            if sum > 1.0 + GAIN_EPSILON {
                for o in 0..self.outputs {
                    let g = self.get(s, o);
                    self.set(s, o, g / sum);
                }
            }
        }
        for o in 0..self.outputs {
            let sum = self.column_sum(o);
            if sum > 1.0 + GAIN_EPSILON {
                for s in 0..self.sources {
                    let g = self.get(s, o);
                    self.set(s, o, g / sum);
                }
            }
        }
    }
}

/// Gains for routing `source_channels` onto `output_channels`.
///
/// With the patch matrix enabled the grid is sliced as-is: unchecked rows
/// stay silent and nothing is normalized. Otherwise the mode's preset is
/// used, every source row left unmapped falls back to output
/// `min(i, outputs-1)`, and rows then columns are normalized.
pub fn build_runtime_matrix(
    source_channels: usize,
    output_channels: usize,
    cfg: &RoutingConfig,
) -> RuntimeMatrix {
    let sources = source_channels.max(1);
    let outputs = output_channels.max(1);
    let mut m = RuntimeMatrix::zeros(sources, outputs);

    if cfg.matrix_enabled {
        for s in 0..sources {
            for o in 0..outputs {
                if cfg.matrix.get(s, o) {
                    m.set(s, o, 1.0);
                }
            }
        }
        return m;
    }

    let grid = match cfg.mode {
        RoutingMode::Auto => RoutingMatrix::identity(),
        _ => RoutingMatrix::preset(outputs),
    };
    for s in 0..sources {
        for o in 0..outputs {
            if grid.get(s, o) {
                m.set(s, o, 1.0);
            }
        }
        if m.row_sum(s) == 0.0 {
            m.set(s, s.min(outputs - 1), 1.0);
        }
    }
    m.normalize();
    m
}

/// Whether routing `source_channels` through `matrix` changes anything.
pub fn requires_processing(source_channels: usize, matrix: &RuntimeMatrix) -> bool {
    !(matrix.is_identity() && matrix.sources() == source_channels)
}
