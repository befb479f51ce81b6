use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Channels addressable by the routing grid (up to 7.1.4).
pub const MATRIX_SIZE: usize = 12;

const LFE_INDEX: usize = 3;
const STEREO_LEFT_SOURCES: [usize; 6] = [0, 2, 4, 6, 8, 10];
const STEREO_RIGHT_SOURCES: [usize; 6] = [1, 2, 5, 7, 9, 11];

/// Named output layouts. `Auto` keeps the source layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingMode {
    #[default]
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "stereo")]
    Stereo,
    #[serde(rename = "surround_5_1")]
    Surround51,
    #[serde(rename = "surround_7_1")]
    Surround71,
    #[serde(rename = "immersive_7_1_4")]
    Immersive714,
}

impl RoutingMode {
    pub const ALL: [RoutingMode; 5] = [
        RoutingMode::Auto,
        RoutingMode::Stereo,
        RoutingMode::Surround51,
        RoutingMode::Surround71,
        RoutingMode::Immersive714,
    ];

    /// Output channel count, 0 for `Auto`.
    pub fn target_channels(self) -> usize {
        match self {
            RoutingMode::Auto => 0,
            RoutingMode::Stereo => 2,
            RoutingMode::Surround51 => 6,
            RoutingMode::Surround71 => 8,
            RoutingMode::Immersive714 => 12,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RoutingMode::Auto => "auto",
            RoutingMode::Stereo => "stereo",
            RoutingMode::Surround51 => "surround_5_1",
            RoutingMode::Surround71 => "surround_7_1",
            RoutingMode::Immersive714 => "immersive_7_1_4",
        }
    }
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        RoutingMode::ALL
            .into_iter()
            .find(|m| m.as_str() == key)
            .ok_or_else(|| format!("unknown routing mode: {s}"))
    }
}

pub fn channel_layout_label(channels: usize) -> String {
    match channels.max(1) {
        1 => "Mono (1.0)".to_string(),
        2 => "Stereo (2.0)".to_string(),
        6 => "Surround (5.1)".to_string(),
        8 => "Surround (7.1)".to_string(),
        12 => "Immersive (7.1.4)".to_string(),
        n => format!("{n} ch"),
    }
}

/// Square on/off patch grid, `[source][output]`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct RoutingMatrix {
    cells: [[bool; MATRIX_SIZE]; MATRIX_SIZE],
}

impl Default for RoutingMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl RoutingMatrix {
    pub fn empty() -> Self {
        Self {
            cells: [[false; MATRIX_SIZE]; MATRIX_SIZE],
        }
    }

    pub fn identity() -> Self {
        let mut m = Self::empty();
        for i in 0..MATRIX_SIZE {
            m.cells[i][i] = true;
        }
        m
    }

    /// Grid for a target channel count: stereo folds down (LFE into both
    /// sides), any other count clamps source `i` onto output `min(i, n-1)`.
    /// A target of 0 is the identity.
    pub fn preset(target_channels: usize) -> Self {
        if target_channels == 0 {
            return Self::identity();
        }
        let target = target_channels.min(MATRIX_SIZE);
        let mut m = Self::empty();
        if target == 2 {
            for src in STEREO_LEFT_SOURCES {
                m.cells[src][0] = true;
            }
            for src in STEREO_RIGHT_SOURCES {
                m.cells[src][1] = true;
            }
            m.cells[LFE_INDEX][0] = true;
            m.cells[LFE_INDEX][1] = true;
            return m;
        }
        for src in 0..MATRIX_SIZE {
            m.cells[src][src.min(target - 1)] = true;
        }
        m
    }

    pub fn get(&self, source: usize, output: usize) -> bool {
        self.cells
            .get(source)
            .and_then(|row| row.get(output))
            .copied()
            .unwrap_or(false)
    }

    /// Out-of-range cells are ignored.
    pub fn set(&mut self, source: usize, output: usize, on: bool) {
        if let Some(cell) = self
            .cells
            .get_mut(source)
            .and_then(|row| row.get_mut(output))
        {
            *cell = on;
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// Highest checked output column + 1; 0 when nothing is checked.
    pub fn target_channels(&self) -> usize {
        self.target_channels_for(MATRIX_SIZE)
    }

    /// Like [`target_channels`](Self::target_channels), but only rows a
    /// source with `source_channels` channels actually feeds are counted.
    pub fn target_channels_for(&self, source_channels: usize) -> usize {
        let mut highest = 0;
        for row in self.cells.iter().take(source_channels) {
            for (col, &on) in row.iter().enumerate() {
                if on {
                    highest = highest.max(col + 1);
                }
            }
        }
        highest
    }

    /// `"1000...|0100...|..."`, one bit row per source.
    pub fn to_bit_rows(&self) -> String {
        self.cells
            .iter()
            .map(|row| row.iter().map(|&on| if on { '1' } else { '0' }).collect::<String>())
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Lenient inverse of [`to_bit_rows`](Self::to_bit_rows): missing rows and
    /// columns read as off, anything but `'1'` reads as off, and an empty
    /// string gives the identity.
    pub fn from_bit_rows(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::identity();
        }
        let mut m = Self::empty();
        let rows = raw.split('|').filter(|seg| !seg.is_empty());
        for (r, text) in rows.take(MATRIX_SIZE).enumerate() {
            for (c, ch) in text.chars().take(MATRIX_SIZE).enumerate() {
                m.cells[r][c] = ch == '1';
            }
        }
        m
    }
}

impl fmt::Debug for RoutingMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoutingMatrix({})", self.to_bit_rows())
    }
}

impl From<String> for RoutingMatrix {
    fn from(raw: String) -> Self {
        Self::from_bit_rows(&raw)
    }
}

impl From<RoutingMatrix> for String {
    fn from(m: RoutingMatrix) -> Self {
        m.to_bit_rows()
    }
}

/// Everything the routing engine needs from player settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub mode: RoutingMode,
    pub matrix_enabled: bool,
    pub matrix: RoutingMatrix,
}

impl RoutingConfig {
    pub fn preset(mode: RoutingMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn patchbay(matrix: RoutingMatrix) -> Self {
        Self {
            mode: RoutingMode::Auto,
            matrix_enabled: true,
            matrix,
        }
    }

    /// True when the user asked for something other than the source layout.
    pub fn is_override(&self) -> bool {
        self.matrix_enabled || self.mode != RoutingMode::Auto
    }

    /// Requested output count for a source; 0 means "follow the source".
    pub fn target_channels(&self, source_channels: usize) -> usize {
        if self.matrix_enabled {
            self.matrix.target_channels_for(source_channels)
        } else {
            self.mode.target_channels()
        }
    }

    pub fn effective_output_channels(&self, source_channels: usize) -> usize {
        match self.target_channels(source_channels) {
            0 => source_channels.max(1),
            n => n,
        }
    }

    /// Stable text form of everything that shapes a render.
    pub fn token(&self, source_channels: usize, output_channels: usize) -> String {
        format!(
            "mode={};matrix_enabled={};matrix={};src={source_channels};out={output_channels}",
            self.mode,
            u8::from(self.matrix_enabled),
            self.matrix.to_bit_rows()
        )
    }
}
