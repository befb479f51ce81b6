//! Helpers that turn decimated bins into plot-ready step data.

/// Bin edges for a step plot: midpoints between neighbouring axis samples,
/// with the outer edges extrapolated by half the outer spacing. A single
/// sample gets a window of `max(duration, min_window, 1.0)` centred on it.
pub fn compute_edges(axis: &[f32], duration: f32, min_window: f32) -> Vec<f32> {
    match axis.len() {
        0 => Vec::new(),
        1 => {
            let width = duration.max(min_window).max(1.0);
            let x = axis[0];
            vec![(x - width / 2.0).max(0.0), x + width / 2.0]
        }
        n => {
            let mut edges = Vec::with_capacity(n + 1);
            let first_dx = axis[1] - axis[0];
            let last_dx = axis[n - 1] - axis[n - 2];
            edges.push((axis[0] - first_dx / 2.0).max(0.0));
            edges.extend(axis.windows(2).map(|w| (w[0] + w[1]) / 2.0));
            edges.push(axis[n - 1] + last_dx / 2.0);
            edges
        }
    }
}

/// Per-bin maximum across channels, for the single-lane view.
pub fn combine_channels(amplitude: &[Vec<f32>]) -> Vec<f32> {
    amplitude
        .iter()
        .map(|row| row.iter().copied().fold(0.0f32, f32::max))
        .collect()
}

fn sanitize_for_plot(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else if v == f32::INFINITY {
        1.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Truncates axis and amplitude rows to a common length and clamps every
/// value into `[0, 1]` (NaN to 0, +inf to 1).
pub fn align_channels(axis: &[f32], amplitude: &[Vec<f32>]) -> (Vec<f32>, Vec<Vec<f32>>) {
    let n = axis.len().min(amplitude.len());
    let rows = amplitude[..n]
        .iter()
        .map(|row| row.iter().map(|&v| sanitize_for_plot(v)).collect())
        .collect();
    (axis[..n].to_vec(), rows)
}

/// `MM:SS`, or `H:MM:SS` past the hour.
pub fn format_axis_time(seconds: f32) -> String {
    let total = if seconds.is_finite() {
        seconds.round().max(0.0) as u64
    } else {
        0
    };
    let s = total % 60;
    let m = (total / 60) % 60;
    let h = total / 3600;
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}
