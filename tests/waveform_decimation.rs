mod common;

use std::time::Duration;

use waveroute::waveform::engine::{decimate, Decimation, JobControl, WaveformResult};

fn finished(outcome: Decimation) -> WaveformResult {
    match outcome {
        Decimation::Finished(result) => result,
        Decimation::Cancelled => panic!("decimation was cancelled"),
    }
}

fn quiet_control() -> JobControl {
    JobControl::new(false, Duration::from_millis(120))
}

#[test]
fn silent_mono_second_gives_exact_bins_of_zero() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = common::fixture(dir.path(), "silence.wav", 48_000, &[vec![0.0; 48_000]]);
    let result = finished(decimate(&path, 100, &quiet_control(), |_| {}).expect("decimate"));
    assert_eq!(result.bins(), 100);
    assert_eq!(result.channels(), 1);
    assert!(result.amplitude.iter().all(|row| row == &vec![0.0]));
    assert_eq!(result.time_axis[0], 0.0);
    assert!((result.time_axis[99] - 1.0).abs() < 1e-6);
    assert!(result.time_axis.windows(2).all(|w| w[1] > w[0]));
}

#[test]
fn empty_file_gives_single_silent_bin() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = common::fixture(dir.path(), "empty.wav", 44_100, &[Vec::new()]);
    let result = finished(decimate(&path, 4_200, &quiet_control(), |_| {}).expect("decimate"));
    assert_eq!(result.time_axis, vec![0.0]);
    assert_eq!(result.amplitude, vec![vec![0.0]]);
}

#[test]
fn unreadable_file_degrades_to_single_bin() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("garbage.wav");
    std::fs::write(&path, b"definitely not a riff header").expect("write");
    let result = finished(decimate(&path, 1_000, &quiet_control(), |_| {}).expect("decimate"));
    assert_eq!(result.bins(), 1);
}

#[test]
fn bins_are_bounded_values_in_range_and_runs_are_deterministic() {
    let dir = tempfile::tempdir().expect("tempdir");
    let left = common::sine(44_100, 0.5, 440.0, 0.8);
    let right = common::sine(44_100, 0.5, 97.0, 0.3);
    let path = common::fixture(dir.path(), "tone.wav", 44_100, &[left, right]);

    let first = finished(decimate(&path, 1_000, &quiet_control(), |_| {}).expect("decimate"));
    // 22050 frames over 1000 bins: bucket 23, 959 bins.
    assert_eq!(first.bins(), 959);
    assert!(first.bins() <= 1_000);
    assert_eq!(first.channels(), 2);
    for row in &first.amplitude {
        for &v in row {
            assert!((0.0..=1.0).contains(&v), "peak out of range: {v}");
        }
    }
    assert!(first.time_axis.windows(2).all(|w| w[1] > w[0]));

    let peak_l = first.amplitude.iter().map(|r| r[0]).fold(0.0f32, f32::max);
    let peak_r = first.amplitude.iter().map(|r| r[1]).fold(0.0f32, f32::max);
    assert!((peak_l - 0.8).abs() < 0.01, "left peak {peak_l}");
    assert!((peak_r - 0.3).abs() < 0.01, "right peak {peak_r}");

    let second = finished(decimate(&path, 1_000, &quiet_control(), |_| {}).expect("decimate"));
    assert_eq!(first, second);
}

#[test]
fn impulse_lands_in_its_bucket() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut samples = vec![0.0f32; 10_000];
    samples[5_050] = -0.5;
    let path = common::fixture(dir.path(), "impulse.wav", 10_000, &[samples]);
    let result = finished(decimate(&path, 100, &quiet_control(), |_| {}).expect("decimate"));
    assert_eq!(result.bins(), 100);
    for (bin, row) in result.amplitude.iter().enumerate() {
        if bin == 50 {
            assert!((row[0] - 0.5).abs() < 1e-3);
        } else {
            assert_eq!(row[0], 0.0, "bin {bin} should be silent");
        }
    }
}

#[test]
fn progress_snapshots_grow_and_stay_within_bins() {
    let dir = tempfile::tempdir().expect("tempdir");
    let samples = common::sine(48_000, 12.0, 220.0, 0.5);
    let path = common::fixture(dir.path(), "long.wav", 48_000, &[samples]);
    let control = JobControl::new(true, Duration::ZERO);
    let mut snapshots = Vec::new();
    let result = finished(
        decimate(&path, 1_200, &control, |snap| snapshots.push(snap)).expect("decimate"),
    );
    assert!(!snapshots.is_empty());
    let mut last = 0;
    for snap in &snapshots {
        assert_eq!(snap.total_bins, result.bins());
        assert!(snap.filled_bins <= snap.total_bins);
        assert!(snap.filled_bins >= last);
        assert_eq!(snap.amplitude.len(), snap.total_bins);
        last = snap.filled_bins;
    }
}

#[test]
fn no_progress_when_disabled() {
    let dir = tempfile::tempdir().expect("tempdir");
    let samples = common::sine(48_000, 2.0, 220.0, 0.5);
    let path = common::fixture(dir.path(), "quiet.wav", 48_000, &[samples]);
    let mut calls = 0;
    finished(decimate(&path, 1_200, &quiet_control(), |_| calls += 1).expect("decimate"));
    assert_eq!(calls, 0);
}

#[test]
fn cancelled_control_never_yields_a_result() {
    let dir = tempfile::tempdir().expect("tempdir");
    let samples = common::sine(48_000, 1.0, 220.0, 0.5);
    let path = common::fixture(dir.path(), "cancel.wav", 48_000, &[samples]);
    let control = quiet_control();
    control.cancel();
    let outcome = decimate(&path, 1_200, &control, |_| {}).expect("decimate");
    assert_eq!(outcome, Decimation::Cancelled);
}

#[test]
fn cancel_from_progress_callback_stops_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let samples = common::sine(48_000, 12.0, 220.0, 0.5);
    let path = common::fixture(dir.path(), "cancel_mid.wav", 48_000, &[samples]);
    let control = JobControl::new(true, Duration::ZERO);
    let outcome = decimate(&path, 1_200, &control, |_| control.cancel()).expect("decimate");
    assert_eq!(outcome, Decimation::Cancelled);
}
