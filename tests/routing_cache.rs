mod common;

use std::path::{Path, PathBuf};

use waveroute::error::RouteError;
use waveroute::routing::cache::RoutedFileCache;
use waveroute::routing::matrix::{RoutingConfig, RoutingMatrix, RoutingMode};
use waveroute::routing::render::{route, RouteOutcome};
use waveroute::routing::runtime::RuntimeMatrix;

const PCM24_MAX: f32 = 8_388_607.0;

fn wav_files(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|rd| rd.flatten().map(|e| e.path()).collect())
        .unwrap_or_default();
    out.retain(|p| p.extension().and_then(|e| e.to_str()) == Some("wav"));
    out.sort();
    out
}

/// Per-channel values of the first frame of a routed render.
fn first_frame(path: &Path) -> (hound::WavSpec, Vec<f32>, usize) {
    let (spec, samples) = common::read_wav(path);
    let ch = spec.channels as usize;
    let frame = samples[..ch].iter().map(|&v| v as f32 / PCM24_MAX).collect();
    (spec, frame, samples.len() / ch)
}

struct Setup {
    dir: tempfile::TempDir,
    cache: RoutedFileCache,
}

impl Setup {
    fn new(capacity: usize) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = RoutedFileCache::open(dir.path().join("routed"), capacity).expect("open");
        Self { dir, cache }
    }

    fn src(&self, name: &str, levels: &[f32]) -> PathBuf {
        let chans = common::dc_channels(4_800, levels);
        common::fixture(self.dir.path(), name, 48_000, &chans)
    }
}

#[test]
fn matching_layout_passes_through_without_writing() {
    let mut s = Setup::new(16);
    let src = s.src("stereo.wav", &[0.1, 0.2]);
    let resolved = s.cache.resolve(&src, &RoutingConfig::default(), None);
    assert_eq!(resolved.path, src);
    assert!(!resolved.routed);
    assert_eq!(s.cache.renders(), 0);
    assert!(wav_files(s.cache.dir()).is_empty());
}

#[test]
fn active_preset_renders_even_when_gains_are_identity() {
    let mut s = Setup::new(16);
    let src = s.src("stereo.wav", &[0.1, 0.2]);
    let cfg = RoutingConfig::preset(RoutingMode::Stereo);
    let resolved = s.cache.resolve(&src, &cfg, None);
    assert!(resolved.routed);
    assert_ne!(resolved.path, src);
    assert_eq!(s.cache.renders(), 1);

    let (spec, frame, frames) = first_frame(&resolved.path);
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.bits_per_sample, 24);
    assert_eq!(frames, 4_800);
    assert!((frame[0] - 0.1).abs() < 1e-3);
    assert!((frame[1] - 0.2).abs() < 1e-3);
}

#[test]
fn identity_patchbay_keeps_the_source_channel_count() {
    let mut s = Setup::new(16);
    let src = s.src("stereo.wav", &[0.4, -0.4]);
    let cfg = RoutingConfig::patchbay(RoutingMatrix::identity());
    let resolved = s.cache.resolve(&src, &cfg, None);
    assert!(resolved.routed);
    let (spec, frame, _) = first_frame(&resolved.path);
    assert_eq!(spec.channels, 2);
    assert!((frame[0] - 0.4).abs() < 1e-3);
    assert!((frame[1] + 0.4).abs() < 1e-3);
}

#[test]
fn surround_to_stereo_renders_24_bit_without_clipping() {
    let mut s = Setup::new(16);
    let src = s.src("surround.wav", &[0.3; 6]);
    let cfg = RoutingConfig::preset(RoutingMode::Stereo);
    let resolved = s.cache.resolve(&src, &cfg, None);
    assert!(resolved.routed);
    assert!(!resolved.reused);
    assert!(resolved.path.starts_with(s.cache.dir()));

    let (spec, frame, frames) = first_frame(&resolved.path);
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.bits_per_sample, 24);
    assert_eq!(spec.sample_rate, 48_000);
    assert_eq!(frames, 4_800);
    // Every column is normalized to unity, so equal inputs come out unchanged.
    for v in frame {
        assert!((v - 0.3).abs() < 1e-3, "got {v}");
    }
    let leftovers: Vec<_> = std::fs::read_dir(s.cache.dir())
        .expect("read dir")
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp.wav"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn stereo_onto_surround_preset_keeps_front_pair() {
    let mut s = Setup::new(16);
    let src = s.src("stereo.wav", &[0.5, -0.25]);
    let cfg = RoutingConfig::preset(RoutingMode::Surround51);
    let resolved = s.cache.resolve(&src, &cfg, None);
    let (spec, frame, _) = first_frame(&resolved.path);
    assert_eq!(spec.channels, 6);
    assert!((frame[0] - 0.5).abs() < 1e-3);
    assert!((frame[1] + 0.25).abs() < 1e-3);
    assert!(frame[2..].iter().all(|&v| v == 0.0));
}

#[test]
fn patchbay_swaps_channels_and_leaves_unchecked_rows_silent() {
    let mut s = Setup::new(16);
    let src = s.src("quad.wav", &[0.5, -0.5, 0.9, 0.9]);
    let cfg = RoutingConfig::patchbay(RoutingMatrix::from_bit_rows("01|10"));
    let resolved = s.cache.resolve(&src, &cfg, None);
    let (spec, frame, _) = first_frame(&resolved.path);
    assert_eq!(spec.channels, 2);
    assert!((frame[0] + 0.5).abs() < 1e-3);
    assert!((frame[1] - 0.5).abs() < 1e-3);
}

#[test]
fn second_resolve_reuses_render_without_writing() {
    let mut s = Setup::new(16);
    let src = s.src("surround.wav", &[0.2; 6]);
    let cfg = RoutingConfig::preset(RoutingMode::Stereo);
    let first = s.cache.resolve(&src, &cfg, None);
    let second = s.cache.resolve(&src, &cfg, Some(&first.path));
    assert_eq!(first.path, second.path);
    assert!(second.reused);
    assert_eq!(s.cache.renders(), 1);

    let other = s.cache.resolve(&src, &RoutingConfig::preset(RoutingMode::Surround71), None);
    assert_ne!(other.path, first.path);
    assert_eq!(s.cache.renders(), 2);
}

#[test]
fn vanished_render_is_recomputed() {
    let mut s = Setup::new(16);
    let src = s.src("surround.wav", &[0.2; 6]);
    let cfg = RoutingConfig::preset(RoutingMode::Stereo);
    let first = s.cache.resolve(&src, &cfg, None);
    std::fs::remove_file(&first.path).expect("remove render");

    let again = s.cache.resolve(&src, &cfg, None);
    assert!(again.routed);
    assert!(!again.reused);
    assert!(again.path.is_file());
    assert_eq!(s.cache.renders(), 2);
}

#[test]
fn eviction_skips_the_playing_render() {
    let mut s = Setup::new(1);
    let a = s.src("a.wav", &[0.1; 6]);
    let b = s.src("b.wav", &[0.2; 6]);
    let c = s.src("c.wav", &[0.3; 6]);
    let cfg = RoutingConfig::preset(RoutingMode::Stereo);

    let ra = s.cache.resolve(&a, &cfg, None);
    let rb = s.cache.resolve(&b, &cfg, Some(&ra.path));
    assert!(ra.path.is_file(), "playing render must survive");
    assert!(rb.path.is_file(), "fresh render must survive");

    let rc = s.cache.resolve(&c, &cfg, Some(&rb.path));
    assert!(!ra.path.exists(), "oldest unprotected render is evicted");
    assert!(rb.path.is_file());
    assert!(rc.path.is_file());
    assert_eq!(s.cache.len(), 2);
}

#[test]
fn session_cleanup_keeps_only_the_playing_render() {
    let mut s = Setup::new(16);
    let a = s.src("a.wav", &[0.1; 6]);
    let b = s.src("b.wav", &[0.2; 6]);
    let cfg = RoutingConfig::preset(RoutingMode::Stereo);
    let ra = s.cache.resolve(&a, &cfg, None);
    let rb = s.cache.resolve(&b, &cfg, Some(&ra.path));

    assert_eq!(s.cache.cleanup_session(Some(&rb.path)), 1);
    assert!(!ra.path.exists());
    assert!(rb.path.is_file());
    assert_eq!(s.cache.session_files().count(), 0);
}

#[test]
fn route_rejects_matrix_wider_than_source() {
    let s = Setup::new(16);
    let src = s.src("stereo.wav", &[0.1, 0.2]);
    let dest = s.dir.path().join("out.wav");
    let err = route(&src, &RuntimeMatrix::identity(4), &dest).unwrap_err();
    assert!(matches!(err, RouteError::Shape { rows: 4, channels: 2, .. }));
    assert!(!dest.exists());
}

#[test]
fn route_identity_is_a_no_op() {
    let s = Setup::new(16);
    let src = s.src("stereo.wav", &[0.1, 0.2]);
    let dest = s.dir.path().join("out.wav");
    let outcome = route(&src, &RuntimeMatrix::identity(2), &dest).expect("route");
    assert_eq!(outcome, RouteOutcome::Passthrough);
    assert!(!dest.exists());
}

#[test]
fn route_fold_down_writes_dest_and_no_temp_file() {
    let s = Setup::new(16);
    let src = s.src("surround.wav", &[0.2; 6]);
    let dest = s.dir.path().join("out").join("fold.wav");
    let cfg = RoutingConfig::preset(RoutingMode::Stereo);
    let matrix = waveroute::routing::build_runtime_matrix(6, 2, &cfg);
    let outcome = route(&src, &matrix, &dest).expect("route");
    assert_eq!(outcome, RouteOutcome::Routed(dest.clone()));
    let (spec, _, frames) = first_frame(&dest);
    assert_eq!(spec.channels, 2);
    assert_eq!(frames, 4_800);
    assert!(!waveroute::routing::render::temp_path_for(&dest).exists());
}
