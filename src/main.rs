use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use waveroute::audio_io;
use waveroute::routing::matrix::{channel_layout_label, RoutingConfig, RoutingMatrix, RoutingMode};
use waveroute::routing::runtime::build_runtime_matrix;
use waveroute::waveform::cache::PartialWaveform;
use waveroute::waveform::render::{align_channels, combine_channels, compute_edges, format_axis_time};
use waveroute::waveform::scheduler::{clamp_points, LogObserver, WaveObserver};
use waveroute::waveform::WaveformResult;
use waveroute::{PlayerConfig, PlayerSession};

#[derive(Parser)]
#[command(name = "waveroute", version, about = "Waveform peaks and channel routing for audio files")]
struct Cli {
    /// Player config (TOML). Missing file means defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decimate files into waveform bins; the first file is the displayed track
    Waveform {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Bin count (clamped to 1200..24000)
        #[arg(short, long)]
        points: Option<usize>,
        /// Print full results as JSON
        #[arg(long)]
        json: bool,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,
    },
    /// Resolve the file playback would open under a routing setup
    Route {
        path: PathBuf,
        /// auto, stereo, surround_5_1, surround_7_1, immersive_7_1_4
        #[arg(short, long)]
        mode: Option<RoutingMode>,
        /// Patchbay as bit rows, e.g. "01|10"; enables matrix mode
        #[arg(long)]
        matrix: Option<String>,
        /// Directory for routed renders
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Show the preset routing grid for a mode
    Matrix {
        #[arg(short, long, default_value = "stereo")]
        mode: RoutingMode,
        /// Also print the effective gains for this many source channels
        #[arg(short, long)]
        sources: Option<usize>,
    },
}

/// Collects results for the displayed track and prints progress.
#[derive(Default)]
struct CliObserver {
    quiet: bool,
    last_pct: Option<u8>,
    result: Option<WaveformResult>,
    error: Option<String>,
}

impl WaveObserver for CliObserver {
    fn on_progress(&mut self, _request_id: u64, path: &Path, partial: &PartialWaveform) {
        let (filled, _) = partial.visible();
        if filled.is_empty() {
            return;
        }
        let pct = partial.percent();
        if self.quiet || self.last_pct == Some(pct) {
            return;
        }
        self.last_pct = Some(pct);
        eprintln!("{}: {pct}%", path.display());
    }

    fn on_result(&mut self, _request_id: u64, _path: &Path, result: &WaveformResult) {
        self.result = Some(result.clone());
    }

    fn on_error(&mut self, _request_id: u64, path: &Path, message: &str) {
        log::error!("waveform failed path=\"{}\" err={message}", path.display());
        self.error = Some(message.to_string());
    }
}

/// Plot-ready view of one result: step edges plus per-channel and combined
/// peaks.
#[derive(Serialize)]
struct WaveformReport<'a> {
    path: &'a Path,
    bins: usize,
    channels: usize,
    duration_secs: f32,
    edges: Vec<f32>,
    peaks: Vec<Vec<f32>>,
    combined: Vec<f32>,
}

impl<'a> WaveformReport<'a> {
    fn new(path: &'a Path, result: &WaveformResult) -> Self {
        let (axis, peaks) = align_channels(&result.time_axis, &result.amplitude);
        let duration = result.duration_secs();
        Self {
            path,
            bins: axis.len(),
            channels: result.channels(),
            duration_secs: duration,
            edges: compute_edges(&axis, duration, 0.0),
            combined: combine_channels(&peaks),
            peaks,
        }
    }
}

fn run_waveform(
    config: PlayerConfig,
    paths: &[PathBuf],
    json: bool,
    timeout: Duration,
) -> Result<()> {
    let Some(first) = paths.first() else {
        bail!("no input files");
    };
    for path in paths.iter().filter(|p| !audio_io::is_supported_audio_path(p)) {
        log::warn!("unrecognized extension path=\"{}\"; probing anyway", path.display());
    }
    let observer = CliObserver {
        quiet: json,
        ..CliObserver::default()
    };
    let mut session = PlayerSession::open(config, observer)?;
    session.scheduler_mut().request_for_track(first);
    session.set_playlist(paths);
    if !session.wait_idle(timeout) {
        session.shutdown();
        bail!("timed out after {}s", timeout.as_secs());
    }
    if let Some(err) = session.scheduler().observer().error.clone() {
        bail!("{}: {err}", first.display());
    }

    let mut results = Vec::with_capacity(paths.len());
    for path in paths {
        let result = match session.scheduler_mut().cached(path) {
            Some(hit) => (*hit).clone(),
            None if path == first => match session.scheduler().observer().result.clone() {
                Some(r) => r,
                None => bail!("{}: no waveform produced", path.display()),
            },
            None => {
                log::warn!("waveform missing path=\"{}\"", path.display());
                continue;
            }
        };
        results.push((path, result));
    }
    session.shutdown();

    if json {
        let reports: Vec<WaveformReport<'_>> = results
            .iter()
            .map(|(path, r)| WaveformReport::new(path.as_path(), r))
            .collect();
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for (path, r) in &results {
            let peak = combine_channels(&r.amplitude)
                .into_iter()
                .fold(0.0f32, f32::max);
            println!(
                "{}\t{} bins\t{} ch\t{}\tpeak {:.3}",
                path.display(),
                r.bins(),
                r.channels(),
                format_axis_time(r.duration_secs()),
                peak
            );
        }
    }
    Ok(())
}

fn run_route(
    mut config: PlayerConfig,
    path: &Path,
    mode: Option<RoutingMode>,
    matrix: Option<String>,
    dir: Option<PathBuf>,
) -> Result<()> {
    if let Some(mode) = mode {
        config.routing_mode = mode;
    }
    if let Some(rows) = matrix {
        config.routing_matrix = RoutingMatrix::from_bit_rows(&rows);
        config.routing_matrix_enabled = true;
    }
    if let Some(dir) = dir {
        config.routed_dir = Some(dir);
    }
    let info = audio_io::probe_stream_info(path)
        .with_context(|| format!("probe: {}", path.display()))?;
    let routing = config.routing();
    let out = routing.effective_output_channels(info.channels as usize);
    println!(
        "source\t{} ({}) {} Hz {}",
        path.display(),
        channel_layout_label(info.channels as usize),
        info.sample_rate,
        format_axis_time(info.duration_secs() as f32)
    );
    println!("routing\t{} -> {}", routing.token(info.channels as usize, out), channel_layout_label(out));

    let mut session = PlayerSession::open(config, LogObserver)?;
    let (resolved, _) = session.load_track(path);
    session.shutdown();
    let kind = match (resolved.routed, resolved.reused) {
        (false, _) => "passthrough",
        (true, false) => "rendered",
        (true, true) => "cached",
    };
    println!("play\t{}\t{kind}", resolved.path.display());
    Ok(())
}

fn run_matrix(mode: RoutingMode, sources: Option<usize>) {
    let target = mode.target_channels();
    let grid = RoutingMatrix::preset(target);
    println!("mode\t{mode} ({})", channel_layout_label(grid.target_channels()));
    for row in grid.to_bit_rows().split('|') {
        println!("{row}");
    }
    if let Some(sources) = sources {
        let cfg = RoutingConfig::preset(mode);
        let out = cfg.effective_output_channels(sources);
        let runtime = build_runtime_matrix(sources, out, &cfg);
        println!("gains\t{sources} -> {out}");
        for i in 0..runtime.sources() {
            let row: Vec<String> = runtime.row(i).iter().map(|g| format!("{g:.3}")).collect();
            println!("{}", row.join(" "));
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_millis()
        .init();
    let cli = Cli::parse();
    let config = PlayerConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Waveform {
            paths,
            points,
            json,
            timeout_secs,
        } => {
            let mut config = config;
            if let Some(points) = points {
                config.waveform_points = clamp_points(points);
            }
            run_waveform(config, &paths, json, Duration::from_secs(timeout_secs))
        }
        Commands::Route {
            path,
            mode,
            matrix,
            dir,
        } => run_route(config, &path, mode, matrix, dir),
        Commands::Matrix { mode, sources } => {
            run_matrix(mode, sources);
            Ok(())
        }
    }
}
