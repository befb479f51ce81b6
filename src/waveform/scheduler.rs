use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::cache::{PartialStore, PartialWaveform, WaveCache};
use super::engine::{
    self, Decimation, JobControl, ProgressSnapshot, WaveformResult, ACTIVE_PROGRESS_INTERVAL,
    PRELOAD_PROGRESS_INTERVAL,
};
use crate::error::WaveError;
use crate::fingerprint;

pub const MIN_WAVEFORM_POINTS: usize = 1_200;
pub const MAX_WAVEFORM_POINTS: usize = 24_000;
pub const DEFAULT_WAVEFORM_POINTS: usize = 4_200;
pub const SHUTDOWN_WAIT: Duration = Duration::from_millis(1_500);
pub const SWITCH_WAIT: Duration = Duration::from_millis(120);

pub fn clamp_points(points: usize) -> usize {
    points.clamp(MIN_WAVEFORM_POINTS, MAX_WAVEFORM_POINTS)
}

/// Where a job's samples come from. The default reads files through
/// symphonia; tests substitute scripted sources.
pub trait WaveSource: Send + Sync + 'static {
    fn decimate(
        &self,
        path: &Path,
        target_bins: usize,
        control: &JobControl,
        on_progress: &mut dyn FnMut(ProgressSnapshot),
    ) -> Result<Decimation, WaveError>;
}

pub struct FileWaveSource;

impl WaveSource for FileWaveSource {
    fn decimate(
        &self,
        path: &Path,
        target_bins: usize,
        control: &JobControl,
        on_progress: &mut dyn FnMut(ProgressSnapshot),
    ) -> Result<Decimation, WaveError> {
        engine::decimate(path, target_bins, control, |snap| on_progress(snap))
    }
}

/// Outward callbacks. All calls happen on the thread that pumps the
/// scheduler.
pub trait WaveObserver {
    fn on_progress(&mut self, request_id: u64, path: &Path, partial: &PartialWaveform);
    fn on_result(&mut self, request_id: u64, path: &Path, result: &WaveformResult);
    fn on_error(&mut self, request_id: u64, path: &Path, message: &str);
}

/// Observer that only logs; handy for headless hosts.
#[derive(Default)]
pub struct LogObserver;

impl WaveObserver for LogObserver {
    fn on_progress(&mut self, request_id: u64, path: &Path, partial: &PartialWaveform) {
        log::debug!(
            "wave_progress id={request_id} path=\"{}\" pct={}",
            path.display(),
            partial.percent()
        );
    }

    fn on_result(&mut self, request_id: u64, path: &Path, result: &WaveformResult) {
        log::info!(
            "wave_result id={request_id} path=\"{}\" bins={} ch={}",
            path.display(),
            result.bins(),
            result.channels()
        );
    }

    fn on_error(&mut self, request_id: u64, path: &Path, message: &str) {
        log::warn!(
            "wave_error id={request_id} path=\"{}\" err={message}",
            path.display()
        );
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    Active,
    Preload,
}

/// Lifecycle of a slot's job. An empty slot is idle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Running,
    Cancelling,
    Finished,
    Failed,
}

/// What `request_for_track` did with the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    Cached,
    AttachedActive,
    AttachedPreload,
    StartedActive,
    StartedPreload,
    Queued,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobInfo {
    pub request_id: u64,
    pub path: PathBuf,
    pub state: JobState,
}

enum JobEvent {
    Progress(ProgressSnapshot),
    Finished(WaveformResult),
    Failed(String),
    Exited,
}

struct JobMsg {
    slot: Slot,
    request_id: u64,
    path: PathBuf,
    event: JobEvent,
}

struct DecodeJob {
    request_id: u64,
    path: PathBuf,
    signature: String,
    control: Arc<JobControl>,
    thread: Option<JoinHandle<()>>,
    state: JobState,
}

impl DecodeJob {
    fn info(&self) -> JobInfo {
        JobInfo {
            request_id: self.request_id,
            path: self.path.clone(),
            state: self.state,
        }
    }

    fn cancel(&mut self) {
        self.control.cancel();
        self.state = JobState::Cancelling;
    }

    /// Signals cancellation and waits up to `wait` for the worker to exit.
    fn stop(self, wait: Duration) {
        self.stop_by(Instant::now() + wait);
    }

    /// Waits until `deadline` for the worker to exit. A worker still
    /// running past it is detached.
    fn stop_by(mut self, deadline: Instant) {
        self.cancel();
        let Some(thread) = self.thread.take() else {
            return;
        };
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                log::warn!(
                    "wave_job_abandoned id={} path=\"{}\"",
                    self.request_id,
                    self.path.display()
                );
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let _ = thread.join();
    }
}

/// Owns the active and preload decode jobs, the preload queue, and the
/// result caches. Everything here is touched only by the owning thread;
/// workers report back over a channel drained by [`pump`](Self::pump).
pub struct WaveformScheduler<O: WaveObserver> {
    observer: O,
    source: Arc<dyn WaveSource>,
    points: usize,
    current: Option<PathBuf>,
    cache: WaveCache,
    partials: PartialStore,
    preload_queue: VecDeque<PathBuf>,
    preload_set: HashSet<PathBuf>,
    active: Option<DecodeJob>,
    preload: Option<DecodeJob>,
    next_request_id: u64,
    tx: Sender<JobMsg>,
    rx: Receiver<JobMsg>,
}

impl<O: WaveObserver> WaveformScheduler<O> {
    pub fn new(observer: O, points: usize) -> Self {
        Self::with_source(observer, points, WaveCache::default(), Arc::new(FileWaveSource))
    }

    pub fn with_source(
        observer: O,
        points: usize,
        cache: WaveCache,
        source: Arc<dyn WaveSource>,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            observer,
            source,
            points: clamp_points(points),
            current: None,
            cache,
            partials: PartialStore::default(),
            preload_queue: VecDeque::new(),
            preload_set: HashSet::new(),
            active: None,
            preload: None,
            next_request_id: 0,
            tx,
            rx,
        }
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn points(&self) -> usize {
        self.points
    }

    pub fn current_track(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    pub fn active_job(&self) -> Option<JobInfo> {
        self.active.as_ref().map(DecodeJob::info)
    }

    pub fn preload_job(&self) -> Option<JobInfo> {
        self.preload.as_ref().map(DecodeJob::info)
    }

    pub fn queued(&self) -> Vec<PathBuf> {
        self.preload_queue.iter().cloned().collect()
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.preload.is_none() && self.preload_queue.is_empty()
    }

    fn signature(&self, path: &Path) -> Option<String> {
        fingerprint::waveform_signature(path, self.points).ok()
    }

    /// Cached final result for `path` at the current resolution.
    pub fn cached(&mut self, path: &Path) -> Option<Arc<WaveformResult>> {
        let sig = self.signature(path).unwrap_or_default();
        self.cache.get(path, &sig)
    }

    pub fn partial(&self, path: &Path) -> Option<&PartialWaveform> {
        let sig = self.signature(path).unwrap_or_default();
        self.partials.get(path, &sig)
    }

    fn mint_request_id(&mut self) -> u64 {
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.next_request_id
    }

    fn spawn_job(&mut self, slot: Slot, path: &Path, signature: String, emit_progress: bool) {
        let request_id = self.mint_request_id();
        let interval = match slot {
            Slot::Active => ACTIVE_PROGRESS_INTERVAL,
            Slot::Preload => PRELOAD_PROGRESS_INTERVAL,
        };
        let control = Arc::new(JobControl::new(emit_progress, interval));
        let worker_control = Arc::clone(&control);
        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();
        let worker_path = path.to_path_buf();
        let points = self.points;
        log::debug!(
            "wave_job_start slot={slot:?} id={request_id} path=\"{}\" points={points} progress={emit_progress}",
            path.display()
        );
        let thread = std::thread::spawn(move || {
            let send = |event: JobEvent| {
                let _ = tx.send(JobMsg {
                    slot,
                    request_id,
                    path: worker_path.clone(),
                    event,
                });
            };
            let outcome = source.decimate(&worker_path, points, &worker_control, &mut |snap| {
                send(JobEvent::Progress(snap))
            });
            match outcome {
                Ok(Decimation::Finished(result)) => send(JobEvent::Finished(result)),
                Ok(Decimation::Cancelled) => {}
                Err(err) => {
                    if !worker_control.is_cancelled() {
                        send(JobEvent::Failed(err.to_string()));
                    }
                }
            }
            send(JobEvent::Exited);
        });
        let job = DecodeJob {
            request_id,
            path: path.to_path_buf(),
            signature,
            control,
            thread: Some(thread),
            state: JobState::Running,
        };
        match slot {
            Slot::Active => self.active = Some(job),
            Slot::Preload => self.preload = Some(job),
        }
    }

    fn remove_from_queue(&mut self, path: &Path) {
        if self.preload_set.remove(path) {
            self.preload_queue.retain(|p| p.as_path() != path);
        }
    }

    fn render_partial(&mut self, slot: Slot) {
        let job = match slot {
            Slot::Active => self.active.as_ref(),
            Slot::Preload => self.preload.as_ref(),
        };
        let Some(job) = job else {
            return;
        };
        if let Some(partial) = self.partials.get(&job.path, &job.signature) {
            self.observer.on_progress(job.request_id, &job.path, partial);
        }
    }

    /// Makes `path` the displayed track and gets its waveform on the way:
    /// from cache, from a job already decoding it, or from a new job.
    pub fn request_for_track(&mut self, path: &Path) -> RequestOutcome {
        self.current = Some(path.to_path_buf());
        let signature = self.signature(path).unwrap_or_default();
        self.remove_from_queue(path);

        if let Some(hit) = self.cache.get(path, &signature) {
            let request_id = self.mint_request_id();
            self.observer.on_result(request_id, path, &hit);
            self.start_next_preload();
            return RequestOutcome::Cached;
        }

        if self.active.as_ref().map(|j| j.path.as_path()) == Some(path) {
            self.render_partial(Slot::Active);
            return RequestOutcome::AttachedActive;
        }

        if let Some(job) = self.preload.as_ref().filter(|j| j.path.as_path() == path) {
            job.control.set_emit_progress(true);
            self.render_partial(Slot::Preload);
            return RequestOutcome::AttachedPreload;
        }

        if self.active.is_none() {
            self.spawn_job(Slot::Active, path, signature, true);
            return RequestOutcome::StartedActive;
        }

        if self.preload.is_none() {
            self.spawn_job(Slot::Preload, path, signature, true);
            return RequestOutcome::StartedPreload;
        }

        if self.preload_set.insert(path.to_path_buf()) {
            self.preload_queue.push_front(path.to_path_buf());
        }
        RequestOutcome::Queued
    }

    /// Appends speculative decodes for `paths`, skipping anything cached,
    /// queued, or already being decoded.
    pub fn enqueue_preload<P: AsRef<Path>>(&mut self, paths: &[P]) {
        for path in paths {
            let path = path.as_ref();
            let busy = |job: &Option<DecodeJob>| job.as_ref().map(|j| j.path.as_path()) == Some(path);
            if busy(&self.active) || busy(&self.preload) || self.preload_set.contains(path) {
                continue;
            }
            let Some(signature) = self.signature(path) else {
                continue;
            };
            if self.cache.contains(path, &signature) {
                continue;
            }
            self.preload_set.insert(path.to_path_buf());
            self.preload_queue.push_back(path.to_path_buf());
        }
        self.start_next_preload();
    }

    fn start_next_preload(&mut self) {
        if self.preload.is_some() {
            return;
        }
        while let Some(path) = self.preload_queue.pop_front() {
            self.preload_set.remove(&path);
            if self.active.as_ref().map(|j| &j.path) == Some(&path) {
                continue;
            }
            let Some(signature) = self.signature(&path) else {
                continue;
            };
            if self.cache.contains(&path, &signature) {
                continue;
            }
            let is_current = self.current.as_ref() == Some(&path);
            self.spawn_job(Slot::Preload, &path, signature, is_current);
            return;
        }
    }

    fn stop_active(&mut self, wait: Duration) {
        if let Some(job) = self.active.take() {
            job.stop(wait);
        }
    }

    fn stop_preload(&mut self, requeue: bool, wait: Duration) {
        let Some(job) = self.preload.take() else {
            return;
        };
        let path = job.path.clone();
        job.stop(wait);
        if requeue && self.preload_set.insert(path.clone()) {
            self.preload_queue.push_front(path);
        }
    }

    /// Drops every trace of `path`: queue entry, partial, and any job
    /// decoding it.
    pub fn on_track_removed(&mut self, path: &Path) {
        self.remove_from_queue(path);
        self.partials.remove(path);
        if self.active.as_ref().map(|j| j.path.as_path()) == Some(path) {
            self.stop_active(SWITCH_WAIT);
        }
        if self.preload.as_ref().map(|j| j.path.as_path()) == Some(path) {
            self.stop_preload(false, SWITCH_WAIT);
        }
        if self.current.as_deref() == Some(path) {
            self.current = None;
        }
        self.start_next_preload();
    }

    /// Changes the bin count. Returns false when `points` (after clamping)
    /// equals the current value. Cached and partial results are discarded,
    /// the displayed track restarts, and `playlist` is queued again.
    pub fn set_resolution<P: AsRef<Path>>(&mut self, points: usize, playlist: &[P]) -> bool {
        let points = clamp_points(points);
        if points == self.points {
            return false;
        }
        self.points = points;
        self.cache.clear();
        self.partials.clear();
        self.stop_active(SWITCH_WAIT);
        self.stop_preload(false, SWITCH_WAIT);
        if let Some(current) = self.current.clone() {
            self.request_for_track(&current);
            let rest: Vec<&Path> = playlist
                .iter()
                .map(|p| p.as_ref())
                .filter(|p| *p != current.as_path())
                .collect();
            self.enqueue_preload(&rest);
        }
        true
    }

    /// Handles every message already waiting. Returns how many were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(msg) = self.rx.try_recv() {
            self.handle(msg);
            handled += 1;
        }
        handled
    }

    /// Waits up to `timeout` for a message, then drains the rest.
    pub fn pump_timeout(&mut self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => {
                self.handle(msg);
                1 + self.pump()
            }
            Err(_) => 0,
        }
    }

    /// Pumps until no job is running and the queue is empty, or `timeout`
    /// passes. Returns whether the scheduler went idle.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_idle() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.pump_timeout(deadline - now);
        }
        true
    }

    fn job_mut(&mut self, slot: Slot, request_id: u64, path: &Path) -> Option<&mut DecodeJob> {
        let job = match slot {
            Slot::Active => self.active.as_mut(),
            Slot::Preload => self.preload.as_mut(),
        };
        job.filter(|j| j.request_id == request_id && j.path.as_path() == path)
    }

    fn set_state(&mut self, slot: Slot, state: JobState) {
        let job = match slot {
            Slot::Active => self.active.as_mut(),
            Slot::Preload => self.preload.as_mut(),
        };
        if let Some(job) = job {
            job.state = state;
        }
    }

    fn handle(&mut self, msg: JobMsg) {
        let JobMsg {
            slot,
            request_id,
            path,
            event,
        } = msg;
        let Some(signature) = self
            .job_mut(slot, request_id, &path)
            .map(|job| job.signature.clone())
        else {
            return;
        };
        let is_current = self.current.as_deref() == Some(path.as_path());
        match event {
            JobEvent::Progress(snap) => {
                let partial = PartialWaveform::from_snapshot(&signature, snap);
                if is_current {
                    self.observer.on_progress(request_id, &path, &partial);
                }
                self.partials.put(&path, partial);
            }
            JobEvent::Finished(result) => {
                self.set_state(slot, JobState::Finished);
                self.partials.remove(&path);
                let result = Arc::new(result);
                self.cache.store(&path, &signature, Arc::clone(&result));
                if is_current {
                    self.observer.on_result(request_id, &path, &result);
                }
            }
            JobEvent::Failed(message) => {
                self.set_state(slot, JobState::Failed);
                self.partials.remove(&path);
                match slot {
                    Slot::Active if is_current => {
                        log::warn!(
                            "wave_active_failed id={request_id} path=\"{}\" err={message}",
                            path.display()
                        );
                        self.observer.on_error(request_id, &path, &message);
                    }
                    _ => {
                        log::debug!(
                            "wave_job_failed slot={slot:?} id={request_id} path=\"{}\" err={message}",
                            path.display()
                        );
                    }
                }
            }
            JobEvent::Exited => self.on_job_exited(slot),
        }
    }

    fn on_job_exited(&mut self, slot: Slot) {
        let finished = match slot {
            Slot::Active => self.active.take(),
            Slot::Preload => self.preload.take(),
        };
        let Some(mut job) = finished else {
            return;
        };
        if let Some(thread) = job.thread.take() {
            let _ = thread.join();
        }
        self.partials.remove(&job.path);
        if slot == Slot::Active {
            let failed = job.state == JobState::Failed;
            let has_final = self.cache.contains(&job.path, &job.signature);
            let still_current = self.current.as_ref() == Some(&job.path);
            if !failed && !has_final && still_current {
                log::debug!(
                    "wave_active_restart id={} path=\"{}\"",
                    job.request_id,
                    job.path.display()
                );
                self.spawn_job(Slot::Active, &job.path, job.signature, true);
                return;
            }
        }
        self.start_next_preload();
    }

    /// Cancels both jobs, then waits for their workers against a single
    /// [`SHUTDOWN_WAIT`] deadline.
    pub fn shutdown(&mut self) {
        self.preload_queue.clear();
        self.preload_set.clear();
        let mut jobs: Vec<DecodeJob> = [self.active.take(), self.preload.take()]
            .into_iter()
            .flatten()
            .collect();
        for job in &mut jobs {
            job.cancel();
        }
        let deadline = Instant::now() + SHUTDOWN_WAIT;
        for job in jobs {
            job.stop_by(deadline);
        }
        while self.rx.try_recv().is_ok() {}
        self.partials.clear();
    }
}

impl<O: WaveObserver> Drop for WaveformScheduler<O> {
    fn drop(&mut self) {
        for job in [self.active.as_ref(), self.preload.as_ref()].into_iter().flatten() {
            job.control.cancel();
        }
    }
}
