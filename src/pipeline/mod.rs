//! Live detection sessions
//!
//! The camera thread pushes frames through [`SessionHandle::push_frame`],
//! which never blocks: a frame is either handed to the session worker or
//! dropped on the spot. Frame skipping, interval pacing and the
//! single-in-flight gate all run on the caller's thread and only touch
//! atomics; everything from pixel conversion to NMS runs on the worker.

mod settings;
mod stages;
mod stats;
mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use flume::TrySendError;
use tracing::{debug, error, info, instrument, trace};

use crate::capture::RawFrame;
use crate::convert::PixelFormatConverter;
use crate::engine::EngineHandle;
use crate::error::{Result, SessionError};
use crate::postprocess::Detection;
use crate::ConverterConfig;

pub use settings::{PipelineSettings, ResolutionPreset};
pub use stages::StageTimings;
pub use stats::SessionStats;

pub(crate) use stages::run_detection;
use stats::SessionCounters;
use worker::Worker;

/// Lifecycle of a live session. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Streaming = 1,
    Paused = 2,
    Stopped = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Idle,
            1 => SessionState::Streaming,
            2 => SessionState::Paused,
            _ => SessionState::Stopped,
        }
    }
}

/// What happened to a pushed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Handed to the worker
    Dispatched,
    /// Not an Nth frame
    Skipped,
    /// Too soon after the previous dispatch
    Throttled,
    /// An inference is already in flight
    Busy,
    /// Session is not streaming
    Inactive,
}

/// Detections for one processed frame.
#[derive(Debug, Clone)]
pub struct DetectionBatch {
    pub frame_sequence: u64,
    pub detections: Vec<Detection>,
    pub timings: StageTimings,
    pub captured_at: Instant,
    /// The frame failed in some stage; `detections` is empty
    pub failed: bool,
}

/// Receives result batches on the session worker thread.
///
/// Delivery is serialized with `pause`/`stop`, so a sink must not call back
/// into its own session.
pub trait DetectionSink: Send + 'static {
    fn deliver(&mut self, batch: DetectionBatch);
}

impl<F> DetectionSink for F
where
    F: FnMut(DetectionBatch) + Send + 'static,
{
    fn deliver(&mut self, batch: DetectionBatch) {
        self(batch)
    }
}

/// Sink forwarding batches into a flume channel. A full channel drops the
/// batch rather than stalling the worker.
pub fn channel_sink(tx: flume::Sender<DetectionBatch>) -> impl DetectionSink {
    move |batch: DetectionBatch| {
        if let Err(TrySendError::Full(batch)) = tx.try_send(batch) {
            trace!(sequence = batch.frame_sequence, "detection receiver full, batch dropped");
        }
    }
}

/// Worker-side knobs fixed at session creation.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub converter: ConverterConfig,
    /// Pin the worker thread to this core id
    pub worker_core: Option<usize>,
}

pub(crate) struct Job {
    pub frame: RawFrame,
    pub generation: u64,
    pub settings: Arc<PipelineSettings>,
}

const NEVER: u64 = u64::MAX;

/// State shared between the handle and the worker thread.
pub(crate) struct Shared {
    state: AtomicU8,
    /// Bumped on pause and stop; results from older generations are dropped
    generation: AtomicU64,
    in_flight: AtomicBool,
    /// Frames pushed since the last start/resume, for frame skipping
    pushed: AtomicU64,
    /// Micros since `epoch` of the last dispatch
    last_dispatch_us: AtomicU64,
    /// Micros since `epoch` at which the worker last finished a frame
    last_completed_us: AtomicU64,
    /// Smoothed per-frame processing time in micros
    latency_us: AtomicU64,
    epoch: Instant,
    settings: ArcSwap<PipelineSettings>,
    counters: SessionCounters,
    delivery: Mutex<()>,
}

impl Shared {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether a dispatch at `now` comes too early. `min_interval` counts from
    /// the last dispatch; the adaptive term counts from the last completion,
    /// so the device idles for one smoothed processing time between frames.
    fn too_soon(&self, now: Duration, settings: &PipelineSettings) -> bool {
        let since = |mark: &AtomicU64| match mark.load(Ordering::Acquire) {
            NEVER => None,
            us => Some(now.saturating_sub(Duration::from_micros(us))),
        };
        if since(&self.last_dispatch_us).is_some_and(|d| d < settings.min_interval) {
            return true;
        }
        if settings.adaptive_pacing {
            let smoothed = Duration::from_micros(self.latency_us.load(Ordering::Relaxed));
            return since(&self.last_completed_us).is_some_and(|d| d < smoothed);
        }
        false
    }

    pub(crate) fn mark_completed(&self) {
        let now = self.epoch.elapsed().as_micros() as u64;
        self.last_completed_us.store(now, Ordering::Release);
    }

    /// EWMA with weight 1/8; only the worker writes it.
    fn observe_latency(&self, sample: Duration) {
        let sample = sample.as_micros() as u64;
        let old = self.latency_us.load(Ordering::Relaxed);
        let next = if old == 0 { sample } else { (old * 7 + sample) / 8 };
        self.latency_us.store(next, Ordering::Relaxed);
    }
}

/// Handle to one live detection session.
///
/// Dropping the handle stops the session without waiting for the worker.
pub struct SessionHandle {
    shared: Arc<Shared>,
    tx: Mutex<Option<flume::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    /// Create an idle session and spawn its worker.
    pub fn new(
        engine: EngineHandle,
        settings: PipelineSettings,
        sink: impl DetectionSink,
        options: SessionOptions,
    ) -> Result<Self> {
        settings.validate()?;

        let shared = Arc::new(Shared {
            state: AtomicU8::new(SessionState::Idle as u8),
            generation: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            pushed: AtomicU64::new(0),
            last_dispatch_us: AtomicU64::new(NEVER),
            last_completed_us: AtomicU64::new(NEVER),
            latency_us: AtomicU64::new(0),
            epoch: Instant::now(),
            settings: ArcSwap::from_pointee(settings),
            counters: SessionCounters::default(),
            delivery: Mutex::new(()),
        });

        let (tx, rx) = flume::bounded(1);
        let worker = Worker {
            shared: Arc::clone(&shared),
            rx,
            engine,
            converter: PixelFormatConverter::new(&options.converter),
            sink: Box::new(sink),
            core: options.worker_core,
        }
        .spawn()?;

        Ok(Self {
            shared,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Offer a camera frame. Never blocks on inference.
    pub fn push_frame(&self, frame: RawFrame) -> PushOutcome {
        let shared = &*self.shared;
        // read before the state: transitions publish the state first, so a
        // job can never carry a generation newer than the state it passed
        let generation = shared.generation.load(Ordering::Acquire);
        if shared.state() != SessionState::Streaming {
            return PushOutcome::Inactive;
        }
        shared.counters.received();

        let settings = shared.settings.load_full();
        let n = shared.pushed.fetch_add(1, Ordering::Relaxed) + 1;
        if n % u64::from(settings.frame_skip) != 0 {
            shared.counters.skipped();
            return PushOutcome::Skipped;
        }

        let now = shared.epoch.elapsed();
        if shared.too_soon(now, &settings) {
            shared.counters.throttled();
            return PushOutcome::Throttled;
        }

        if shared
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            shared.counters.dropped_busy();
            return PushOutcome::Busy;
        }

        let sequence = frame.sequence();
        let job = Job {
            frame,
            generation,
            settings,
        };
        let sent = match self.tx.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(tx) => tx.try_send(job),
            None => Err(TrySendError::Disconnected(job)),
        };

        match sent {
            Ok(()) => {
                shared
                    .last_dispatch_us
                    .store(now.as_micros() as u64, Ordering::Release);
                shared.counters.dispatched();
                trace!(sequence, "frame dispatched");
                PushOutcome::Dispatched
            }
            Err(TrySendError::Full(_)) => {
                shared.in_flight.store(false, Ordering::Release);
                shared.counters.dropped_busy();
                PushOutcome::Busy
            }
            Err(TrySendError::Disconnected(_)) => {
                shared.in_flight.store(false, Ordering::Release);
                PushOutcome::Inactive
            }
        }
    }

    /// Validate and publish new settings; the next pushed frame sees them.
    pub fn update_settings(&self, settings: PipelineSettings) -> Result<()> {
        settings.validate()?;
        let state = self.state();
        if state == SessionState::Stopped {
            return Err(SessionError::InvalidTransition {
                action: "update settings of",
                state,
            }
            .into());
        }
        debug!(?settings, "pipeline settings updated");
        self.shared.settings.store(Arc::new(settings));
        Ok(())
    }

    pub fn settings(&self) -> Arc<PipelineSettings> {
        self.shared.settings.load_full()
    }

    /// Resolution the camera should be opened at for the current settings.
    pub fn capture_resolution(&self) -> (u32, u32) {
        self.shared.settings.load().target_resolution.dimensions()
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.counters.snapshot()
    }

    #[instrument(skip(self))]
    pub fn start(&self) -> Result<(), SessionError> {
        self.transition("start", &[SessionState::Idle], SessionState::Streaming)?;
        info!("live detection started");
        Ok(())
    }

    /// Stop dispatching; results still in flight are discarded.
    pub fn pause(&self) -> Result<(), SessionError> {
        self.transition("pause", &[SessionState::Streaming], SessionState::Paused)?;
        info!("live detection paused");
        Ok(())
    }

    pub fn resume(&self) -> Result<(), SessionError> {
        self.transition("resume", &[SessionState::Paused], SessionState::Streaming)?;
        info!("live detection resumed");
        Ok(())
    }

    /// Stop the session. Once this returns the sink receives nothing more.
    pub fn stop(&self) -> Result<(), SessionError> {
        self.transition(
            "stop",
            &[
                SessionState::Idle,
                SessionState::Streaming,
                SessionState::Paused,
            ],
            SessionState::Stopped,
        )?;
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        let stats = self.stats();
        info!(
            received = stats.frames_received,
            processed = stats.frames_processed,
            failed = stats.frames_failed,
            "live detection stopped"
        );
        Ok(())
    }

    /// Wait for the worker to finish its last frame. Only valid once stopped.
    pub fn join(&self) -> Result<(), SessionError> {
        let state = self.state();
        if state != SessionState::Stopped {
            return Err(SessionError::InvalidTransition {
                action: "join",
                state,
            });
        }
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!("pipeline worker panicked outside frame processing");
            }
        }
        Ok(())
    }

    fn transition(
        &self,
        action: &'static str,
        from: &[SessionState],
        to: SessionState,
    ) -> Result<(), SessionError> {
        let _delivery = self
            .shared
            .delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let state = self.shared.state();
        if !from.contains(&state) {
            return Err(SessionError::InvalidTransition { action, state });
        }
        if to == SessionState::Streaming {
            self.shared.pushed.store(0, Ordering::Relaxed);
            self.shared.last_dispatch_us.store(NEVER, Ordering::Release);
            self.shared.last_completed_us.store(NEVER, Ordering::Release);
        }
        self.shared.state.store(to as u8, Ordering::Release);
        // after the state, pairing with the generation-first read in push_frame
        if matches!(to, SessionState::Paused | SessionState::Stopped) {
            self.shared.generation.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.state() != SessionState::Stopped {
            let _ = self.stop();
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::render_frame;
    use crate::engine::{Labels, SyntheticEngine};

    fn session(settings: PipelineSettings) -> (SessionHandle, flume::Receiver<DetectionBatch>) {
        let engine = EngineHandle::new(SyntheticEngine::new(32, 1, 4), Labels::new(["a"])).unwrap();
        let (tx, rx) = flume::unbounded();
        let handle =
            SessionHandle::new(engine, settings, channel_sink(tx), SessionOptions::default()).unwrap();
        (handle, rx)
    }

    fn eager() -> PipelineSettings {
        PipelineSettings {
            frame_skip: 1,
            min_interval: Duration::ZERO,
            adaptive_pacing: false,
            ..Default::default()
        }
    }

    #[test]
    fn lifecycle_transitions_are_checked() {
        let (s, _rx) = session(eager());
        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(
            s.pause(),
            Err(SessionError::InvalidTransition {
                action: "pause",
                state: SessionState::Idle
            })
        );
        s.start().unwrap();
        assert!(s.start().is_err());
        assert!(s.resume().is_err());
        s.pause().unwrap();
        s.resume().unwrap();
        s.stop().unwrap();
        assert!(s.stop().is_err());
        assert!(s.resume().is_err());
        assert!(s.update_settings(eager()).is_err());
        s.join().unwrap();
    }

    #[test]
    fn frames_outside_streaming_are_inactive() {
        let (s, _rx) = session(eager());
        assert_eq!(s.push_frame(render_frame(8, 8, 1)), PushOutcome::Inactive);
        s.start().unwrap();
        s.pause().unwrap();
        assert_eq!(s.push_frame(render_frame(8, 8, 2)), PushOutcome::Inactive);
        assert_eq!(s.stats().frames_received, 0);
    }

    #[test]
    fn min_interval_throttles_dispatch() {
        let (s, rx) = session(PipelineSettings {
            min_interval: Duration::from_secs(60),
            ..eager()
        });
        s.start().unwrap();
        assert_eq!(s.push_frame(render_frame(8, 8, 1)), PushOutcome::Dispatched);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(s.push_frame(render_frame(8, 8, 2)), PushOutcome::Throttled);
        assert_eq!(s.stats().frames_throttled, 1);
    }

    #[test]
    fn adaptive_pacing_idles_after_each_result() {
        let engine = SyntheticEngine::new(32, 1, 4).with_latency(Duration::from_millis(100));
        let engine = EngineHandle::new(engine, Labels::new(["a"])).unwrap();
        let (tx, rx) = flume::unbounded();
        let s = SessionHandle::new(
            engine,
            PipelineSettings {
                adaptive_pacing: true,
                ..eager()
            },
            channel_sink(tx),
            SessionOptions::default(),
        )
        .unwrap();
        s.start().unwrap();

        assert_eq!(s.push_frame(render_frame(8, 8, 1)), PushOutcome::Dispatched);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // the slot is free but the smoothed latency has not elapsed yet
        assert_eq!(s.push_frame(render_frame(8, 8, 2)), PushOutcome::Throttled);

        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(s.push_frame(render_frame(8, 8, 3)), PushOutcome::Dispatched);
        assert_eq!(s.stats().frames_throttled, 1);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let (s, _rx) = session(eager());
        let bad = PipelineSettings {
            frame_skip: 9,
            ..eager()
        };
        assert!(s.update_settings(bad).is_err());
        assert_eq!(s.settings().frame_skip, 1);
    }

    #[test]
    fn capture_resolution_follows_settings() {
        let (s, _rx) = session(eager());
        s.update_settings(PipelineSettings {
            target_resolution: ResolutionPreset::High,
            ..eager()
        })
        .unwrap();
        assert_eq!(s.capture_resolution(), (1920, 1080));
    }
}
