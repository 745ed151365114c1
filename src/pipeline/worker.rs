//! Session worker thread: convert, detect, deliver

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, error, warn};

use super::stages::{run_detection, StageTimings};
use super::{DetectionBatch, DetectionSink, Job, SessionState, Shared};
use crate::convert::PixelFormatConverter;
use crate::engine::EngineHandle;
use crate::error::{Error, Result, SessionError};
use crate::postprocess::Detection;

pub(crate) struct Worker {
    pub shared: Arc<Shared>,
    pub rx: flume::Receiver<Job>,
    pub engine: EngineHandle,
    pub converter: PixelFormatConverter,
    pub sink: Box<dyn DetectionSink>,
    pub core: Option<usize>,
}

impl Worker {
    pub fn spawn(self) -> Result<JoinHandle<()>, SessionError> {
        thread::Builder::new()
            .name("nutrivision-worker".into())
            .spawn(move || self.run())
            .map_err(|e| SessionError::Spawn(e.to_string()))
    }

    fn run(mut self) {
        if let Some(core) = self.core {
            pin_to_core(core);
        }
        debug!(kernel = self.converter.kernel_name(), "pipeline worker started");

        // ends once the session drops its sender
        while let Ok(job) = self.rx.recv() {
            let batch = self.process(&job);
            self.finish(job.generation, batch);
        }
        debug!("pipeline worker exiting");
    }

    fn process(&mut self, job: &Job) -> DetectionBatch {
        let sequence = job.frame.sequence();
        let started = Instant::now();
        let mut timings = StageTimings::default();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            detect_frame(&mut self.converter, &self.engine, job, &mut timings)
        }));

        let (detections, failed) = match outcome {
            Ok(Ok(detections)) => (detections, false),
            Ok(Err(Error::Engine(e))) => {
                error!(sequence, error = %e, "inference failed");
                (Vec::new(), true)
            }
            Ok(Err(e)) => {
                warn!(sequence, error = %e, "dropping frame");
                (Vec::new(), true)
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("non-string panic payload");
                error!(sequence, panic = message, "frame processing panicked");
                (Vec::new(), true)
            }
        };

        self.shared.observe_latency(started.elapsed());
        self.shared.counters.processed(failed);

        DetectionBatch {
            frame_sequence: sequence,
            detections,
            timings,
            captured_at: job.frame.timestamp,
            failed,
        }
    }

    fn finish(&mut self, generation: u64, batch: DetectionBatch) {
        // free the slot before the sink runs so the camera can dispatch again
        self.shared.mark_completed();
        self.shared.in_flight.store(false, Ordering::Release);

        let _delivery = self
            .shared
            .delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let current = self.shared.generation.load(Ordering::Acquire);
        if self.shared.state() != SessionState::Streaming || current != generation {
            debug!(
                sequence = batch.frame_sequence,
                "discarding result from a stopped or paused session"
            );
            self.shared.counters.discarded();
            return;
        }

        self.shared.counters.delivered(batch.detections.len());
        self.sink.deliver(batch);
    }
}

fn detect_frame(
    converter: &mut PixelFormatConverter,
    engine: &EngineHandle,
    job: &Job,
    timings: &mut StageTimings,
) -> Result<Vec<Detection>> {
    let start = Instant::now();
    let image = converter.convert(&job.frame)?;
    timings.record_convert(start.elapsed());
    run_detection(engine, &image, &job.settings, timings)
}

fn pin_to_core(core: usize) {
    let id = core_affinity::get_core_ids().and_then(|ids| ids.into_iter().find(|c| c.id == core));
    match id {
        Some(id) if core_affinity::set_for_current(id) => debug!(core, "pipeline worker pinned"),
        _ => warn!(core, "could not pin pipeline worker, running unpinned"),
    }
}
