//! Preprocess → inference → postprocess, shared by the live worker and the
//! single-shot gallery path

use std::time::{Duration, Instant};

use image::RgbImage;
use serde::Serialize;
use tracing::debug;

use super::PipelineSettings;
use crate::engine::EngineHandle;
use crate::error::Result;
use crate::postprocess::{postprocess, Detection, PostprocessParams};
use crate::preprocess::preprocess;

/// Wall time spent in each stage for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageTimings {
    /// Zero on the gallery path
    pub convert: Duration,
    pub preprocess: Duration,
    pub inference: Duration,
    pub postprocess: Duration,
}

impl StageTimings {
    pub fn total(&self) -> Duration {
        self.convert + self.preprocess + self.inference + self.postprocess
    }

    pub(crate) fn record_convert(&mut self, elapsed: Duration) {
        self.convert = elapsed;
        metrics::histogram!("convert_time_us").record(elapsed.as_micros() as f64);
    }
}

/// Run detection on an RGB image. Timings are filled in as stages finish so
/// a failing stage still reports the ones before it.
pub(crate) fn run_detection(
    engine: &EngineHandle,
    image: &RgbImage,
    settings: &PipelineSettings,
    timings: &mut StageTimings,
) -> Result<Vec<Detection>> {
    let start = Instant::now();
    let tensor = preprocess(image, engine.input_size(), engine.input_layout())?;
    timings.preprocess = start.elapsed();
    metrics::histogram!("preprocess_time_us").record(timings.preprocess.as_micros() as f64);

    let start = Instant::now();
    let raw = engine.run(&tensor)?;
    timings.inference = start.elapsed();
    metrics::histogram!("inference_time_us").record(timings.inference.as_micros() as f64);

    let start = Instant::now();
    let params = PostprocessParams::from_settings(settings, engine.input_size());
    let detections = postprocess(&raw, &tensor.letterbox, &params, engine.labels());
    timings.postprocess = start.elapsed();
    metrics::histogram!("postprocess_time_us").record(timings.postprocess.as_micros() as f64);

    debug!(
        detections = detections.len(),
        inference_us = timings.inference.as_micros() as u64,
        "detection pass"
    );
    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Labels, SyntheticBox, SyntheticEngine};

    #[test]
    fn detects_scripted_box_in_original_space() {
        let engine = SyntheticEngine::new(64, 2, 8).with_box(SyntheticBox {
            cx: 0.5,
            cy: 0.5,
            w: 0.5,
            h: 0.25,
            class_id: 1,
            score: 0.9,
        });
        let handle = EngineHandle::new(engine, Labels::new(["egg", "leek"])).unwrap();
        // 128x64 → scale 0.5, pad_top 16
        let image = RgbImage::new(128, 64);
        let mut timings = StageTimings::default();
        let out = run_detection(&handle, &image, &PipelineSettings::default(), &mut timings).unwrap();

        assert_eq!(out.len(), 1);
        let d = &out[0];
        assert_eq!(&*d.label, "leek");
        assert_eq!([d.x1, d.y1, d.x2, d.y2], [32.0, 16.0, 96.0, 48.0]);
        assert_eq!(timings.convert, Duration::ZERO);
    }
}
