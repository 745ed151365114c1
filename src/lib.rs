pub mod capture;
pub mod convert;
pub mod detector;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod postprocess;
pub mod preprocess;

use std::path::Path;

use serde::{Deserialize, Serialize};

use engine::PredictionLayout;
use pipeline::ResolutionPreset;
use preprocess::TensorLayout;

pub use capture::RawFrame;
pub use convert::PixelFormatConverter;
pub use detector::Detector;
pub use engine::{EngineHandle, InferenceEngine, Labels, RawPrediction};
pub use error::{Error, Result};
pub use pipeline::{DetectionBatch, PipelineSettings, PushOutcome, SessionHandle, SessionStats};
pub use postprocess::Detection;

/// Environment variables with this prefix override file values, sections
/// separated by a double underscore: `NUTRIVISION_PIPELINE__FRAME_SKIP=3`.
pub const ENV_PREFIX: &str = "NUTRIVISION";

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub model: ModelConfig,
    pub pipeline: PipelineConfig,
    pub converter: ConverterConfig,
}

impl Config {
    /// Load from an optional TOML file, then apply `NUTRIVISION_*`
    /// environment overrides. Missing keys keep their defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

/// Synthetic camera used by the benchmark binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Frames to push before the benchmark stops
    pub frames: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub input_size: u32,
    pub input_layout: TensorLayout,
    pub output_layout: PredictionLayout,
    pub num_predictions: usize,
    pub labels: Vec<String>,
    /// Simulated forward-pass time of the synthetic engine
    pub synthetic_latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub frame_skip: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub target_resolution: ResolutionPreset,
    pub min_interval_ms: u64,
    pub adaptive_pacing: bool,
    pub max_detections: usize,
    pub worker_core: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Skip the SIMD probe and always use the scalar kernel
    pub force_scalar: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let (width, height) = ResolutionPreset::default().dimensions();
        Self {
            width,
            height,
            fps: 30,
            frames: 300,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            input_size: 640,
            input_layout: TensorLayout::Nchw,
            output_layout: PredictionLayout::ChannelsFirst,
            num_predictions: 8400,
            labels: ["apple", "banana", "bread", "broccoli", "carrot", "egg", "tomato"]
                .map(String::from)
                .to_vec(),
            synthetic_latency_ms: 40,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let settings = PipelineSettings::default();
        Self {
            frame_skip: settings.frame_skip,
            confidence_threshold: settings.confidence_threshold,
            iou_threshold: settings.iou_threshold,
            target_resolution: settings.target_resolution,
            min_interval_ms: settings.min_interval.as_millis() as u64,
            adaptive_pacing: settings.adaptive_pacing,
            max_detections: settings.max_detections,
            worker_core: None,
        }
    }
}
