use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;
use crate::PipelineConfig;

/// Capture resolution the host should request from the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPreset {
    Low,
    #[default]
    Medium,
    High,
}

impl ResolutionPreset {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            ResolutionPreset::Low => (640, 480),
            ResolutionPreset::Medium => (1280, 720),
            ResolutionPreset::High => (1920, 1080),
        }
    }
}

/// Live detection knobs, read once per frame as an immutable snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Forward every Nth pushed frame, 1..=5
    pub frame_skip: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub target_resolution: ResolutionPreset,
    /// Minimum time between two inference dispatches
    pub min_interval: Duration,
    /// Stretch `min_interval` to the smoothed processing latency
    pub adaptive_pacing: bool,
    pub max_detections: usize,
}

impl PipelineSettings {
    pub const MAX_FRAME_SKIP: u32 = 5;

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(1..=Self::MAX_FRAME_SKIP).contains(&self.frame_skip) {
            return Err(SettingsError::FrameSkip(self.frame_skip));
        }
        for (name, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("iou_threshold", self.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SettingsError::Threshold { name, value });
            }
        }
        Ok(())
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            frame_skip: 2,
            confidence_threshold: 0.45,
            iou_threshold: 0.45,
            target_resolution: ResolutionPreset::Medium,
            min_interval: Duration::from_millis(100),
            adaptive_pacing: true,
            max_detections: 100,
        }
    }
}

impl TryFrom<&PipelineConfig> for PipelineSettings {
    type Error = SettingsError;

    fn try_from(config: &PipelineConfig) -> Result<Self, Self::Error> {
        let settings = Self {
            frame_skip: config.frame_skip,
            confidence_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
            target_resolution: config.target_resolution,
            min_interval: Duration::from_millis(config.min_interval_ms),
            adaptive_pacing: config.adaptive_pacing,
            max_detections: config.max_detections,
        };
        settings.validate()?;
        Ok(settings)
    }
}
