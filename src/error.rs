//! Error taxonomy for the detection pipeline

use thiserror::Error;

/// Malformed raw camera frame. The live pipeline drops the frame and continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameConversionError {
    #[error("frame has zero area: {width}x{height}")]
    ZeroArea { width: u32, height: u32 },

    #[error("{plane} plane row stride {stride} is smaller than its row span {span}")]
    RowStride {
        plane: &'static str,
        stride: usize,
        span: usize,
    },

    #[error("{plane} plane pixel stride must be non-zero")]
    PixelStride { plane: &'static str },

    #[error("{plane} plane holds {len} bytes, geometry requires {required}")]
    PlaneTooShort {
        plane: &'static str,
        len: usize,
        required: usize,
    },

    #[error("U and V planes disagree on strides")]
    ChromaMismatch,
}

/// Zero-area or otherwise unusable decoded image.
#[derive(Debug, Error)]
pub enum InvalidImageError {
    #[error("image has zero area: {width}x{height}")]
    ZeroArea { width: u32, height: u32 },

    #[error("target size must be non-zero")]
    ZeroTarget,

    #[error("image decode failed")]
    Decode(#[source] image::ImageError),
}

/// Engine lifecycle and execution failures.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("inference engine is not initialized")]
    NotReady,

    #[error("inference engine has been disposed")]
    Disposed,

    #[error("inference engine is already initialized")]
    AlreadyInitialized,

    #[error("model output has {model_classes} classes but {labels} labels were supplied")]
    ShapeMismatch { model_classes: usize, labels: usize },

    #[error("raw prediction holds {len} values, shape requires {expected}")]
    PredictionSize { len: usize, expected: usize },

    #[error("inference backend error: {0}")]
    Backend(String),

    #[error("engine worker terminated unexpectedly")]
    WorkerLost,
}

/// A candidate box that violates the detection invariants.
///
/// Raised only internally; the postprocessor drops such candidates.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidDetectionError {
    #[error("non-positive box extent: {width}x{height}")]
    EmptyBox { width: f32, height: f32 },

    #[error("confidence {0} outside [0, 1]")]
    Confidence(f32),

    #[error("non-finite box coordinate")]
    NonFinite,
}

/// Out-of-range pipeline settings.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingsError {
    #[error("frame skip {0} outside [1, 5]")]
    FrameSkip(u32),

    #[error("{name} {value} outside [0, 1]")]
    Threshold { name: &'static str, value: f32 },
}

/// Live session lifecycle misuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("cannot {action} a session in state {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: crate::pipeline::SessionState,
    },

    #[error("failed to spawn pipeline worker: {0}")]
    Spawn(String),
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Frame(#[from] FrameConversionError),

    #[error(transparent)]
    Image(#[from] InvalidImageError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("configuration error")]
    Config(#[from] config::ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
