//! Inference engine seam
//!
//! The network itself is supplied by the host through [`InferenceEngine`].
//! [`EngineHandle`] owns the boxed engine behind a mutex so that concurrent
//! sessions serialize their forward passes, and enforces the lifecycle:
//! a disposed handle rejects every later call.

pub mod labels;
pub mod synthetic;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::EngineError;
use crate::preprocess::{PreprocessedTensor, TensorLayout};

pub use labels::Labels;
pub use synthetic::{SyntheticBox, SyntheticEngine};

/// Memory order of the raw prediction tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionLayout {
    /// `[1, 4 + classes, predictions]`, the stock YOLOv8 export
    #[default]
    ChannelsFirst,
    /// `[1, predictions, 4 + classes]`
    RowsFirst,
}

/// Output geometry fixed when the model is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputShape {
    pub num_classes: usize,
    pub num_predictions: usize,
    pub layout: PredictionLayout,
}

impl OutputShape {
    /// Box channels plus class scores.
    pub fn channels(&self) -> usize {
        4 + self.num_classes
    }

    pub fn element_count(&self) -> usize {
        self.channels() * self.num_predictions
    }
}

/// Raw network output. Boxes are `(cx, cy, w, h)` normalized to [0, 1]
/// followed by one score per class.
#[derive(Debug, Clone)]
pub struct RawPrediction {
    data: Vec<f32>,
    shape: OutputShape,
}

impl RawPrediction {
    pub fn new(data: Vec<f32>, shape: OutputShape) -> Result<Self, EngineError> {
        if data.len() != shape.element_count() {
            return Err(EngineError::PredictionSize {
                len: data.len(),
                expected: shape.element_count(),
            });
        }
        Ok(Self { data, shape })
    }

    pub fn shape(&self) -> &OutputShape {
        &self.shape
    }

    pub fn num_predictions(&self) -> usize {
        self.shape.num_predictions
    }

    pub fn num_classes(&self) -> usize {
        self.shape.num_classes
    }

    /// Value of `channel` (0..4 box, 4.. class scores) for prediction `row`.
    #[inline]
    pub fn value(&self, channel: usize, row: usize) -> f32 {
        match self.shape.layout {
            PredictionLayout::ChannelsFirst => self.data[channel * self.shape.num_predictions + row],
            PredictionLayout::RowsFirst => self.data[row * self.shape.channels() + channel],
        }
    }
}

/// Host-provided neural network runtime.
///
/// Calls are synchronous and may take tens to hundreds of milliseconds; the
/// pipeline only ever invokes them from worker threads.
pub trait InferenceEngine: Send + 'static {
    /// Side of the square input tensor.
    fn input_size(&self) -> u32;

    fn input_layout(&self) -> TensorLayout;

    fn output_shape(&self) -> OutputShape;

    fn run(&mut self, tensor: &PreprocessedTensor) -> Result<RawPrediction, EngineError>;
}

struct EngineSlot {
    engine: Mutex<Option<Box<dyn InferenceEngine>>>,
    disposed: AtomicBool,
    labels: Labels,
    input_size: u32,
    input_layout: TensorLayout,
    output_shape: OutputShape,
}

/// Shared handle to an initialized engine.
#[derive(Clone)]
pub struct EngineHandle {
    slot: Arc<EngineSlot>,
}

impl EngineHandle {
    /// Wrap a loaded engine. Fails if the model's class count disagrees with
    /// the label list.
    #[instrument(skip_all, fields(labels = labels.len()))]
    pub fn new<E: InferenceEngine>(engine: E, labels: Labels) -> Result<Self, EngineError> {
        let output_shape = engine.output_shape();
        if output_shape.num_classes != labels.len() {
            return Err(EngineError::ShapeMismatch {
                model_classes: output_shape.num_classes,
                labels: labels.len(),
            });
        }
        let input_size = engine.input_size();
        let input_layout = engine.input_layout();
        info!(
            input_size,
            ?input_layout,
            predictions = output_shape.num_predictions,
            "inference engine ready"
        );

        Ok(Self {
            slot: Arc::new(EngineSlot {
                engine: Mutex::new(Some(Box::new(engine))),
                disposed: AtomicBool::new(false),
                labels,
                input_size,
                input_layout,
                output_shape,
            }),
        })
    }

    /// Run one forward pass, waiting for any other session using the engine.
    pub fn run(&self, tensor: &PreprocessedTensor) -> Result<RawPrediction, EngineError> {
        let mut guard = self
            .slot
            .engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let engine = guard.as_mut().ok_or(EngineError::Disposed)?;
        let prediction = engine.run(tensor)?;
        if *prediction.shape() != self.slot.output_shape {
            return Err(EngineError::PredictionSize {
                len: prediction.shape().element_count(),
                expected: self.slot.output_shape.element_count(),
            });
        }
        Ok(prediction)
    }

    /// Release the engine. A second dispose is a lifecycle error.
    pub fn dispose(&self) -> Result<(), EngineError> {
        if self.slot.disposed.swap(true, Ordering::AcqRel) {
            return Err(EngineError::Disposed);
        }
        let engine = self
            .slot
            .engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(engine);
        info!("inference engine disposed");
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.slot.disposed.load(Ordering::Acquire)
    }

    pub fn labels(&self) -> &Labels {
        &self.slot.labels
    }

    pub fn input_size(&self) -> u32 {
        self.slot.input_size
    }

    pub fn input_layout(&self) -> TensorLayout {
        self.slot.input_layout
    }

    pub fn output_shape(&self) -> OutputShape {
        self.slot.output_shape
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("input_size", &self.slot.input_size)
            .field("output_shape", &self.slot.output_shape)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
