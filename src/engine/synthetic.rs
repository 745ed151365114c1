//! Scripted engine for benchmarks and tests
//!
//! Emits a fixed set of boxes on every call after sleeping for a configurable
//! latency, standing in for a real network when measuring the pipeline.

use std::time::Duration;

use tracing::trace;

use super::{InferenceEngine, OutputShape, PredictionLayout, RawPrediction};
use crate::error::EngineError;
use crate::preprocess::{PreprocessedTensor, TensorLayout};

/// One scripted prediction row, box normalized to the model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticBox {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
    pub class_id: usize,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct SyntheticEngine {
    input_size: u32,
    input_layout: TensorLayout,
    shape: OutputShape,
    latency: Duration,
    boxes: Vec<SyntheticBox>,
}

impl SyntheticEngine {
    pub fn new(input_size: u32, num_classes: usize, num_predictions: usize) -> Self {
        Self {
            input_size,
            input_layout: TensorLayout::Nchw,
            shape: OutputShape {
                num_classes,
                num_predictions,
                layout: PredictionLayout::ChannelsFirst,
            },
            latency: Duration::ZERO,
            boxes: Vec::new(),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_layouts(mut self, input: TensorLayout, output: PredictionLayout) -> Self {
        self.input_layout = input;
        self.shape.layout = output;
        self
    }

    /// Script a box. Boxes past the prediction count are ignored.
    pub fn with_box(mut self, b: SyntheticBox) -> Self {
        self.boxes.push(b);
        self
    }

    fn render(&self) -> Vec<f32> {
        let shape = self.shape;
        let mut data = vec![0f32; shape.element_count()];
        let index = |channel: usize, row: usize| match shape.layout {
            PredictionLayout::ChannelsFirst => channel * shape.num_predictions + row,
            PredictionLayout::RowsFirst => row * shape.channels() + channel,
        };

        for (row, b) in self.boxes.iter().enumerate().take(shape.num_predictions) {
            data[index(0, row)] = b.cx;
            data[index(1, row)] = b.cy;
            data[index(2, row)] = b.w;
            data[index(3, row)] = b.h;
            if b.class_id < shape.num_classes {
                data[index(4 + b.class_id, row)] = b.score;
            }
        }
        data
    }
}

impl InferenceEngine for SyntheticEngine {
    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn input_layout(&self) -> TensorLayout {
        self.input_layout
    }

    fn output_shape(&self) -> OutputShape {
        self.shape
    }

    fn run(&mut self, tensor: &PreprocessedTensor) -> Result<RawPrediction, EngineError> {
        if tensor.size != self.input_size {
            return Err(EngineError::Backend(format!(
                "expected {0}x{0} input, got {1}x{1}",
                self.input_size, tensor.size
            )));
        }
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        trace!(boxes = self.boxes.len(), "synthetic inference");
        RawPrediction::new(self.render(), self.shape)
    }
}
