#![allow(dead_code)]

use std::time::Duration;

use nutrivision::engine::{OutputShape, SyntheticBox, SyntheticEngine};
use nutrivision::error::EngineError;
use nutrivision::preprocess::{PreprocessedTensor, TensorLayout};
use nutrivision::{EngineHandle, InferenceEngine, Labels, PipelineSettings, RawPrediction};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn centered_box(class_id: usize, score: f32) -> SyntheticBox {
    SyntheticBox {
        cx: 0.5,
        cy: 0.5,
        w: 0.2,
        h: 0.2,
        class_id,
        score,
    }
}

pub fn scripted_engine() -> SyntheticEngine {
    SyntheticEngine::new(32, 2, 4).with_box(centered_box(1, 0.9))
}

pub fn labels() -> Labels {
    Labels::new(["apple", "tomato"])
}

pub fn handle<E: InferenceEngine>(engine: E) -> EngineHandle {
    EngineHandle::new(engine, labels()).expect("labels match engine")
}

/// No skipping, no pacing.
pub fn eager(frame_skip: u32) -> PipelineSettings {
    PipelineSettings {
        frame_skip,
        min_interval: Duration::ZERO,
        adaptive_pacing: false,
        ..Default::default()
    }
}

/// Engine that announces each call and then blocks until released.
pub struct GatedEngine {
    inner: SyntheticEngine,
    entered: flume::Sender<u64>,
    release: flume::Receiver<()>,
    calls: u64,
}

pub struct Gate {
    pub entered: flume::Receiver<u64>,
    pub release: flume::Sender<()>,
}

impl Gate {
    /// Block until the engine has been entered, returning the call number.
    pub fn wait_entered(&self) -> u64 {
        self.entered.recv_timeout(WAIT).expect("engine entered")
    }

    pub fn open_once(&self) {
        self.release.send(()).expect("engine alive");
    }
}

pub fn gated_engine() -> (GatedEngine, Gate) {
    let (entered_tx, entered_rx) = flume::unbounded();
    let (release_tx, release_rx) = flume::unbounded();
    let engine = GatedEngine {
        inner: scripted_engine(),
        entered: entered_tx,
        release: release_rx,
        calls: 0,
    };
    (
        engine,
        Gate {
            entered: entered_rx,
            release: release_tx,
        },
    )
}

impl InferenceEngine for GatedEngine {
    fn input_size(&self) -> u32 {
        self.inner.input_size()
    }

    fn input_layout(&self) -> TensorLayout {
        self.inner.input_layout()
    }

    fn output_shape(&self) -> OutputShape {
        self.inner.output_shape()
    }

    fn run(&mut self, tensor: &PreprocessedTensor) -> Result<RawPrediction, EngineError> {
        self.calls += 1;
        let _ = self.entered.send(self.calls);
        if self.release.recv().is_err() {
            return Err(EngineError::Backend("gate dropped".into()));
        }
        self.inner.run(tensor)
    }
}

/// How a [`FlakyEngine`] misbehaves on its failing calls.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Error,
    Panic,
}

/// Engine that fails on the listed call numbers (1-based).
pub struct FlakyEngine {
    inner: SyntheticEngine,
    fail_on: Vec<u64>,
    fault: Fault,
    calls: u64,
}

impl FlakyEngine {
    pub fn new(fault: Fault, fail_on: &[u64]) -> Self {
        Self {
            inner: scripted_engine(),
            fail_on: fail_on.to_vec(),
            fault,
            calls: 0,
        }
    }
}

impl InferenceEngine for FlakyEngine {
    fn input_size(&self) -> u32 {
        self.inner.input_size()
    }

    fn input_layout(&self) -> TensorLayout {
        self.inner.input_layout()
    }

    fn output_shape(&self) -> OutputShape {
        self.inner.output_shape()
    }

    fn run(&mut self, tensor: &PreprocessedTensor) -> Result<RawPrediction, EngineError> {
        self.calls += 1;
        if self.fail_on.contains(&self.calls) {
            match self.fault {
                Fault::Error => return Err(EngineError::Backend("scripted failure".into())),
                Fault::Panic => panic!("scripted engine panic on call {}", self.calls),
            }
        }
        self.inner.run(tensor)
    }
}
