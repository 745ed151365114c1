//! Detection facade: engine lifecycle, gallery detection and live sessions

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use bytes::Bytes;
use image::RgbImage;
use tracing::{debug, error, info, instrument};

use crate::capture::decoder::{decode_image, open_image};
use crate::engine::{EngineHandle, InferenceEngine, Labels};
use crate::error::{EngineError, InvalidImageError, Result};
use crate::pipeline::{
    run_detection, DetectionSink, PipelineSettings, SessionHandle, SessionOptions, StageTimings,
};
use crate::postprocess::Detection;
use crate::Config;

enum EngineState {
    NotReady,
    Initializing,
    Ready(EngineHandle),
    Disposed,
}

/// Owns the inference engine and hands out detection work.
///
/// All heavy calls run off the caller's thread: initialization and gallery
/// detection on tokio's blocking pool, live frames on a session worker.
pub struct Detector {
    state: Mutex<EngineState>,
    /// Thresholds for single-shot detection, read per call
    gallery_settings: ArcSwap<PipelineSettings>,
    session_options: SessionOptions,
}

impl Detector {
    pub fn new(gallery_settings: PipelineSettings, session_options: SessionOptions) -> Result<Self> {
        gallery_settings.validate()?;
        Ok(Self {
            state: Mutex::new(EngineState::NotReady),
            gallery_settings: ArcSwap::from_pointee(gallery_settings),
            session_options,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            PipelineSettings::try_from(&config.pipeline)?,
            SessionOptions {
                converter: config.converter.clone(),
                worker_core: config.pipeline.worker_core,
            },
        )
    }

    /// Load the model with `loader` on the blocking pool and bind `labels`.
    ///
    /// Fails if the detector was already initialized or disposed, or if the
    /// model's class count disagrees with the label list.
    #[instrument(skip_all, fields(model_bytes = model_bytes.len(), labels = labels.len()))]
    pub async fn initialize<L, E>(&self, model_bytes: Bytes, labels: Labels, loader: L) -> Result<()>
    where
        L: FnOnce(Bytes) -> Result<E, EngineError> + Send + 'static,
        E: InferenceEngine,
    {
        {
            let mut state = self.lock();
            match *state {
                EngineState::NotReady => *state = EngineState::Initializing,
                EngineState::Disposed => return Err(EngineError::Disposed.into()),
                EngineState::Initializing | EngineState::Ready(_) => {
                    return Err(EngineError::AlreadyInitialized.into())
                }
            }
        }

        let loaded = tokio::task::spawn_blocking(move || {
            let engine = loader(model_bytes)?;
            EngineHandle::new(engine, labels)
        })
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, "model loader task failed");
            Err(EngineError::WorkerLost)
        });

        let mut state = self.lock();
        match loaded {
            Ok(handle) if matches!(*state, EngineState::Disposed) => {
                // disposed while loading
                handle.dispose()?;
                Err(EngineError::Disposed.into())
            }
            Ok(handle) => {
                *state = EngineState::Ready(handle);
                info!("detector ready");
                Ok(())
            }
            Err(e) => {
                if matches!(*state, EngineState::Initializing) {
                    *state = EngineState::NotReady;
                }
                error!(error = %e, "engine initialization failed");
                Err(e.into())
            }
        }
    }

    /// Validate and publish thresholds for later gallery calls. Live
    /// sessions keep their own settings; see [`SessionHandle::update_settings`].
    pub fn update_settings(&self, settings: PipelineSettings) -> Result<()> {
        settings.validate()?;
        debug!(?settings, "gallery settings updated");
        self.gallery_settings.store(Arc::new(settings));
        Ok(())
    }

    pub fn settings(&self) -> Arc<PipelineSettings> {
        self.gallery_settings.load_full()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.lock(), EngineState::Ready(_))
    }

    /// Single-shot detection on a decoded image.
    pub async fn detect_from_image(&self, image: RgbImage) -> Result<Vec<Detection>> {
        self.detect_blocking(move || Ok(image)).await
    }

    /// Single-shot detection on an encoded JPEG or PNG.
    pub async fn detect_from_encoded(&self, data: Bytes) -> Result<Vec<Detection>> {
        self.detect_blocking(move || decode_image(&data)).await
    }

    pub async fn detect_from_path(&self, path: impl AsRef<Path>) -> Result<Vec<Detection>> {
        let path: PathBuf = path.as_ref().to_owned();
        self.detect_blocking(move || open_image(path)).await
    }

    /// Start a streaming session delivering batches to `sink`.
    pub fn start_live_detection(
        &self,
        settings: PipelineSettings,
        sink: impl DetectionSink,
    ) -> Result<SessionHandle> {
        let engine = self.engine()?;
        let session = SessionHandle::new(engine, settings, sink, self.session_options.clone())?;
        session.start()?;
        Ok(session)
    }

    /// Release the engine. Live sessions still holding it report failed
    /// frames until stopped.
    pub fn dispose(&self) -> Result<()> {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, EngineState::Disposed) {
            EngineState::Ready(handle) => handle.dispose()?,
            EngineState::Initializing => {}
            EngineState::NotReady => {
                *state = EngineState::NotReady;
                return Err(EngineError::NotReady.into());
            }
            EngineState::Disposed => return Err(EngineError::Disposed.into()),
        }
        info!("detector disposed");
        Ok(())
    }

    async fn detect_blocking<F>(&self, load: F) -> Result<Vec<Detection>>
    where
        F: FnOnce() -> Result<RgbImage, InvalidImageError> + Send + 'static,
    {
        let engine = self.engine()?;
        let settings = self.gallery_settings.load_full();
        tokio::task::spawn_blocking(move || {
            let image = load()?;
            let mut timings = StageTimings::default();
            run_detection(&engine, &image, &settings, &mut timings)
        })
        .await
        .map_err(|e| {
            error!(error = %e, "gallery detection task failed");
            EngineError::WorkerLost
        })?
    }

    fn engine(&self) -> Result<EngineHandle, EngineError> {
        match &*self.lock() {
            EngineState::Ready(handle) => Ok(handle.clone()),
            EngineState::NotReady | EngineState::Initializing => Err(EngineError::NotReady),
            EngineState::Disposed => Err(EngineError::Disposed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.lock() {
            EngineState::NotReady => "not_ready",
            EngineState::Initializing => "initializing",
            EngineState::Ready(_) => "ready",
            EngineState::Disposed => "disposed",
        };
        f.debug_struct("Detector").field("state", &state).finish()
    }
}
