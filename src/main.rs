//! Live pipeline benchmark: synthetic camera into a session backed by the
//! synthetic engine
//!
//! Usage: `nutrivision [config.toml]`

use std::path::PathBuf;
use std::time::{Duration, Instant};

use bytes::Bytes;
use color_eyre::Result;
use tracing::{debug, info, warn};

use nutrivision::capture::SyntheticCamera;
use nutrivision::engine::{SyntheticBox, SyntheticEngine};
use nutrivision::pipeline::channel_sink;
use nutrivision::{CaptureConfig, Config, Detector, Labels, ModelConfig, PipelineSettings, PushOutcome};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("nutrivision bench launching");

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    debug!(?config, "configuration loaded");

    let detector = Detector::from_config(&config)?;
    let model = config.model.clone();
    let labels = Labels::new(&model.labels);
    detector
        .initialize(Bytes::new(), labels, move |_| Ok(synthetic_engine(&model)))
        .await?;

    let settings = PipelineSettings::try_from(&config.pipeline)?;
    let (tx, rx) = flume::bounded(16);
    let session = detector.start_live_detection(settings, channel_sink(tx))?;

    // Collect results until the worker drops the sink
    let collector = tokio::spawn(async move {
        let mut batches = 0u64;
        let mut detections = 0u64;
        let mut inference = Duration::ZERO;
        while let Ok(batch) = rx.recv_async().await {
            batches += 1;
            detections += batch.detections.len() as u64;
            inference += batch.timings.inference;
            if let Some(top) = batch.detections.first() {
                debug!(
                    sequence = batch.frame_sequence,
                    label = %top.label,
                    confidence = top.confidence,
                    "top detection"
                );
            }
        }
        (batches, detections, inference)
    });

    // Open the camera at the resolution the session asks for
    let (width, height) = session.capture_resolution();
    let mut camera = SyntheticCamera::new(CaptureConfig {
        width,
        height,
        ..config.capture.clone()
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let started = Instant::now();
    for _ in 0..config.capture.frames {
        tokio::select! {
            frame = camera.capture_frame() => {
                if session.push_frame(frame) == PushOutcome::Dispatched {
                    debug!(elapsed = ?started.elapsed(), "frame dispatched");
                }
            }
            _ = &mut ctrl_c => {
                warn!("interrupted, stopping early");
                break;
            }
        }
    }
    let elapsed = started.elapsed();

    session.stop()?;
    let stats = session.stats();
    tokio::task::spawn_blocking(move || session.join()).await??;
    let (batches, detections, inference) = collector.await?;

    let avg_inference = inference.checked_div(batches.max(1) as u32).unwrap_or_default();
    info!(
        received = stats.frames_received,
        skipped = stats.frames_skipped,
        throttled = stats.frames_throttled,
        busy = stats.frames_dropped_busy,
        processed = stats.frames_processed,
        failed = stats.frames_failed,
        "session stats"
    );
    info!(
        "{} batches, {} detections in {:.1?} ({:.1} inferences/s, avg inference {:.1?})",
        batches,
        detections,
        elapsed,
        batches as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        avg_inference
    );

    detector.dispose()?;
    info!("nutrivision bench shutting down");
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nutrivision=debug"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_timer(fmt::time::uptime()));

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry.init();
}

/// Scripted engine with one box per class spread across the frame.
fn synthetic_engine(model: &ModelConfig) -> SyntheticEngine {
    let classes = model.labels.len();
    let mut engine = SyntheticEngine::new(model.input_size, classes, model.num_predictions)
        .with_latency(Duration::from_millis(model.synthetic_latency_ms))
        .with_layouts(model.input_layout, model.output_layout);
    for class_id in 0..classes {
        let t = (class_id as f32 + 0.5) / classes as f32;
        engine = engine.with_box(SyntheticBox {
            cx: t,
            cy: 0.5,
            w: 0.6 / classes as f32,
            h: 0.2,
            class_id,
            score: 0.5 + 0.4 * t,
        });
    }
    engine
}
