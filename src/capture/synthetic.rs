//! Synthetic I420 camera used by the benchmark binary and tests

use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{info, instrument};

use crate::capture::frame::{chroma_extent, FrameMetadata, Plane, RawFrame};
use crate::CaptureConfig;

/// Produces moving-gradient I420 frames at the configured rate.
pub struct SyntheticCamera {
    config: CaptureConfig,
    sequence: u64,
    interval: tokio::time::Interval,
    started: Instant,
}

impl SyntheticCamera {
    pub fn new(config: CaptureConfig) -> Self {
        info!(
            "Synthetic camera {}x{} @ {} fps",
            config.width, config.height, config.fps
        );
        let period = Duration::from_secs_f64(1.0 / config.fps.max(1) as f64);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        Self {
            config,
            sequence: 0,
            interval,
            started: Instant::now(),
        }
    }

    /// Wait for the next sensor tick and produce a frame.
    #[instrument(skip(self))]
    pub async fn capture_frame(&mut self) -> RawFrame {
        self.interval.tick().await;
        self.sequence += 1;
        let mut frame = render_frame(self.config.width, self.config.height, self.sequence);
        frame.meta.device_timestamp = Some(self.started.elapsed());
        frame
    }
}

/// Render a single gradient frame; `sequence` shifts the pattern.
pub fn render_frame(width: u32, height: u32, sequence: u64) -> RawFrame {
    let (w, h) = (width as usize, height as usize);
    let shift = sequence as usize;

    let mut y = Vec::with_capacity(w * h);
    for row in 0..h {
        for col in 0..w {
            y.push(((col + row + shift) & 0xFF) as u8);
        }
    }

    let (cw, ch) = (chroma_extent(width), chroma_extent(height));
    let mut u = Vec::with_capacity(cw * ch);
    let mut v = Vec::with_capacity(cw * ch);
    for row in 0..ch {
        for col in 0..cw {
            u.push(((col * 4 + shift) & 0xFF) as u8);
            v.push(((row * 4 + shift) & 0xFF) as u8);
        }
    }

    RawFrame::new(
        Plane::new(Bytes::from(y), w, 1),
        Plane::new(Bytes::from(u), cw, 1),
        Plane::new(Bytes::from(v), cw, 1),
        FrameMetadata {
            sequence,
            width,
            height,
            device_timestamp: None,
        },
    )
}
