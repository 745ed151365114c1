//! YUV 4:2:0 camera frame → interleaved RGB conversion
//!
//! The conversion kernel is picked once: the SIMD probe runs on first use and
//! its answer is cached for the whole process. A converter that meets a frame
//! layout its fast kernel cannot handle drops to the scalar kernel for the
//! rest of its lifetime instead of re-probing per frame.

mod scalar;
mod simd;

use image::RgbImage;
use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::{info, warn};

use crate::capture::RawFrame;
use crate::error::FrameConversionError;
use crate::ConverterConfig;

/// Converts a validated frame into a `width * height * 3` RGB buffer.
pub(crate) type Kernel = fn(&RawFrame, &mut [u8]) -> Result<(), KernelError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub(crate) enum KernelError {
    #[error("chroma pixel stride {0} is not supported by this kernel")]
    UnsupportedPixelStride(usize),
}

static FAST_PATH: Lazy<Option<(Kernel, &'static str)>> = Lazy::new(|| {
    let probed = if cfg!(feature = "simd") {
        simd::probe()
    } else {
        None
    };
    match probed {
        Some((_, name)) => info!("SIMD frame conversion available: {}", name),
        None => info!("SIMD frame conversion unavailable, using scalar path"),
    }
    probed
});

/// Camera frame converter owned by one pipeline worker.
pub struct PixelFormatConverter {
    kernel: Kernel,
    kernel_name: &'static str,
}

impl PixelFormatConverter {
    pub fn new(config: &ConverterConfig) -> Self {
        match *FAST_PATH {
            Some((kernel, kernel_name)) if !config.force_scalar => Self {
                kernel,
                kernel_name,
            },
            _ => Self::scalar(),
        }
    }

    pub fn scalar() -> Self {
        Self {
            kernel: scalar::kernel,
            kernel_name: "scalar",
        }
    }

    /// Name of the kernel currently bound ("sse2", "neon" or "scalar").
    pub fn kernel_name(&self) -> &'static str {
        self.kernel_name
    }

    pub fn convert(&mut self, frame: &RawFrame) -> Result<RgbImage, FrameConversionError> {
        frame.validate()?;

        let (width, height) = (frame.width(), frame.height());
        let mut rgb = vec![0u8; width as usize * height as usize * 3];

        if let Err(e) = (self.kernel)(frame, &mut rgb) {
            warn!(
                kernel = self.kernel_name,
                error = %e,
                "fast frame conversion failed, switching to scalar for this session"
            );
            self.kernel = scalar::kernel;
            self.kernel_name = "scalar";
            scalar::convert_frame(frame, &mut rgb);
        }

        RgbImage::from_raw(width, height, rgb)
            .ok_or(FrameConversionError::ZeroArea { width, height })
    }
}

impl Default for PixelFormatConverter {
    fn default() -> Self {
        Self::new(&ConverterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::capture::frame::{chroma_extent, FrameMetadata, Plane};
    use crate::capture::synthetic::render_frame;

    fn assert_close(a: &RgbImage, b: &RgbImage, tolerance: u8) {
        assert_eq!(a.dimensions(), b.dimensions());
        for (i, (x, y)) in a.as_raw().iter().zip(b.as_raw()).enumerate() {
            assert!(
                x.abs_diff(*y) <= tolerance,
                "byte {i}: {x} vs {y} (tolerance {tolerance})"
            );
        }
    }

    #[test]
    fn fast_path_matches_scalar() {
        let mut fast = PixelFormatConverter::default();
        let mut scalar = PixelFormatConverter::scalar();
        // widths exercise full lanes, lane remainders and odd chroma extents
        for (w, h) in [(8, 2), (13, 7), (64, 33), (641, 3)] {
            for seq in [0, 77, 200] {
                let frame = render_frame(w, h, seq);
                let a = fast.convert(&frame).unwrap();
                let b = scalar.convert(&frame).unwrap();
                assert_close(&a, &b, 3);
            }
        }
    }

    #[test]
    fn semi_planar_frames_convert() {
        let (w, h) = (16u32, 4u32);
        let (cw, ch) = (chroma_extent(w), chroma_extent(h));
        let mut uv = Vec::with_capacity(cw * ch * 2);
        for _ in 0..cw * ch {
            uv.extend_from_slice(&[90, 240]);
        }
        let frame = RawFrame::nv12(w, h, 1, Bytes::from(vec![81; (w * h) as usize]), Bytes::from(uv));

        let rgb = PixelFormatConverter::default().convert(&frame).unwrap();
        for px in rgb.pixels() {
            assert!(px.0[0] > 230 && px.0[1] < 24 && px.0[2] < 24, "{:?}", px.0);
        }
    }

    #[test]
    fn unusual_pixel_stride_falls_back_to_scalar() {
        let (w, h) = (16u32, 2u32);
        let cw = chroma_extent(w);
        // chroma samples spaced four bytes apart
        let chroma = Bytes::from(vec![128u8; (cw - 1) * 4 + 1]);
        let frame = RawFrame::new(
            Plane::new(Bytes::from(vec![100; (w * h) as usize]), w as usize, 1),
            Plane::new(chroma.clone(), (cw - 1) * 4 + 1, 4),
            Plane::new(chroma, (cw - 1) * 4 + 1, 4),
            FrameMetadata {
                sequence: 0,
                width: w,
                height: h,
                device_timestamp: None,
            },
        );

        let mut converter = PixelFormatConverter::default();
        let rgb = converter.convert(&frame).unwrap();
        assert_eq!(converter.kernel_name(), "scalar");
        assert!(rgb.pixels().all(|p| p.0 == [100, 100, 100]));
    }

    #[test]
    fn malformed_frame_is_an_error() {
        let mut frame = render_frame(8, 8, 0);
        frame.u.data = frame.u.data.slice(..3);
        frame.v.data = frame.v.data.slice(..3);
        assert!(PixelFormatConverter::default().convert(&frame).is_err());
    }

    #[test]
    fn forced_scalar_ignores_probe() {
        let converter = PixelFormatConverter::new(&ConverterConfig { force_scalar: true });
        assert_eq!(converter.kernel_name(), "scalar");
    }
}
