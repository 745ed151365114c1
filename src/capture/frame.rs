use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::FrameConversionError;

/// One plane of a YUV 4:2:0 frame.
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Bytes,
    /// Bytes between the starts of consecutive rows
    pub row_stride: usize,
    /// Bytes between consecutive samples in a row (1 planar, 2 semi-planar)
    pub pixel_stride: usize,
}

impl Plane {
    pub fn new(data: Bytes, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data,
            row_stride,
            pixel_stride,
        }
    }

    /// Bytes covered by one row of `samples` samples.
    fn row_span(&self, samples: usize) -> usize {
        (samples - 1) * self.pixel_stride + 1
    }
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Raw YUV 4:2:0 camera frame as handed over by the capture layer.
///
/// Chroma planes are subsampled 2x2. Planar (I420) frames carry a chroma pixel
/// stride of 1, semi-planar (NV12/NV21) frames a stride of 2 with U and V
/// views into the same interleaved buffer.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub y: Plane,
    pub u: Plane,
    pub v: Plane,
    pub meta: FrameMetadata,
    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

impl RawFrame {
    pub fn new(y: Plane, u: Plane, v: Plane, meta: FrameMetadata) -> Self {
        Self {
            y,
            u,
            v,
            meta,
            timestamp: Instant::now(),
        }
    }

    /// Tightly packed planar I420 frame.
    pub fn i420(width: u32, height: u32, sequence: u64, y: Bytes, u: Bytes, v: Bytes) -> Self {
        let chroma_width = chroma_extent(width);
        Self::new(
            Plane::new(y, width as usize, 1),
            Plane::new(u, chroma_width, 1),
            Plane::new(v, chroma_width, 1),
            FrameMetadata {
                sequence,
                width,
                height,
                device_timestamp: None,
            },
        )
    }

    /// Tightly packed semi-planar NV12 frame (interleaved U/V).
    pub fn nv12(width: u32, height: u32, sequence: u64, y: Bytes, uv: Bytes) -> Self {
        let uv_stride = chroma_extent(width) * 2;
        let v = uv.slice(1.min(uv.len())..);
        Self::new(
            Plane::new(y, width as usize, 1),
            Plane::new(uv, uv_stride, 2),
            Plane::new(v, uv_stride, 2),
            FrameMetadata {
                sequence,
                width,
                height,
                device_timestamp: None,
            },
        )
    }

    /// Tightly packed semi-planar NV21 frame (interleaved V/U).
    pub fn nv21(width: u32, height: u32, sequence: u64, y: Bytes, vu: Bytes) -> Self {
        let uv_stride = chroma_extent(width) * 2;
        let u = vu.slice(1.min(vu.len())..);
        Self::new(
            Plane::new(y, width as usize, 1),
            Plane::new(u, uv_stride, 2),
            Plane::new(vu, uv_stride, 2),
            FrameMetadata {
                sequence,
                width,
                height,
                device_timestamp: None,
            },
        )
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    /// Check that dimensions, strides and plane lengths describe a readable frame.
    pub fn validate(&self) -> Result<(), FrameConversionError> {
        let (width, height) = (self.meta.width, self.meta.height);
        if width == 0 || height == 0 {
            return Err(FrameConversionError::ZeroArea { width, height });
        }

        check_plane("Y", &self.y, width as usize, height as usize)?;

        if self.u.row_stride != self.v.row_stride || self.u.pixel_stride != self.v.pixel_stride {
            return Err(FrameConversionError::ChromaMismatch);
        }
        let (cw, ch) = (chroma_extent(width), chroma_extent(height));
        check_plane("U", &self.u, cw, ch)?;
        check_plane("V", &self.v, cw, ch)?;
        Ok(())
    }
}

/// Number of chroma samples covering `luma` luma samples.
pub fn chroma_extent(luma: u32) -> usize {
    (luma as usize + 1) / 2
}

fn check_plane(
    plane: &'static str,
    p: &Plane,
    samples: usize,
    rows: usize,
) -> Result<(), FrameConversionError> {
    if p.pixel_stride == 0 {
        return Err(FrameConversionError::PixelStride { plane });
    }
    let span = p.row_span(samples);
    if p.row_stride < span {
        return Err(FrameConversionError::RowStride {
            plane,
            stride: p.row_stride,
            span,
        });
    }
    let required = (rows - 1) * p.row_stride + span;
    if p.data.len() < required {
        return Err(FrameConversionError::PlaneTooShort {
            plane,
            len: p.data.len(),
            required,
        });
    }
    Ok(())
}
