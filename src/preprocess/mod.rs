//! Letterbox preprocessing
//!
//! Fits an RGB image into the square model input without distorting it:
//! scale to fit, center on a mid-grey canvas, normalize to [0, 1].
//! The [`Letterbox`] recorded alongside the tensor maps model-space
//! coordinates back onto the source image.

use std::borrow::Cow;

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::InvalidImageError;

/// Canvas fill for the padded border.
pub const PAD_VALUE: u8 = 128;

/// Channel order of the input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorLayout {
    /// `[1, 3, S, S]`
    #[default]
    Nchw,
    /// `[1, S, S, 3]`
    Nhwc,
}

/// Forward letterbox transform: `model = original * scale + pad`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_left: u32,
    pub pad_top: u32,
    pub resized_width: u32,
    pub resized_height: u32,
    pub original_width: u32,
    pub original_height: u32,
    pub target_size: u32,
}

impl Letterbox {
    pub fn compute(width: u32, height: u32, target_size: u32) -> Result<Self, InvalidImageError> {
        if width == 0 || height == 0 {
            return Err(InvalidImageError::ZeroArea { width, height });
        }
        if target_size == 0 {
            return Err(InvalidImageError::ZeroTarget);
        }

        let target = target_size as f32;
        let scale = (target / width as f32).min(target / height as f32);
        // extreme aspect ratios may round an axis to nothing; keep one row/column
        let resized_width = ((width as f32 * scale).round() as u32).clamp(1, target_size);
        let resized_height = ((height as f32 * scale).round() as u32).clamp(1, target_size);

        Ok(Self {
            scale,
            pad_left: (target_size - resized_width) / 2,
            pad_top: (target_size - resized_height) / 2,
            resized_width,
            resized_height,
            original_width: width,
            original_height: height,
            target_size,
        })
    }

    /// Model-space point to original image space.
    #[inline]
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_left as f32) / self.scale,
            (y - self.pad_top as f32) / self.scale,
        )
    }

    /// Original image point to model space.
    #[inline]
    pub fn to_model(&self, x: f32, y: f32) -> (f32, f32) {
        (
            x * self.scale + self.pad_left as f32,
            y * self.scale + self.pad_top as f32,
        )
    }
}

/// Normalized model input plus the transform that produced it.
#[derive(Debug, Clone)]
pub struct PreprocessedTensor {
    pub data: Vec<f32>,
    pub size: u32,
    pub layout: TensorLayout,
    pub letterbox: Letterbox,
}

impl PreprocessedTensor {
    pub fn shape(&self) -> [usize; 4] {
        let s = self.size as usize;
        match self.layout {
            TensorLayout::Nchw => [1, 3, s, s],
            TensorLayout::Nhwc => [1, s, s, 3],
        }
    }
}

/// Letterbox `image` into a `target_size²` tensor.
pub fn preprocess(
    image: &RgbImage,
    target_size: u32,
    layout: TensorLayout,
) -> Result<PreprocessedTensor, InvalidImageError> {
    let (width, height) = image.dimensions();
    let letterbox = Letterbox::compute(width, height, target_size)?;

    let resized: Cow<'_, RgbImage> =
        if (letterbox.resized_width, letterbox.resized_height) == (width, height) {
            Cow::Borrowed(image)
        } else {
            Cow::Owned(imageops::resize(
                image,
                letterbox.resized_width,
                letterbox.resized_height,
                FilterType::Triangle,
            ))
        };

    let size = target_size as usize;
    let plane = size * size;
    let mut data = vec![PAD_VALUE as f32 / 255.0; 3 * plane];

    let (pad_left, pad_top) = (letterbox.pad_left as usize, letterbox.pad_top as usize);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let idx = (y as usize + pad_top) * size + x as usize + pad_left;
        let [r, g, b] = pixel.0;
        match layout {
            TensorLayout::Nchw => {
                data[idx] = r as f32 / 255.0;
                data[plane + idx] = g as f32 / 255.0;
                data[2 * plane + idx] = b as f32 / 255.0;
            }
            TensorLayout::Nhwc => {
                data[idx * 3] = r as f32 / 255.0;
                data[idx * 3 + 1] = g as f32 / 255.0;
                data[idx * 3 + 2] = b as f32 / 255.0;
            }
        }
    }

    Ok(PreprocessedTensor {
        data,
        size: target_size,
        layout,
        letterbox,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const GREY: f32 = PAD_VALUE as f32 / 255.0;

    #[test]
    fn hd_frame_letterboxes_with_vertical_bars() {
        let lb = Letterbox::compute(1280, 720, 640).unwrap();
        assert_eq!(lb.scale, 0.5);
        assert_eq!((lb.resized_width, lb.resized_height), (640, 360));
        assert_eq!(lb.pad_left, 0);
        assert_eq!(lb.pad_top, 140);
    }

    #[test]
    fn portrait_frame_pads_horizontally() {
        let lb = Letterbox::compute(480, 640, 320).unwrap();
        assert_eq!(lb.scale, 0.5);
        assert_eq!((lb.resized_width, lb.resized_height), (240, 320));
        assert_eq!((lb.pad_left, lb.pad_top), (40, 0));
    }

    #[test]
    fn extreme_aspect_keeps_one_row() {
        let lb = Letterbox::compute(10_000, 1, 640).unwrap();
        assert_eq!(lb.resized_width, 640);
        assert_eq!(lb.resized_height, 1);
        assert_eq!(lb.pad_top, 319);
    }

    #[test]
    fn zero_area_is_invalid() {
        assert!(matches!(
            preprocess(&RgbImage::new(0, 10), 640, TensorLayout::Nchw),
            Err(InvalidImageError::ZeroArea { width: 0, height: 10 })
        ));
        assert!(matches!(
            Letterbox::compute(4, 4, 0),
            Err(InvalidImageError::ZeroTarget)
        ));
    }

    #[test]
    fn tensor_is_padded_grey_around_content() {
        // 4x2 white image into 4x4: content rows 1..3, grey rows 0 and 3
        let image = RgbImage::from_pixel(4, 2, Rgb([255, 255, 255]));
        let t = preprocess(&image, 4, TensorLayout::Nchw).unwrap();
        assert_eq!(t.shape(), [1, 3, 4, 4]);
        assert_eq!(t.data.len(), 48);
        for c in 0..3 {
            let plane = &t.data[c * 16..(c + 1) * 16];
            assert!(plane[0..4].iter().all(|&v| v == GREY));
            assert!(plane[4..12].iter().all(|&v| v == 1.0));
            assert!(plane[12..16].iter().all(|&v| v == GREY));
        }
    }

    #[test]
    fn nhwc_interleaves_channels() {
        let image = RgbImage::from_pixel(2, 2, Rgb([255, 0, 51]));
        let t = preprocess(&image, 2, TensorLayout::Nhwc).unwrap();
        assert_eq!(t.shape(), [1, 2, 2, 3]);
        for px in t.data.chunks(3) {
            assert_eq!(px, [1.0, 0.0, 0.2]);
        }
    }

    #[test]
    fn transform_round_trips() {
        let lb = Letterbox::compute(1280, 720, 640).unwrap();
        let (mx, my) = lb.to_model(1000.0, 10.0);
        assert_eq!((mx, my), (500.0, 145.0));
        let (x, y) = lb.to_original(mx, my);
        assert!((x - 1000.0).abs() < 1e-3 && (y - 10.0).abs() < 1e-3);
    }
}
