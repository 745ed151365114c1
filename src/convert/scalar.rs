//! Scalar ITU-R BT.601 YUV 4:2:0 → RGB24 conversion

use crate::capture::RawFrame;

use super::KernelError;

pub(super) fn kernel(frame: &RawFrame, out: &mut [u8]) -> Result<(), KernelError> {
    convert_frame(frame, out);
    Ok(())
}

/// Convert every pixel of a validated frame. Never fails.
pub(super) fn convert_frame(frame: &RawFrame, out: &mut [u8]) {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    for row in 0..height {
        convert_row_tail(frame, out, row, 0, width);
    }
}

/// Convert columns `from..width` of `row`; SIMD kernels use this for remainders.
pub(super) fn convert_row_tail(frame: &RawFrame, out: &mut [u8], row: usize, from: usize, width: usize) {
    let y_plane = &frame.y.data;
    let u_plane = &frame.u.data;
    let v_plane = &frame.v.data;

    let y_row = row * frame.y.row_stride;
    let uv_row = (row / 2) * frame.u.row_stride;
    let uv_step = frame.u.pixel_stride;
    let mut o = (row * width + from) * 3;

    for col in from..width {
        let uv_index = uv_row + (col / 2) * uv_step;
        let [r, g, b] = yuv_to_rgb(y_plane[y_row + col], u_plane[uv_index], v_plane[uv_index]);
        out[o] = r;
        out[o + 1] = g;
        out[o + 2] = b;
        o += 3;
    }
}

#[inline(always)]
pub(crate) fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as i32;
    let u = u as i32 - 128;
    let v = v as i32 - 128;

    let r = y + (1.402f32 * v as f32) as i32;
    let g = y - (0.344136f32 * u as f32) as i32 - (0.714136f32 * v as f32) as i32;
    let b = y + (1.772f32 * u as f32) as i32;

    [clamp255(r), clamp255(g), clamp255(b)]
}

#[inline(always)]
fn clamp255(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}
