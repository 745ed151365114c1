//! Fixed-point SIMD YUV 4:2:0 → RGB24 conversion
//!
//! Eight pixels per iteration. Coefficients are in Q7 so that the widest
//! product (227 * 128) still fits a signed 16-bit lane:
//!
//! | term          | float    | Q7  |
//! |---------------|----------|-----|
//! | R from V'     | 1.402    | 179 |
//! | G from U'     | 0.344136 | 44  |
//! | G from V'     | 0.714136 | 91  |
//! | B from U'     | 1.772    | 227 |
//!
//! Results differ from the scalar path by at most a couple of levels per
//! channel (arithmetic shift rounds toward negative infinity).

#![cfg_attr(
    not(any(target_arch = "x86_64", target_arch = "aarch64")),
    allow(dead_code)
)]

use crate::capture::RawFrame;

use super::{Kernel, KernelError};

const C_RV: i16 = 179;
const C_GU: i16 = 44;
const C_GV: i16 = 91;
const C_BU: i16 = 227;

/// Lane count of one iteration.
const LANES: usize = 8;

/// Capability probe. Returns the fast kernel when the CPU supports it.
pub(super) fn probe() -> Option<(Kernel, &'static str)> {
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("sse2") {
            return Some((x86::kernel, "sse2"));
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        if std::arch::is_aarch64_feature_detected!("neon") {
            return Some((neon::kernel, "neon"));
        }
    }
    None
}

/// Gather the four chroma samples for pixels `col..col + 8` and duplicate each
/// across its 2-pixel pair.
#[inline(always)]
fn gather_chroma(plane: &[u8], row_offset: usize, col: usize, step: usize) -> [u8; LANES] {
    let mut dup = [0u8; LANES];
    for i in 0..LANES / 2 {
        let sample = plane[row_offset + (col / 2 + i) * step];
        dup[2 * i] = sample;
        dup[2 * i + 1] = sample;
    }
    dup
}

fn check_layout(frame: &RawFrame) -> Result<(), KernelError> {
    match frame.u.pixel_stride {
        1 | 2 => Ok(()),
        other => Err(KernelError::UnsupportedPixelStride(other)),
    }
}

#[cfg(target_arch = "x86_64")]
mod x86 {
    use std::arch::x86_64::*;

    use super::*;
    use crate::convert::scalar;

    pub(super) fn kernel(frame: &RawFrame, out: &mut [u8]) -> Result<(), KernelError> {
        check_layout(frame)?;
        // SAFETY: only reached after the runtime probe confirmed SSE2.
        unsafe { convert_sse2(frame, out) };
        Ok(())
    }

    #[target_feature(enable = "sse2")]
    unsafe fn convert_sse2(frame: &RawFrame, out: &mut [u8]) {
        let width = frame.width() as usize;
        let height = frame.height() as usize;
        let (y_plane, u_plane, v_plane) = (&frame.y.data, &frame.u.data, &frame.v.data);
        let step = frame.u.pixel_stride;

        let zero = _mm_setzero_si128();
        let bias = _mm_set1_epi16(128);
        let c_rv = _mm_set1_epi16(C_RV);
        let c_gu = _mm_set1_epi16(C_GU);
        let c_gv = _mm_set1_epi16(C_GV);
        let c_bu = _mm_set1_epi16(C_BU);

        for row in 0..height {
            let y_row = row * frame.y.row_stride;
            let uv_row = (row / 2) * frame.u.row_stride;
            let out_row = row * width * 3;

            let mut col = 0;
            while col + LANES <= width {
                let luma = &y_plane[y_row + col..y_row + col + LANES];
                let u8s = gather_chroma(u_plane, uv_row, col, step);
                let v8s = gather_chroma(v_plane, uv_row, col, step);

                let y = _mm_unpacklo_epi8(_mm_loadl_epi64(luma.as_ptr() as *const __m128i), zero);
                let u = _mm_unpacklo_epi8(_mm_loadl_epi64(u8s.as_ptr() as *const __m128i), zero);
                let v = _mm_unpacklo_epi8(_mm_loadl_epi64(v8s.as_ptr() as *const __m128i), zero);
                let u = _mm_sub_epi16(u, bias);
                let v = _mm_sub_epi16(v, bias);

                let r = _mm_add_epi16(y, _mm_srai_epi16::<7>(_mm_mullo_epi16(c_rv, v)));
                let g = _mm_sub_epi16(
                    _mm_sub_epi16(y, _mm_srai_epi16::<7>(_mm_mullo_epi16(c_gu, u))),
                    _mm_srai_epi16::<7>(_mm_mullo_epi16(c_gv, v)),
                );
                let b = _mm_add_epi16(y, _mm_srai_epi16::<7>(_mm_mullo_epi16(c_bu, u)));

                let mut r8 = [0u8; 16];
                let mut g8 = [0u8; 16];
                let mut b8 = [0u8; 16];
                _mm_storeu_si128(r8.as_mut_ptr() as *mut __m128i, _mm_packus_epi16(r, r));
                _mm_storeu_si128(g8.as_mut_ptr() as *mut __m128i, _mm_packus_epi16(g, g));
                _mm_storeu_si128(b8.as_mut_ptr() as *mut __m128i, _mm_packus_epi16(b, b));

                let dst = &mut out[out_row + col * 3..out_row + (col + LANES) * 3];
                for i in 0..LANES {
                    dst[3 * i] = r8[i];
                    dst[3 * i + 1] = g8[i];
                    dst[3 * i + 2] = b8[i];
                }
                col += LANES;
            }

            scalar::convert_row_tail(frame, out, row, col, width);
        }
    }
}

#[cfg(target_arch = "aarch64")]
mod neon {
    use std::arch::aarch64::*;

    use super::*;
    use crate::convert::scalar;

    pub(super) fn kernel(frame: &RawFrame, out: &mut [u8]) -> Result<(), KernelError> {
        check_layout(frame)?;
        // SAFETY: only reached after the runtime probe confirmed NEON.
        unsafe { convert_neon(frame, out) };
        Ok(())
    }

    #[target_feature(enable = "neon")]
    unsafe fn convert_neon(frame: &RawFrame, out: &mut [u8]) {
        let width = frame.width() as usize;
        let height = frame.height() as usize;
        let (y_plane, u_plane, v_plane) = (&frame.y.data, &frame.u.data, &frame.v.data);
        let step = frame.u.pixel_stride;

        let bias = vdupq_n_s16(128);
        let c_rv = vdupq_n_s16(C_RV);
        let c_gu = vdupq_n_s16(C_GU);
        let c_gv = vdupq_n_s16(C_GV);
        let c_bu = vdupq_n_s16(C_BU);

        for row in 0..height {
            let y_row = row * frame.y.row_stride;
            let uv_row = (row / 2) * frame.u.row_stride;
            let out_row = row * width * 3;

            let mut col = 0;
            while col + LANES <= width {
                let luma = &y_plane[y_row + col..y_row + col + LANES];
                let u8s = gather_chroma(u_plane, uv_row, col, step);
                let v8s = gather_chroma(v_plane, uv_row, col, step);

                let y = vreinterpretq_s16_u16(vmovl_u8(vld1_u8(luma.as_ptr())));
                let u = vsubq_s16(vreinterpretq_s16_u16(vmovl_u8(vld1_u8(u8s.as_ptr()))), bias);
                let v = vsubq_s16(vreinterpretq_s16_u16(vmovl_u8(vld1_u8(v8s.as_ptr()))), bias);

                let r = vaddq_s16(y, vshrq_n_s16::<7>(vmulq_s16(c_rv, v)));
                let g = vsubq_s16(
                    vsubq_s16(y, vshrq_n_s16::<7>(vmulq_s16(c_gu, u))),
                    vshrq_n_s16::<7>(vmulq_s16(c_gv, v)),
                );
                let b = vaddq_s16(y, vshrq_n_s16::<7>(vmulq_s16(c_bu, u)));

                let rgb = uint8x8x3_t(vqmovun_s16(r), vqmovun_s16(g), vqmovun_s16(b));
                let dst = &mut out[out_row + col * 3..out_row + (col + LANES) * 3];
                vst3_u8(dst.as_mut_ptr(), rgb);
                col += LANES;
            }

            scalar::convert_row_tail(frame, out, row, col, width);
        }
    }
}
