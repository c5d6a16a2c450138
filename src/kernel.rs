//! Vector math primitives shared by the analyzer and oscilloscope cores.
//!
//! All operations are plain slice loops so the optimizer can vectorize
//! them; none of them allocate.

use rustfft::num_complex::Complex32;

/// Copy `src` into `dst`.
#[inline]
pub fn copy(dst: &mut [f32], src: &[f32]) {
    debug_assert_eq!(dst.len(), src.len());
    dst.copy_from_slice(src);
}

/// Zero out `dst`.
#[inline]
pub fn fill_zero(dst: &mut [f32]) {
    dst.fill(0.0);
}

/// Element-wise product: `dst[i] = a[i] * b[i]`.
#[inline]
pub fn mul3(dst: &mut [f32], a: &[f32], b: &[f32]) {
    debug_assert_eq!(dst.len(), a.len());
    debug_assert_eq!(dst.len(), b.len());
    for ((d, &x), &y) in dst.iter_mut().zip(a).zip(b) {
        *d = x * y;
    }
}

/// In-place scale: `dst[i] *= k`.
#[inline]
pub fn mul_k2(dst: &mut [f32], k: f32) {
    for d in dst.iter_mut() {
        *d *= k;
    }
}

/// Weighted mix: `dst[i] = dst[i] * k1 + src[i] * k2`.
#[inline]
pub fn mix2(dst: &mut [f32], src: &[f32], k1: f32, k2: f32) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = *d * k1 + s * k2;
    }
}

/// Magnitudes of a packed complex spectrum: `dst[i] = |src[i]|`.
#[inline]
pub fn complex_mod(dst: &mut [f32], src: &[Complex32]) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, c) in dst.iter_mut().zip(src) {
        *d = c.norm();
    }
}
