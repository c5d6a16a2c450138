//! Inverse-noise envelope tables for spectrum display compensation.
//!
//! Post-multiplying FFT magnitudes by one of these tables flattens the
//! spectrum of the named noise: feeding pink noise through an analyzer
//! with the pink envelope yields a flat trace.

/// Noise shapes the analyzer can compensate for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoiseEnvelope {
    White,
    #[default]
    Pink,
    Brown,
    Blue,
    Violet,
}

impl NoiseEnvelope {
    /// Per-bin exponent of the *inverse* spectral shape.
    ///
    /// Pink noise falls off as `f^-1/2` in amplitude, so its inverse grows
    /// as `f^1/2`; brown is twice as steep, blue and violet mirror them.
    fn reverse_exponent(self) -> f32 {
        match self {
            NoiseEnvelope::White => 0.0,
            NoiseEnvelope::Pink => 0.5,
            NoiseEnvelope::Brown => 1.0,
            NoiseEnvelope::Blue => -0.5,
            NoiseEnvelope::Violet => -1.0,
        }
    }
}

/// Fill `tbl` with the inverse spectral shape of the given noise.
///
/// `tbl[k]` corresponds to FFT bin `k`; the DC bin borrows the shape of
/// bin 1 so the table stays finite. Pure function of `(tbl.len(), kind)`.
pub fn reverse_noise(tbl: &mut [f32], kind: NoiseEnvelope) {
    let e = kind.reverse_exponent();
    if e == 0.0 {
        tbl.fill(1.0);
        return;
    }
    for (k, v) in tbl.iter_mut().enumerate() {
        *v = (k.max(1) as f32).powf(e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn white_is_flat() {
        let mut tbl = [0.0; 64];
        reverse_noise(&mut tbl, NoiseEnvelope::White);
        assert!(tbl.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn pink_grows_as_sqrt_of_bin() {
        let mut tbl = [0.0; 128];
        reverse_noise(&mut tbl, NoiseEnvelope::Pink);
        assert!((tbl[4] / tbl[1] - 2.0).abs() < 1e-6);
        assert!((tbl[64] / tbl[16] - 2.0).abs() < 1e-6);
        assert_eq!(tbl[0], tbl[1]);
    }

    #[test]
    fn violet_attenuates_high_bins() {
        let mut tbl = [0.0; 128];
        reverse_noise(&mut tbl, NoiseEnvelope::Violet);
        assert!(tbl[100] < tbl[10]);
        assert!((tbl[10] * 10.0 - 1.0).abs() < 1e-6);
    }
}
