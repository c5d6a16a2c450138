//! Integer-factor oversampler feeding the oscilloscope's capture ring.
//!
//! Upsampling is zero-stuffing with gain compensation followed by an
//! eighth-order Butterworth anti-imaging lowpass realized on the
//! crate's own [`BiquadX4`] engine, so per-sample cost stays bounded
//! regardless of factor.

use crate::biquad::{BiquadCoeff, BiquadX4};
use crate::kernel;

/// Butterworth pole qualities for four cascaded second-order sections.
const BUTTERWORTH8_Q: [f32; 4] = [0.509_795_6, 0.601_344_9, 0.899_976_2, 2.562_915_4];

/// Normalized anti-imaging cutoff, as a fraction of the base rate.
const CUTOFF_RATIO: f32 = 0.45;

/// Supported oversampling factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OversamplerMode {
    #[default]
    None,
    X2,
    X3,
    X4,
    X6,
    X8,
}

impl OversamplerMode {
    pub fn factor(self) -> usize {
        match self {
            OversamplerMode::None => 1,
            OversamplerMode::X2 => 2,
            OversamplerMode::X3 => 3,
            OversamplerMode::X4 => 4,
            OversamplerMode::X6 => 6,
            OversamplerMode::X8 => 8,
        }
    }
}

/// Streaming upsampler with deferred settings.
#[derive(Debug, Clone, Copy)]
pub struct Oversampler {
    mode: OversamplerMode,
    sample_rate: usize,
    oversampling: usize,
    filter: BiquadX4,
    modified: bool,
}

impl Default for Oversampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Oversampler {
    pub fn new() -> Self {
        Self {
            mode: OversamplerMode::None,
            sample_rate: 0,
            oversampling: 1,
            filter: BiquadX4::default(),
            modified: true,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: usize) {
        if self.sample_rate != sample_rate {
            self.sample_rate = sample_rate;
            self.modified = true;
        }
    }

    pub fn set_mode(&mut self, mode: OversamplerMode) {
        if self.mode != mode {
            self.mode = mode;
            self.modified = true;
        }
    }

    /// True when a settings change is waiting for [`Self::update_settings`].
    pub fn modified(&self) -> bool {
        self.modified
    }

    /// Committed oversampling factor.
    pub fn get_oversampling(&self) -> usize {
        self.oversampling
    }

    /// Commit the pending mode/sample-rate and rebuild the anti-imaging
    /// filter at the oversampled rate.
    pub fn update_settings(&mut self) {
        self.oversampling = self.mode.factor();
        if self.oversampling > 1 && self.sample_rate > 0 {
            let over_rate = (self.oversampling * self.sample_rate) as f32;
            let cutoff = CUTOFF_RATIO * self.sample_rate as f32;
            let sections = BUTTERWORTH8_Q.map(|q| BiquadCoeff::lowpass(cutoff, q, over_rate));
            self.filter.set_sections(&sections);
        } else {
            self.filter.set_sections(&[BiquadCoeff::identity(); 4]);
        }
        self.filter.reset();
        self.modified = false;
    }

    pub fn reset(&mut self) {
        self.filter.reset();
    }

    /// Upsample `src` into `dst`, writing exactly `factor * src.len()`
    /// samples. With factor 1 this degenerates to a copy.
    pub fn upsample(&mut self, dst: &mut [f32], src: &[f32]) {
        let m = self.oversampling;
        if m <= 1 {
            kernel::copy(&mut dst[..src.len()], src);
            return;
        }
        debug_assert_eq!(dst.len(), m * src.len());

        kernel::fill_zero(dst);
        let gain = m as f32;
        for (slot, &s) in dst.chunks_exact_mut(m).zip(src) {
            slot[0] = s * gain;
        }
        self.filter.process_in_place(dst);
    }
}
