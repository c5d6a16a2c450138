//! Streaming FFT spectrum analyzer.
//!
//! Each channel owns a time-domain ring buffer and a smoothed magnitude
//! array; the FFT scratch, window and envelope tables are shared across
//! channels. Parameter setters never apply immediately — they OR bits
//! into a reconfiguration mask that the next [`Analyzer::process`] call
//! resolves, so a half-updated parameter set is never observed by the
//! audio thread.
//!
//! Channels run phase-staggered: their FFT counters start at offsets of
//! `N / channels` samples (rounded down to a multiple of 4), spreading
//! transform work evenly across the refresh period instead of bursting
//! all channels in the same block.

use std::sync::Arc;

use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex32;
use tracing::debug;

use crate::dump::StateSink;
use crate::envelope::{self, NoiseEnvelope};
use crate::kernel;
use crate::window::{self, Window};
use crate::Error;

const R_ENVELOPE: u32 = 1 << 0;
const R_WINDOW: u32 = 1 << 1;
const R_TAU: u32 = 1 << 2;
const R_COUNTERS: u32 = 1 << 3;
const R_ANALYSIS: u32 = 1 << 4;
const R_ALL: u32 = R_ENVELOPE | R_WINDOW | R_TAU | R_COUNTERS | R_ANALYSIS;

/// Ring buffers are padded to this many samples.
const ALIGN: usize = 64;

/// Largest supported FFT rank (65536-point transform).
const MAX_RANK: usize = 16;

/// Frequency grid spacing for [`Analyzer::read_frequencies`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreqScale {
    Linear,
    Logarithmic,
}

#[derive(Debug)]
struct Channel {
    /// Time-domain ring buffer of `buf_size` samples.
    buffer: Vec<f32>,
    /// Smoothed magnitudes, `1 << max_rank` entries.
    amp: Vec<f32>,
    /// Samples accumulated toward the next FFT; negative after an FFT
    /// fires so phase accumulates cleanly across periods.
    counter: isize,
    /// Ring write position.
    head: usize,
    /// Offset from `head` backwards to the analysis window start.
    delay: usize,
    freeze: bool,
    active: bool,
}

/// Multi-channel streaming spectrum analyzer.
pub struct Analyzer {
    channels: Vec<Channel>,
    active: bool,

    max_rank: usize,
    rank: usize,
    sample_rate: usize,
    max_sample_rate: usize,
    buf_size: usize,
    fft_period: isize,
    reactivity: f32,
    tau: f32,
    rate: f32,
    min_rate: f32,
    shift: f32,
    reconfigure: u32,
    window_kind: Window,
    envelope_kind: NoiseEnvelope,

    /// Windowed real signal, reused for magnitudes after the transform.
    sig_re: Vec<f32>,
    /// Packed complex spectrum, `N/2 + 1` bins at the current rank.
    spectrum: Vec<Complex32>,
    fft_scratch: Vec<Complex32>,
    window: Vec<f32>,
    envelope: Vec<f32>,
    /// Forward transforms planned once per rank in `2..=max_rank`.
    ffts: Vec<Arc<dyn RealToComplex<f32>>>,
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("channels", &self.channels.len())
            .field("rank", &self.rank)
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

impl Analyzer {
    /// Allocate an analyzer for `channels` channels supporting FFT ranks
    /// up to `max_rank` and sample rates up to `max_sample_rate`, with
    /// refresh rates no lower than `min_rate` Hz.
    ///
    /// Every buffer, table and FFT plan is allocated here; `process` and
    /// the read paths never allocate.
    pub fn new(
        channels: usize,
        max_rank: usize,
        max_sample_rate: usize,
        min_rate: f32,
    ) -> Result<Self, Error> {
        if channels == 0 {
            return Err(Error::InvalidParameter("channels must be at least 1"));
        }
        if !(2..=MAX_RANK).contains(&max_rank) {
            return Err(Error::InvalidParameter("max_rank out of range"));
        }
        if max_sample_rate == 0 {
            return Err(Error::InvalidParameter("max_sample_rate must be positive"));
        }
        if !(min_rate > 0.0) {
            return Err(Error::InvalidParameter("min_rate must be positive"));
        }

        let fft_max = 1usize << max_rank;
        // The ring must hold one full analysis window plus the samples
        // accumulated over the slowest refresh period.
        let raw = max_rank * 2 + (max_sample_rate as f32 / min_rate) as usize;
        let buf_size = raw.max(fft_max).div_ceil(ALIGN) * ALIGN;

        let mut planner = RealFftPlanner::<f32>::new();
        let ffts: Vec<Arc<dyn RealToComplex<f32>>> =
            (2..=max_rank).map(|r| planner.plan_fft_forward(1 << r)).collect();
        let scratch_len = ffts.iter().map(|f| f.get_scratch_len()).max().unwrap_or(0);

        let channels: Vec<Channel> = (0..channels)
            .map(|_| Channel {
                buffer: vec![0.0; buf_size],
                amp: vec![0.0; fft_max],
                counter: 0,
                head: 0,
                delay: 0,
                freeze: false,
                active: true,
            })
            .collect();

        debug!(
            channels = channels.len(),
            max_rank, buf_size, "analyzer allocated"
        );

        Ok(Self {
            channels,
            active: true,
            max_rank,
            rank: max_rank,
            sample_rate: 0,
            max_sample_rate,
            buf_size,
            fft_period: 0,
            reactivity: 0.0,
            tau: 1.0,
            rate: min_rate,
            min_rate,
            shift: 1.0,
            reconfigure: R_ALL,
            window_kind: Window::Hann,
            envelope_kind: NoiseEnvelope::Pink,
            sig_re: vec![0.0; fft_max],
            spectrum: vec![Complex32::default(); (fft_max >> 1) + 1],
            fft_scratch: vec![Complex32::default(); scratch_len],
            window: vec![0.0; fft_max],
            envelope: vec![0.0; fft_max],
            ffts,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn fft_size(&self) -> usize {
        1 << self.rank
    }

    pub fn sample_rate(&self) -> usize {
        self.sample_rate
    }

    /// True while parameter changes are waiting for the next `process`.
    pub fn pending_reconfigure(&self) -> bool {
        self.reconfigure != 0
    }

    /// Gate analysis for the whole instance; inactive analyzers zero
    /// their magnitude arrays at the next FFT instead of transforming.
    pub fn set_activity(&mut self, active: bool) {
        self.active = active;
    }

    pub fn set_sample_rate(&mut self, sample_rate: usize) {
        let sample_rate = sample_rate.min(self.max_sample_rate);
        if self.sample_rate != sample_rate {
            self.sample_rate = sample_rate;
            self.reconfigure |= R_ALL;
        }
    }

    /// Set the spectrum refresh rate in Hz (clamped to the configured
    /// minimum).
    pub fn set_rate(&mut self, rate: f32) {
        let rate = rate.max(self.min_rate);
        if self.rate != rate {
            self.rate = rate;
            self.reconfigure |= R_COUNTERS;
        }
    }

    pub fn set_window(&mut self, kind: Window) {
        if self.window_kind != kind {
            self.window_kind = kind;
            self.reconfigure |= R_WINDOW;
        }
    }

    pub fn set_envelope(&mut self, kind: NoiseEnvelope) {
        if self.envelope_kind != kind {
            self.envelope_kind = kind;
            self.reconfigure |= R_ENVELOPE;
        }
    }

    /// Linear gain applied through the envelope table.
    pub fn set_shift(&mut self, shift: f32) {
        if self.shift != shift {
            self.shift = shift;
            self.reconfigure |= R_ENVELOPE;
        }
    }

    /// Smoothing time constant in seconds; the magnitude step response
    /// reaches -3 dB after this long.
    pub fn set_reactivity(&mut self, reactivity: f32) {
        if self.reactivity != reactivity {
            self.reactivity = reactivity;
            self.reconfigure |= R_TAU;
        }
    }

    /// Set the FFT rank. Returns `false` when the rank is out of
    /// `[2, max_rank]`; setting the current rank is a no-op that keeps
    /// the accumulated analysis.
    pub fn set_rank(&mut self, rank: usize) -> bool {
        if !(2..=self.max_rank).contains(&rank) {
            return false;
        }
        if self.rank != rank {
            self.rank = rank;
            self.reconfigure |= R_ALL;
        }
        true
    }

    /// Frozen channels keep their current magnitudes across FFTs.
    pub fn freeze_channel(&mut self, channel: usize, freeze: bool) -> bool {
        match self.channels.get_mut(channel) {
            Some(c) => {
                c.freeze = freeze;
                true
            }
            None => false,
        }
    }

    pub fn enable_channel(&mut self, channel: usize, enable: bool) -> bool {
        match self.channels.get_mut(channel) {
            Some(c) => {
                c.active = enable;
                true
            }
            None => false,
        }
    }

    /// Apply pending reconfiguration bits in order: envelope, analysis
    /// clear, window, smoothing factor, counters.
    fn apply_reconfigure(&mut self) {
        if self.reconfigure == 0 {
            return;
        }

        let fft_size = 1usize << self.rank;
        self.fft_period = ((self.sample_rate as f32 / self.rate) as isize).max(1);

        if self.reconfigure & R_ENVELOPE != 0 {
            envelope::reverse_noise(&mut self.envelope[..fft_size], self.envelope_kind);
            kernel::mul_k2(&mut self.envelope[..fft_size], self.shift / fft_size as f32);
        }
        if self.reconfigure & R_ANALYSIS != 0 {
            for c in &mut self.channels {
                kernel::fill_zero(&mut c.amp[..fft_size]);
            }
        }
        if self.reconfigure & R_WINDOW != 0 {
            window::window(&mut self.window[..fft_size], self.window_kind);
        }
        if self.reconfigure & R_TAU != 0 {
            let ffts_per_reactivity =
                self.sample_rate as f32 / self.fft_period as f32 * self.reactivity;
            self.tau = if ffts_per_reactivity > 0.0 {
                1.0 - ((1.0 - std::f32::consts::FRAC_1_SQRT_2).ln() / ffts_per_reactivity).exp()
            } else {
                1.0
            };
        }
        if self.reconfigure & R_COUNTERS != 0 {
            // Stagger channel phases on a 4-sample boundary, keeping the
            // window start inside the ring.
            let mut step = fft_size / self.channels.len();
            step -= step & 3;
            let max_delay = self.buf_size - fft_size;
            for (i, c) in self.channels.iter_mut().enumerate() {
                let delay = (i * step).min(max_delay);
                c.counter = delay as isize;
                c.delay = delay;
            }
        }

        debug!(
            mask = self.reconfigure,
            rank = self.rank,
            period = self.fft_period,
            tau = self.tau,
            "analyzer reconfigured"
        );
        self.reconfigure = 0;
    }

    /// Append samples for one channel, firing FFTs as refresh periods
    /// elapse. Out-of-range channels are ignored; a zero-length input
    /// still applies pending reconfiguration.
    pub fn process(&mut self, channel: usize, input: &[f32]) {
        if channel >= self.channels.len() {
            return;
        }
        self.apply_reconfigure();

        let fft_size = 1usize << self.rank;
        let fft_csize = (fft_size >> 1) + 1;
        let buf_size = self.buf_size;
        let period = self.fft_period;

        let mut remaining = input;
        while !remaining.is_empty() {
            let c = &mut self.channels[channel];
            let to_process = period - c.counter;

            if to_process <= 0 {
                // A transform is due.
                if !c.freeze {
                    if self.active && c.active {
                        let offset = (c.head + buf_size - c.delay) % buf_size;
                        let tail = buf_size - offset;
                        if tail < fft_size {
                            // Window start wraps: two-segment multiply.
                            kernel::mul3(
                                &mut self.sig_re[..tail],
                                &c.buffer[offset..],
                                &self.window[..tail],
                            );
                            kernel::mul3(
                                &mut self.sig_re[tail..fft_size],
                                &c.buffer[..fft_size - tail],
                                &self.window[tail..fft_size],
                            );
                        } else {
                            kernel::mul3(
                                &mut self.sig_re[..fft_size],
                                &c.buffer[offset..offset + fft_size],
                                &self.window[..fft_size],
                            );
                        }

                        let fft = &self.ffts[self.rank - 2];
                        let scratch = &mut self.fft_scratch[..fft.get_scratch_len()];
                        if fft
                            .process_with_scratch(
                                &mut self.sig_re[..fft_size],
                                &mut self.spectrum[..fft_csize],
                                scratch,
                            )
                            .is_ok()
                        {
                            kernel::complex_mod(
                                &mut self.sig_re[..fft_csize],
                                &self.spectrum[..fft_csize],
                            );
                            kernel::mix2(
                                &mut c.amp[..fft_csize],
                                &self.sig_re[..fft_csize],
                                1.0 - self.tau,
                                self.tau,
                            );
                        }
                    } else {
                        kernel::fill_zero(&mut c.amp[..fft_size]);
                    }
                }
                c.counter -= period;
            } else {
                // Append, clamped so the ring window is never overrun
                // between two transforms.
                let take = (to_process as usize).min(remaining.len()).min(fft_size);
                let tail = buf_size - c.head;
                if tail < take {
                    kernel::copy(&mut c.buffer[c.head..], &remaining[..tail]);
                    kernel::copy(&mut c.buffer[..take - tail], &remaining[tail..take]);
                } else {
                    kernel::copy(&mut c.buffer[c.head..c.head + take], &remaining[..take]);
                }
                c.head = (c.head + take) % buf_size;
                c.counter += take as isize;
                remaining = &remaining[take..];
            }
        }
    }

    /// Read smoothed, envelope-compensated magnitudes at the given bin
    /// indices. Indices are clamped to the valid `N/2 + 1` bins.
    pub fn get_spectrum(&self, channel: usize, out: &mut [f32], idx: &[u32]) -> bool {
        let Some(c) = self.channels.get(channel) else {
            return false;
        };
        let limit = (1usize << self.rank >> 1) + 1;
        for (o, &i) in out.iter_mut().zip(idx) {
            let j = (i as usize).min(limit);
            *o = c.amp[j] * self.envelope[j];
        }
        true
    }

    /// Single-bin variant of [`Analyzer::get_spectrum`].
    pub fn get_level(&self, channel: usize, idx: u32) -> f32 {
        let Some(c) = self.channels.get(channel) else {
            return 0.0;
        };
        let j = (idx as usize).min((1usize << self.rank >> 1) + 1);
        c.amp[j] * self.envelope[j]
    }

    /// Fill `frq` with a frequency grid from `start` to `stop`.
    pub fn read_frequencies(&self, frq: &mut [f32], start: f32, stop: f32, scale: FreqScale) -> bool {
        let count = frq.len();
        if count == 0 {
            return false;
        }
        if count == 1 {
            frq[0] = start;
            return true;
        }

        match scale {
            FreqScale::Logarithmic => {
                let norm = (stop / start).ln() / (count - 1) as f32;
                for (i, f) in frq[..count - 1].iter_mut().enumerate() {
                    *f = start * (i as f32 * norm).exp();
                }
            }
            FreqScale::Linear => {
                let norm = (stop - start) / (count - 1) as f32;
                for (i, f) in frq[..count - 1].iter_mut().enumerate() {
                    *f = start + i as f32 * norm;
                }
            }
        }
        frq[count - 1] = stop;
        true
    }

    /// Fill a logarithmic frequency grid and map each frequency to its
    /// FFT bin index (clamped to `N/2 + 1`).
    pub fn get_frequencies(&self, frq: &mut [f32], idx: &mut [u32], start: f32, stop: f32) {
        let count = frq.len().min(idx.len());
        if count == 0 {
            return;
        }
        let fft_size = 1usize << self.rank;
        let fft_csize = (fft_size >> 1) + 1;
        let scale = fft_size as f32 / self.sample_rate.max(1) as f32;
        let norm = if count > 1 {
            (stop / start).ln() / (count - 1) as f32
        } else {
            0.0
        };

        for i in 0..count {
            let f = start * (i as f32 * norm).exp();
            frq[i] = f;
            idx[i] = ((scale * f) as usize).min(fft_csize) as u32;
        }
    }

    /// Write internal state through a [`StateSink`].
    pub fn dump(&self, v: &mut dyn StateSink) {
        v.write_usize("channels", self.channels.len());
        v.write_usize("max_rank", self.max_rank);
        v.write_usize("rank", self.rank);
        v.write_usize("sample_rate", self.sample_rate);
        v.write_usize("max_sample_rate", self.max_sample_rate);
        v.write_usize("buf_size", self.buf_size);
        v.write_usize("fft_period", self.fft_period.max(0) as usize);
        v.write_f32("reactivity", self.reactivity);
        v.write_f32("tau", self.tau);
        v.write_f32("rate", self.rate);
        v.write_f32("min_rate", self.min_rate);
        v.write_f32("shift", self.shift);
        v.write_usize("reconfigure", self.reconfigure as usize);
        v.write_str("window", &format!("{:?}", self.window_kind));
        v.write_str("envelope", &format!("{:?}", self.envelope_kind));
        v.write_bool("active", self.active);

        v.begin_array("channels", self.channels.len());
        for c in &self.channels {
            v.begin_object("channel");
            v.write_usize("head", c.head);
            v.write_usize("delay", c.delay);
            v.write_usize("counter", c.counter.max(0) as usize);
            v.write_bool("freeze", c.freeze);
            v.write_bool("active", c.active);
            v.end_object();
        }
        v.end_array();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| (std::f32::consts::TAU * freq * n as f32 / sample_rate).sin())
            .collect()
    }

    fn ready(channels: usize, max_rank: usize) -> Analyzer {
        let mut a = Analyzer::new(channels, max_rank, 48_000, 1.0).unwrap();
        a.set_sample_rate(48_000);
        a.set_rate(20.0);
        a
    }

    #[test]
    fn rejects_degenerate_parameters() {
        assert!(Analyzer::new(0, 10, 48_000, 1.0).is_err());
        assert!(Analyzer::new(1, 1, 48_000, 1.0).is_err());
        assert!(Analyzer::new(1, 10, 48_000, 0.0).is_err());
    }

    #[test]
    fn counters_stagger_across_channels() {
        let mut a = ready(4, 8);
        a.process(0, &[]);
        let counters: Vec<isize> = a.channels.iter().map(|c| c.counter).collect();
        assert_eq!(counters, vec![0, 64, 128, 192]);
        let delays: Vec<usize> = a.channels.iter().map(|c| c.delay).collect();
        assert_eq!(delays, vec![0, 64, 128, 192]);
    }

    #[test]
    fn reconfigure_is_fused_into_process() {
        let mut a = ready(1, 10);
        a.process(0, &[]);
        assert!(!a.pending_reconfigure());

        assert!(a.set_rank(9));
        a.set_window(Window::Hamming);
        a.set_rate(15.0);
        assert!(a.pending_reconfigure());

        a.process(0, &[]);
        assert!(!a.pending_reconfigure());
        assert_eq!(a.fft_size(), 512);
        // Hamming floor at the table edge, regenerated for N = 512.
        assert!((a.window[0] - 0.08).abs() < 1e-5);
        assert!((a.window[256] - 1.0).abs() < 1e-5);
        assert_eq!(a.fft_period, 3_200);
        assert_eq!(a.channels[0].counter, 0);
    }

    #[test]
    fn setting_current_rank_keeps_analysis() {
        let mut a = ready(1, 9);
        a.set_reactivity(0.01);
        a.process(0, &sine(1_500.0, 48_000.0, 24_000));
        let bin = (1_500.0f32 * 512.0 / 48_000.0).round() as u32;
        let before = a.get_level(0, bin);
        assert!(before > 0.0);

        assert!(a.set_rank(9));
        assert!(!a.pending_reconfigure());
        a.process(0, &[]);
        assert_eq!(a.get_level(0, bin), before);
    }

    #[test]
    fn invalid_rank_is_rejected() {
        let mut a = ready(1, 10);
        assert!(!a.set_rank(1));
        assert!(!a.set_rank(11));
        assert!(a.set_rank(10));
    }

    #[test]
    fn frozen_channel_keeps_magnitudes() {
        let mut a = ready(1, 9);
        a.set_reactivity(0.01);
        a.process(0, &sine(1_000.0, 48_000.0, 24_000));
        let bin = (1_000.0f32 * 512.0 / 48_000.0).round() as u32;
        let before = a.get_level(0, bin);
        assert!(before > 0.0);

        assert!(a.freeze_channel(0, true));
        a.process(0, &sine(4_000.0, 48_000.0, 24_000));
        assert_eq!(a.get_level(0, bin), before);
    }

    #[test]
    fn disabled_channel_zeroes_magnitudes() {
        let mut a = ready(1, 9);
        a.set_reactivity(0.01);
        a.process(0, &sine(1_000.0, 48_000.0, 24_000));
        let bin = (1_000.0f32 * 512.0 / 48_000.0).round() as u32;
        assert!(a.get_level(0, bin) > 0.0);

        assert!(a.enable_channel(0, false));
        a.process(0, &sine(1_000.0, 48_000.0, 4_800));
        assert_eq!(a.get_level(0, bin), 0.0);
    }

    #[test]
    fn out_of_range_channel_calls_are_inert() {
        let mut a = ready(2, 8);
        a.process(5, &[1.0; 16]);
        assert!(!a.freeze_channel(2, true));
        assert!(!a.enable_channel(9, false));
        assert_eq!(a.get_level(3, 0), 0.0);
        let mut out = [0.0; 4];
        assert!(!a.get_spectrum(2, &mut out, &[0, 1, 2, 3]));
    }

    #[test]
    fn frequency_grids_hit_endpoints() {
        let a = ready(1, 10);
        let mut frq = [0.0f32; 16];
        assert!(a.read_frequencies(&mut frq, 20.0, 20_000.0, FreqScale::Logarithmic));
        assert_eq!(frq[0], 20.0);
        assert_eq!(frq[15], 20_000.0);
        for pair in frq.windows(2) {
            assert!(pair[1] > pair[0]);
        }

        assert!(a.read_frequencies(&mut frq, 0.0, 1_500.0, FreqScale::Linear));
        assert_eq!(frq[0], 0.0);
        assert_eq!(frq[15], 1_500.0);
        assert!((frq[1] - 100.0).abs() < 1e-3);

        assert!(!a.read_frequencies(&mut [], 20.0, 20_000.0, FreqScale::Linear));
    }

    #[test]
    fn frequencies_map_to_clamped_bins() {
        let mut a = ready(1, 10);
        a.process(0, &[]);
        let mut frq = [0.0f32; 8];
        let mut idx = [0u32; 8];
        a.get_frequencies(&mut frq, &mut idx, 100.0, 40_000.0);
        // 1024 bins at 48 kHz: 100 Hz lands on bin 2, 40 kHz clamps.
        assert_eq!(idx[0], 2);
        assert_eq!(idx[7], 513);
        for pair in idx.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn dump_reports_counters() {
        let mut a = ready(2, 8);
        a.process(0, &[]);
        let mut dump = crate::dump::TextDump::new();
        a.dump(&mut dump);
        let text = dump.as_str();
        assert!(text.contains("channels = 2"));
        assert!(text.contains("rank = 8"));
        assert!(text.contains("reconfigure = 0"));
    }
}
