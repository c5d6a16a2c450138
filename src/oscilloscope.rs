//! Triggered oscilloscope capture engine.
//!
//! Input is upsampled into a circular capture ring whose history serves
//! as pre-trigger material. Every ring sample is fed to the trigger
//! while acquiring; on a fire the engine splices the pre-trigger window
//! out of the ring, then streams post-trigger samples into a linear
//! sweep buffer until the sweep is complete, at which point it returns
//! to acquisition. No trigger events are accepted mid-sweep.

use tracing::{debug, trace};

use crate::dump::StateSink;
use crate::kernel;
use crate::oversampler::{Oversampler, OversamplerMode};
use crate::trigger::{Trigger, TriggerState, TriggerType};

/// Capture ring size; a common multiple of every oversampling factor so
/// batch ingestion always lands on a factor boundary.
pub const CAPTURE_BUFFER_SIZE: usize = 196_608;
/// Linear sweep buffer size.
pub const SWEEP_BUFFER_SIZE: usize = 196_608;

/// What `process` writes to its output stream; capture is unaffected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Muted,
    Copy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureState {
    Acquiring,
    Sweeping,
}

/// Oversampled, edge-triggered capture engine.
#[derive(Debug)]
pub struct Oscilloscope {
    sample_rate: usize,
    over_sample_rate: usize,
    oversampling: usize,
    over_mode: OversamplerMode,
    trigger_type: TriggerType,
    trigger_level: f32,
    output_mode: OutputMode,
    state: CaptureState,

    capture: Vec<f32>,
    /// Ring write position.
    buf_head: usize,
    /// While sweeping: read cursor into the ring, starting at the
    /// trigger sample and rolled forward past every drained segment.
    trigger_at: usize,
    post_remaining: usize,

    sweep: Vec<f32>,
    sweep_head: usize,
    sweep_complete: bool,

    pre_trigger_time: f32,
    post_trigger_time: f32,
    pre_trigger: usize,
    post_trigger: usize,
    limit: usize,

    over: Oversampler,
    trigger: Trigger,
    sync: bool,
}

impl Default for Oscilloscope {
    fn default() -> Self {
        Self::new()
    }
}

impl Oscilloscope {
    /// Allocate the capture ring and sweep buffer. All later calls are
    /// allocation-free.
    pub fn new() -> Self {
        Self {
            sample_rate: 0,
            over_sample_rate: 0,
            oversampling: 1,
            over_mode: OversamplerMode::None,
            trigger_type: TriggerType::None,
            trigger_level: 0.0,
            output_mode: OutputMode::Muted,
            state: CaptureState::Acquiring,
            capture: vec![0.0; CAPTURE_BUFFER_SIZE],
            buf_head: 0,
            trigger_at: 0,
            post_remaining: 0,
            sweep: vec![0.0; SWEEP_BUFFER_SIZE],
            sweep_head: 0,
            sweep_complete: false,
            pre_trigger_time: 0.0,
            post_trigger_time: 0.0,
            pre_trigger: 0,
            post_trigger: 0,
            limit: 0,
            over: Oversampler::new(),
            trigger: Trigger::new(),
            sync: true,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: usize) {
        if self.sample_rate != sample_rate {
            self.sample_rate = sample_rate;
            self.sync = true;
        }
    }

    pub fn set_oversampler_mode(&mut self, mode: OversamplerMode) {
        if self.over_mode != mode {
            self.over_mode = mode;
            self.sync = true;
        }
    }

    pub fn set_trigger_type(&mut self, kind: TriggerType) {
        if self.trigger_type != kind {
            self.trigger_type = kind;
            self.sync = true;
        }
    }

    pub fn set_trigger_level(&mut self, level: f32) {
        if self.trigger_level != level {
            self.trigger_level = level;
            self.sync = true;
        }
    }

    pub fn set_output_mode(&mut self, mode: OutputMode) {
        self.output_mode = mode;
    }

    /// Seconds of history kept ahead of the trigger point.
    pub fn set_pre_trigger_time(&mut self, seconds: f32) {
        if self.pre_trigger_time != seconds {
            self.pre_trigger_time = seconds;
            self.sync = true;
        }
    }

    /// Seconds captured after the trigger point.
    pub fn set_post_trigger_time(&mut self, seconds: f32) {
        if self.post_trigger_time != seconds {
            self.post_trigger_time = seconds;
            self.sync = true;
        }
    }

    pub fn oversampling(&self) -> usize {
        self.oversampling
    }

    pub fn pre_trigger_samples(&self) -> usize {
        self.pre_trigger
    }

    pub fn post_trigger_samples(&self) -> usize {
        self.post_trigger
    }

    /// Length of an assembled sweep in oversampled samples.
    pub fn sweep_length(&self) -> usize {
        self.limit
    }

    /// True from sweep assembly until the next trigger fire (or settings
    /// sync).
    pub fn sweep_complete(&self) -> bool {
        self.sweep_complete
    }

    /// The assembled sweep: `pre_trigger_samples()` of history, then the
    /// trigger-causing sample, then the post-trigger run.
    pub fn sweep(&self) -> &[f32] {
        &self.sweep[..self.limit]
    }

    /// Apply pending settings. Derives the oversampled geometry, clamps
    /// pre/post spans to the buffers, writes the clamped times back and
    /// re-arms capture.
    pub fn update_settings(&mut self) {
        if !self.sync {
            return;
        }

        self.over.set_sample_rate(self.sample_rate);
        self.over.set_mode(self.over_mode);
        if self.over.modified() {
            self.over.update_settings();
        }
        self.oversampling = self.over.get_oversampling();
        self.over_sample_rate = self.oversampling * self.sample_rate;

        let min_buf = CAPTURE_BUFFER_SIZE.min(SWEEP_BUFFER_SIZE);
        self.pre_trigger = seconds_to_samples(self.over_sample_rate, self.pre_trigger_time).min(min_buf);
        self.pre_trigger_time = samples_to_seconds(self.over_sample_rate, self.pre_trigger);

        let available_post = SWEEP_BUFFER_SIZE - self.pre_trigger;
        self.post_trigger =
            seconds_to_samples(self.over_sample_rate, self.post_trigger_time).min(available_post);
        self.post_trigger_time = samples_to_seconds(self.over_sample_rate, self.post_trigger);

        self.limit = self.pre_trigger + self.post_trigger;
        self.sweep_head = 0;
        self.sweep_complete = false;
        self.buf_head = 0;
        self.trigger_at = 0;
        self.post_remaining = 0;
        self.state = CaptureState::Acquiring;

        self.trigger.set_post_trigger_samples(self.post_trigger);
        self.trigger.set_trigger_type(self.trigger_type);
        self.trigger.set_trigger_level(self.trigger_level);
        self.trigger.update_settings();

        self.sync = false;
        debug!(
            oversampling = self.oversampling,
            pre = self.pre_trigger,
            post = self.post_trigger,
            "oscilloscope settings applied"
        );
    }

    /// Copy the pre-trigger history into the sweep buffer, excluding the
    /// trigger sample itself (it opens the post-trigger run).
    fn splice_pre_trigger(&mut self) {
        if self.pre_trigger == 0 {
            return;
        }
        let trig = self.trigger_at;
        let copy_head = (trig + CAPTURE_BUFFER_SIZE - self.pre_trigger) % CAPTURE_BUFFER_SIZE;

        if copy_head >= trig {
            // The window wraps around the ring end.
            let first = CAPTURE_BUFFER_SIZE - copy_head;
            kernel::copy(
                &mut self.sweep[self.sweep_head..self.sweep_head + first],
                &self.capture[copy_head..],
            );
            self.sweep_head += first;
            kernel::copy(
                &mut self.sweep[self.sweep_head..self.sweep_head + trig],
                &self.capture[..trig],
            );
            self.sweep_head += trig;
        } else {
            kernel::copy(
                &mut self.sweep[self.sweep_head..self.sweep_head + (trig - copy_head)],
                &self.capture[copy_head..trig],
            );
            self.sweep_head += trig - copy_head;
        }
    }

    /// Move already-captured post-trigger samples into the sweep buffer.
    /// Up to two contiguous ring segments can be available; the read
    /// cursor rolls forward past each one.
    fn drain_post_trigger(&mut self) {
        for _ in 0..2 {
            if self.post_remaining == 0 {
                break;
            }
            let available = if self.buf_head >= self.trigger_at {
                self.buf_head - self.trigger_at
            } else {
                CAPTURE_BUFFER_SIZE - self.trigger_at
            };
            let take = available.min(self.post_remaining);
            if take == 0 {
                break;
            }
            kernel::copy(
                &mut self.sweep[self.sweep_head..self.sweep_head + take],
                &self.capture[self.trigger_at..self.trigger_at + take],
            );
            self.sweep_head += take;
            self.post_remaining -= take;
            self.trigger_at = (self.trigger_at + take) % CAPTURE_BUFFER_SIZE;
        }
    }

    /// Run one processing block. `dst` is filled according to the output
    /// mode regardless of capture state; capture adds no output latency.
    pub fn process(&mut self, dst: &mut [f32], src: &[f32]) {
        debug_assert_eq!(dst.len(), src.len());
        match self.output_mode {
            OutputMode::Copy => kernel::copy(dst, src),
            OutputMode::Muted => kernel::fill_zero(dst),
        }

        let m = self.oversampling.max(1);
        let mut src = src;
        while !src.is_empty() {
            match self.state {
                CaptureState::Acquiring => {
                    let to_process = m * src.len();
                    let remaining = CAPTURE_BUFFER_SIZE - self.buf_head;
                    let to_store = to_process.min(remaining);
                    let to_do = to_store / m;

                    self.over.upsample(
                        &mut self.capture[self.buf_head..self.buf_head + to_store],
                        &src[..to_do],
                    );

                    for n in 0..to_store {
                        self.trigger
                            .single_sample_processor(self.capture[self.buf_head + n]);
                        if self.trigger.get_trigger_state() == TriggerState::Fired {
                            self.trigger_at = self.buf_head + n;
                            self.sweep_head = 0;
                            self.sweep_complete = false;
                            self.post_remaining = self.post_trigger;
                            self.state = CaptureState::Sweeping;
                            trace!(at = self.trigger_at, "trigger fired");
                            self.splice_pre_trigger();
                            // The rest of the batch is post-trigger
                            // material; the trigger sees no more samples
                            // until acquisition resumes.
                            break;
                        }
                    }

                    self.buf_head = (self.buf_head + to_store) % CAPTURE_BUFFER_SIZE;
                    src = &src[to_do..];
                }
                CaptureState::Sweeping => {
                    self.drain_post_trigger();

                    let to_process = m * src.len();
                    let remaining = CAPTURE_BUFFER_SIZE - self.buf_head;
                    let to_store = to_process.min(remaining);
                    let to_do = to_store / m;

                    self.over.upsample(
                        &mut self.capture[self.buf_head..self.buf_head + to_store],
                        &src[..to_do],
                    );
                    self.buf_head = (self.buf_head + to_store) % CAPTURE_BUFFER_SIZE;
                    src = &src[to_do..];

                    if self.sweep_head + 1 >= self.limit {
                        self.state = CaptureState::Acquiring;
                        self.sweep_head = 0;
                        self.sweep_complete = true;
                        trace!(limit = self.limit, "sweep complete");
                    }
                }
            }
        }
    }

    /// Write internal state through a [`StateSink`].
    pub fn dump(&self, v: &mut dyn StateSink) {
        v.write_usize("sample_rate", self.sample_rate);
        v.write_usize("over_sample_rate", self.over_sample_rate);
        v.write_usize("oversampling", self.oversampling);
        v.write_str("trigger_type", &format!("{:?}", self.trigger_type));
        v.write_f32("trigger_level", self.trigger_level);
        v.write_str("output_mode", &format!("{:?}", self.output_mode));
        v.write_str("state", &format!("{:?}", self.state));
        v.write_usize("buf_head", self.buf_head);
        v.write_usize("trigger_at", self.trigger_at);
        v.write_f32("pre_trigger_time", self.pre_trigger_time);
        v.write_f32("post_trigger_time", self.post_trigger_time);
        v.write_usize("pre_trigger", self.pre_trigger);
        v.write_usize("post_trigger", self.post_trigger);
        v.write_usize("limit", self.limit);
        v.write_usize("sweep_head", self.sweep_head);
        v.write_bool("sweep_complete", self.sweep_complete);
        v.write_bool("sync", self.sync);
    }
}

fn seconds_to_samples(rate: usize, seconds: f32) -> usize {
    (rate as f32 * seconds.max(0.0)).round() as usize
}

fn samples_to_seconds(rate: usize, samples: usize) -> f32 {
    if rate == 0 {
        0.0
    } else {
        samples as f32 / rate as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: usize = 48_000;

    fn scope(pre_samples: usize, post_samples: usize) -> Oscilloscope {
        let mut osc = Oscilloscope::new();
        osc.set_sample_rate(SR);
        osc.set_trigger_type(TriggerType::SimpleRisingEdge);
        osc.set_trigger_level(0.5);
        osc.set_pre_trigger_time(pre_samples as f32 / SR as f32);
        osc.set_post_trigger_time(post_samples as f32 / SR as f32);
        osc.update_settings();
        assert_eq!(osc.pre_trigger_samples(), pre_samples);
        assert_eq!(osc.post_trigger_samples(), post_samples);
        osc
    }

    fn run(osc: &mut Oscilloscope, src: &[f32]) {
        let mut dst = vec![0.0; src.len()];
        osc.process(&mut dst, src);
    }

    #[test]
    fn wrap_splice_assembles_contiguous_sweep() {
        let mut osc = scope(100, 100);

        // Pulse at ring position 50: the pre-trigger window wraps
        // around the ring end into untouched (zero) history.
        let mut first = vec![0.0; 51];
        first[50] = 1.0;
        run(&mut osc, &first);
        assert!(!osc.sweep_complete());

        run(&mut osc, &vec![0.0; 149]);
        assert!(!osc.sweep_complete());

        run(&mut osc, &[0.0; 8]);
        assert!(osc.sweep_complete());

        let sweep = osc.sweep();
        assert_eq!(sweep.len(), 200);
        assert!(sweep[..100].iter().all(|&s| s == 0.0));
        // The trigger-causing sample opens the post-trigger run.
        assert_eq!(sweep[100], 1.0);
        assert!(sweep[101..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn in_ring_splice_keeps_history_order() {
        let mut osc = scope(4, 4);

        // Ramp so each captured sample is identifiable.
        let src: Vec<f32> = (0..32).map(|i| i as f32 * 0.01).collect();
        run(&mut osc, &src);
        // The 0.9 sample lands at ring position 35 and crosses the level.
        let mut pulse = vec![0.4; 8];
        pulse[3] = 0.9;
        run(&mut osc, &pulse);
        run(&mut osc, &vec![0.0; 16]);
        run(&mut osc, &vec![0.0; 16]);

        assert!(osc.sweep_complete());
        let sweep = osc.sweep();
        // Four samples preceding the trigger: end of the ramp, then the
        // 0.4 plateau.
        assert!((sweep[0] - 0.31).abs() < 1e-6);
        assert!((sweep[1] - 0.4).abs() < 1e-6);
        assert!((sweep[2] - 0.4).abs() < 1e-6);
        assert!((sweep[3] - 0.4).abs() < 1e-6);
        assert!((sweep[4] - 0.9).abs() < 1e-6);
    }

    #[test]
    fn no_trigger_accepted_while_sweeping() {
        let mut osc = scope(8, 64);

        let mut first = vec![0.0; 16];
        first[8] = 1.0;
        run(&mut osc, &first);

        // A second edge arrives mid-sweep; it must land in the sweep as
        // plain data instead of restarting capture.
        let mut second = vec![0.0; 32];
        second[10] = 1.0;
        run(&mut osc, &second);
        run(&mut osc, &vec![0.0; 64]);
        run(&mut osc, &vec![0.0; 8]);

        assert!(osc.sweep_complete());
        let sweep = osc.sweep();
        assert_eq!(sweep.len(), 72);
        assert_eq!(sweep[8], 1.0);
        // The mid-sweep edge shows up at its stream position, 18 samples
        // after the trigger sample.
        assert_eq!(sweep[8 + 18], 1.0);
    }

    #[test]
    fn completion_resumes_acquisition() {
        let mut osc = scope(2, 6);

        let mut first = vec![0.0; 8];
        first[4] = 1.0;
        run(&mut osc, &first);
        run(&mut osc, &vec![0.0; 16]);
        run(&mut osc, &vec![0.0; 8]);
        assert!(osc.sweep_complete());

        // Trigger re-arms after its hold-off; a later edge starts a new
        // sweep and clears the completion flag while assembling.
        let mut again = vec![0.0; 4];
        again[2] = 1.0;
        run(&mut osc, &vec![0.0; 8]);
        run(&mut osc, &again);
        assert!(!osc.sweep_complete());
        run(&mut osc, &vec![0.0; 16]);
        run(&mut osc, &vec![0.0; 8]);
        assert!(osc.sweep_complete());
    }

    #[test]
    fn output_modes_fill_dst_independently_of_capture() {
        let mut osc = scope(4, 4);
        let src = [0.25, -0.5, 0.75, 0.0];
        let mut dst = [9.0; 4];

        osc.process(&mut dst, &src);
        assert_eq!(dst, [0.0; 4]);

        osc.set_output_mode(OutputMode::Copy);
        osc.process(&mut dst, &src);
        assert_eq!(dst, src);
    }

    #[test]
    fn settings_clamp_to_buffer_geometry() {
        let mut osc = Oscilloscope::new();
        osc.set_sample_rate(SR);
        osc.set_pre_trigger_time(10.0);
        osc.set_post_trigger_time(10.0);
        osc.update_settings();

        assert_eq!(osc.pre_trigger_samples(), CAPTURE_BUFFER_SIZE);
        assert_eq!(osc.post_trigger_samples(), 0);
        assert!((osc.pre_trigger_time - CAPTURE_BUFFER_SIZE as f32 / SR as f32).abs() < 1e-3);
    }

    #[test]
    fn update_settings_is_gated_on_sync() {
        let mut osc = scope(4, 4);
        let before = osc.pre_trigger_samples();
        // No setter touched: another update_settings is a no-op.
        osc.update_settings();
        assert_eq!(osc.pre_trigger_samples(), before);
    }
}
