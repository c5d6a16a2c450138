//! Per-sample edge trigger detector for the oscilloscope.

/// Edge detection variants.
///
/// The simple edges fire on any threshold crossing; the advanced edges
/// additionally require the signal to leave a hysteresis band around the
/// level before re-arming, which suppresses double-triggering on noisy
/// signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerType {
    #[default]
    None,
    SimpleRisingEdge,
    SimpleFallingEdge,
    AdvancedRisingEdge,
    AdvancedFallingEdge,
}

/// Detector state, observable per sample.
///
/// `Fired` is a one-shot state reported on exactly the sample that
/// crossed the threshold; the detector then holds off through `Waiting`
/// for the configured post-trigger span, reports `Complete` once and
/// re-arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerState {
    #[default]
    Idle,
    Waiting,
    Fired,
    Complete,
}

/// Single-sample trigger processor.
#[derive(Debug, Clone, Copy, Default)]
pub struct Trigger {
    kind: TriggerType,
    pending_kind: TriggerType,
    level: f32,
    pending_level: f32,
    hysteresis: f32,
    post_trigger_samples: usize,
    countdown: usize,
    state: TriggerState,
    armed: bool,
    prev: f32,
}

impl Trigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new detection kind; applied by `update_settings`.
    pub fn set_trigger_type(&mut self, kind: TriggerType) {
        self.pending_kind = kind;
    }

    /// Record a new threshold level; applied by `update_settings`.
    pub fn set_trigger_level(&mut self, level: f32) {
        self.pending_level = level;
    }

    /// Half-width of the re-arm band used by the advanced kinds.
    pub fn set_trigger_hysteresis(&mut self, hysteresis: f32) {
        self.hysteresis = hysteresis.abs();
    }

    /// Hold-off span counted after a fire before `Complete` is reported.
    pub fn set_post_trigger_samples(&mut self, samples: usize) {
        self.post_trigger_samples = samples;
    }

    /// Commit pending type/level changes and re-arm the detector.
    pub fn update_settings(&mut self) {
        self.kind = self.pending_kind;
        self.level = self.pending_level;
        self.state = TriggerState::Idle;
        self.countdown = 0;
        self.prev = 0.0;
        // Simple edges are always armed; advanced edges arm once the
        // signal is observed outside the hysteresis band.
        self.armed = matches!(
            self.kind,
            TriggerType::SimpleRisingEdge | TriggerType::SimpleFallingEdge
        );
    }

    pub fn get_trigger_state(&self) -> TriggerState {
        self.state
    }

    /// Advance the detector by one sample.
    pub fn single_sample_processor(&mut self, x: f32) {
        match self.state {
            TriggerState::Fired | TriggerState::Waiting => {
                if self.countdown > 0 {
                    self.countdown -= 1;
                    self.state = TriggerState::Waiting;
                } else {
                    self.state = TriggerState::Complete;
                }
            }
            TriggerState::Complete => {
                self.state = TriggerState::Idle;
                self.rearm(x);
            }
            TriggerState::Idle => {
                self.rearm(x);
                if self.armed && self.crossed(x) {
                    self.state = TriggerState::Fired;
                    self.countdown = self.post_trigger_samples;
                    if matches!(
                        self.kind,
                        TriggerType::AdvancedRisingEdge | TriggerType::AdvancedFallingEdge
                    ) {
                        self.armed = false;
                    }
                }
            }
        }
        self.prev = x;
    }

    fn rearm(&mut self, x: f32) {
        match self.kind {
            TriggerType::SimpleRisingEdge | TriggerType::SimpleFallingEdge => {
                self.armed = true;
            }
            TriggerType::AdvancedRisingEdge => {
                if x <= self.level - self.hysteresis {
                    self.armed = true;
                }
            }
            TriggerType::AdvancedFallingEdge => {
                if x >= self.level + self.hysteresis {
                    self.armed = true;
                }
            }
            TriggerType::None => {
                self.armed = false;
            }
        }
    }

    fn crossed(&self, x: f32) -> bool {
        match self.kind {
            TriggerType::SimpleRisingEdge | TriggerType::AdvancedRisingEdge => {
                self.prev < self.level && x >= self.level
            }
            TriggerType::SimpleFallingEdge | TriggerType::AdvancedFallingEdge => {
                self.prev > self.level && x <= self.level
            }
            TriggerType::None => false,
        }
    }
}
