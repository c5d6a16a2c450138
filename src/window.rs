//! Analysis window generator (cosine-sum family).

/// Supported analysis windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Window {
    Rectangular,
    #[default]
    Hann,
    Hamming,
    Blackman,
    BlackmanHarris,
    Nuttall,
}

impl Window {
    /// Cosine-sum terms, alternating sign starting positive.
    fn terms(self) -> &'static [f32] {
        match self {
            Window::Rectangular => &[1.0],
            Window::Hann => &[0.5, 0.5],
            Window::Hamming => &[0.54, 0.46],
            Window::Blackman => &[0.42, 0.5, 0.08],
            Window::BlackmanHarris => &[0.35875, 0.48829, 0.14128, 0.01168],
            Window::Nuttall => &[0.355_768, 0.487_396, 0.144_232, 0.012_604],
        }
    }
}

/// Fill `tbl` with the window of the given kind.
///
/// Uses the period-`N` phase convention (`2πn/N`), so the table is a pure
/// function of `(tbl.len(), kind)`.
pub fn window(tbl: &mut [f32], kind: Window) {
    let n = tbl.len();
    if n == 0 {
        return;
    }
    let terms = kind.terms();
    let step = core::f32::consts::TAU / n as f32;
    for (i, w) in tbl.iter_mut().enumerate() {
        let phase = i as f32 * step;
        let mut acc = 0.0;
        let mut sign = 1.0;
        for (k, &a) in terms.iter().enumerate() {
            acc += sign * a * (k as f32 * phase).cos();
            sign = -sign;
        }
        *w = acc;
    }
}
