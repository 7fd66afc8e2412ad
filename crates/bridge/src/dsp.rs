//! Producer-side conditioning: drift removal and auto-scaling.

/// Smoothing constant for the drift reference at 250 Hz. This is a
/// 10-second exponential decay (ln 2 / 2500).
pub const DRIFT_LAMBDA: f32 = 0.000_277_2;

/// Single-pole high-pass that removes DC offset and electrode drift.
///
/// Keeps one running reference per channel:
///
/// ```text
/// r' = r + lambda * (x - r)
/// y  = x - r'
/// ```
///
/// The first frame seeds the references, so the first output is zero
/// on every channel. The reference keeps tracking on every frame after
/// that.
#[derive(Debug)]
pub struct DriftFilter {
    refs: Vec<f32>,
    lambda: f32,
    seeded: bool,
}

impl DriftFilter {
    pub fn new(channels: usize, lambda: f32) -> Self {
        Self {
            refs: vec![0.0; channels],
            lambda,
            seeded: false,
        }
    }

    /// Filter one interleaved frame in place.
    pub fn process_frame(&mut self, frame: &mut [f32]) {
        debug_assert_eq!(frame.len(), self.refs.len());
        if !self.seeded {
            self.refs.copy_from_slice(frame);
            self.seeded = true;
        }
        for (x, r) in frame.iter_mut().zip(self.refs.iter_mut()) {
            *r += self.lambda * (*x - *r);
            *x -= *r;
        }
    }
}

/// One-sided peak normalizer into [-1, 1].
///
/// The peak starts at 1.0 and never shrinks, so after a loud transient
/// the gain stays reduced for the rest of the run.
#[derive(Debug)]
pub struct AutoScaler {
    peak: f32,
}

impl AutoScaler {
    pub fn new() -> Self {
        Self { peak: 1.0 }
    }

    /// Normalize one frame in place, growing the peak first.
    pub fn scale_frame(&mut self, frame: &mut [f32]) {
        for value in frame.iter_mut() {
            let magnitude = value.abs();
            if magnitude > self.peak {
                self.peak = magnitude;
            }
            *value /= self.peak;
        }
    }

    pub fn peak(&self) -> f32 {
        self.peak
    }
}

impl Default for AutoScaler {
    fn default() -> Self {
        Self::new()
    }
}
