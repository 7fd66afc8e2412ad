//! Occupancy feedback law for the resampling ratio.

/// Zone edges as fractions of output capacity.
const VERY_LOW: f64 = 0.40;
const LOW: f64 = 0.48;
const HIGH: f64 = 0.52;
const VERY_HIGH: f64 = 0.60;

/// Smoothing constants per 10 ms output block.
const LAMBDA_SLOW: f64 = 0.01;
const LAMBDA_FAST: f64 = 0.1;

/// Steers the resampling ratio so the output ring hovers around half
/// full despite drift between the device clock and the sound card
/// clock.
///
/// Invoked once per input frame. Occupancy inside the 48..52 % band
/// pulls the ratio back to nominal; outside the band an
/// occupancy-derived estimate takes over, smoothed faster beyond the
/// 40 % / 60 % marks. The ratio never leaves
/// `[0.8 * nominal, 1.2 * nominal]`.
#[derive(Debug)]
pub struct RatioController {
    nominal: f64,
    ratio: f64,
    target_frames: f64,
    capacity_frames: f64,
    block_frames: f64,
    lambda_slow: f64,
    lambda_fast: f64,
}

impl RatioController {
    pub fn new(
        input_rate: f64,
        output_rate: f64,
        capacity_frames: usize,
        block_frames: usize,
    ) -> Self {
        let nominal = output_rate / input_rate;
        // The block-referred smoothing constants rescaled to one
        // invocation per input frame, keeping the time constants.
        let block_secs = block_frames as f64 / output_rate;
        let scale = 1.0 / (input_rate * block_secs);
        Self {
            nominal,
            ratio: nominal,
            target_frames: capacity_frames as f64 / 2.0,
            capacity_frames: capacity_frames as f64,
            block_frames: block_frames as f64,
            lambda_slow: LAMBDA_SLOW * scale,
            lambda_fast: LAMBDA_FAST * scale,
        }
    }

    pub fn nominal(&self) -> f64 {
        self.nominal
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Fold the current output occupancy into the ratio and return it.
    pub fn update(&mut self, occupied_frames: usize) -> f64 {
        let occupied = occupied_frames as f64;
        let estimate = (self.nominal + (self.target_frames - occupied) / self.block_frames)
            .clamp(0.8 * self.nominal, 1.2 * self.nominal);

        let fill = occupied / self.capacity_frames;
        let (goal, lambda) = if fill < VERY_LOW {
            (estimate, self.lambda_fast)
        } else if fill < LOW {
            (estimate, self.lambda_slow)
        } else if fill <= HIGH {
            (self.nominal, self.lambda_slow)
        } else if fill <= VERY_HIGH {
            (estimate, self.lambda_slow)
        } else {
            (estimate, self.lambda_fast)
        };

        self.ratio = (1.0 - lambda) * self.ratio + lambda * goal;
        self.ratio = self.ratio.clamp(0.8 * self.nominal, 1.2 * self.nominal);
        self.ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IN_RATE: f64 = 250.0;
    const OUT_RATE: f64 = 44_100.0;
    const CAPACITY: usize = 88_200;
    const BLOCK: usize = 441;

    fn controller() -> RatioController {
        RatioController::new(IN_RATE, OUT_RATE, CAPACITY, BLOCK)
    }

    #[test]
    fn ratio_never_leaves_the_clamp_band() {
        let mut c = controller();
        let nominal = c.nominal();
        for occupied in (0..=CAPACITY).step_by(CAPACITY / 50) {
            for _ in 0..100 {
                let r = c.update(occupied);
                assert!(r >= 0.8 * nominal - 1e-12);
                assert!(r <= 1.2 * nominal + 1e-12);
            }
        }
    }

    #[test]
    fn converges_to_nominal_at_target_occupancy() {
        let mut c = controller();
        let nominal = c.nominal();
        // Drive the ratio to the upper clamp first.
        for _ in 0..2000 {
            c.update(0);
        }
        assert!((c.ratio() - 1.2 * nominal).abs() < 1e-6);
        for _ in 0..20_000 {
            c.update(CAPACITY / 2);
        }
        assert!((c.ratio() - nominal).abs() < 1e-6);
    }

    #[test]
    fn empty_ring_converges_to_the_upper_clamp() {
        let mut c = controller();
        for _ in 0..2000 {
            c.update(0);
        }
        assert!((c.ratio() - 1.2 * c.nominal()).abs() < 1e-6);
    }

    #[test]
    fn full_ring_converges_to_the_lower_clamp() {
        let mut c = controller();
        for _ in 0..2000 {
            c.update(CAPACITY);
        }
        assert!((c.ratio() - 0.8 * c.nominal()).abs() < 1e-6);
    }

    #[test]
    fn far_zones_move_faster_than_near_zones() {
        let mut far = controller();
        let mut near = controller();
        let nominal = far.nominal();
        let step_far = (far.update(0) - nominal).abs();
        let step_near = (near.update((0.45 * CAPACITY as f64) as usize) - nominal).abs();
        assert!(step_far > step_near);
        // Both push the ratio up when the ring is underfilled.
        assert!(far.ratio() > nominal);
        assert!(near.ratio() > nominal);
    }

    #[test]
    fn high_occupancy_pushes_the_ratio_down() {
        let mut c = controller();
        let nominal = c.nominal();
        c.update((0.55 * CAPACITY as f64) as usize);
        assert!(c.ratio() < nominal);
    }

    #[test]
    fn mid_band_pulls_a_displaced_ratio_back() {
        let mut c = controller();
        let nominal = c.nominal();
        for _ in 0..500 {
            c.update(0);
        }
        let displaced = c.ratio();
        c.update(CAPACITY / 2);
        assert!(c.ratio() < displaced);
        assert!(c.ratio() > nominal);
    }
}
