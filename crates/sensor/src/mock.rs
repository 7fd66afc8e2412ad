//! Synthetic frame source for runs without hardware.

use std::f64::consts::TAU;
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::protocol::{self, EEG_CHANNELS, EEG_SCALE, SAMPLE_RATE};
use crate::types::{DeviceError, Sample, SampleSource};

/// Paced generator of valid wire frames.
///
/// Stands in for the headset in `--mock` runs and exercises the real
/// encode/decode path: each channel carries a sine at a distinct EEG
/// frequency on top of a 2 mV offset, so downstream drift removal has
/// something to do.
pub struct MockDevice {
    counter: u32,
    next_frame: Instant,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            counter: 0,
            next_frame: Instant::now(),
        }
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSource for MockDevice {
    fn start_streaming(&mut self) -> Result<(), DeviceError> {
        self.next_frame = Instant::now();
        debug!("mock acquisition started");
        Ok(())
    }

    fn read_sample(&mut self) -> Result<Sample, DeviceError> {
        // Pace at the device rate without accumulating drift.
        let now = Instant::now();
        if self.next_frame > now {
            thread::sleep(self.next_frame - now);
        }
        self.next_frame += Duration::from_secs_f64(1.0 / SAMPLE_RATE);

        let t = self.counter as f64 / SAMPLE_RATE;
        let mut eeg_raw = [0i32; EEG_CHANNELS];
        for (ch, code) in eeg_raw.iter_mut().enumerate() {
            let hz = 4.0 + 2.0 * ch as f64;
            let microvolts = 2_000.0 + 50.0 * (TAU * hz * t).sin();
            *code = (microvolts / f64::from(EEG_SCALE)) as i32;
        }
        let frame = protocol::encode_frame(self.counter, 13, &eeg_raw, &[0, 0, -4096], &[0; 3]);
        self.counter = self.counter.wrapping_add(1);
        protocol::decode_frame(&frame)
    }

    fn stop_streaming(&mut self) -> Result<(), DeviceError> {
        debug!("mock acquisition stopped");
        Ok(())
    }
}
