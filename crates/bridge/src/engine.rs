//! The producer-side pipeline from decoded frames to the output ring.

use log::warn;

use crate::buffer::ElasticBuffer;
use crate::controller::RatioController;
use crate::dsp::{AutoScaler, DriftFilter, DRIFT_LAMBDA};
use crate::error::BridgeError;
use crate::output::{output_ring, AudioConsumer, OutputHandle};
use crate::resampler::{StreamResampler, CHUNK_FRAMES};

/// Streaming geometry of the bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Device rate in Hz.
    pub input_rate: f64,
    /// Audio sink rate in Hz.
    pub output_rate: f64,
    /// Channels carried into the audio domain.
    pub channels: usize,
    /// Elastic buffer length in seconds, input and output side.
    pub buffer_secs: f64,
    /// Audio block length in seconds.
    pub block_secs: f64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            input_rate: 250.0,
            output_rate: 44_100.0,
            channels: 8,
            buffer_secs: 2.0,
            block_secs: 0.01,
        }
    }
}

impl BridgeConfig {
    pub fn input_buffer_frames(&self) -> usize {
        (self.buffer_secs * self.input_rate) as usize
    }

    pub fn output_buffer_frames(&self) -> usize {
        (self.buffer_secs * self.output_rate) as usize
    }

    pub fn output_block_frames(&self) -> usize {
        (self.block_secs * self.output_rate) as usize
    }

    fn validate(&self) -> Result<(), BridgeError> {
        if self.channels == 0 {
            return Err(BridgeError::Config("channel count must be nonzero".into()));
        }
        if self.input_rate <= 0.0 || self.output_rate <= 0.0 {
            return Err(BridgeError::Config("sample rates must be positive".into()));
        }
        if self.output_block_frames() == 0 {
            return Err(BridgeError::Config(
                "audio block shorter than one output frame".into(),
            ));
        }
        if self.input_buffer_frames() < 2 * CHUNK_FRAMES {
            return Err(BridgeError::Config(format!(
                "input buffer of {} frames is too short",
                self.input_buffer_frames()
            )));
        }
        Ok(())
    }
}

/// Owns every producer-side stage: drift filter, auto-scaler, elastic
/// input buffer, ratio controller and resampler.
///
/// One [`push_frame`](AudioBridge::push_frame) call runs the full
/// producer iteration for one device frame. The [`AudioConsumer`]
/// returned by [`new`](AudioBridge::new) is the matching pull side for
/// the audio callback.
pub struct AudioBridge {
    drift: DriftFilter,
    scaler: AutoScaler,
    input: ElasticBuffer,
    controller: RatioController,
    resampler: StreamResampler,
    output: OutputHandle,
    frame_scratch: Vec<f32>,
    dropped_frames: u64,
}

impl AudioBridge {
    pub fn new(config: &BridgeConfig) -> Result<(Self, AudioConsumer), BridgeError> {
        config.validate()?;
        let controller = RatioController::new(
            config.input_rate,
            config.output_rate,
            config.output_buffer_frames(),
            config.output_block_frames(),
        );
        let resampler = StreamResampler::new(controller.nominal(), config.channels)?;
        let (output, consumer) = output_ring(config.output_buffer_frames(), config.channels);
        Ok((
            Self {
                drift: DriftFilter::new(config.channels, DRIFT_LAMBDA),
                scaler: AutoScaler::new(),
                input: ElasticBuffer::new(config.input_buffer_frames(), config.channels),
                controller,
                resampler,
                output,
                frame_scratch: vec![0.0; config.channels],
                dropped_frames: 0,
            },
            consumer,
        ))
    }

    /// Run one producer iteration on a decoded frame of exactly
    /// `channels` values.
    pub fn push_frame(&mut self, frame: &[f32]) -> Result<(), BridgeError> {
        self.process_frame(frame, true)
    }

    /// Like [`push_frame`](AudioBridge::push_frame) but holds the
    /// ratio at its current value. Used while the ring is filled
    /// before playback starts, so the fill lands at the occupancy
    /// target instead of chasing an empty ring.
    pub fn prefill_frame(&mut self, frame: &[f32]) -> Result<(), BridgeError> {
        self.process_frame(frame, false)
    }

    fn process_frame(&mut self, frame: &[f32], steer: bool) -> Result<(), BridgeError> {
        debug_assert_eq!(frame.len(), self.frame_scratch.len());
        self.frame_scratch.copy_from_slice(frame);
        self.drift.process_frame(&mut self.frame_scratch);
        self.scaler.scale_frame(&mut self.frame_scratch);
        if self.input.append(&self.frame_scratch) == 0 {
            self.dropped_frames += 1;
            // Throttle to roughly once a second at the device rate.
            if self.dropped_frames % 250 == 1 {
                warn!(
                    "input buffer full, {} frames dropped so far",
                    self.dropped_frames
                );
            }
        }
        let ratio = if steer {
            self.controller.update(self.output.occupied_frames())
        } else {
            self.controller.ratio()
        };
        self.resampler.run(&mut self.input, &mut self.output, ratio)
    }

    pub fn ratio(&self) -> f64 {
        self.controller.ratio()
    }

    pub fn nominal_ratio(&self) -> f64 {
        self.controller.nominal()
    }

    pub fn peak(&self) -> f32 {
        self.scaler.peak()
    }

    pub fn input_occupied_frames(&self) -> usize {
        self.input.occupied_frames()
    }

    pub fn input_capacity_frames(&self) -> usize {
        self.input.capacity_frames()
    }

    pub fn output_occupied_frames(&self) -> usize {
        self.output.occupied_frames()
    }

    pub fn output_capacity_frames(&self) -> usize {
        self.output.capacity_frames()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }
}
