//! Chunked drain from the input buffer through the rate converter
//! into the output ring.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::buffer::ElasticBuffer;
use crate::error::BridgeError;
use crate::output::OutputHandle;

/// Input frames consumed per conversion pass.
pub const CHUNK_FRAMES: usize = 8;

/// Ratio headroom the converter is built with. The controller clamps
/// at 1.2x nominal, so this bound never binds first.
const MAX_RATIO_RELATIVE: f64 = 1.25;

/// Arbitrary-ratio converter between the elastic input buffer and the
/// output ring.
///
/// All scratch is sized at construction; a steady-state pass moves
/// whole chunks only and does not allocate.
pub struct StreamResampler {
    inner: SincFixedIn<f32>,
    channels: usize,
    planar_in: Vec<Vec<f32>>,
    planar_out: Vec<Vec<f32>>,
    interleaved: Vec<f32>,
    max_output_frames: usize,
}

impl StreamResampler {
    pub fn new(nominal_ratio: f64, channels: usize) -> Result<Self, BridgeError> {
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let inner = SincFixedIn::new(
            nominal_ratio,
            MAX_RATIO_RELATIVE,
            params,
            CHUNK_FRAMES,
            channels,
        )?;
        let max_output_frames = inner.output_frames_max();
        Ok(Self {
            inner,
            channels,
            planar_in: vec![vec![0.0; CHUNK_FRAMES]; channels],
            planar_out: vec![vec![0.0; max_output_frames]; channels],
            interleaved: vec![0.0; max_output_frames * channels],
            max_output_frames,
        })
    }

    /// Worst-case output frames produced by one chunk.
    pub fn max_output_frames(&self) -> usize {
        self.max_output_frames
    }

    /// Convert as many whole chunks as possible from `input` into
    /// `out` at `ratio`.
    ///
    /// A pass is a no-op when less than one chunk is buffered or the
    /// ring cannot take a worst-case output block, so nothing is ever
    /// converted partially.
    pub fn run(
        &mut self,
        input: &mut ElasticBuffer,
        out: &mut OutputHandle,
        ratio: f64,
    ) -> Result<(), BridgeError> {
        while input.occupied_frames() >= CHUNK_FRAMES
            && out.free_frames() >= self.max_output_frames
        {
            self.inner.set_resample_ratio(ratio, true)?;

            let chunk = &input.as_slice()[..CHUNK_FRAMES * self.channels];
            for (ch, lane) in self.planar_in.iter_mut().enumerate() {
                for (frame, value) in lane.iter_mut().enumerate() {
                    *value = chunk[frame * self.channels + ch];
                }
            }

            let (consumed, produced) =
                self.inner
                    .process_into_buffer(&self.planar_in, &mut self.planar_out, None)?;
            debug_assert_eq!(consumed, CHUNK_FRAMES);
            input.consume(consumed);

            for frame in 0..produced {
                for (ch, lane) in self.planar_out.iter().enumerate() {
                    self.interleaved[frame * self.channels + ch] = lane[frame];
                }
            }
            out.push(&self.interleaved[..produced * self.channels]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::output_ring;

    #[test]
    fn short_input_is_a_no_op() {
        let mut rs = StreamResampler::new(176.4, 2).unwrap();
        let mut input = ElasticBuffer::new(64, 2);
        input.append(&[0.5; 2 * (CHUNK_FRAMES - 1)]);
        let (mut out, _rx) = output_ring(8192, 2);
        rs.run(&mut input, &mut out, 176.4).unwrap();
        assert_eq!(out.occupied_frames(), 0);
        assert_eq!(input.occupied_frames(), CHUNK_FRAMES - 1);
    }

    #[test]
    fn full_ring_is_a_no_op() {
        let mut rs = StreamResampler::new(176.4, 1).unwrap();
        let mut input = ElasticBuffer::new(64, 1);
        input.append(&[0.5; CHUNK_FRAMES]);
        // Too small to take a worst-case block, so nothing moves.
        let (mut out, _rx) = output_ring(rs.max_output_frames() - 1, 1);
        rs.run(&mut input, &mut out, 176.4).unwrap();
        assert_eq!(out.occupied_frames(), 0);
        assert_eq!(input.occupied_frames(), CHUNK_FRAMES);
    }

    #[test]
    fn no_output_until_half_a_sinc_window_went_in() {
        let ratio = 100.0;
        let mut rs = StreamResampler::new(ratio, 2).unwrap();
        let mut input = ElasticBuffer::new(64, 2);
        let (mut out, _rx) = output_ring(32_768, 2);
        // The first sinc_len / 2 = 128 input frames are retained as
        // filter history before any output frame comes out.
        for _ in 0..16 {
            input.append(&[0.25; 2 * CHUNK_FRAMES]);
            rs.run(&mut input, &mut out, ratio).unwrap();
        }
        assert_eq!(out.occupied_frames(), 0);
        assert_eq!(input.occupied_frames(), 0);
    }

    #[test]
    fn primed_chunks_produce_roughly_ratio_times_the_frames() {
        let ratio = 100.0;
        let mut rs = StreamResampler::new(ratio, 2).unwrap();
        let mut input = ElasticBuffer::new(64, 2);
        let (mut out, _rx) = output_ring(32_768, 2);
        // Feed the filter history plus the transition chunk.
        for _ in 0..17 {
            input.append(&[0.25; 2 * CHUNK_FRAMES]);
            rs.run(&mut input, &mut out, ratio).unwrap();
        }
        let primed = out.occupied_frames();
        assert!(primed > 0);
        input.append(&[0.25; 2 * CHUNK_FRAMES]);
        rs.run(&mut input, &mut out, ratio).unwrap();
        let produced = (out.occupied_frames() - primed) as f64;
        let expected = CHUNK_FRAMES as f64 * ratio;
        assert!(
            (produced - expected).abs() / expected < 0.2,
            "produced {} from one chunk",
            produced
        );
    }
}
