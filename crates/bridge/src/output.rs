//! Lock-free handoff from the resampler to the audio callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rtrb::{Consumer, Producer, RingBuffer};

/// Build the SPSC pair carrying interleaved f32 frames from the
/// producer loop to the audio callback.
pub fn output_ring(capacity_frames: usize, channels: usize) -> (OutputHandle, AudioConsumer) {
    let (producer, consumer) = RingBuffer::new(capacity_frames * channels);
    (
        OutputHandle {
            producer,
            channels,
            capacity_frames,
        },
        AudioConsumer {
            consumer,
            channels,
            underruns: Arc::new(AtomicU64::new(0)),
            primed: false,
        },
    )
}

/// Producer side of the output ring.
pub struct OutputHandle {
    producer: Producer<f32>,
    channels: usize,
    capacity_frames: usize,
}

impl OutputHandle {
    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    /// Frames currently queued for the callback.
    pub fn occupied_frames(&self) -> usize {
        self.capacity_frames - self.producer.slots() / self.channels
    }

    /// Frames of room left.
    pub fn free_frames(&self) -> usize {
        self.producer.slots() / self.channels
    }

    /// Push interleaved values, whole frames only. Returns the number
    /// of values written; anything past the available room is dropped.
    pub fn push(&mut self, values: &[f32]) -> usize {
        let room = (self.producer.slots() / self.channels) * self.channels;
        let n = values.len().min(room);
        if n == 0 {
            return 0;
        }
        let mut chunk = match self.producer.write_chunk(n) {
            Ok(chunk) => chunk,
            Err(_) => return 0,
        };
        let (first, second) = chunk.as_mut_slices();
        let split = first.len();
        first.copy_from_slice(&values[..split]);
        second.copy_from_slice(&values[split..n]);
        chunk.commit_all();
        n
    }
}

/// Consumer side of the output ring, handed to the audio callback.
pub struct AudioConsumer {
    consumer: Consumer<f32>,
    channels: usize,
    underruns: Arc<AtomicU64>,
    primed: bool,
}

impl AudioConsumer {
    /// Copy whole frames into `out` and zero-fill any shortfall.
    ///
    /// Bounded time: one ring read, one copy, no locks, no
    /// allocation. A shortfall counts as an underrun once the ring has
    /// carried data; the silent start-up phase does not count.
    pub fn fill(&mut self, out: &mut [f32]) {
        let available = (self.consumer.slots() / self.channels) * self.channels;
        let take = out.len().min(available);
        if take > 0 {
            if let Ok(chunk) = self.consumer.read_chunk(take) {
                let (first, second) = chunk.as_slices();
                out[..first.len()].copy_from_slice(first);
                out[first.len()..take].copy_from_slice(second);
                chunk.commit_all();
                self.primed = true;
            }
        }
        if take < out.len() {
            out[take..].fill(0.0);
            if self.primed {
                self.underruns.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Calls that zero-filled after the ring first carried data.
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Shared counter handle, readable after the consumer has moved
    /// into the callback.
    pub fn underrun_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.underruns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_fill_roundtrips_frames() {
        let (mut tx, mut rx) = output_ring(4, 2);
        assert_eq!(tx.push(&[1.0, 2.0, 3.0, 4.0]), 4);
        assert_eq!(tx.occupied_frames(), 2);
        let mut out = [0.0; 4];
        rx.fill(&mut out);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(tx.occupied_frames(), 0);
        assert_eq!(rx.underruns(), 0);
    }

    #[test]
    fn starved_consumer_zero_fills_the_tail() {
        let (mut tx, mut rx) = output_ring(8, 1);
        tx.push(&[7.0, 8.0]);
        let mut out = [9.0; 5];
        rx.fill(&mut out);
        assert_eq!(out, [7.0, 8.0, 0.0, 0.0, 0.0]);
        assert_eq!(rx.underruns(), 1);
    }

    #[test]
    fn silent_startup_does_not_count_as_underrun() {
        let (mut tx, mut rx) = output_ring(4, 1);
        let mut out = [1.0; 4];
        rx.fill(&mut out);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(rx.underruns(), 0);
        tx.push(&[1.0]);
        rx.fill(&mut out);
        assert_eq!(out[0], 1.0);
        assert_eq!(rx.underruns(), 1);
    }

    #[test]
    fn push_drops_what_does_not_fit() {
        let (mut tx, _rx) = output_ring(2, 2);
        assert_eq!(tx.push(&[1.0, 2.0, 3.0, 4.0]), 4);
        assert_eq!(tx.push(&[5.0, 6.0]), 0);
        assert_eq!(tx.free_frames(), 0);
    }

    #[test]
    fn wraparound_preserves_frame_order() {
        let (mut tx, mut rx) = output_ring(4, 1);
        tx.push(&[1.0, 2.0, 3.0]);
        let mut out = [0.0; 2];
        rx.fill(&mut out);
        tx.push(&[4.0, 5.0, 6.0]);
        let mut rest = [0.0; 4];
        rx.fill(&mut rest);
        assert_eq!(rest, [3.0, 4.0, 5.0, 6.0]);
    }
}
