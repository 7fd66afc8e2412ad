//! Preallocated elastic buffer between the decoder and the resampler.

/// Interleaved f32 frame buffer with fixed capacity.
///
/// `append` copies whole frames in at the tail and drops what does not
/// fit; `drain_into` and `consume` remove whole frames from the head
/// and compact the remainder to the front. Nothing allocates after
/// construction and a frame is never split.
#[derive(Debug)]
pub struct ElasticBuffer {
    data: Vec<f32>,
    channels: usize,
    capacity_frames: usize,
    len_frames: usize,
}

impl ElasticBuffer {
    pub fn new(capacity_frames: usize, channels: usize) -> Self {
        Self {
            data: vec![0.0; capacity_frames * channels],
            channels,
            capacity_frames,
            len_frames: 0,
        }
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    pub fn occupied_frames(&self) -> usize {
        self.len_frames
    }

    pub fn is_empty(&self) -> bool {
        self.len_frames == 0
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Append whole interleaved frames, truncating at capacity.
    /// Returns the number of frames accepted so the caller can report
    /// overflow.
    pub fn append(&mut self, frames: &[f32]) -> usize {
        debug_assert_eq!(frames.len() % self.channels, 0);
        let offered = frames.len() / self.channels;
        let accepted = offered.min(self.capacity_frames - self.len_frames);
        let dst = self.len_frames * self.channels;
        let take = accepted * self.channels;
        self.data[dst..dst + take].copy_from_slice(&frames[..take]);
        self.len_frames += accepted;
        accepted
    }

    /// Copy up to `max_frames` whole frames into `dst` and compact the
    /// remainder. Returns the number of frames copied.
    pub fn drain_into(&mut self, dst: &mut [f32], max_frames: usize) -> usize {
        let room = dst.len() / self.channels;
        let taken = max_frames.min(room).min(self.len_frames);
        let take = taken * self.channels;
        dst[..take].copy_from_slice(&self.data[..take]);
        self.discard(taken);
        taken
    }

    /// Interleaved view of the valid frames.
    pub fn as_slice(&self) -> &[f32] {
        &self.data[..self.len_frames * self.channels]
    }

    /// Drop the first `frames` frames and compact.
    pub fn consume(&mut self, frames: usize) {
        let taken = frames.min(self.len_frames);
        self.discard(taken);
    }

    fn discard(&mut self, taken: usize) {
        let take = taken * self.channels;
        let remaining = (self.len_frames - taken) * self.channels;
        self.data.copy_within(take..take + remaining, 0);
        self.len_frames -= taken;
    }
}
