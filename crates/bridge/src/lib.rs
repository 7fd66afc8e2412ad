//! Clock-domain bridge from a fixed-rate sample stream into a
//! free-running audio output.
//!
//! The producer side pushes decoded frames through drift removal,
//! auto-scaling and an adaptive resampler into a lock-free ring; the
//! audio callback pulls whole frames back out and zero-fills
//! underruns. A ratio controller watches ring occupancy and trims the
//! resampling ratio so the ring hovers around half full despite the
//! two clocks drifting against each other.

pub mod buffer;
pub mod controller;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod output;
pub mod playback;
pub mod resampler;

// Re-export the main types that users need
pub use engine::{AudioBridge, BridgeConfig};
pub use error::BridgeError;
pub use output::AudioConsumer;
pub use playback::OutputStream;
