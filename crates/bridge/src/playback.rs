//! cpal output stream wrapping an [`AudioConsumer`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use log::{error, info};

use crate::error::BridgeError;
use crate::output::AudioConsumer;

/// Keeps an output stream alive. Playback stops when this is dropped.
pub struct OutputStream {
    _stream: cpal::Stream,
}

/// Open and start an output stream on the default (or named) device.
///
/// The callback pulls from `consumer` and never touches producer
/// state. An asynchronous device error clears `running` so the
/// producer loop can shut the stream down in order. The stream plays
/// until the returned handle is dropped.
pub fn start_output_stream(
    device_name: Option<&str>,
    sample_rate: f64,
    channels: usize,
    block_frames: usize,
    mut consumer: AudioConsumer,
    running: Arc<AtomicBool>,
) -> Result<OutputStream, BridgeError> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .output_devices()
            .map_err(|e| BridgeError::SinkInit(format!("device enumeration: {e}")))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| BridgeError::SinkInit(format!("no output device named {name:?}")))?,
        None => host
            .default_output_device()
            .ok_or_else(|| BridgeError::SinkInit("no default output device".into()))?,
    };
    info!(
        "audio output device: {}",
        device.name().unwrap_or_else(|_| "<unnamed>".into())
    );

    let config = StreamConfig {
        channels: channels as u16,
        sample_rate: SampleRate(sample_rate as u32),
        buffer_size: BufferSize::Fixed(block_frames as u32),
    };

    let err_running = Arc::clone(&running);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                consumer.fill(data);
            },
            move |err| {
                error!("audio stream error: {err}");
                err_running.store(false, Ordering::SeqCst);
            },
            None,
        )
        .map_err(|e| BridgeError::SinkInit(format!("stream open: {e}")))?;
    stream
        .play()
        .map_err(|e| BridgeError::SinkInit(format!("stream start: {e}")))?;
    Ok(OutputStream { _stream: stream })
}

/// Channel count of the default output device, if the host has one.
/// The bridge caps its channel count at this so stream negotiation
/// cannot ask for lanes the hardware does not have.
pub fn default_output_channels() -> Option<usize> {
    let device = cpal::default_host().default_output_device()?;
    device
        .default_output_config()
        .ok()
        .map(|config| config.channels() as usize)
}
