//! Audio playback sink: device frames resampled onto the sound card
//! clock.
//!
//! Flow: warm-up flush, prefill at the nominal ratio, start the
//! output stream, then the steady producer loop. Every exit path runs
//! the same ordered teardown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use audio_bridge::{playback, AudioBridge, AudioConsumer, BridgeConfig, OutputStream};
use thread_priority::ThreadPriority;
use tracing::{debug, info, warn};
use unicorn_sensor::{protocol, SampleSource};

use crate::config::{AudioConfig, DaemonConfig};

/// Acquisition loop for `--sink audio`. Runs on the acquisition
/// thread and owns device, bridge and stream for its whole lifetime.
pub fn run(
    mut source: Box<dyn SampleSource>,
    config: &DaemonConfig,
    running: Arc<AtomicBool>,
) -> Result<()> {
    if let Err(e) = thread_priority::set_current_thread_priority(ThreadPriority::Max) {
        warn!("Failed to set acquisition thread priority: {:?}", e);
    }

    let bridge_config = BridgeConfig {
        input_rate: protocol::SAMPLE_RATE,
        output_rate: f64::from(config.audio.sample_rate),
        channels: effective_channels(&config.audio),
        buffer_secs: config.audio.buffer_secs,
        block_secs: config.audio.block_secs,
    };
    let (mut bridge, consumer) =
        AudioBridge::new(&bridge_config).context("audio bridge setup failed")?;
    info!(
        "Bridging {} channels, {} Hz -> {} Hz (nominal ratio {:.2})",
        bridge_config.channels,
        bridge_config.input_rate,
        bridge_config.output_rate,
        bridge.nominal_ratio()
    );

    source.start_streaming().context("could not start acquisition")?;

    // The stream handle lands in this slot so the teardown below
    // decides when playback stops, on every exit path.
    let mut stream = None;
    let result = pump(
        source.as_mut(),
        &mut bridge,
        consumer,
        config,
        &bridge_config,
        &running,
        &mut stream,
    );

    // 1. Stop the device stream
    if let Err(e) = source.stop_streaming() {
        warn!("Device stop failed: {}", e);
    }
    // 2. Stop playback
    drop(stream.take());
    // 3. Release conversion state and buffers
    drop(bridge);
    // 4. Close the serial port
    drop(source);
    info!("Audio sink stopped.");
    result
}

fn pump(
    source: &mut dyn SampleSource,
    bridge: &mut AudioBridge,
    consumer: AudioConsumer,
    config: &DaemonConfig,
    bridge_config: &BridgeConfig,
    running: &Arc<AtomicBool>,
    stream: &mut Option<OutputStream>,
) -> Result<()> {
    if !warm_up(source, config.audio.warmup_secs, running)? {
        return Ok(());
    }
    if !prefill(source, bridge, bridge_config.channels, running)? {
        return Ok(());
    }

    let underruns = consumer.underrun_counter();
    *stream = Some(
        playback::start_output_stream(
            config.audio.device.as_deref(),
            bridge_config.output_rate,
            bridge_config.channels,
            bridge_config.output_block_frames(),
            consumer,
            Arc::clone(running),
        )
        .context("audio output setup failed")?,
    );
    info!("Playback started.");

    steady_loop(source, bridge, &underruns, bridge_config.channels, running)
}

/// Discard frames while the analog front end settles. Returns false
/// when the stop flag cleared before the flush finished.
fn warm_up(
    source: &mut dyn SampleSource,
    warmup_secs: f64,
    running: &Arc<AtomicBool>,
) -> Result<bool> {
    let frames = (warmup_secs * protocol::SAMPLE_RATE) as u64;
    if frames == 0 {
        return Ok(true);
    }
    info!("Discarding {:.0} s of warm-up frames...", warmup_secs);
    for _ in 0..frames {
        if !running.load(Ordering::SeqCst) {
            return Ok(false);
        }
        source
            .read_sample()
            .context("acquisition failed during warm-up")?;
    }
    Ok(true)
}

/// Push device frames at the held nominal ratio until the output ring
/// reaches its occupancy target. The converter retains half a sinc
/// window of input before the first frames come out, so the fill is
/// measured on the ring itself rather than counted on the input side.
fn prefill(
    source: &mut dyn SampleSource,
    bridge: &mut AudioBridge,
    channels: usize,
    running: &Arc<AtomicBool>,
) -> Result<bool> {
    let target = bridge.output_capacity_frames() / 2;
    // Twice the device frames the target needs at the nominal ratio,
    // plus the converter history. Hitting this means frames are not
    // reaching the ring.
    let limit = 2 * (target as f64 / bridge.nominal_ratio()).ceil() as u64 + 1_024;
    info!("Prefilling the output ring to {} frames...", target);
    let mut pushed: u64 = 0;
    while bridge.output_occupied_frames() < target {
        if !running.load(Ordering::SeqCst) {
            return Ok(false);
        }
        if pushed >= limit {
            bail!(
                "output ring stuck at {} of {} frames after {} device frames",
                bridge.output_occupied_frames(),
                target,
                pushed
            );
        }
        let sample = source
            .read_sample()
            .context("acquisition failed during prefill")?;
        bridge
            .prefill_frame(&sample.eeg[..channels])
            .context("conversion failed during prefill")?;
        pushed += 1;
    }
    debug!(
        "Prefill done after {} device frames: output ring at {:.0}%",
        pushed,
        100.0 * bridge.output_occupied_frames() as f64 / bridge.output_capacity_frames() as f64
    );
    Ok(true)
}

fn steady_loop(
    source: &mut dyn SampleSource,
    bridge: &mut AudioBridge,
    underruns: &AtomicU64,
    channels: usize,
    running: &Arc<AtomicBool>,
) -> Result<()> {
    let mut frames: u64 = 0;
    let mut reported_underruns: u64 = 0;
    let mut last_report = Instant::now();
    while running.load(Ordering::SeqCst) {
        let sample = source.read_sample().context("acquisition failed")?;
        bridge
            .push_frame(&sample.eeg[..channels])
            .context("conversion failed")?;
        frames += 1;

        if last_report.elapsed() >= Duration::from_secs(1) {
            let seen = underruns.load(Ordering::Relaxed);
            if seen > reported_underruns {
                warn!("{} underruns in the last second", seen - reported_underruns);
                reported_underruns = seen;
            }
            debug!(
                "{} frames in, ratio {:.4} (nominal {:.4}), peak {:.1} uV, ring {:.0}%",
                frames,
                bridge.ratio(),
                bridge.nominal_ratio(),
                bridge.peak(),
                100.0 * bridge.output_occupied_frames() as f64
                    / bridge.output_capacity_frames() as f64,
            );
            last_report = Instant::now();
        }
    }
    Ok(())
}

/// Channel count carried into the audio domain: the configured count,
/// held to the 8 EEG channels and, on the default device, to what the
/// hardware reports.
fn effective_channels(audio: &AudioConfig) -> usize {
    let mut channels = audio.channels.clamp(1, protocol::EEG_CHANNELS);
    if audio.device.is_none() {
        if let Some(hardware) = playback::default_output_channels() {
            if hardware > 0 && hardware < channels {
                info!("Default output device has {} channels, capping", hardware);
                channels = hardware;
            }
        }
    }
    channels
}
