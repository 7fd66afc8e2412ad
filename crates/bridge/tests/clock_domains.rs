//! End-to-end behavior with simulated device and audio clocks.
//!
//! The producer pushes one frame per simulated 4 ms; the consumer is
//! paid credit at the audio rate and drains whole callback blocks as
//! the credit covers them. No real time passes and no audio device is
//! involved.

use audio_bridge::{AudioBridge, AudioConsumer, BridgeConfig};

const INPUT_RATE: f64 = 250.0;
const OUTPUT_RATE: f64 = 44_100.0;

fn config() -> BridgeConfig {
    BridgeConfig {
        input_rate: INPUT_RATE,
        output_rate: OUTPUT_RATE,
        channels: 2,
        buffer_secs: 2.0,
        block_secs: 0.01,
    }
}

/// Device frame `n` as it would look after decoding: a slow sine on a
/// large DC offset, mirrored across the two channels.
fn device_frame(n: u64) -> [f32; 2] {
    let t = n as f64 / INPUT_RATE;
    let signal = ((std::f64::consts::TAU * 10.0 * t).sin() * 50.0) as f32;
    [2_000.0 + signal, 2_000.0 - signal]
}

/// Fill the ring to the occupancy target the way the daemon does
/// before starting the stream. Returns the next frame number.
fn prefill(bridge: &mut AudioBridge) -> u64 {
    let target = bridge.output_capacity_frames() / 2;
    let mut n = 0u64;
    while bridge.output_occupied_frames() < target {
        assert!(n < 10_000, "ring never reached {} frames", target);
        bridge.prefill_frame(&device_frame(n)).unwrap();
        n += 1;
    }
    n
}

struct AudioClock {
    block: Vec<f32>,
    block_frames: usize,
    credit: f64,
    frames_per_tick: f64,
}

impl AudioClock {
    fn new(config: &BridgeConfig, rate_error: f64) -> Self {
        let block_frames = config.output_block_frames();
        Self {
            block: vec![0.0; block_frames * config.channels],
            block_frames,
            credit: 0.0,
            frames_per_tick: config.output_rate * rate_error / INPUT_RATE,
        }
    }

    /// Advance the consumer clock by one input-frame period.
    fn tick(&mut self, consumer: &mut AudioConsumer) {
        self.credit += self.frames_per_tick;
        while self.credit >= self.block_frames as f64 {
            consumer.fill(&mut self.block);
            self.credit -= self.block_frames as f64;
        }
    }
}

#[test]
fn occupancy_settles_into_the_half_full_band() {
    let config = config();
    let (mut bridge, mut consumer) = AudioBridge::new(&config).unwrap();
    let mut n = prefill(&mut bridge);

    let after_prefill = bridge.output_occupied_frames() as f64;
    let capacity = bridge.output_capacity_frames() as f64;
    assert!((after_prefill / capacity - 0.5).abs() < 0.03);

    let mut clock = AudioClock::new(&config, 1.0);
    let ticks_per_second = INPUT_RATE as u64;
    for second in 0..20 {
        let mut fill_sum = 0.0;
        for _ in 0..ticks_per_second {
            bridge.push_frame(&device_frame(n)).unwrap();
            n += 1;
            clock.tick(&mut consumer);
            let fill = bridge.output_occupied_frames() as f64 / capacity;
            fill_sum += fill;
            if second >= 5 {
                assert!(
                    (0.46..=0.54).contains(&fill),
                    "instantaneous fill {} at second {}",
                    fill,
                    second
                );
            }
        }
        let average = fill_sum / ticks_per_second as f64;
        if second >= 5 {
            assert!(
                (0.48..=0.52).contains(&average),
                "average fill {} at second {}",
                average,
                second
            );
        }
    }

    assert_eq!(consumer.underruns(), 0);
    let nominal = bridge.nominal_ratio();
    assert!((bridge.ratio() - nominal).abs() / nominal < 0.01);
}

#[test]
fn drifting_consumer_clock_is_absorbed() {
    let config = config();
    let (mut bridge, mut consumer) = AudioBridge::new(&config).unwrap();
    let mut n = prefill(&mut bridge);
    let capacity = bridge.output_capacity_frames() as f64;

    // Sound card runs 0.3 % fast relative to its nominal rate.
    let mut clock = AudioClock::new(&config, 1.003);
    let ticks = (30.0 * INPUT_RATE) as u64;
    for tick in 0..ticks {
        bridge.push_frame(&device_frame(n)).unwrap();
        n += 1;
        clock.tick(&mut consumer);
        if tick >= (12.0 * INPUT_RATE) as u64 {
            let fill = bridge.output_occupied_frames() as f64 / capacity;
            assert!(
                (0.40..=0.60).contains(&fill),
                "fill {} at tick {}",
                fill,
                tick
            );
        }
    }
    assert_eq!(consumer.underruns(), 0);
    // The ratio has moved off nominal to chase the fast consumer.
    assert!(bridge.ratio() > bridge.nominal_ratio());
}

#[test]
fn a_stalled_producer_drains_to_silence() {
    let config = config();
    let (mut bridge, mut consumer) = AudioBridge::new(&config).unwrap();
    let mut n = prefill(&mut bridge);

    let mut clock = AudioClock::new(&config, 1.0);
    for _ in 0..(5.0 * INPUT_RATE) as u64 {
        bridge.push_frame(&device_frame(n)).unwrap();
        n += 1;
        clock.tick(&mut consumer);
    }
    assert_eq!(consumer.underruns(), 0);

    // Transport stalls: the consumer keeps going until the ring runs
    // dry and every further block is zero-filled.
    let block_frames = config.output_block_frames();
    let mut block = vec![1.0f32; block_frames * config.channels];
    let blocks_to_empty = bridge.output_capacity_frames() / block_frames + 2;
    for _ in 0..blocks_to_empty {
        consumer.fill(&mut block);
    }
    assert!(consumer.underruns() > 0);
    assert_eq!(bridge.output_occupied_frames(), 0);
    consumer.fill(&mut block);
    assert!(block.iter().all(|&v| v == 0.0));
}
