//! Wire format of the Unicorn Hybrid Black serial stream.
//!
//! Once streaming is enabled the headset sends fixed 45-byte binary
//! frames at 250 Hz: a two-byte header, a status byte, eight 24-bit
//! big-endian EEG words, six little-endian i16 motion words, a
//! little-endian u32 frame counter and a two-byte trailer.

use crate::types::{DeviceError, Sample};

/// Bytes per frame on the wire.
pub const FRAME_SIZE: usize = 45;
/// Fixed device sample rate in Hz.
pub const SAMPLE_RATE: f64 = 250.0;
/// Number of EEG channels in each frame.
pub const EEG_CHANNELS: usize = 8;
/// First two bytes of every frame.
pub const FRAME_HEADER: [u8; 2] = [0xC0, 0x00];
/// Command payload that starts acquisition.
pub const START_ACQUISITION: [u8; 3] = [0x61, 0x7C, 0x87];
/// Command payload that stops acquisition.
pub const STOP_ACQUISITION: [u8; 3] = [0x63, 0x5C, 0xC5];
/// Expected device response to either command.
pub const COMMAND_ACK: [u8; 3] = [0x00, 0x00, 0x00];
/// The headset talks 115200 baud, 8N1, no flow control.
pub const BAUD_RATE: u32 = 115_200;

const EEG_OFFSET: usize = 3;
const ACCEL_OFFSET: usize = 27;
const GYRO_OFFSET: usize = 33;
const COUNTER_OFFSET: usize = 39;

/// Microvolts per 24-bit EEG code.
pub const EEG_SCALE: f32 = 4_500_000.0 / 50_331_642.0;

/// Decode one wire frame into a [`Sample`].
///
/// Rejects frames whose first two bytes are not [`FRAME_HEADER`]. The
/// trailer bytes are carried but not validated, matching the vendor
/// tooling.
pub fn decode_frame(frame: &[u8; FRAME_SIZE]) -> Result<Sample, DeviceError> {
    if frame[..2] != FRAME_HEADER {
        return Err(DeviceError::FrameFormat(format!(
            "bad frame header {:#04x} {:#04x}",
            frame[0], frame[1]
        )));
    }

    let mut eeg = [0.0f32; EEG_CHANNELS];
    for (ch, value) in eeg.iter_mut().enumerate() {
        let o = EEG_OFFSET + ch * 3;
        *value = sign_extend_24(frame[o], frame[o + 1], frame[o + 2]) as f32 * EEG_SCALE;
    }

    let mut accel = [0.0f32; 3];
    for (axis, value) in accel.iter_mut().enumerate() {
        let o = ACCEL_OFFSET + axis * 2;
        *value = i16::from_le_bytes([frame[o], frame[o + 1]]) as f32 / 4096.0;
    }

    let mut gyro = [0.0f32; 3];
    for (axis, value) in gyro.iter_mut().enumerate() {
        let o = GYRO_OFFSET + axis * 2;
        *value = i16::from_le_bytes([frame[o], frame[o + 1]]) as f32 / 32.8;
    }

    // Low nibble of the status byte is the battery level, 0..15.
    let battery = f32::from(frame[2] & 0x0F) * 100.0 / 15.0;

    let counter = u32::from_le_bytes([
        frame[COUNTER_OFFSET],
        frame[COUNTER_OFFSET + 1],
        frame[COUNTER_OFFSET + 2],
        frame[COUNTER_OFFSET + 3],
    ]);

    Ok(Sample {
        eeg,
        accel,
        gyro,
        battery,
        counter,
    })
}

/// Assemble a big-endian 24-bit word and sign-extend it to i32.
fn sign_extend_24(msb: u8, mid: u8, lsb: u8) -> i32 {
    let combined = ((msb as i32) << 16) | ((mid as i32) << 8) | (lsb as i32);
    (combined << 8) >> 8
}

/// Build a wire frame from raw channel codes.
///
/// Inverse of [`decode_frame`] up to 24-bit masking of the EEG codes.
/// Used by the mock device and by tests.
pub fn encode_frame(
    counter: u32,
    battery_raw: u8,
    eeg_raw: &[i32; EEG_CHANNELS],
    accel_raw: &[i16; 3],
    gyro_raw: &[i16; 3],
) -> [u8; FRAME_SIZE] {
    let mut frame = [0u8; FRAME_SIZE];
    frame[..2].copy_from_slice(&FRAME_HEADER);
    frame[2] = battery_raw & 0x0F;
    for (ch, &code) in eeg_raw.iter().enumerate() {
        let o = EEG_OFFSET + ch * 3;
        let word = (code as u32) & 0x00FF_FFFF;
        frame[o] = (word >> 16) as u8;
        frame[o + 1] = (word >> 8) as u8;
        frame[o + 2] = word as u8;
    }
    for (axis, &code) in accel_raw.iter().enumerate() {
        let o = ACCEL_OFFSET + axis * 2;
        frame[o..o + 2].copy_from_slice(&code.to_le_bytes());
    }
    for (axis, &code) in gyro_raw.iter().enumerate() {
        let o = GYRO_OFFSET + axis * 2;
        frame[o..o + 2].copy_from_slice(&code.to_le_bytes());
    }
    frame[COUNTER_OFFSET..COUNTER_OFFSET + 4].copy_from_slice(&counter.to_le_bytes());
    frame[FRAME_SIZE - 2] = 0x0D;
    frame[FRAME_SIZE - 1] = 0x0A;
    frame
}

/// Find the first frame-header position in `buf`, if any.
pub fn find_frame_start(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == FRAME_HEADER)
}
