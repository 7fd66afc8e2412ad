//! Common types and the source trait for Unicorn headset access

use serde::Serialize;
use thiserror::Error;

/// One decoded acquisition frame.
///
/// EEG values are microvolts, accelerometer values g, gyroscope values
/// deg/s. The counter is the device frame counter and increments once
/// per frame at 250 Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub eeg: [f32; 8],
    pub accel: [f32; 3],
    pub gyro: [f32; 3],
    pub battery: f32,
    pub counter: u32,
}

/// Channel labels in flattened order, as advertised to downstream sinks.
pub const CHANNEL_LABELS: [&str; 16] = [
    "eeg1", "eeg2", "eeg3", "eeg4", "eeg5", "eeg6", "eeg7", "eeg8",
    "accelX", "accelY", "accelZ", "gyroX", "gyroY", "gyroZ", "battery", "counter",
];

/// Physical unit of each channel, in [`CHANNEL_LABELS`] order.
pub const CHANNEL_UNITS: [&str; 16] = [
    "uV", "uV", "uV", "uV", "uV", "uV", "uV", "uV",
    "g", "g", "g", "deg/s", "deg/s", "deg/s", "percent", "integer",
];

/// Errors that can occur while talking to the headset
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Serial open/read/write failure or timeout
    #[error("Transport error: {0}")]
    Transport(String),
    /// Header mismatch or short frame
    #[error("Frame format error: {0}")]
    FrameFormat(String),
    /// No matching serial port on this machine
    #[error("Hardware not found: {0}")]
    HardwareNotFound(String),
}

impl From<std::io::Error> for DeviceError {
    fn from(err: std::io::Error) -> Self {
        DeviceError::Transport(err.to_string())
    }
}

impl From<serialport::Error> for DeviceError {
    fn from(err: serialport::Error) -> Self {
        DeviceError::Transport(err.to_string())
    }
}

/// Trait that all sample sources implement.
///
/// One source is owned by one acquisition thread; none of the methods
/// are expected to be called concurrently.
pub trait SampleSource: Send + 'static {
    /// Put the device into streaming mode.
    fn start_streaming(&mut self) -> Result<(), DeviceError>;

    /// Block until the next frame arrives and decode it.
    fn read_sample(&mut self) -> Result<Sample, DeviceError>;

    /// Leave streaming mode. Safe to call more than once.
    fn stop_streaming(&mut self) -> Result<(), DeviceError>;
}
