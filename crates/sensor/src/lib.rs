pub mod device;
pub mod mock;
pub mod protocol;
pub mod types;

// Re-export the main types that users need
pub use device::UnicornDevice;
pub use mock::MockDevice;
pub use types::{DeviceError, Sample, SampleSource, CHANNEL_LABELS, CHANNEL_UNITS};
