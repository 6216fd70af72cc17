//! Receiver access
//!
//! 1. `SampleSource` owns the single open session
//! 2. `RtlSdrDriver` captures through the rtl_sdr executable
//! 3. `SyntheticDriver` generates a test tone when no dongle is attached

pub mod capture;
mod samples;
mod source;
mod synthetic;

pub use capture::{probe_device, DeviceInfo, RtlSdrDriver};
pub use samples::SampleTable;
pub use source::{
    check_frequency, DeviceDriver, IqDevice, SampleSource, RTL_SDR_MAX_FREQ, RTL_SDR_MIN_FREQ,
};
pub use synthetic::{SyntheticDriver, TONE_OFFSET_HZ};
