//! Shared RTL-SDR receiver hub
//!
//! One dongle, many consumers: a direct IQ monitor (spectrum, demodulation,
//! scanning) and supervised external decoders (dump1090, direwolf, rtl_433,
//! multimon-ng, dsd-fme, trunk-recorder). The [`device::DeviceArbiter`]
//! guarantees only one of them drives the receiver at a time.

pub mod bands;
pub mod config;
pub mod decoder;
pub mod device;
pub mod dsp;
pub mod error;
pub mod pipelines;
pub mod scanner;
pub mod sdr;
pub mod tools;

pub use config::Config;
pub use error::{HubError, Result};
pub use pipelines::{Family, Hub};
