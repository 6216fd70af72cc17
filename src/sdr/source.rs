//! Sample source: the single open session with the receiver
//!
//! The source has no lock of its own. Every mutator takes `&mut self`, and
//! the hub only lets the current arbiter owner reach it.

use num_complex::Complex32;
use tracing::{debug, info, warn};

use crate::device::{Gain, SourceStats, TuningState};
use crate::error::{HubError, Result};

/// Lowest frequency an R820T/RTL2832U dongle tunes to
pub const RTL_SDR_MIN_FREQ: u64 = 24_000_000;
/// Highest frequency an R820T/RTL2832U dongle tunes to
pub const RTL_SDR_MAX_FREQ: u64 = 1_766_000_000;

/// An open receiver session
pub trait IqDevice: Send {
    /// Apply new tuning. Implementations may defer the change to the next read.
    fn apply(&mut self, tuning: &TuningState) -> Result<()>;

    /// Block until exactly `n` samples are captured
    fn read(&mut self, n: usize) -> Result<Vec<Complex32>>;

    fn close(&mut self);
}

/// Opens receiver sessions
pub trait DeviceDriver: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self, tuning: &TuningState) -> Result<Box<dyn IqDevice>>;
}

pub fn check_frequency(freq: u64) -> Result<()> {
    if (RTL_SDR_MIN_FREQ..=RTL_SDR_MAX_FREQ).contains(&freq) {
        Ok(())
    } else {
        Err(HubError::InvalidParams(format!(
            "frequency {:.4} MHz out of range ({}-{} MHz)",
            freq as f64 / 1e6,
            RTL_SDR_MIN_FREQ / 1_000_000,
            RTL_SDR_MAX_FREQ / 1_000_000
        )))
    }
}

/// Owns the receiver handle and its tuning
pub struct SampleSource {
    driver: Box<dyn DeviceDriver>,
    device: Option<Box<dyn IqDevice>>,
    tuning: TuningState,
    stats: SourceStats,
}

impl SampleSource {
    pub fn new(driver: Box<dyn DeviceDriver>, tuning: TuningState) -> Self {
        Self {
            driver,
            device: None,
            tuning,
            stats: SourceStats::new(),
        }
    }

    /// Open a session, closing any previous one first
    pub fn open(&mut self, sample_rate: u32, center_freq: u64, gain: Gain) -> Result<()> {
        check_frequency(center_freq)?;
        if sample_rate == 0 {
            return Err(HubError::InvalidParams("sample rate must be non-zero".into()));
        }
        if self.device.is_some() {
            debug!("Sample source already open, closing previous session");
            self.close();
        }

        self.tuning.sample_rate = sample_rate;
        self.tuning.center_freq = center_freq;
        self.tuning.gain = gain;

        let device = self.driver.open(&self.tuning).inspect_err(|_| {
            self.stats.record_error();
        })?;
        info!(
            "Opened {} at {:.4} MHz, {} S/s, gain {}",
            self.driver.name(),
            center_freq as f64 / 1e6,
            sample_rate,
            gain
        );
        self.device = Some(device);
        Ok(())
    }

    /// Release the session. Safe to call when not open.
    pub fn close(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.close();
            info!("Closed {}", self.driver.name());
        }
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    pub fn read_samples(&mut self, n: usize) -> Result<Vec<Complex32>> {
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| HubError::DeviceUnavailable("sample source is not open".into()))?;

        match device.read(n) {
            Ok(samples) => {
                self.stats.record_read(samples.len());
                Ok(samples)
            }
            Err(e) => {
                self.stats.record_error();
                warn!("Sample read failed: {}", e);
                Err(e)
            }
        }
    }

    pub fn tune(&mut self, center_freq: u64) -> Result<()> {
        check_frequency(center_freq)?;
        self.tuning.center_freq = center_freq;
        self.push_tuning()
    }

    pub fn set_gain(&mut self, gain: Gain) -> Result<()> {
        self.tuning.gain = gain;
        self.push_tuning()
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) -> Result<()> {
        if sample_rate == 0 {
            return Err(HubError::InvalidParams("sample rate must be non-zero".into()));
        }
        self.tuning.sample_rate = sample_rate;
        self.push_tuning()
    }

    fn push_tuning(&mut self) -> Result<()> {
        match self.device.as_mut() {
            Some(device) => device.apply(&self.tuning),
            None => Ok(()),
        }
    }

    pub fn tuning(&self) -> &TuningState {
        &self.tuning
    }

    pub fn sample_rate(&self) -> u32 {
        self.tuning.sample_rate
    }

    pub fn center_freq(&self) -> u64 {
        self.tuning.center_freq
    }

    pub fn gain(&self) -> Gain {
        self.tuning.gain
    }

    pub fn stats(&self) -> &SourceStats {
        &self.stats
    }
}

impl Drop for SampleSource {
    fn drop(&mut self) {
        self.close();
    }
}
