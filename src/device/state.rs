//! Receiver tuning state and per-source statistics

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::HubError;

/// Tuner gain: automatic or a fixed value in dB
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Gain {
    #[default]
    Auto,
    Db(f32),
}

impl Gain {
    pub fn is_auto(&self) -> bool {
        matches!(self, Gain::Auto)
    }
}

impl fmt::Display for Gain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gain::Auto => f.write_str("auto"),
            Gain::Db(db) => write!(f, "{}", db),
        }
    }
}

impl FromStr for Gain {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Gain::Auto);
        }
        s.parse::<f32>()
            .map(Gain::Db)
            .map_err(|_| HubError::InvalidParams(format!("gain must be 'auto' or dB, got '{}'", s)))
    }
}

/// Statistics for a sample source
#[derive(Debug, Default)]
pub struct SourceStats {
    pub samples_read: AtomicU64,
    pub reads: AtomicU64,
    pub device_errors: AtomicU64,
}

impl SourceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self, samples: usize) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.samples_read.fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.device_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_samples_read(&self) -> u64 {
        self.samples_read.load(Ordering::Relaxed)
    }

    pub fn get_reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn get_device_errors(&self) -> u64 {
        self.device_errors.load(Ordering::Relaxed)
    }
}

/// Tuning applied to the receiver
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TuningState {
    pub device_index: u32,
    pub sample_rate: u32,
    pub center_freq: u64,
    pub gain: Gain,
    pub ppm_error: i32,
}

impl TuningState {
    pub fn new(device_index: u32, gain: Gain) -> Self {
        Self {
            device_index,
            sample_rate: 2_048_000,
            center_freq: 100_000_000,
            gain,
            ppm_error: 0,
        }
    }
}
