//! Synthetic receiver for running without hardware
//!
//! Produces a 0.5-amplitude complex tone 100 kHz above the centre frequency
//! plus low-level Gaussian noise.

use std::f64::consts::PI;

use num_complex::Complex32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::source::{DeviceDriver, IqDevice};
use crate::device::TuningState;
use crate::error::Result;

pub const TONE_OFFSET_HZ: f64 = 100_000.0;
const TONE_AMPLITUDE: f32 = 0.5;
const NOISE_SIGMA: f32 = 0.02;

#[derive(Debug, Default)]
pub struct SyntheticDriver {
    seed: Option<u64>,
}

impl SyntheticDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic noise, for tests
    pub fn with_seed(seed: u64) -> Self {
        Self { seed: Some(seed) }
    }
}

impl DeviceDriver for SyntheticDriver {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn open(&self, tuning: &TuningState) -> Result<Box<dyn IqDevice>> {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Box::new(SyntheticDevice {
            sample_rate: tuning.sample_rate,
            phase: 0.0,
            rng,
        }))
    }
}

struct SyntheticDevice {
    sample_rate: u32,
    phase: f64,
    rng: StdRng,
}

impl SyntheticDevice {
    /// Box-Muller standard normal
    fn gaussian(&mut self) -> f32 {
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        ((-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()) as f32
    }
}

impl IqDevice for SyntheticDevice {
    fn apply(&mut self, tuning: &TuningState) -> Result<()> {
        self.sample_rate = tuning.sample_rate;
        Ok(())
    }

    fn read(&mut self, n: usize) -> Result<Vec<Complex32>> {
        let step = 2.0 * PI * TONE_OFFSET_HZ / self.sample_rate as f64;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let tone = Complex32::from_polar(TONE_AMPLITUDE, self.phase as f32);
            let noise = Complex32::new(self.gaussian(), self.gaussian()) * NOISE_SIGMA;
            out.push(tone + noise);
            self.phase = (self.phase + step) % (2.0 * PI);
        }
        Ok(out)
    }

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Gain;

    #[test]
    fn test_synthetic_tone_power() {
        let driver = SyntheticDriver::with_seed(1);
        let mut device = driver.open(&TuningState::new(0, Gain::Auto)).unwrap();
        let samples = device.read(8192).unwrap();
        assert_eq!(samples.len(), 8192);

        let power: f32 = samples.iter().map(|s| s.norm_sqr()).sum::<f32>() / samples.len() as f32;
        // 0.25 from the tone, ~0.0008 from noise
        assert!((power - 0.25).abs() < 0.02, "power {}", power);
    }

    #[test]
    fn test_synthetic_phase_continuous_across_reads() {
        let driver = SyntheticDriver::with_seed(2);
        let mut device = driver.open(&TuningState::new(0, Gain::Auto)).unwrap();
        let a = device.read(100).unwrap();
        let b = device.read(100).unwrap();
        let step = (b[0] * a[99].conj()).arg() as f64;
        let expected = 2.0 * PI * TONE_OFFSET_HZ / 2_048_000.0;
        assert!((step - expected).abs() < 0.2, "step {} expected {}", step, expected);
    }
}
