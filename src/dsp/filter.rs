//! IIR filters for the demodulation path
//!
//! Butterworth low-pass designs are realised as cascaded second-order
//! sections (plus one first-order section for odd orders) obtained through
//! the bilinear transform. Running sections in series keeps the recursion
//! well conditioned where a single high-order polynomial would not be.

use std::f64::consts::PI;

use num_complex::Complex64;

use crate::error::{HubError, Result};

/// One direct-form-II-transposed section. `a0` is normalised to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Section {
    b: [f64; 3],
    a: [f64; 3],
}

impl Section {
    fn run(&self, signal: &mut [f64]) {
        let (mut s1, mut s2) = (0.0f64, 0.0f64);
        for x in signal.iter_mut() {
            let input = *x;
            let y = self.b[0] * input + s1;
            s1 = self.b[1] * input - self.a[1] * y + s2;
            s2 = self.b[2] * input - self.a[2] * y;
            *x = y;
        }
    }

    /// Gain at z = 1
    fn dc_gain(&self) -> f64 {
        (self.b[0] + self.b[1] + self.b[2]) / (self.a[0] + self.a[1] + self.a[2])
    }
}

/// Digital Butterworth low-pass filter
#[derive(Debug, Clone)]
pub struct Butterworth {
    sections: Vec<Section>,
}

impl Butterworth {
    /// Design an `order`-pole low-pass at `cutoff_hz` for `sample_rate` Hz
    pub fn lowpass(order: usize, cutoff_hz: f64, sample_rate: f64) -> Result<Self> {
        if order == 0 {
            return Err(HubError::InvalidParams("filter order must be at least 1".into()));
        }
        if !(cutoff_hz > 0.0 && cutoff_hz < sample_rate / 2.0) {
            return Err(HubError::InvalidParams(format!(
                "cutoff {} Hz must lie between 0 and Nyquist ({} Hz)",
                cutoff_hz,
                sample_rate / 2.0
            )));
        }

        let fs2 = 2.0 * sample_rate;
        // Pre-warp so the digital cutoff lands exactly on cutoff_hz
        let wc = fs2 * (PI * cutoff_hz / sample_rate).tan();
        let bilinear = |p: Complex64| (fs2 + p) / (fs2 - p);

        let analog_pole = |k: usize| {
            let theta = PI * (2 * k + order + 1) as f64 / (2 * order) as f64;
            Complex64::from_polar(wc, theta)
        };

        let mut sections = Vec::with_capacity(order.div_ceil(2));

        for k in 0..order / 2 {
            let z = bilinear(analog_pole(k));
            // Conjugate pair -> real biquad, both zeros at z = -1
            let a = [1.0, -2.0 * z.re, z.norm_sqr()];
            let gain = (a[0] + a[1] + a[2]) / 4.0;
            sections.push(Section {
                b: [gain, 2.0 * gain, gain],
                a,
            });
        }

        if order % 2 == 1 {
            let z = bilinear(Complex64::new(-wc, 0.0)).re;
            let gain = (1.0 - z) / 2.0;
            sections.push(Section {
                b: [gain, gain, 0.0],
                a: [1.0, -z, 0.0],
            });
        }

        Ok(Self { sections })
    }

    pub fn order(&self) -> usize {
        self.sections
            .iter()
            .map(|s| if s.a[2] == 0.0 { 1 } else { 2 })
            .sum()
    }

    /// Filter `signal` in place, starting from rest
    pub fn apply(&self, signal: &mut [f64]) {
        for section in &self.sections {
            section.run(signal);
        }
    }

    /// Overall gain at DC
    pub fn dc_gain(&self) -> f64 {
        self.sections.iter().map(Section::dc_gain).product()
    }

    /// Magnitude response at `freq_hz`
    pub fn magnitude_at(&self, freq_hz: f64, sample_rate: f64) -> f64 {
        let w = 2.0 * PI * freq_hz / sample_rate;
        let z1 = Complex64::from_polar(1.0, -w);
        let z2 = z1 * z1;
        self.sections
            .iter()
            .map(|s| {
                let num = s.b[0] + z1 * s.b[1] + z2 * s.b[2];
                let den = s.a[0] + z1 * s.a[1] + z2 * s.a[2];
                (num / den).norm()
            })
            .product()
    }
}

/// De-emphasis time constant for North American FM broadcast
pub const DEEMPHASIS_TAU_US: f64 = 75.0;

/// One-pole de-emphasis: `y[n] = x[n] + a*y[n-1]`, `a = exp(-1/(fs*tau))`
pub fn deemphasis(signal: &mut [f64], sample_rate: f64, tau_seconds: f64) {
    let a = (-1.0 / (sample_rate * tau_seconds)).exp();
    let mut prev = 0.0f64;
    for x in signal.iter_mut() {
        prev = *x + a * prev;
        *x = prev;
    }
}
