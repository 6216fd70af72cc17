//! Power spectrum of IQ samples
//!
//! Hann-windowed FFT, shifted so DC sits in the middle, power in dB with a
//! small floor so empty bins never produce `-inf`.

use std::f32::consts::PI;

use num_complex::Complex32;
use rustfft::FftPlanner;
use serde::Serialize;

/// Added to |X|² before the logarithm
const POWER_FLOOR: f32 = 1e-10;

/// Symmetric Hann window coefficients
pub fn hann_window(size: usize) -> Vec<f32> {
    if size == 1 {
        return vec![1.0];
    }
    (0..size)
        .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f32 / (size - 1) as f32).cos())
        .collect()
}

/// Power versus absolute frequency
#[derive(Debug, Clone, Serialize)]
pub struct Spectrum {
    pub center_freq: f64,
    pub sample_rate: f64,
    pub freqs_hz: Vec<f64>,
    pub power_db: Vec<f32>,
}

/// Peak and noise floor of a spectrum
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpectrumSummary {
    pub center_freq_hz: f64,
    pub span_hz: f64,
    pub peak_freq_hz: f64,
    pub peak_power_db: f32,
    pub noise_floor_db: f32,
}

/// Compute the spectrum of the most recent `fft_size` samples.
///
/// Fewer samples than `fft_size` are transformed as-is.
pub fn compute_spectrum(iq: &[Complex32], sample_rate: f64, center_freq: f64, fft_size: usize) -> Spectrum {
    let start = iq.len().saturating_sub(fft_size);
    let samples = &iq[start..];
    let n = samples.len();

    if n == 0 {
        return Spectrum {
            center_freq,
            sample_rate,
            freqs_hz: Vec::new(),
            power_db: Vec::new(),
        };
    }

    let window = hann_window(n);
    let mut buffer: Vec<Complex32> = samples
        .iter()
        .zip(window.iter())
        .map(|(s, w)| s * w)
        .collect();

    let mut planner = FftPlanner::<f32>::new();
    planner.plan_fft_forward(n).process(&mut buffer);

    // fftshift: bin n - n/2 .. wraps so the most negative frequency comes first
    buffer.rotate_left(n - n / 2);

    let power_db = buffer
        .iter()
        .map(|c| 10.0 * (c.norm_sqr() + POWER_FLOOR).log10())
        .collect();

    let bin_hz = sample_rate / n as f64;
    let half = (n / 2) as f64;
    let freqs_hz = (0..n)
        .map(|k| center_freq + (k as f64 - half) * bin_hz)
        .collect();

    Spectrum {
        center_freq,
        sample_rate,
        freqs_hz,
        power_db,
    }
}

impl Spectrum {
    pub fn len(&self) -> usize {
        self.power_db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.power_db.is_empty()
    }

    pub fn bin_width_hz(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.sample_rate / self.len() as f64
        }
    }

    /// Frequency and power of the strongest bin
    pub fn peak(&self) -> Option<(f64, f32)> {
        self.power_db
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, &p)| match best {
                Some((_, bp)) if bp >= p => best,
                _ => Some((i, p)),
            })
            .map(|(i, p)| (self.freqs_hz[i], p))
    }

    /// Median bin power
    pub fn noise_floor(&self) -> Option<f32> {
        if self.is_empty() {
            return None;
        }
        let mut sorted = self.power_db.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        Some(if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        })
    }

    pub fn summary(&self) -> Option<SpectrumSummary> {
        let (peak_freq_hz, peak_power_db) = self.peak()?;
        Some(SpectrumSummary {
            center_freq_hz: self.center_freq,
            span_hz: self.sample_rate,
            peak_freq_hz,
            peak_power_db,
            noise_floor_db: self.noise_floor()?,
        })
    }

    /// Text raster of `width` columns by `height + 1` rows plus a frequency
    /// label line. Column heights are scaled between the minimum and maximum
    /// of the displayed values.
    pub fn render_ascii(&self, width: usize, height: usize) -> String {
        if self.is_empty() || width == 0 {
            return String::new();
        }

        let last = self.len() - 1;
        let indices: Vec<usize> = if width == 1 {
            vec![0]
        } else {
            (0..width).map(|c| c * last / (width - 1)).collect()
        };
        let values: Vec<f32> = indices.iter().map(|&i| self.power_db[i]).collect();

        let vmin = values.iter().copied().fold(f32::INFINITY, f32::min);
        let mut vmax = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if vmax - vmin < 1e-6 {
            vmax = vmin + 1.0;
        }
        let levels: Vec<usize> = values
            .iter()
            .map(|v| ((v - vmin) / (vmax - vmin) * height as f32) as usize)
            .collect();

        let mut lines: Vec<String> = (0..=height)
            .rev()
            .map(|row| {
                levels
                    .iter()
                    .map(|&level| if level >= row { '#' } else { ' ' })
                    .collect()
            })
            .collect();

        let first = self.freqs_hz[indices[0]] / 1e6;
        let end = self.freqs_hz[indices[indices.len() - 1]] / 1e6;
        lines.push(format!(
            "{:.1} MHz{}{:.1} MHz",
            first,
            " ".repeat(width.saturating_sub(20)),
            end
        ));
        lines.join("\n")
    }
}
