//! IQ → audio demodulation
//!
//! FM uses a polar discriminator (phase difference of consecutive samples),
//! so no phase unwrapping is needed. AM uses envelope detection. Both paths
//! low-pass, resample to the audio rate and peak-normalise.

use std::fmt;
use std::str::FromStr;

use num_complex::Complex32;
use serde::Serialize;

use super::filter::{deemphasis, Butterworth, DEEMPHASIS_TAU_US};
use super::resample::RationalResampler;
use crate::error::{HubError, Result};

/// Low-pass order used on every demodulation path
const FILTER_ORDER: usize = 5;

/// Mono broadcast audio bandwidth
const WFM_CUTOFF_HZ: f64 = 15_000.0;
const NFM_CUTOFF_HZ: f64 = 4_000.0;
const AM_CUTOFF_HZ: f64 = 5_000.0;

/// RMS above which a capture is considered to contain signal
const SIGNAL_RMS_THRESHOLD: f32 = 0.01;

/// Supported analog modulation schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Modulation {
    /// Broadcast FM with 75 µs de-emphasis
    WideFm,
    /// Voice FM (weather, marine, public safety)
    NarrowFm,
    /// Envelope AM (aviation, broadcast AM)
    Am,
}

impl Modulation {
    /// Mode tags accepted by [`FromStr`]
    pub const TAGS: [&'static str; 4] = ["wfm", "fm", "am", "nfm"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modulation::WideFm => "wfm",
            Modulation::NarrowFm => "nfm",
            Modulation::Am => "am",
        }
    }

    pub fn cutoff_hz(&self) -> f64 {
        match self {
            Modulation::WideFm => WFM_CUTOFF_HZ,
            Modulation::NarrowFm => NFM_CUTOFF_HZ,
            Modulation::Am => AM_CUTOFF_HZ,
        }
    }
}

impl fmt::Display for Modulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modulation {
    type Err = HubError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wfm" | "fm" => Ok(Modulation::WideFm),
            "nfm" => Ok(Modulation::NarrowFm),
            "am" => Ok(Modulation::Am),
            other => Err(HubError::UnsupportedMode(format!(
                "{} (available: {})",
                other,
                Self::TAGS.join(", ")
            ))),
        }
    }
}

/// Instantaneous frequency in radians/sample: `arg(x[i] * conj(x[i-1]))`
pub fn fm_discriminator(iq: &[Complex32]) -> Vec<f64> {
    iq.windows(2)
        .map(|pair| {
            let cur = pair[1];
            let prev = pair[0];
            let re = cur.re as f64 * prev.re as f64 + cur.im as f64 * prev.im as f64;
            let im = cur.im as f64 * prev.re as f64 - cur.re as f64 * prev.im as f64;
            im.atan2(re)
        })
        .collect()
}

/// Envelope with the DC component removed
pub fn am_envelope(iq: &[Complex32]) -> Vec<f64> {
    if iq.is_empty() {
        return Vec::new();
    }
    let mut env: Vec<f64> = iq
        .iter()
        .map(|s| (s.re as f64).hypot(s.im as f64))
        .collect();
    let mean = env.iter().sum::<f64>() / env.len() as f64;
    env.iter_mut().for_each(|v| *v -= mean);
    env
}

/// Scale to a peak of 1.0. An all-zero signal is left unscaled.
pub fn normalize_peak(signal: &[f64]) -> Vec<f32> {
    let peak = signal.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    if peak > 0.0 {
        signal.iter().map(|v| (v / peak) as f32).collect()
    } else {
        signal.iter().map(|&v| v as f32).collect()
    }
}

/// Demodulate IQ samples to mono audio at `audio_rate`
pub fn demodulate(
    iq: &[Complex32],
    mode: Modulation,
    sample_rate: u32,
    audio_rate: u32,
) -> Result<Vec<f32>> {
    let resampler = RationalResampler::for_rates(sample_rate, audio_rate)?;
    let fs = sample_rate as f64;
    let lowpass = Butterworth::lowpass(FILTER_ORDER, mode.cutoff_hz(), fs)?;

    let mut baseband = match mode {
        Modulation::WideFm | Modulation::NarrowFm => fm_discriminator(iq),
        Modulation::Am => am_envelope(iq),
    };

    lowpass.apply(&mut baseband);
    if mode == Modulation::WideFm {
        deemphasis(&mut baseband, fs, DEEMPHASIS_TAU_US * 1e-6);
    }

    let audio = resampler.process(&baseband)?;
    Ok(normalize_peak(&audio))
}

/// Parse `mode` then [`demodulate`]
pub fn demodulate_tag(iq: &[Complex32], mode: &str, sample_rate: u32, audio_rate: u32) -> Result<Vec<f32>> {
    demodulate(iq, mode.parse()?, sample_rate, audio_rate)
}

/// Level summary of a demodulated capture
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AudioStats {
    pub samples: usize,
    pub peak: f32,
    pub rms: f32,
    pub has_signal: bool,
}

impl AudioStats {
    pub fn from_audio(audio: &[f32]) -> Self {
        let peak = audio.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        let rms = if audio.is_empty() {
            0.0
        } else {
            (audio.iter().map(|v| v * v).sum::<f32>() / audio.len() as f32).sqrt()
        };
        Self {
            samples: audio.len(),
            peak,
            rms,
            has_signal: rms > SIGNAL_RMS_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const FS: u32 = 2_048_000;
    const AUDIO: u32 = 48_000;

    fn tone(offset_hz: f64, amplitude: f32, n: usize) -> Vec<Complex32> {
        (0..n)
            .map(|i| {
                let phase = 2.0 * PI * offset_hz * i as f64 / FS as f64;
                Complex32::from_polar(amplitude, phase as f32)
            })
            .collect()
    }

    fn variance(v: &[f64]) -> f64 {
        let mean = v.iter().sum::<f64>() / v.len() as f64;
        v.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / v.len() as f64
    }

    #[test]
    fn test_mode_tags() {
        assert_eq!("wfm".parse::<Modulation>().unwrap(), Modulation::WideFm);
        assert_eq!("fm".parse::<Modulation>().unwrap(), Modulation::WideFm);
        assert_eq!("NFM".parse::<Modulation>().unwrap(), Modulation::NarrowFm);
        assert_eq!("am".parse::<Modulation>().unwrap(), Modulation::Am);
        assert!(matches!(
            "usb".parse::<Modulation>(),
            Err(HubError::UnsupportedMode(_))
        ));
    }

    #[test]
    fn test_discriminator_constant_for_pure_tone() {
        let offset = 25_000.0;
        let out = fm_discriminator(&tone(offset, 0.8, 10_000));
        assert_eq!(out.len(), 9_999);
        let expected = 2.0 * PI * offset / FS as f64;
        let mean = out.iter().sum::<f64>() / out.len() as f64;
        assert!((mean - expected).abs() < 1e-4, "mean {} expected {}", mean, expected);
        assert!(variance(&out) < 1e-9);
    }

    #[test]
    fn test_discriminator_proportional_to_offset() {
        let a = fm_discriminator(&tone(10_000.0, 1.0, 1_000));
        let b = fm_discriminator(&tone(-20_000.0, 1.0, 1_000));
        let ratio = b[500] / a[500];
        assert!((ratio + 2.0).abs() < 1e-3, "ratio {}", ratio);
    }

    #[test]
    fn test_am_envelope_flat_for_constant_carrier() {
        let env = am_envelope(&tone(0.0, 0.7, 4_096));
        assert!(variance(&env) < 1e-12);
        assert!(env.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_wfm_tone_gives_steady_output() {
        let audio = demodulate(&tone(30_000.0, 1.0, 204_800), Modulation::WideFm, FS, AUDIO).unwrap();
        assert_eq!(audio.len(), (204_800usize * 3).div_ceil(128));
        // After the de-emphasis settles the output is flat
        let tail = &audio[audio.len() / 2..audio.len() - 200];
        let mut sorted = tail.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let median = sorted[sorted.len() / 2];
        assert!(median > 0.5, "median {}", median);
        for v in tail {
            assert!((v - median).abs() < 0.01 * median, "value {} median {}", v, median);
        }
    }

    #[test]
    fn test_am_modulated_tone_recovered() {
        // 1 kHz AM at 50% depth
        let n = 204_800;
        let iq: Vec<Complex32> = (0..n)
            .map(|i| {
                let t = i as f64 / FS as f64;
                let env = 0.5 * (1.0 + 0.5 * (2.0 * PI * 1_000.0 * t).sin());
                Complex32::new(env as f32, 0.0)
            })
            .collect();
        let audio = demodulate(&iq, Modulation::Am, FS, AUDIO).unwrap();
        let stats = AudioStats::from_audio(&audio);
        assert!((stats.peak - 1.0).abs() < 1e-6);
        // A sine normalised to unit peak has RMS ~0.707
        assert!((stats.rms - 0.707).abs() < 0.05, "rms {}", stats.rms);
        assert!(stats.has_signal);
    }

    #[test]
    fn test_empty_and_zero_input_do_not_divide_by_zero() {
        let empty = demodulate(&[], Modulation::NarrowFm, FS, AUDIO).unwrap();
        assert!(empty.is_empty());

        let zeros = vec![Complex32::new(0.0, 0.0); 4_096];
        for mode in [Modulation::WideFm, Modulation::NarrowFm, Modulation::Am] {
            let audio = demodulate(&zeros, mode, FS, AUDIO).unwrap();
            assert!(audio.iter().all(|v| *v == 0.0));
        }
    }

    #[test]
    fn test_demodulate_tag_rejects_unknown_mode() {
        assert!(matches!(
            demodulate_tag(&tone(0.0, 1.0, 16), "lsb", FS, AUDIO),
            Err(HubError::UnsupportedMode(_))
        ));
    }

    #[test]
    fn test_audio_stats_silence() {
        let stats = AudioStats::from_audio(&[0.0; 100]);
        assert_eq!(stats.samples, 100);
        assert!(!stats.has_signal);
        assert_eq!(AudioStats::from_audio(&[]).rms, 0.0);
    }
}
