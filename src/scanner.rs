//! Power measurement and frequency sweeps over the sample source

use num_complex::Complex32;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{HubError, Result};
use crate::sdr::SampleSource;

/// Samples averaged by [`measure_power`]
pub const POWER_SAMPLES: usize = 256 * 1024;

/// Readings above this level count as a signal
pub const SIGNAL_THRESHOLD_DB: f32 = -30.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PowerReading {
    pub freq_hz: u64,
    pub power_db: f32,
    pub has_signal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScanHit {
    pub freq_hz: u64,
    pub power_db: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanRequest {
    pub start_hz: u64,
    pub end_hz: u64,
    pub step_hz: u64,
    pub threshold_db: f32,
    pub dwell_ms: u64,
}

impl ScanRequest {
    pub fn new(start_hz: u64, end_hz: u64) -> Self {
        Self {
            start_hz,
            end_hz,
            step_hz: 25_000,
            threshold_db: SIGNAL_THRESHOLD_DB,
            dwell_ms: 50,
        }
    }
}

/// Mean |x|² in dB
pub fn power_db(iq: &[Complex32]) -> f32 {
    let mean = if iq.is_empty() {
        0.0
    } else {
        iq.iter().map(|s| s.norm_sqr() as f64).sum::<f64>() / iq.len() as f64
    };
    (10.0 * (mean + 1e-10).log10()) as f32
}

/// Average power at the current frequency
pub fn measure_power(source: &mut SampleSource) -> Result<PowerReading> {
    let iq = source.read_samples(POWER_SAMPLES)?;
    let power_db = power_db(&iq);
    Ok(PowerReading {
        freq_hz: source.center_freq(),
        power_db,
        has_signal: power_db > SIGNAL_THRESHOLD_DB,
    })
}

/// Step through `start..=end`, dwelling at each frequency, and return the
/// frequencies above the threshold, strongest first. The source is retuned
/// to its original frequency afterwards.
pub fn scan_range(source: &mut SampleSource, request: &ScanRequest) -> Result<Vec<ScanHit>> {
    if request.step_hz == 0 {
        return Err(HubError::InvalidParams("scan step must be non-zero".into()));
    }
    if request.start_hz > request.end_hz {
        return Err(HubError::InvalidParams(format!(
            "scan start {} Hz is above end {} Hz",
            request.start_hz, request.end_hz
        )));
    }

    let dwell_samples = ((source.sample_rate() as u64 * request.dwell_ms) / 1000).max(1) as usize;
    let original = source.center_freq();
    info!(
        "Scanning {:.3}-{:.3} MHz, step {} kHz, threshold {} dB",
        request.start_hz as f64 / 1e6,
        request.end_hz as f64 / 1e6,
        request.step_hz as f64 / 1e3,
        request.threshold_db
    );

    let result = sweep(source, request, dwell_samples);
    // Leave the receiver where the caller had it
    source.tune(original)?;

    let mut hits = result?;
    hits.sort_by(|a, b| b.power_db.total_cmp(&a.power_db));
    info!("Scan found {} signal(s)", hits.len());
    Ok(hits)
}

fn sweep(source: &mut SampleSource, request: &ScanRequest, dwell_samples: usize) -> Result<Vec<ScanHit>> {
    let mut hits = Vec::new();
    let mut freq = request.start_hz;
    while freq <= request.end_hz {
        source.tune(freq)?;
        let power_db = power_db(&source.read_samples(dwell_samples)?);
        debug!("{:.4} MHz: {:.1} dB", freq as f64 / 1e6, power_db);
        if power_db > request.threshold_db {
            hits.push(ScanHit { freq_hz: freq, power_db });
        }
        freq += request.step_hz;
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Gain, TuningState};
    use crate::sdr::{DeviceDriver, IqDevice, SyntheticDriver};

    /// Carrier whose strength depends on how close the tuning is to the beacons
    struct BeaconDriver;

    struct BeaconDevice {
        center_freq: u64,
    }

    const BEACONS: [(u64, f32); 2] = [(100_050_000, 0.5), (100_100_000, 0.2)];

    impl DeviceDriver for BeaconDriver {
        fn name(&self) -> &str {
            "beacon"
        }

        fn open(&self, tuning: &TuningState) -> Result<Box<dyn IqDevice>> {
            Ok(Box::new(BeaconDevice {
                center_freq: tuning.center_freq,
            }))
        }
    }

    impl IqDevice for BeaconDevice {
        fn apply(&mut self, tuning: &TuningState) -> Result<()> {
            self.center_freq = tuning.center_freq;
            Ok(())
        }

        fn read(&mut self, n: usize) -> Result<Vec<Complex32>> {
            let amplitude = BEACONS
                .iter()
                .find(|(f, _)| *f == self.center_freq)
                .map(|(_, a)| *a)
                .unwrap_or(0.001);
            Ok(vec![Complex32::new(amplitude, 0.0); n])
        }

        fn close(&mut self) {}
    }

    fn open(driver: Box<dyn DeviceDriver>) -> SampleSource {
        let mut source = SampleSource::new(driver, TuningState::new(0, Gain::Auto));
        source.open(2_048_000, 100_000_000, Gain::Auto).unwrap();
        source
    }

    #[test]
    fn test_power_db() {
        assert!((power_db(&[Complex32::new(1.0, 0.0); 4]) - 0.0).abs() < 1e-6);
        assert!((power_db(&[Complex32::new(0.1, 0.0); 4]) + 20.0).abs() < 1e-4);
        assert!((power_db(&[]) + 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_measure_power_synthetic_tone() {
        let mut source = open(Box::new(SyntheticDriver::with_seed(1)));
        let reading = measure_power(&mut source).unwrap();
        // 0.5 amplitude tone: about -6 dB
        assert!((reading.power_db + 6.0).abs() < 0.5, "power {}", reading.power_db);
        assert!(reading.has_signal);
        assert_eq!(reading.freq_hz, 100_000_000);
    }

    #[test]
    fn test_scan_sorted_by_power() {
        let mut source = open(Box::new(BeaconDriver));
        let hits = scan_range(&mut source, &ScanRequest::new(100_000_000, 100_150_000)).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].freq_hz, 100_050_000);
        assert_eq!(hits[1].freq_hz, 100_100_000);
        assert!(hits[0].power_db > hits[1].power_db);
        assert_eq!(source.center_freq(), 100_000_000);
    }

    #[test]
    fn test_scan_threshold_filters() {
        let mut source = open(Box::new(BeaconDriver));
        let mut request = ScanRequest::new(100_000_000, 100_150_000);
        request.threshold_db = -10.0;
        let hits = scan_range(&mut source, &request).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_scan_rejects_bad_ranges() {
        let mut source = open(Box::new(BeaconDriver));
        let mut request = ScanRequest::new(100_000_000, 100_150_000);
        request.step_hz = 0;
        assert!(scan_range(&mut source, &request).is_err());
        assert!(scan_range(&mut source, &ScanRequest::new(101_000_000, 100_000_000)).is_err());
        // Out of tuner range
        assert!(scan_range(&mut source, &ScanRequest::new(10_000_000, 10_050_000)).is_err());
    }

    #[test]
    fn test_scan_requires_open_source() {
        let mut source = SampleSource::new(Box::new(BeaconDriver), TuningState::new(0, Gain::Auto));
        assert!(matches!(
            measure_power(&mut source),
            Err(HubError::DeviceUnavailable(_))
        ));
    }
}
