//! Configuration loaded from environment variables

use std::path::PathBuf;
use std::time::Duration;

use crate::device::Gain;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// RTL-SDR device index
    pub device_index: u32,

    /// IQ sample rate for the monitor source
    pub sample_rate: u32,

    /// Initial centre frequency in Hz
    pub center_freq: u64,

    /// Tuner gain ("auto" or dB)
    pub gain: Gain,

    /// PPM frequency correction
    pub ppm_error: i32,

    /// Demodulated audio rate
    pub audio_rate: u32,

    /// FFT length for spectrum snapshots
    pub fft_size: usize,

    /// Path or name of the rtl_sdr executable
    pub rtl_sdr_path: String,

    /// Scratch directory for decoder output files and generated configs
    pub work_dir: PathBuf,

    /// SIGTERM grace period before decoders are killed
    pub stop_grace: Duration,

    /// Longest wait for IQ samples before a read fails
    pub read_timeout: Duration,

    /// Use the synthetic receiver instead of hardware
    pub mock: bool,

    /// dump1090 web interface port
    pub dump1090_http_port: u16,

    /// Status logging interval
    pub status_interval: Duration,

    /// Pipeline started at launch (aircraft, aprs, ism, pager, voice, trunking)
    pub pipeline: Option<String>,

    /// Frequency for the launch pipeline in Hz
    pub pipeline_freq: Option<u64>,

    /// Voice decoder mode for the launch pipeline
    pub voice_mode: String,

    /// trunk-recorder config file for the launch pipeline
    pub trunk_config: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse_u64 = |key: &str| lookup(key).and_then(|s| parse_frequency(&s));
        let non_empty = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

        Self {
            device_index: lookup("DEVICE_INDEX")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),

            sample_rate: lookup("SAMPLE_RATE")
                .and_then(|s| parse_frequency(&s))
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(2_048_000),

            center_freq: parse_u64("CENTER_FREQ").unwrap_or(100_000_000),

            gain: lookup("DEVICE_GAIN")
                .and_then(|s| s.parse().ok())
                .unwrap_or(Gain::Auto),

            ppm_error: lookup("PPM_ERROR")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),

            audio_rate: lookup("AUDIO_RATE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(48_000),

            fft_size: lookup("FFT_SIZE")
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(1024),

            rtl_sdr_path: non_empty("RTL_SDR_PATH").unwrap_or_else(|| "rtl_sdr".to_string()),

            work_dir: non_empty("SDR_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./sdr-data")),

            stop_grace: Duration::from_millis(
                lookup("STOP_GRACE_MS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3000),
            ),

            read_timeout: Duration::from_millis(
                lookup("READ_TIMEOUT_MS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2000),
            ),

            mock: lookup("SDR_MOCK")
                .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false),

            dump1090_http_port: lookup("DUMP1090_HTTP_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(8888),

            status_interval: Duration::from_secs(
                lookup("STATUS_INTERVAL_SECS")
                    .and_then(|s| s.parse().ok())
                    .filter(|n| *n > 0)
                    .unwrap_or(10),
            ),

            pipeline: non_empty("SDR_PIPELINE").map(|s| s.trim().to_ascii_lowercase()),

            pipeline_freq: parse_u64("PIPELINE_FREQ"),

            voice_mode: non_empty("VOICE_MODE").unwrap_or_else(|| "nfm".to_string()),

            trunk_config: non_empty("TRUNK_CONFIG").map(PathBuf::from),
        }
    }
}

/// Accepts plain integers and float notation such as `100e6` or `144.39e6`
fn parse_frequency(s: &str) -> Option<u64> {
    let s = s.trim();
    s.parse::<u64>().ok().or_else(|| {
        s.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v.round() as u64)
    })
}
