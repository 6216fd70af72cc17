//! Registry of decoder pipelines and the monitor consumer
//!
//! [`Hub`] owns one [`DecoderPipeline`] per decoder family plus the shared
//! [`SampleSource`]. Every consumer goes through the same [`DeviceArbiter`],
//! so a running decoder blocks the monitor and the other way round.

pub mod aircraft;
pub mod ism;
pub mod packet;
pub mod pager;
pub mod trunking;
pub mod voice;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{info, warn};

use crate::bands::{self, Band, Suggestion};
use crate::config::Config;
use crate::decoder::{DecodedEvent, DecoderPipeline, Launch, PipelineStatus};
use crate::device::{DeviceArbiter, Gain, Owner, TuningState};
use crate::dsp::{self, AudioStats, Spectrum};
use crate::error::{HubError, Result};
use crate::scanner::{self, PowerReading, ScanHit, ScanRequest};
use crate::sdr::{DeviceDriver, RtlSdrDriver, SampleSource, SyntheticDriver};
use crate::tools::Tool;

pub use aircraft::{AircraftParams, Backend};
pub use ism::IsmParams;
pub use packet::PacketParams;
pub use pager::PagerParams;
pub use trunking::{TrunkConfig, TrunkingParams};
pub use voice::VoiceParams;

/// `-g <db>` style arguments; empty for automatic gain
pub(crate) fn gain_args(flag: &str, gain: Gain) -> Vec<String> {
    match gain {
        Gain::Auto => Vec::new(),
        Gain::Db(db) => vec![flag.to_string(), db.to_string()],
    }
}

/// Decoder families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Aircraft,
    Packet,
    Ism,
    Pager,
    Voice,
    Trunking,
}

impl Family {
    pub const ALL: [Family; 6] = [
        Family::Aircraft,
        Family::Packet,
        Family::Ism,
        Family::Pager,
        Family::Voice,
        Family::Trunking,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Aircraft => "aircraft",
            Family::Packet => "packet",
            Family::Ism => "ism",
            Family::Pager => "pager",
            Family::Voice => "voice",
            Family::Trunking => "trunking",
        }
    }

    pub fn owner(&self) -> Owner {
        match self {
            Family::Aircraft => Owner::Aircraft,
            Family::Packet => Owner::PacketRadio,
            Family::Ism => Owner::Ism,
            Family::Pager => Owner::Pager,
            Family::Voice => Owner::Voice,
            Family::Trunking => Owner::Trunking,
        }
    }

    fn tools(&self) -> Vec<Tool> {
        match self {
            Family::Aircraft => aircraft::tools(),
            Family::Packet => packet::tools(),
            Family::Ism => ism::tools(),
            Family::Pager => pager::tools(),
            Family::Voice => voice::tools(),
            Family::Trunking => trunking::tools(),
        }
    }

    fn capacity(&self) -> usize {
        match self {
            Family::Aircraft => aircraft::CAPACITY,
            Family::Packet => packet::CAPACITY,
            Family::Ism => ism::CAPACITY,
            Family::Pager => pager::CAPACITY,
            // Voice keeps audio and a call log rather than events
            Family::Voice => 50,
            Family::Trunking => trunking::CAPACITY,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Family {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aircraft" | "adsb" => Ok(Family::Aircraft),
            "packet" | "aprs" | "packet_radio" => Ok(Family::Packet),
            "ism" => Ok(Family::Ism),
            "pager" => Ok(Family::Pager),
            "voice" | "digital" => Ok(Family::Voice),
            "trunking" => Ok(Family::Trunking),
            other => Err(HubError::InvalidParams(format!("unknown pipeline '{}'", other))),
        }
    }
}

/// Buffers and the source hold plain data, a poisoned lock is still usable
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Pipeline registry plus the monitor's sample source
pub struct Hub {
    config: Config,
    arbiter: Arc<DeviceArbiter>,
    source: Mutex<SampleSource>,
    pipelines: Vec<(Family, DecoderPipeline)>,
}

impl Hub {
    /// Picks the synthetic receiver in mock mode, rtl_sdr otherwise
    pub fn new(config: Config, arbiter: Arc<DeviceArbiter>) -> Self {
        let driver: Box<dyn DeviceDriver> = if config.mock {
            Box::new(SyntheticDriver::new())
        } else {
            Box::new(RtlSdrDriver::new(&config.rtl_sdr_path, config.read_timeout))
        };
        Self::with_driver(config, arbiter, driver)
    }

    pub fn with_driver(config: Config, arbiter: Arc<DeviceArbiter>, driver: Box<dyn DeviceDriver>) -> Self {
        let mut tuning = TuningState::new(config.device_index, config.gain);
        tuning.ppm_error = config.ppm_error;

        let pipelines = Family::ALL
            .iter()
            .map(|family| {
                let pipeline = DecoderPipeline::new(
                    family.as_str(),
                    family.owner(),
                    arbiter.clone(),
                    family.tools(),
                    family.capacity(),
                );
                (*family, pipeline)
            })
            .collect();

        Self {
            config,
            arbiter,
            source: Mutex::new(SampleSource::new(driver, tuning)),
            pipelines,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn arbiter(&self) -> &Arc<DeviceArbiter> {
        &self.arbiter
    }

    pub fn pipeline(&self, family: Family) -> &DecoderPipeline {
        // Registered in `Family::ALL` order, which matches the discriminants
        &self.pipelines[family as usize].1
    }

    fn start_with(&self, family: Family, launch: Launch) -> Result<()> {
        let launch = if family == Family::Trunking {
            launch
        } else {
            launch.stop_grace(self.config.stop_grace)
        };
        self.pipeline(family).start(launch)?;
        info!("{} pipeline started", family);
        Ok(())
    }

    pub fn start_aircraft(&self, params: &AircraftParams) -> Result<()> {
        let launch = aircraft::launch(params, &self.config.work_dir, self.config.dump1090_http_port);
        self.start_with(Family::Aircraft, launch)
    }

    pub fn start_packet(&self, params: &PacketParams) -> Result<()> {
        self.start_with(Family::Packet, packet::launch(params))
    }

    pub fn start_ism(&self, params: &IsmParams) -> Result<()> {
        self.start_with(Family::Ism, ism::launch(params))
    }

    pub fn start_pager(&self, params: &PagerParams) -> Result<()> {
        self.start_with(Family::Pager, pager::launch(params)?)
    }

    pub fn start_voice(&self, params: &VoiceParams) -> Result<()> {
        self.start_with(Family::Voice, voice::launch(params)?)
    }

    pub fn start_trunking(&self, params: &TrunkingParams) -> Result<()> {
        self.start_with(Family::Trunking, trunking::launch(params, &self.config.work_dir)?)
    }

    /// Start a family with configured defaults, optionally at `frequency_hz`
    pub fn start_family(&self, family: Family, frequency_hz: Option<u64>) -> Result<()> {
        let gain = self.config.gain;
        match family {
            Family::Aircraft => self.start_aircraft(&AircraftParams {
                gain,
                ..AircraftParams::default()
            }),
            Family::Packet => self.start_packet(&PacketParams {
                frequency_hz: frequency_hz.unwrap_or(packet::DEFAULT_FREQ_HZ),
                gain,
            }),
            Family::Ism => self.start_ism(&IsmParams {
                frequency_hz: frequency_hz.unwrap_or(ism::DEFAULT_FREQ_HZ),
                gain,
            }),
            Family::Pager => self.start_pager(&PagerParams {
                frequency_hz,
                gain,
                ..PagerParams::default()
            }),
            Family::Voice => {
                let frequency_hz = frequency_hz
                    .ok_or_else(|| HubError::InvalidParams("voice needs a frequency".into()))?;
                self.start_voice(&VoiceParams {
                    gain,
                    ..VoiceParams::new(frequency_hz, &self.config.voice_mode)
                })
            }
            Family::Trunking => self.start_trunking(&TrunkingParams {
                config: self.config.trunk_config.clone().map(TrunkConfig::Path),
            }),
        }
    }

    pub fn stop(&self, family: Family) {
        self.pipeline(family).stop();
    }

    pub fn status(&self, family: Family) -> PipelineStatus {
        self.pipeline(family).status()
    }

    pub fn statuses(&self) -> Vec<PipelineStatus> {
        self.pipelines.iter().map(|(_, p)| p.status()).collect()
    }

    pub fn recent_events(&self, family: Family, n: usize) -> Vec<DecodedEvent> {
        self.pipeline(family).recent_events(n)
    }

    /// Voice call-activity lines, oldest first
    pub fn recent_calls(&self, n: usize) -> Vec<DecodedEvent> {
        self.pipeline(Family::Voice).recent_calls(n)
    }

    /// Consume up to `n` bytes of voice audio
    pub fn read_audio(&self, n: usize) -> Vec<u8> {
        self.pipeline(Family::Voice).read_audio(n)
    }

    /// Stop every pipeline and close the monitor source
    pub fn stop_all(&self) {
        for (_, pipeline) in &self.pipelines {
            pipeline.stop();
        }
        self.close_source();
    }

    /// Claim the receiver for the monitor and open the sample source at the
    /// configured rate, frequency and gain
    pub fn open_source(&self) -> Result<()> {
        self.arbiter.try_acquire(Owner::Monitor)?;
        let mut source = lock(&self.source);
        if source.is_open() {
            return Ok(());
        }
        match source.open(self.config.sample_rate, self.config.center_freq, self.config.gain) {
            Ok(()) => {
                info!(
                    "Monitor source open at {:.3} MHz, {} S/s",
                    source.center_freq() as f64 / 1e6,
                    source.sample_rate()
                );
                Ok(())
            }
            Err(e) => {
                warn!("Failed to open sample source: {}", e);
                self.arbiter.release(Owner::Monitor);
                Err(e)
            }
        }
    }

    pub fn close_source(&self) {
        let mut source = lock(&self.source);
        if source.is_open() {
            source.close();
            info!("Monitor source closed");
        }
        self.arbiter.release(Owner::Monitor);
    }

    pub fn source_open(&self) -> bool {
        lock(&self.source).is_open()
    }

    /// Run `f` on the source; the monitor must hold the receiver
    fn with_source<T>(&self, f: impl FnOnce(&mut SampleSource) -> Result<T>) -> Result<T> {
        self.arbiter.ensure_held(Owner::Monitor)?;
        let mut source = lock(&self.source);
        f(&mut source)
    }

    pub fn tuning(&self) -> TuningState {
        *lock(&self.source).tuning()
    }

    pub fn tune(&self, center_freq: u64) -> Result<()> {
        self.with_source(|source| source.tune(center_freq))
    }

    pub fn set_gain(&self, gain: Gain) -> Result<()> {
        self.with_source(|source| source.set_gain(gain))
    }

    pub fn read_samples(&self, n: usize) -> Result<Vec<num_complex::Complex32>> {
        self.with_source(|source| source.read_samples(n))
    }

    /// Spectrum over a fresh read of four FFT lengths
    pub fn spectrum(&self) -> Result<Spectrum> {
        let fft_size = self.config.fft_size;
        self.with_source(|source| {
            let iq = source.read_samples(fft_size * 4)?;
            Ok(dsp::compute_spectrum(
                &iq,
                source.sample_rate() as f64,
                source.center_freq() as f64,
                fft_size,
            ))
        })
    }

    /// Demodulate `duration` of signal at the current frequency
    pub fn capture_audio(&self, duration: Duration, mode: &str) -> Result<(Vec<f32>, AudioStats)> {
        let modulation: dsp::Modulation = mode.parse()?;
        let audio_rate = self.config.audio_rate;
        self.with_source(|source| {
            let n = (source.sample_rate() as f64 * duration.as_secs_f64()).round() as usize;
            if n == 0 {
                return Err(HubError::InvalidParams("capture duration is too short".into()));
            }
            let iq = source.read_samples(n)?;
            let audio = dsp::demodulate(&iq, modulation, source.sample_rate(), audio_rate)?;
            let stats = AudioStats::from_audio(&audio);
            info!(
                "Captured {:.1}s of {} audio: peak {:.3}, rms {:.3}",
                duration.as_secs_f64(),
                modulation.as_str(),
                stats.peak,
                stats.rms
            );
            Ok((audio, stats))
        })
    }

    pub fn measure_power(&self) -> Result<PowerReading> {
        self.with_source(scanner::measure_power)
    }

    pub fn scan_range(&self, request: &ScanRequest) -> Result<Vec<ScanHit>> {
        self.with_source(|source| scanner::scan_range(source, request))
    }

    /// Sweep the presets whose name starts with `prefix`, e.g. `noaa`
    pub fn scan_band(&self, prefix: &str) -> Result<Vec<ScanHit>> {
        let presets = bands::bands_with_prefix(prefix);
        let (start_hz, end_hz, step_hz) = bands::scan_plan(&presets)
            .ok_or_else(|| HubError::InvalidParams(format!("no band presets match '{}'", prefix)))?;
        let request = ScanRequest {
            step_hz,
            ..ScanRequest::new(start_hz, end_hz)
        };
        self.scan_range(&request)
    }

    /// Tune the monitor to a named preset
    pub fn tune_preset(&self, name: &str) -> Result<&'static Band> {
        let band = bands::find_band(name)
            .ok_or_else(|| HubError::InvalidParams(format!("unknown band preset '{}'", name)))?;
        self.tune(band.freq_hz)?;
        Ok(band)
    }

    pub fn suggest(&self, freq_hz: u64) -> Suggestion {
        bands::suggest_decoder(freq_hz)
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.stop_all();
    }
}
