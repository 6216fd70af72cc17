//! Voice monitoring
//!
//! Digital modes run dsd-fme against the dongle and take its decoded audio
//! from a local UDP port. Analog modes run rtl_fm and read raw PCM from its
//! stdout. Both feed the call log from stderr.

use crate::decoder::{InputMode, Launch, Stage, Transport, TuningInfo, UDP_PORT_PLACEHOLDER};
use crate::device::Gain;
use crate::error::{HubError, Result};
use crate::tools::{self, Tool};

use super::gain_args;

/// dsd-fme decoder selection flags
pub const DIGITAL_MODES: [(&str, &str); 7] = [
    ("auto", "-fa"),
    ("dmr", "-fr"),
    ("p25", "-fp"),
    ("nxdn", "-fn"),
    ("dstar", "-fd"),
    ("ysf", "-fy"),
    ("analog", "-fA"),
];

/// rtl_fm demodulator and output rate per analog mode
pub const ANALOG_MODES: [(&str, &str, u32); 3] = [
    ("nfm", "fm", 48_000),
    ("am", "am", 48_000),
    ("wfm", "wbfm", 170_000),
];

/// dsd-fme gain when the tuner is left on auto
const DSD_AUTO_GAIN: i32 = 26;

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceParams {
    pub frequency_hz: u64,
    pub mode: String,
    pub gain: Gain,
    pub squelch: u32,
}

impl VoiceParams {
    pub fn new(frequency_hz: u64, mode: &str) -> Self {
        Self {
            frequency_hz,
            mode: mode.to_string(),
            gain: Gain::Auto,
            squelch: 0,
        }
    }
}

pub fn is_digital(mode: &str) -> bool {
    DIGITAL_MODES.iter().any(|(m, _)| *m == mode)
}

pub fn tools() -> Vec<Tool> {
    vec![tools::DSD_FME, tools::RTL_FM]
}

pub fn launch(params: &VoiceParams) -> Result<Launch> {
    let mode = params.mode.trim().to_ascii_lowercase();
    let tuning = TuningInfo {
        squelch: Some(params.squelch),
        mode: Some(mode.clone()),
        ..TuningInfo::frequency(params.frequency_hz, params.gain)
    };

    if let Some((_, flag)) = DIGITAL_MODES.iter().find(|(m, _)| *m == mode) {
        let gain = match params.gain {
            Gain::Auto => DSD_AUTO_GAIN,
            Gain::Db(db) => db as i32,
        };
        let args = vec![
            flag.to_string(),
            "-i".to_string(),
            format!(
                "rtl:0:{:.6}M:{}:0:12:{}:1",
                params.frequency_hz as f64 / 1e6,
                gain,
                params.squelch
            ),
            "-o".to_string(),
            format!("udp:127.0.0.1:{}", UDP_PORT_PLACEHOLDER),
        ];
        return Ok(Launch::new(
            vec![Stage::new(tools::DSD_FME, args)],
            InputMode::DeviceDirect,
            Transport::Udp,
        )
        .tuning(tuning.detail("audio", "udp"))
        .with_call_log());
    }

    if let Some((_, demod, rate)) = ANALOG_MODES.iter().find(|(m, ..)| *m == mode) {
        let mut args = gain_args("-g", params.gain);
        args.extend([
            "-f".to_string(),
            params.frequency_hz.to_string(),
            "-M".to_string(),
            demod.to_string(),
            "-s".to_string(),
            rate.to_string(),
            "-l".to_string(),
            params.squelch.to_string(),
            "-".to_string(),
        ]);
        return Ok(Launch::new(
            vec![Stage::new(tools::RTL_FM, args)],
            InputMode::DeviceDirect,
            Transport::Audio,
        )
        .tuning(tuning.detail("audio", format!("s16le {} Hz", rate)))
        .with_call_log());
    }

    Err(HubError::UnsupportedMode(format!(
        "voice mode '{}' (digital: {}; analog: {})",
        params.mode,
        DIGITAL_MODES.map(|(m, _)| m).join(", "),
        ANALOG_MODES.map(|(m, ..)| m).join(", ")
    )))
}
