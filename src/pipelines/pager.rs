//! Pager decoding: rtl_fm piped into multimon-ng

use crate::decoder::{parser, InputMode, Launch, Stage, Transport, TuningInfo};
use crate::device::Gain;
use crate::error::{HubError, Result};
use crate::tools::{self, Tool};

use super::gain_args;

pub const DEFAULT_DECODERS: [&str; 3] = ["POCSAG512", "POCSAG1200", "POCSAG2400"];
pub const CAPACITY: usize = 200;

const AUDIO_RATE: &str = "22050";

/// Pager networks vary by region, so there is no default frequency
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PagerParams {
    pub frequency_hz: Option<u64>,
    /// multimon-ng demodulators; empty means [`DEFAULT_DECODERS`]
    pub decoders: Vec<String>,
    pub gain: Gain,
    pub squelch: u32,
}

impl PagerParams {
    pub fn new(frequency_hz: u64) -> Self {
        Self {
            frequency_hz: Some(frequency_hz),
            ..Self::default()
        }
    }
}

pub fn tools() -> Vec<Tool> {
    vec![tools::RTL_FM, tools::MULTIMON_NG]
}

pub fn launch(params: &PagerParams) -> Result<Launch> {
    let frequency_hz = params
        .frequency_hz
        .ok_or_else(|| HubError::InvalidParams("pager needs a frequency".into()))?;

    let decoders: Vec<String> = if params.decoders.is_empty() {
        DEFAULT_DECODERS.iter().map(|d| d.to_string()).collect()
    } else {
        params.decoders.clone()
    };

    let mut rtl_fm = gain_args("-g", params.gain);
    rtl_fm.extend([
        "-f".to_string(),
        frequency_hz.to_string(),
        "-M".to_string(),
        "fm".to_string(),
        "-s".to_string(),
        AUDIO_RATE.to_string(),
        "-l".to_string(),
        params.squelch.to_string(),
        "-".to_string(),
    ]);

    let mut multimon = vec!["-t".to_string(), "raw".to_string(), "--timestamp".to_string()];
    for decoder in &decoders {
        multimon.push("-a".to_string());
        multimon.push(decoder.clone());
    }
    multimon.push("-".to_string());

    let tuning = TuningInfo {
        squelch: Some(params.squelch),
        ..TuningInfo::frequency(frequency_hz, params.gain)
    }
    .detail("decoders", decoders.join(","));

    Ok(Launch::new(
        vec![Stage::new(tools::RTL_FM, rtl_fm), Stage::new(tools::MULTIMON_NG, multimon)],
        InputMode::StdinPipe,
        Transport::Lines(parser::text_line),
    )
    .tuning(tuning))
}
