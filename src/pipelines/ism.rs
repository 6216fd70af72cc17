//! ISM band sensors through rtl_433's JSON output

use crate::decoder::{parser, InputMode, Launch, Stage, Transport, TuningInfo};
use crate::device::Gain;
use crate::tools::{self, Tool};

use super::gain_args;

pub const DEFAULT_FREQ_HZ: u64 = 433_920_000;
pub const CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct IsmParams {
    pub frequency_hz: u64,
    pub gain: Gain,
}

impl Default for IsmParams {
    fn default() -> Self {
        Self {
            frequency_hz: DEFAULT_FREQ_HZ,
            gain: Gain::Auto,
        }
    }
}

pub fn tools() -> Vec<Tool> {
    vec![tools::RTL_433]
}

pub fn launch(params: &IsmParams) -> Launch {
    let mut args = vec![
        "-f".to_string(),
        params.frequency_hz.to_string(),
        "-F".to_string(),
        "json".to_string(),
    ];
    args.extend(gain_args("-g", params.gain));

    Launch::new(
        vec![Stage::new(tools::RTL_433, args)],
        InputMode::DeviceDirect,
        Transport::Lines(parser::json_line),
    )
    .tuning(TuningInfo::frequency(params.frequency_hz, params.gain).detail("format", "json"))
}
