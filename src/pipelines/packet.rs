//! APRS packet radio: rtl_fm demodulates, direwolf decodes AX.25 from stdin

use crate::decoder::{parser, InputMode, Launch, Stage, Transport, TuningInfo};
use crate::device::Gain;
use crate::tools::{self, Tool};

use super::gain_args;

/// North American APRS
pub const DEFAULT_FREQ_HZ: u64 = 144_390_000;
pub const CAPACITY: usize = 200;

/// Audio rate shared by both ends of the pipe
const AUDIO_RATE: &str = "22050";

#[derive(Debug, Clone, PartialEq)]
pub struct PacketParams {
    pub frequency_hz: u64,
    pub gain: Gain,
}

impl Default for PacketParams {
    fn default() -> Self {
        Self {
            frequency_hz: DEFAULT_FREQ_HZ,
            gain: Gain::Auto,
        }
    }
}

pub fn tools() -> Vec<Tool> {
    vec![tools::RTL_FM, tools::DIREWOLF]
}

pub fn launch(params: &PacketParams) -> Launch {
    let mut rtl_fm = gain_args("-g", params.gain);
    rtl_fm.extend([
        "-f".to_string(),
        params.frequency_hz.to_string(),
        "-M".to_string(),
        "fm".to_string(),
        "-s".to_string(),
        AUDIO_RATE.to_string(),
        "-".to_string(),
    ]);

    let direwolf = ["-r", AUDIO_RATE, "-D", "1", "-t", "0", "-"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    Launch::new(
        vec![Stage::new(tools::RTL_FM, rtl_fm), Stage::new(tools::DIREWOLF, direwolf)],
        InputMode::StdinPipe,
        Transport::Lines(parser::text_line),
    )
    .tuning(TuningInfo::frequency(params.frequency_hz, params.gain))
}
