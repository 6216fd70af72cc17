//! ADS-B aircraft tracking
//!
//! The default backend is dump1090, which maintains `aircraft.json` in a
//! directory we poll. `rtl_adsb` is the fallback: it prints raw Mode S
//! frames as `*<hex>;` lines.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::decoder::{parser, InputMode, Launch, PollMode, Stage, Transport, TuningInfo};
use crate::device::Gain;
use crate::tools::{self, Tool};

use super::gain_args;

pub const FREQUENCY_HZ: u64 = 1_090_000_000;
pub const CAPACITY: usize = 200;

const JSON_DIR: &str = "adsb_json";
const SNAPSHOT_FILE: &str = "aircraft.json";
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Dump1090,
    RtlAdsb,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AircraftParams {
    pub backend: Backend,
    pub gain: Gain,
    /// dump1090 web port; the configured port when unset
    pub http_port: Option<u16>,
}

pub fn tools() -> Vec<Tool> {
    vec![tools::DUMP1090, tools::RTL_ADSB]
}

pub fn json_dir(work_dir: &Path) -> PathBuf {
    work_dir.join(JSON_DIR)
}

pub fn launch(params: &AircraftParams, work_dir: &Path, default_http_port: u16) -> Launch {
    let tuning = TuningInfo::frequency(FREQUENCY_HZ, params.gain);

    match params.backend {
        Backend::Dump1090 => {
            let dir = json_dir(work_dir);
            let port = params.http_port.unwrap_or(default_http_port);
            let mut args = vec![
                "--net".to_string(),
                "--net-http-port".to_string(),
                port.to_string(),
                "--write-json".to_string(),
                dir.to_string_lossy().into_owned(),
                "--write-json-every".to_string(),
                "1".to_string(),
                "--quiet".to_string(),
            ];
            args.extend(gain_args("--gain", params.gain));

            Launch::new(
                vec![Stage::new(tools::DUMP1090, args)],
                InputMode::DeviceDirect,
                Transport::Directory {
                    dir: dir.clone(),
                    mode: PollMode::Snapshot {
                        file: SNAPSHOT_FILE.into(),
                        array_key: "aircraft".into(),
                    },
                    interval: POLL_INTERVAL,
                },
            )
            .create_dir(dir)
            .tuning(tuning.detail("backend", "dump1090").detail("http_port", port))
        }
        Backend::RtlAdsb => Launch::new(
            vec![Stage::new(tools::RTL_ADSB, gain_args("-g", params.gain))],
            InputMode::DeviceDirect,
            Transport::Lines(parser::hex_frame),
        )
        .tuning(tuning.detail("backend", "rtl_adsb")),
    }
}
