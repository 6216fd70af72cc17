//! trunk-recorder supervision; calls are picked up from its capture directory

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{Map, Value};

use crate::decoder::{InputMode, Launch, PollMode, Stage, Transport, TuningInfo};
use crate::error::{HubError, Result};
use crate::tools::{self, Tool};

pub const CAPACITY: usize = 100;

/// trunk-recorder flushes open calls on SIGTERM, give it longer
pub const STOP_GRACE: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const CAPTURE_DIR: &str = "trunk_captures";
const GENERATED_CONFIG: &str = "trunk_config.json";

#[derive(Debug, Clone, PartialEq)]
pub enum TrunkConfig {
    /// An existing trunk-recorder config file
    Path(PathBuf),
    /// Written to the work directory before launch
    Inline(Map<String, Value>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrunkingParams {
    pub config: Option<TrunkConfig>,
}

pub fn tools() -> Vec<Tool> {
    vec![tools::TRUNK_RECORDER]
}

pub fn capture_dir(work_dir: &Path) -> PathBuf {
    work_dir.join(CAPTURE_DIR)
}

pub fn launch(params: &TrunkingParams, work_dir: &Path) -> Result<Launch> {
    let captures = capture_dir(work_dir);
    let transport = Transport::Directory {
        dir: captures.clone(),
        mode: PollMode::NewFiles {
            extension: "json".into(),
        },
        interval: POLL_INTERVAL,
    };

    let (config_path, contents) = match &params.config {
        Some(TrunkConfig::Path(path)) => (path.clone(), None),
        Some(TrunkConfig::Inline(map)) => {
            let mut map = map.clone();
            map.entry("captureDir")
                .or_insert_with(|| Value::String(captures.to_string_lossy().into_owned()));
            let contents = serde_json::to_string_pretty(&Value::Object(map))
                .map_err(|e| HubError::InvalidParams(format!("trunk config: {}", e)))?;
            (work_dir.join(GENERATED_CONFIG), Some(contents))
        }
        None => {
            return Err(HubError::InvalidParams(
                "trunking needs a config path or an inline config".into(),
            ))
        }
    };

    let stage = Stage::new(
        tools::TRUNK_RECORDER,
        vec!["-c".to_string(), config_path.to_string_lossy().into_owned()],
    );
    let tuning = TuningInfo::default()
        .detail("config", config_path.display())
        .detail("capture_dir", captures.display());

    let mut launch = Launch::new(vec![stage], InputMode::FileDrop, transport)
        .create_dir(&captures)
        .stop_grace(STOP_GRACE)
        .tuning(tuning);
    if let Some(contents) = contents {
        launch = launch.write_file(&config_path, contents);
    }
    Ok(launch)
}
