//! External executable lookup

use std::borrow::Cow;
use std::env;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{HubError, Result};

/// An external program a pipeline depends on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
    pub name: Cow<'static, str>,
    pub install_hint: Cow<'static, str>,
}

impl Tool {
    pub const fn new(name: &'static str, install_hint: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            install_hint: Cow::Borrowed(install_hint),
        }
    }

    /// A tool known only at runtime, e.g. an explicit path
    pub fn owned(name: impl Into<String>, install_hint: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            install_hint: Cow::Owned(install_hint.into()),
        }
    }

    pub fn is_available(&self) -> bool {
        which(&self.name).is_some()
    }

    /// Resolve the tool or fail with ToolNotFound
    pub fn require(&self) -> Result<PathBuf> {
        which(&self.name).ok_or_else(|| HubError::tool_not_found(&self.name, &self.install_hint))
    }
}

/// Availability of one tool, as reported in status snapshots
#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub name: String,
    pub available: bool,
}

impl From<&Tool> for ToolStatus {
    fn from(tool: &Tool) -> Self {
        Self {
            name: tool.name.to_string(),
            available: tool.is_available(),
        }
    }
}

pub const RTL_SDR: Tool = Tool::new("rtl_sdr", "Install with: brew install librtlsdr");
pub const RTL_FM: Tool = Tool::new("rtl_fm", "Install with: brew install librtlsdr");
pub const RTL_ADSB: Tool = Tool::new("rtl_adsb", "Install with: brew install librtlsdr");
pub const RTL_433: Tool = Tool::new("rtl_433", "Install with: brew install rtl_433");
pub const DUMP1090: Tool = Tool::new("dump1090", "Install with: brew install dump1090-mutability");
pub const DIREWOLF: Tool = Tool::new("direwolf", "Install with: brew install direwolf");
pub const MULTIMON_NG: Tool = Tool::new("multimon-ng", "Install with: brew install multimon-ng");
pub const DSD_FME: Tool = Tool::new("dsd-fme", "Build from source: github.com/lwvmobile/dsd-fme");
pub const TRUNK_RECORDER: Tool = Tool::new(
    "trunk-recorder",
    "Build from source: github.com/robotastic/trunk-recorder",
);

/// Locate an executable the way a shell would.
///
/// Names containing a path separator are checked directly, everything else is
/// searched for in `PATH`.
pub fn which(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .flat_map(|dir| {
            let plain = dir.join(name);
            let exe = dir.join(format!("{}.exe", name));
            [plain, exe]
        })
        .find(|p| is_executable(p))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_which_finds_shell() {
        assert!(which("sh").is_some());
    }

    #[test]
    fn test_which_missing_tool() {
        assert!(which("definitely-not-a-real-decoder-binary").is_none());
        let tool = Tool::new("definitely-not-a-real-decoder-binary", "Install it");
        match tool.require() {
            Err(HubError::ToolNotFound { tool, hint }) => {
                assert_eq!(tool, "definitely-not-a-real-decoder-binary");
                assert_eq!(hint, "Install it");
            }
            other => panic!("expected ToolNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_which_explicit_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-tool");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        assert!(which(path.to_str().unwrap()).is_none());

        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        assert_eq!(which(path.to_str().unwrap()), Some(path));
    }
}
