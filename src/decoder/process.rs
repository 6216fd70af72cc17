//! Decoder process spawning and teardown

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{HubError, Result};
use crate::tools::Tool;

/// Poll interval while waiting for a signalled process to exit
const EXIT_POLL: Duration = Duration::from_millis(50);

/// One external program invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub tool: Tool,
    pub args: Vec<String>,
}

impl Stage {
    pub fn new(tool: Tool, args: Vec<String>) -> Self {
        Self { tool, args }
    }

    /// Shell-style rendering for logs
    pub fn command_line(&self) -> String {
        std::iter::once(self.tool.name.as_ref())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Spawn `program` in a process group of its own so teardown can signal
/// every descendant
pub fn spawn(program: &Path, args: &[String], stdin: Stdio) -> Result<Child> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("Executing: {:?}", cmd);
    cmd.spawn().map_err(HubError::from)
}

/// Exit description of a finished process, if it has finished
pub fn exit_status(child: &mut Child) -> Option<String> {
    match child.try_wait() {
        Ok(Some(status)) => Some(status.to_string()),
        Ok(None) => None,
        Err(e) => Some(e.to_string()),
    }
}

pub fn is_alive(child: &mut Child) -> bool {
    matches!(child.try_wait(), Ok(None))
}

/// SIGTERM the process group, wait up to `grace`, then SIGKILL.
///
/// The whole group is signalled even when the leader has already exited:
/// children it left behind still hold its pipes open. Errors are ignored
/// because the processes may already be gone.
pub fn terminate(child: &mut Child, name: &str, grace: Duration) {
    signal_group(child, false);

    let deadline = Instant::now() + grace;
    loop {
        if !is_alive(child) && !group_alive(child) {
            let _ = child.wait();
            debug!("{} exited after SIGTERM", name);
            return;
        }
        if Instant::now() >= deadline {
            break;
        }
        thread::sleep(EXIT_POLL);
    }

    warn!("{} did not exit within {:?}, killing", name, grace);
    signal_group(child, true);
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn signal_group(child: &mut Child, kill: bool) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let signal = if kill { Signal::SIGKILL } else { Signal::SIGTERM };
    // The child leads its own group, so its pid is the group id
    match killpg(Pid::from_raw(child.id() as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => debug!("killpg({}, {:?}) failed: {}", child.id(), signal, e),
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, _kill: bool) {
    let _ = child.kill();
}

/// Whether any process is left in the child's group
#[cfg(unix)]
fn group_alive(child: &Child) -> bool {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    killpg(Pid::from_raw(child.id() as i32), None::<Signal>).is_ok()
}

#[cfg(not(unix))]
fn group_alive(_child: &Child) -> bool {
    false
}
