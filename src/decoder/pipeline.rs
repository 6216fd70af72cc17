//! Supervisor for one or two chained external decoder processes
//!
//! A [`DecoderPipeline`] is generic: what runs and how its output is read is
//! described by a [`Launch`]. The pipeline owns the lifecycle:
//!
//! 1. tool check (before the receiver is claimed, before anything spawns)
//! 2. receiver ownership through the shared [`DeviceArbiter`]
//! 3. spawn, each process in its own process group
//! 4. one reader thread per output stream feeding the bounded buffers
//! 5. teardown: SIGTERM, grace period, SIGKILL, downstream first
//!
//! A decoder that exits on its own moves the pipeline to `Failed` and frees
//! the receiver; the failure is visible through [`DecoderPipeline::status`].

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::net::UdpSocket;
use std::path::PathBuf;
use std::process::{Child, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::event::{DecodedEvent, Payload};
use super::parser::LineParser;
use super::process::{self, Stage};
use super::ring::{AudioBuffer, EventRing};
use super::runner;
use crate::device::{DeviceArbiter, Gain, Owner};
use crate::error::{HubError, Result};
use crate::tools::{Tool, ToolStatus};

/// Replaced in stage arguments by the bound UDP audio port
pub const UDP_PORT_PLACEHOLDER: &str = "{udp_port}";

/// Default SIGTERM grace period
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(3);

/// Call log capacity
const CALL_LOG_CAPACITY: usize = 50;

/// UDP receive timeout so the audio loop notices a stop request
const UDP_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// How long to wait for an exit status after a decoder closes its output
const EXIT_STATUS_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// How the decoder gets its signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// Demodulated audio piped in from an upstream rtl_fm
    StdinPipe,
    /// The decoder opens the dongle itself
    DeviceDirect,
    /// The decoder drops result files into a directory
    FileDrop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollMode {
    /// Every new file with this extension, once
    NewFiles { extension: String },
    /// One file rewritten in place; its array replaces the buffer
    Snapshot { file: String, array_key: String },
}

/// Where decoded output comes from
#[derive(Clone)]
pub enum Transport {
    /// Stdout lines through a parser
    Lines(LineParser),
    /// Raw PCM on stdout
    Audio,
    /// PCM datagrams on a local UDP port, see [`UDP_PORT_PLACEHOLDER`]
    Udp,
    /// Files written by the decoder
    Directory {
        dir: PathBuf,
        mode: PollMode,
        interval: Duration,
    },
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Lines(_) => f.write_str("Lines"),
            Transport::Audio => f.write_str("Audio"),
            Transport::Udp => f.write_str("Udp"),
            Transport::Directory { dir, mode, interval } => f
                .debug_struct("Directory")
                .field("dir", dir)
                .field("mode", mode)
                .field("interval", interval)
                .finish(),
        }
    }
}

/// Filesystem setup done before spawning
#[derive(Debug, Clone, PartialEq)]
pub enum Prepare {
    Dir(PathBuf),
    File { path: PathBuf, contents: String },
}

/// Parameters reported in status
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TuningInfo {
    pub frequency_hz: Option<u64>,
    pub gain: Option<Gain>,
    pub squelch: Option<u32>,
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl TuningInfo {
    pub fn frequency(frequency_hz: u64, gain: Gain) -> Self {
        Self {
            frequency_hz: Some(frequency_hz),
            gain: Some(gain),
            ..Self::default()
        }
    }

    pub fn detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

/// Everything needed to start one decoder session
#[derive(Debug, Clone)]
pub struct Launch {
    /// One process, or a producer piped into a consumer
    pub stages: Vec<Stage>,
    pub input: InputMode,
    pub transport: Transport,
    pub prepare: Vec<Prepare>,
    pub tuning: TuningInfo,
    pub stop_grace: Duration,
    /// Keep decoder diagnostics that mention call activity
    pub capture_calls: bool,
}

impl Launch {
    pub fn new(stages: Vec<Stage>, input: InputMode, transport: Transport) -> Self {
        Self {
            stages,
            input,
            transport,
            prepare: Vec::new(),
            tuning: TuningInfo::default(),
            stop_grace: DEFAULT_STOP_GRACE,
            capture_calls: false,
        }
    }

    pub fn tuning(mut self, tuning: TuningInfo) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn create_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prepare.push(Prepare::Dir(dir.into()));
        self
    }

    pub fn write_file(mut self, path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.prepare.push(Prepare::File {
            path: path.into(),
            contents: contents.into(),
        });
        self
    }

    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_call_log(mut self) -> Self {
        self.capture_calls = true;
        self
    }

    /// `a | b` rendering for logs
    pub fn command_line(&self) -> String {
        self.stages
            .iter()
            .map(Stage::command_line)
            .collect::<Vec<_>>()
            .join(" | ")
    }

    fn clears_on_stop(&self) -> bool {
        matches!(
            self.transport,
            Transport::Directory {
                mode: PollMode::Snapshot { .. },
                ..
            }
        )
    }
}

/// Point-in-time view of a pipeline
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub name: &'static str,
    pub state: PipelineState,
    /// Running and at least one decoder process still alive
    pub active: bool,
    pub tools: Vec<ToolStatus>,
    pub input_mode: Option<InputMode>,
    pub tuning: Option<TuningInfo>,
    pub command: Option<String>,
    pub pids: Vec<u32>,
    pub udp_port: Option<u16>,
    pub event_count: usize,
    pub events_total: u64,
    pub malformed: u64,
    pub audio_bytes: usize,
    pub call_count: usize,
    pub last_error: Option<String>,
}

/// Control-side view of the current session
#[derive(Debug)]
struct Lifecycle {
    state: PipelineState,
    generation: u64,
    last_error: Option<String>,
    input: Option<InputMode>,
    tuning: Option<TuningInfo>,
    command: Option<String>,
    udp_port: Option<u16>,
    clear_on_stop: bool,
}

struct Proc {
    name: String,
    child: Child,
}

/// OS resources of one running session
struct Session {
    procs: Vec<Proc>,
    readers: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl Session {
    /// Terminate downstream before upstream, then join the readers
    fn shutdown(mut self) {
        for proc in self.procs.iter_mut().rev() {
            process::terminate(&mut proc.child, &proc.name, self.grace);
        }
        for handle in self.readers.drain(..) {
            let _ = handle.join();
        }
    }
}

/// State shared between the control side and the reader threads
pub(super) struct Shared {
    name: &'static str,
    owner: Owner,
    arbiter: Arc<DeviceArbiter>,
    lifecycle: Mutex<Lifecycle>,
    session: Mutex<Option<Session>>,
    /// Cleared first on stop; reader loops exit when it drops
    running: AtomicBool,
    events: Mutex<EventRing>,
    calls: Mutex<EventRing>,
    audio: Mutex<AudioBuffer>,
    malformed: AtomicU64,
}

/// Buffers hold plain data, so a poisoned lock is still usable
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    /// Decoder output ended. Only meaningful for the session that is still
    /// starting or running; a stop in progress wins.
    fn stream_closed(&self, generation: u64, tool: &str) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        let (exited, status) = self.wait_exit_status(tool);

        let mut life = lock(&self.lifecycle);
        if life.generation != generation
            || !matches!(life.state, PipelineState::Starting | PipelineState::Running)
        {
            return;
        }
        let err = HubError::ProcessExited { tool: exited, status };
        warn!("[{}] {}", self.name, err);
        life.state = PipelineState::Failed;
        life.last_error = Some(err.to_string());
        self.running.store(false, Ordering::SeqCst);
        self.arbiter.release(self.owner);
    }

    /// Name and exit status of the first finished process
    fn wait_exit_status(&self, tool: &str) -> (String, String) {
        let step = Duration::from_millis(50);
        let mut waited = Duration::ZERO;
        loop {
            {
                let mut session = lock(&self.session);
                if let Some(session) = session.as_mut() {
                    for proc in session.procs.iter_mut() {
                        if let Some(status) = process::exit_status(&mut proc.child) {
                            return (proc.name.clone(), status);
                        }
                    }
                }
            }
            if waited >= EXIT_STATUS_WAIT {
                return (tool.to_string(), "output closed".to_string());
            }
            thread::sleep(step);
            waited += step;
        }
    }
}

/// Handle given to reader threads
#[derive(Clone)]
pub(super) struct Sink {
    shared: Arc<Shared>,
    generation: u64,
}

impl Sink {
    pub(super) fn name(&self) -> &'static str {
        self.shared.name
    }

    pub(super) fn running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub(super) fn push(&self, event: DecodedEvent) {
        lock(&self.shared.events).push(event);
    }

    pub(super) fn replace(&self, events: Vec<DecodedEvent>) {
        lock(&self.shared.events).replace_all(events);
    }

    pub(super) fn push_audio(&self, bytes: &[u8]) {
        lock(&self.shared.audio).extend(bytes);
    }

    pub(super) fn record_call(&self, line: &str) {
        lock(&self.shared.calls).push(DecodedEvent::new(Payload::Text(line.to_string())));
    }

    pub(super) fn malformed(&self, detail: &str) {
        self.shared.malformed.fetch_add(1, Ordering::Relaxed);
        debug!("[{}] dropped malformed record: {}", self.shared.name, detail);
    }

    pub(super) fn stream_closed(&self, tool: &str) {
        self.shared.stream_closed(self.generation, tool);
    }
}

/// Supervisor for one decoder family
pub struct DecoderPipeline {
    tools: Vec<Tool>,
    shared: Arc<Shared>,
}

impl DecoderPipeline {
    /// `tools` are reported in status; `capacity` bounds the event buffer
    pub fn new(
        name: &'static str,
        owner: Owner,
        arbiter: Arc<DeviceArbiter>,
        tools: Vec<Tool>,
        capacity: usize,
    ) -> Self {
        let shared = Shared {
            name,
            owner,
            arbiter,
            lifecycle: Mutex::new(Lifecycle {
                state: PipelineState::Stopped,
                generation: 0,
                last_error: None,
                input: None,
                tuning: None,
                command: None,
                udp_port: None,
                clear_on_stop: false,
            }),
            session: Mutex::new(None),
            running: AtomicBool::new(false),
            events: Mutex::new(EventRing::new(capacity)),
            calls: Mutex::new(EventRing::new(CALL_LOG_CAPACITY)),
            audio: Mutex::new(AudioBuffer::new()),
            malformed: AtomicU64::new(0),
        };
        Self {
            tools,
            shared: Arc::new(shared),
        }
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    pub fn owner(&self) -> Owner {
        self.shared.owner
    }

    pub fn state(&self) -> PipelineState {
        lock(&self.shared.lifecycle).state
    }

    /// Start a session, stopping any current one first
    pub fn start(&self, launch: Launch) -> Result<()> {
        self.stop();

        if launch.stages.is_empty() || launch.stages.len() > 2 {
            return Err(HubError::InvalidParams(format!(
                "{} needs one or two decoder stages, got {}",
                self.name(),
                launch.stages.len()
            )));
        }

        let programs = match launch
            .stages
            .iter()
            .map(|stage| stage.tool.require())
            .collect::<Result<Vec<PathBuf>>>()
        {
            Ok(programs) => programs,
            Err(e) => {
                let mut life = lock(&self.shared.lifecycle);
                life.state = PipelineState::Failed;
                life.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        self.shared.arbiter.try_acquire(self.owner())?;

        let generation = {
            let mut life = lock(&self.shared.lifecycle);
            life.generation += 1;
            life.state = PipelineState::Starting;
            life.last_error = None;
            life.input = Some(launch.input);
            life.tuning = Some(launch.tuning.clone());
            life.command = Some(launch.command_line());
            life.udp_port = None;
            life.clear_on_stop = launch.clears_on_stop();
            life.generation
        };

        info!("[{}] Launching: {}", self.name(), launch.command_line());

        match self.launch_session(&launch, &programs, generation) {
            Ok((session, udp_port)) => {
                let pids: Vec<u32> = session.procs.iter().map(|p| p.child.id()).collect();
                *lock(&self.shared.session) = Some(session);
                let mut life = lock(&self.shared.lifecycle);
                life.udp_port = udp_port;
                if life.state == PipelineState::Starting {
                    life.state = PipelineState::Running;
                    info!("[{}] running (pids {:?})", self.name(), pids);
                }
                Ok(())
            }
            Err(e) => {
                let mut life = lock(&self.shared.lifecycle);
                self.shared.running.store(false, Ordering::SeqCst);
                self.shared.arbiter.release(self.owner());
                life.state = PipelineState::Failed;
                life.last_error = Some(e.to_string());
                warn!("[{}] failed to start: {}", self.name(), e);
                Err(e)
            }
        }
    }

    fn launch_session(
        &self,
        launch: &Launch,
        programs: &[PathBuf],
        generation: u64,
    ) -> Result<(Session, Option<u16>)> {
        for step in &launch.prepare {
            match step {
                Prepare::Dir(dir) => fs::create_dir_all(dir)?,
                Prepare::File { path, contents } => {
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(path, contents)?;
                }
            }
        }

        // Bind before spawning so the decoder never sends to a closed port
        let udp = match launch.transport {
            Transport::Udp => {
                let socket = UdpSocket::bind("127.0.0.1:0")?;
                socket.set_read_timeout(Some(UDP_READ_TIMEOUT))?;
                let port = socket.local_addr()?.port();
                Some((socket, port))
            }
            _ => None,
        };
        let port_arg = udp.as_ref().map(|(_, port)| port.to_string());

        self.shared.running.store(true, Ordering::SeqCst);
        let mut session = Session {
            procs: Vec::with_capacity(launch.stages.len()),
            readers: Vec::new(),
            grace: launch.stop_grace,
        };

        let mut result = self.spawn_all(launch, programs, port_arg.as_deref(), &mut session);
        if result.is_ok() {
            result = self.start_readers(launch, udp.map(|(socket, _)| socket), generation, &mut session);
        }

        match result {
            Ok(()) => Ok((session, port_arg.and_then(|p| p.parse().ok()))),
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                session.shutdown();
                Err(e)
            }
        }
    }

    fn spawn_all(
        &self,
        launch: &Launch,
        programs: &[PathBuf],
        udp_port: Option<&str>,
        session: &mut Session,
    ) -> Result<()> {
        let mut upstream_stdout = None;
        for (stage, program) in launch.stages.iter().zip(programs) {
            let args: Vec<String> = stage
                .args
                .iter()
                .map(|arg| match udp_port {
                    Some(port) => arg.replace(UDP_PORT_PLACEHOLDER, port),
                    None => arg.clone(),
                })
                .collect();

            let stdin = match upstream_stdout.take() {
                Some(stdout) => Stdio::from(stdout),
                None => Stdio::null(),
            };
            let mut child = process::spawn(program, &args, stdin).map_err(|e| {
                warn!("[{}] failed to spawn {}: {}", self.name(), stage.tool.name, e);
                e
            })?;

            if session.procs.len() + 1 < launch.stages.len() {
                upstream_stdout = child.stdout.take();
            }
            session.procs.push(Proc {
                name: stage.tool.name.to_string(),
                child,
            });
        }
        Ok(())
    }

    fn start_readers(
        &self,
        launch: &Launch,
        udp: Option<UdpSocket>,
        generation: u64,
        session: &mut Session,
    ) -> Result<()> {
        let sink = Sink {
            shared: self.shared.clone(),
            generation,
        };
        let last = session.procs.len() - 1;

        for (i, proc) in session.procs.iter_mut().enumerate() {
            let tool = proc.name.clone();

            if let Some(stderr) = proc.child.stderr.take() {
                let (sink, tool) = (sink.clone(), tool.clone());
                let capture = launch.capture_calls;
                session.readers.push(spawn_reader(&format!("{}-stderr", tool), move || {
                    runner::run_drain(stderr, sink, tool, capture, false)
                })?);
            }

            if i != last {
                continue;
            }
            let Some(stdout) = proc.child.stdout.take() else {
                continue;
            };
            let sink = sink.clone();
            let handle = match &launch.transport {
                Transport::Lines(parser) => {
                    let parser = *parser;
                    spawn_reader(&format!("{}-lines", tool), move || {
                        runner::run_lines(stdout, parser, sink, tool)
                    })?
                }
                Transport::Audio => spawn_reader(&format!("{}-audio", tool), move || {
                    runner::run_audio(stdout, sink, tool)
                })?,
                Transport::Udp | Transport::Directory { .. } => {
                    spawn_reader(&format!("{}-stdout", tool), move || {
                        runner::run_drain(stdout, sink, tool, false, true)
                    })?
                }
            };
            session.readers.push(handle);
        }

        if let Some(socket) = udp {
            let sink = sink.clone();
            session.readers.push(spawn_reader(&format!("{}-udp", self.name()), move || {
                runner::run_udp(socket, sink)
            })?);
        }

        if let Transport::Directory { dir, mode, interval } = &launch.transport {
            let (dir, mode, interval) = (dir.clone(), mode.clone(), *interval);
            session.readers.push(spawn_reader(&format!("{}-poll", self.name()), move || {
                runner::run_poll(&dir, mode, interval, sink)
            })?);
        }

        Ok(())
    }

    /// Stop the session. Safe to call in any state, any number of times.
    pub fn stop(&self) {
        let (session, clear_events) = {
            let mut life = lock(&self.shared.lifecycle);
            self.shared.running.store(false, Ordering::SeqCst);
            let session = lock(&self.shared.session).take();
            match (session, life.state) {
                (None, PipelineState::Stopped) | (None, PipelineState::Stopping) => return,
                (None, _) => {
                    self.shared.arbiter.release(self.owner());
                    life.state = PipelineState::Stopped;
                    return;
                }
                (Some(session), _) => {
                    life.state = PipelineState::Stopping;
                    (session, life.clear_on_stop)
                }
            }
        };

        session.shutdown();

        lock(&self.shared.audio).clear();
        if clear_events {
            lock(&self.shared.events).clear();
        }

        let mut life = lock(&self.shared.lifecycle);
        self.shared.arbiter.release(self.owner());
        life.state = PipelineState::Stopped;
        life.udp_port = None;
        info!("[{}] stopped", self.name());
    }

    /// Non-blocking snapshot; never waits on a reader
    pub fn status(&self) -> PipelineStatus {
        let (state, input_mode, tuning, command, udp_port, last_error) = {
            let life = lock(&self.shared.lifecycle);
            (
                life.state,
                life.input,
                life.tuning.clone(),
                life.command.clone(),
                life.udp_port,
                life.last_error.clone(),
            )
        };

        let (pids, alive) = {
            let mut session = lock(&self.shared.session);
            match session.as_mut() {
                Some(session) => {
                    let pids = session.procs.iter().map(|p| p.child.id()).collect();
                    let alive = session.procs.iter_mut().any(|p| process::is_alive(&mut p.child));
                    (pids, alive)
                }
                None => (Vec::new(), false),
            }
        };

        let (event_count, events_total) = {
            let events = lock(&self.shared.events);
            (events.len(), events.total())
        };

        PipelineStatus {
            name: self.name(),
            state,
            active: state == PipelineState::Running && self.shared.running.load(Ordering::SeqCst) && alive,
            tools: self.tools.iter().map(ToolStatus::from).collect(),
            input_mode,
            tuning,
            command,
            pids: if alive { pids } else { Vec::new() },
            udp_port,
            event_count,
            events_total,
            malformed: self.shared.malformed.load(Ordering::Relaxed),
            audio_bytes: lock(&self.shared.audio).len(),
            call_count: lock(&self.shared.calls).len(),
            last_error,
        }
    }

    /// Last `n` events, oldest first
    pub fn recent_events(&self, n: usize) -> Vec<DecodedEvent> {
        lock(&self.shared.events).recent(n)
    }

    /// Last `n` call-activity lines, oldest first
    pub fn recent_calls(&self, n: usize) -> Vec<DecodedEvent> {
        lock(&self.shared.calls).recent(n)
    }

    /// Consume up to `n` bytes of buffered audio without blocking
    pub fn read_audio(&self, n: usize) -> Vec<u8> {
        lock(&self.shared.audio).take(n)
    }
}

impl Drop for DecoderPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_reader<F>(name: &str, body: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(HubError::from)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::decoder::parser::{json_line, text_line};
    use std::time::Instant;

    fn sh(script: &str, extra: &[&str]) -> Stage {
        let mut args = vec!["-c".to_string(), script.to_string(), "sh".to_string()];
        args.extend(extra.iter().map(|s| s.to_string()));
        Stage::new(Tool::owned("/bin/sh", "POSIX shell"), args)
    }

    fn pipeline(owner: Owner, arbiter: &Arc<DeviceArbiter>) -> DecoderPipeline {
        DecoderPipeline::new(owner.as_str(), owner, arbiter.clone(), Vec::new(), 10)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    /// Write-then-rename so the poller never sees a partial file
    fn drop_file(dir: &std::path::Path, name: &str, contents: &str) {
        let tmp = dir.join(format!("{}.partial", name));
        fs::write(&tmp, contents).unwrap();
        fs::rename(&tmp, dir.join(name)).unwrap();
    }

    fn texts(events: &[DecodedEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| e.payload.as_text().map(str::to_string))
            .collect()
    }

    #[test]
    fn test_missing_tool_fails_without_spawning() {
        let arbiter = Arc::new(DeviceArbiter::new());
        let p = pipeline(Owner::Ism, &arbiter);
        let stage = Stage::new(
            Tool::owned("/nonexistent/rtl_433", "Install with: brew install rtl_433"),
            vec![],
        );
        let result = p.start(Launch::new(vec![stage], InputMode::DeviceDirect, Transport::Lines(json_line)));

        match result {
            Err(HubError::ToolNotFound { tool, hint }) => {
                assert_eq!(tool, "/nonexistent/rtl_433");
                assert!(hint.contains("brew install rtl_433"));
            }
            other => panic!("expected ToolNotFound, got {:?}", other.err()),
        }
        assert_eq!(arbiter.current_owner(), None);
        let status = p.status();
        assert_eq!(status.state, PipelineState::Failed);
        assert!(status.pids.is_empty());
        assert!(!status.active);

        // Failed counts as stopped
        p.stop();
        assert_eq!(p.state(), PipelineState::Stopped);
    }

    #[test]
    fn test_text_lines_are_buffered_in_order() {
        let arbiter = Arc::new(DeviceArbiter::new());
        let p = pipeline(Owner::Pager, &arbiter);
        let launch = Launch::new(
            vec![sh("printf 'one\\n\\ntwo\\n'; sleep 30", &[])],
            InputMode::DeviceDirect,
            Transport::Lines(text_line),
        );
        p.start(launch).unwrap();
        assert_eq!(arbiter.current_owner(), Some(Owner::Pager));

        assert!(wait_until(|| p.status().event_count == 2));
        assert_eq!(texts(&p.recent_events(10)), vec!["one", "two"]);
        let status = p.status();
        assert_eq!(status.state, PipelineState::Running);
        assert!(status.active);
        assert_eq!(status.pids.len(), 1);

        p.stop();
        assert_eq!(p.state(), PipelineState::Stopped);
        assert_eq!(arbiter.current_owner(), None);
        assert!(!p.status().active);
        // Recent events survive a stop
        assert_eq!(p.recent_events(10).len(), 2);
    }

    #[test]
    fn test_json_lines_drop_malformed_records() {
        let arbiter = Arc::new(DeviceArbiter::new());
        let p = pipeline(Owner::Ism, &arbiter);
        let script = r#"echo '{"id":1}'; echo 'banner'; echo '{"broken'; echo '{"id":2}'; sleep 30"#;
        p.start(Launch::new(vec![sh(script, &[])], InputMode::DeviceDirect, Transport::Lines(json_line)))
            .unwrap();

        assert!(wait_until(|| p.status().event_count == 2));
        let events = p.recent_events(10);
        assert_eq!(events[0].payload.as_json().unwrap()["id"], 1);
        assert_eq!(events[1].payload.as_json().unwrap()["id"], 2);
        assert_eq!(p.status().malformed, 1);
        p.stop();
    }

    #[test]
    fn test_process_exit_marks_failed_and_releases() {
        let arbiter = Arc::new(DeviceArbiter::new());
        let p = pipeline(Owner::PacketRadio, &arbiter);
        p.start(Launch::new(vec![sh("echo hello; exit 2", &[])], InputMode::DeviceDirect, Transport::Lines(text_line)))
            .unwrap();

        assert!(wait_until(|| p.state() == PipelineState::Failed));
        assert_eq!(arbiter.current_owner(), None);
        let status = p.status();
        assert!(!status.active);
        assert!(status.last_error.unwrap().contains("exited unexpectedly"));
        assert_eq!(texts(&p.recent_events(5)), vec!["hello"]);

        p.stop();
        assert_eq!(p.state(), PipelineState::Stopped);
    }

    #[test]
    fn test_second_pipeline_denied_until_first_stops() {
        let arbiter = Arc::new(DeviceArbiter::new());
        let a = pipeline(Owner::Aircraft, &arbiter);
        let b = pipeline(Owner::Ism, &arbiter);
        let idle = || Launch::new(vec![sh("sleep 30", &[])], InputMode::DeviceDirect, Transport::Lines(text_line));

        a.start(idle()).unwrap();
        match b.start(idle()) {
            Err(HubError::OwnershipDenied { requested, holder }) => {
                assert_eq!(requested, Owner::Ism);
                assert_eq!(holder, Owner::Aircraft);
            }
            other => panic!("expected OwnershipDenied, got {:?}", other.err()),
        }
        assert_eq!(b.state(), PipelineState::Stopped);
        assert!(b.status().pids.is_empty());

        a.stop();
        b.start(idle()).unwrap();
        assert_eq!(arbiter.current_owner(), Some(Owner::Ism));
        b.stop();
        assert_eq!(arbiter.current_owner(), None);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let arbiter = Arc::new(DeviceArbiter::new());
        let p = pipeline(Owner::Voice, &arbiter);
        p.stop();
        p.stop();
        assert_eq!(p.state(), PipelineState::Stopped);

        p.start(Launch::new(vec![sh("sleep 30", &[])], InputMode::DeviceDirect, Transport::Audio))
            .unwrap();
        p.stop();
        p.stop();
        assert_eq!(p.state(), PipelineState::Stopped);
        assert_eq!(arbiter.current_owner(), None);
    }

    #[test]
    fn test_restart_stops_previous_session() {
        let arbiter = Arc::new(DeviceArbiter::new());
        let p = pipeline(Owner::Pager, &arbiter);
        let idle = || Launch::new(vec![sh("sleep 30", &[])], InputMode::DeviceDirect, Transport::Lines(text_line));
        p.start(idle()).unwrap();
        let first = p.status().pids;
        p.start(idle()).unwrap();
        let second = p.status().pids;
        assert_eq!(second.len(), 1);
        assert_ne!(first, second);
        assert_eq!(p.state(), PipelineState::Running);
        p.stop();
    }

    #[test]
    fn test_piped_stages() {
        let arbiter = Arc::new(DeviceArbiter::new());
        let p = pipeline(Owner::PacketRadio, &arbiter);
        let producer = sh("printf 'a\\nb\\n'; sleep 30", &[]);
        let consumer = sh("while read l; do echo \"got $l\"; done", &[]);
        p.start(Launch::new(vec![producer, consumer], InputMode::StdinPipe, Transport::Lines(text_line)))
            .unwrap();

        assert!(wait_until(|| p.status().event_count == 2));
        assert_eq!(texts(&p.recent_events(10)), vec!["got a", "got b"]);
        let status = p.status();
        assert_eq!(status.pids.len(), 2);
        assert_eq!(status.input_mode, Some(InputMode::StdinPipe));
        p.stop();
        assert_eq!(p.state(), PipelineState::Stopped);
    }

    #[test]
    fn test_upstream_exit_leaves_consumer_running() {
        let arbiter = Arc::new(DeviceArbiter::new());
        let p = pipeline(Owner::PacketRadio, &arbiter);
        let producer = sh("printf 'a\\n'; exit 0", &[]);
        let consumer = sh("while read l; do echo \"got $l\"; done; sleep 30", &[]);
        p.start(
            Launch::new(vec![producer, consumer], InputMode::StdinPipe, Transport::Lines(text_line))
                .stop_grace(Duration::from_millis(500)),
        )
        .unwrap();

        assert!(wait_until(|| p.status().event_count == 1));
        assert_eq!(texts(&p.recent_events(10)), vec!["got a"]);
        thread::sleep(Duration::from_millis(200));
        assert_eq!(p.state(), PipelineState::Running);

        let started = Instant::now();
        p.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(p.state(), PipelineState::Stopped);
        assert_eq!(arbiter.current_owner(), None);
    }

    #[test]
    fn test_downstream_exit_marks_failed() {
        let arbiter = Arc::new(DeviceArbiter::new());
        let p = pipeline(Owner::PacketRadio, &arbiter);
        let producer = sh("sleep 30", &[]);
        let consumer = sh("exit 3", &[]);
        p.start(
            Launch::new(vec![producer, consumer], InputMode::StdinPipe, Transport::Lines(text_line))
                .stop_grace(Duration::from_millis(500)),
        )
        .unwrap();

        assert!(wait_until(|| p.state() == PipelineState::Failed));
        assert_eq!(arbiter.current_owner(), None);
        assert!(p.status().last_error.unwrap().contains("exited unexpectedly"));

        let started = Instant::now();
        p.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(p.state(), PipelineState::Stopped);
    }

    #[test]
    fn test_stop_kills_children_left_by_exited_decoder() {
        let arbiter = Arc::new(DeviceArbiter::new());
        let p = pipeline(Owner::Ism, &arbiter);
        p.start(
            Launch::new(
                vec![sh("sleep 8 & echo started; exit 0", &[])],
                InputMode::DeviceDirect,
                Transport::Lines(text_line),
            )
            .stop_grace(Duration::from_millis(500)),
        )
        .unwrap();

        assert!(wait_until(|| p.status().event_count == 1));
        let started = Instant::now();
        p.stop();
        assert!(started.elapsed() < Duration::from_millis(1500));
        assert_eq!(p.state(), PipelineState::Stopped);
        assert_eq!(arbiter.current_owner(), None);
    }

    #[test]
    fn test_spawn_failure_reports_io_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-program");
        // Executable bit set but no interpreter line, so exec fails
        fs::write(&path, "plain text").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        let arbiter = Arc::new(DeviceArbiter::new());
        let p = pipeline(Owner::Pager, &arbiter);
        let stage = Stage::new(Tool::owned(path.to_string_lossy().into_owned(), "none"), Vec::new());

        match p.start(Launch::new(vec![stage], InputMode::DeviceDirect, Transport::Lines(text_line))) {
            Err(HubError::Io(_)) => {}
            other => panic!("expected Io error, got {:?}", other.err()),
        }
        assert_eq!(p.state(), PipelineState::Failed);
        assert_eq!(arbiter.current_owner(), None);
    }

    #[test]
    fn test_stdout_audio_is_consumed_from_front() {
        let arbiter = Arc::new(DeviceArbiter::new());
        let p = pipeline(Owner::Voice, &arbiter);
        p.start(Launch::new(vec![sh("printf 'abcdef'; sleep 30", &[])], InputMode::DeviceDirect, Transport::Audio))
            .unwrap();

        assert!(wait_until(|| p.status().audio_bytes == 6));
        assert_eq!(p.read_audio(4), b"abcd".to_vec());
        assert_eq!(p.read_audio(10), b"ef".to_vec());
        assert!(p.read_audio(10).is_empty());
        p.stop();
    }

    #[test]
    fn test_udp_port_substituted_and_received() {
        let dir = tempfile::tempdir().unwrap();
        let port_file = dir.path().join("port");
        let arbiter = Arc::new(DeviceArbiter::new());
        let p = pipeline(Owner::Voice, &arbiter);
        let stage = sh(
            "echo \"$1\" > \"$2\"; sleep 30",
            &[&format!("udp:127.0.0.1:{}", UDP_PORT_PLACEHOLDER), port_file.to_str().unwrap()],
        );
        p.start(Launch::new(vec![stage], InputMode::DeviceDirect, Transport::Udp)).unwrap();

        let port = p.status().udp_port.unwrap();
        assert!(wait_until(|| fs::read_to_string(&port_file)
            .map(|s| s.trim() == format!("udp:127.0.0.1:{}", port))
            .unwrap_or(false)));

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(&[1, 2, 3, 4], ("127.0.0.1", port)).unwrap();
        assert!(wait_until(|| p.status().audio_bytes == 4));
        assert_eq!(p.read_audio(100), vec![1, 2, 3, 4]);

        p.stop();
        assert_eq!(p.status().udp_port, None);
    }

    #[test]
    fn test_directory_new_files_processed_once() {
        let dir = tempfile::tempdir().unwrap();
        let captures = dir.path().join("captures");
        let arbiter = Arc::new(DeviceArbiter::new());
        let p = pipeline(Owner::Trunking, &arbiter);
        let launch = Launch::new(
            vec![sh("sleep 30", &[])],
            InputMode::FileDrop,
            Transport::Directory {
                dir: captures.clone(),
                mode: PollMode::NewFiles {
                    extension: "json".into(),
                },
                interval: Duration::from_millis(100),
            },
        )
        .create_dir(&captures);
        p.start(launch).unwrap();
        assert!(captures.is_dir());

        drop_file(&captures, "call_1.json", r#"{"talkgroup": 100}"#);
        drop_file(&captures, "call_1.wav", "RIFF");
        drop_file(&captures, "broken.json", "{");
        assert!(wait_until(|| p.status().event_count == 1 && p.status().malformed == 1));

        drop_file(&captures, "call_2.json", r#"{"talkgroup": 200}"#);
        assert!(wait_until(|| p.status().event_count == 2));
        thread::sleep(Duration::from_millis(300));

        let events = p.recent_events(10);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].source.as_deref(), Some("call_1.json"));
        assert_eq!(events[1].payload.as_json().unwrap()["talkgroup"], 200);
        p.stop();
    }

    #[test]
    fn test_snapshot_replaces_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let json_dir = dir.path().to_path_buf();
        let arbiter = Arc::new(DeviceArbiter::new());
        let p = pipeline(Owner::Aircraft, &arbiter);
        let launch = Launch::new(
            vec![sh("sleep 30", &[])],
            InputMode::DeviceDirect,
            Transport::Directory {
                dir: json_dir.clone(),
                mode: PollMode::Snapshot {
                    file: "aircraft.json".into(),
                    array_key: "aircraft".into(),
                },
                interval: Duration::from_millis(100),
            },
        );
        p.start(launch).unwrap();

        drop_file(&json_dir, "aircraft.json", r#"{"aircraft":[{"hex":"a1"},{"hex":"b2"}]}"#);
        assert!(wait_until(|| p.status().event_count == 2));
        drop_file(&json_dir, "aircraft.json", r#"{"aircraft":[{"hex":"c3"}]}"#);
        assert!(wait_until(|| p.status().event_count == 1));
        assert_eq!(p.recent_events(10)[0].payload.as_json().unwrap()["hex"], "c3");

        p.stop();
        assert_eq!(p.status().event_count, 0);
    }

    #[test]
    fn test_call_log_from_stderr() {
        let arbiter = Arc::new(DeviceArbiter::new());
        let p = pipeline(Owner::Voice, &arbiter);
        let script = "echo 'Voice call TG 100' >&2; echo 'tuning 851.0125' >&2; sleep 30";
        p.start(Launch::new(vec![sh(script, &[])], InputMode::DeviceDirect, Transport::Audio).with_call_log())
            .unwrap();

        assert!(wait_until(|| p.status().call_count == 1));
        let calls = p.recent_calls(10);
        assert_eq!(calls[0].payload.as_text(), Some("Voice call TG 100"));
        p.stop();
    }

    #[test]
    fn test_prepared_file_written_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("nested").join("config.json");
        let arbiter = Arc::new(DeviceArbiter::new());
        let p = pipeline(Owner::Trunking, &arbiter);
        let launch = Launch::new(
            vec![sh("cat \"$1\"; echo; sleep 30", &[config.to_str().unwrap()])],
            InputMode::FileDrop,
            Transport::Lines(text_line),
        )
        .write_file(&config, "{\"ver\": 2}");
        p.start(launch).unwrap();

        assert!(wait_until(|| p.status().event_count == 1));
        assert_eq!(texts(&p.recent_events(1)), vec!["{\"ver\": 2}"]);
        p.stop();
    }

    #[test]
    fn test_status_reports_tuning_and_command() {
        let arbiter = Arc::new(DeviceArbiter::new());
        let p = DecoderPipeline::new(
            "ism",
            Owner::Ism,
            arbiter,
            vec![Tool::owned("/nonexistent/rtl_433", "hint")],
            10,
        );
        let launch = Launch::new(vec![sh("sleep 30", &[])], InputMode::DeviceDirect, Transport::Lines(json_line))
            .tuning(TuningInfo::frequency(433_920_000, Gain::Auto).detail("format", "json"));
        p.start(launch).unwrap();

        let status = p.status();
        assert_eq!(status.name, "ism");
        assert_eq!(status.tools.len(), 1);
        assert!(!status.tools[0].available);
        let tuning = status.tuning.unwrap();
        assert_eq!(tuning.frequency_hz, Some(433_920_000));
        assert_eq!(tuning.details.get("format").map(String::as_str), Some("json"));
        assert!(status.command.unwrap().starts_with("/bin/sh -c"));

        let json = serde_json::to_value(p.status()).unwrap();
        assert_eq!(json["state"], "running");
        p.stop();
    }
}
