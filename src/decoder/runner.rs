//! Reader loops - one blocking thread per decoder output stream

use std::collections::HashSet;
use std::fs;
use std::io::{self, BufRead, BufReader, ErrorKind, Read};
use std::net::UdpSocket;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use super::event::{DecodedEvent, Payload};
use super::parser::{is_call_activity, LineParser};
use super::pipeline::{PollMode, Sink};

/// Read size for PCM on stdout and UDP datagrams
const AUDIO_CHUNK: usize = 8192;

/// Granularity at which poll loops notice a stop request
const POLL_STEP: Duration = Duration::from_millis(100);

/// Parse decoder stdout line by line into events
pub(super) fn run_lines<R: Read>(stdout: R, parser: LineParser, sink: Sink, tool: String) {
    let mut first_record = true;
    for_each_line(stdout, &sink, &tool, |line| match parser(line) {
        Ok(Some(payload)) => {
            if first_record {
                info!("[{}] first record received from {}", sink.name(), tool);
                first_record = false;
            }
            sink.push(DecodedEvent::new(payload));
        }
        Ok(None) => {}
        Err(e) => sink.malformed(&e.to_string()),
    });
    sink.stream_closed(&tool);
}

/// Drain a stream into the debug log. Call activity goes to the call log when
/// `capture_calls` is set. When `primary`, end of stream means the decoder
/// is gone.
pub(super) fn run_drain<R: Read>(stream: R, sink: Sink, tool: String, capture_calls: bool, primary: bool) {
    for_each_line(stream, &sink, &tool, |line| {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        debug!("[{}] {}", tool, line);
        if capture_calls && is_call_activity(line) {
            sink.record_call(line);
        }
    });
    if primary {
        sink.stream_closed(&tool);
    }
}

/// Raw PCM from decoder stdout into the audio buffer
pub(super) fn run_audio<R: Read>(mut stdout: R, sink: Sink, tool: String) {
    let mut buffer = vec![0u8; AUDIO_CHUNK];
    let mut first_data = true;
    loop {
        match stdout.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                if first_data {
                    debug!("[{}] first audio received ({} bytes)", sink.name(), n);
                    first_data = false;
                }
                sink.push_audio(&buffer[..n]);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                if sink.running() {
                    error!("Error reading {} audio: {}", tool, e);
                }
                break;
            }
        }
    }
    sink.stream_closed(&tool);
}

/// Audio datagrams into the audio buffer. The socket must have a read
/// timeout so the loop notices a stop request.
pub(super) fn run_udp(socket: UdpSocket, sink: Sink) {
    let mut buffer = vec![0u8; AUDIO_CHUNK];
    while sink.running() {
        match socket.recv_from(&mut buffer) {
            Ok((n, _)) => sink.push_audio(&buffer[..n]),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted) => {
                continue
            }
            Err(e) => {
                debug!("[{}] UDP audio socket closed: {}", sink.name(), e);
                break;
            }
        }
    }
}

/// Scan `dir` every `interval` until stopped
pub(super) fn run_poll(dir: &Path, mode: PollMode, interval: Duration, sink: Sink) {
    let mut seen: HashSet<String> = HashSet::new();
    while sleep_while_running(&sink, interval) {
        match &mode {
            PollMode::NewFiles { extension } => poll_new_files(dir, extension, &mut seen, &sink),
            PollMode::Snapshot { file, array_key } => poll_snapshot(dir, file, array_key, &sink),
        }
    }
}

fn for_each_line<R: Read>(stream: R, sink: &Sink, tool: &str, mut handle: impl FnMut(&str)) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => handle(&String::from_utf8_lossy(&buf)),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                if sink.running() {
                    error!("Error reading {} output: {}", tool, e);
                }
                break;
            }
        }
    }
}

/// Returns false once the pipeline has been asked to stop
fn sleep_while_running(sink: &Sink, interval: Duration) -> bool {
    let deadline = Instant::now() + interval;
    while sink.running() {
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(POLL_STEP.min(deadline - now));
    }
    false
}

/// Each matching file is processed exactly once, keyed by name
fn poll_new_files(dir: &Path, extension: &str, seen: &mut HashSet<String>, sink: &Sink) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    let mut fresh: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| {
            Path::new(name)
                .extension()
                .is_some_and(|ext| ext == extension)
        })
        .filter(|name| !seen.contains(name))
        .collect();
    fresh.sort();

    for name in fresh {
        seen.insert(name.clone());
        match read_json(&dir.join(&name)) {
            Ok(value) => sink.push(DecodedEvent::new(Payload::Json(value)).with_source(name)),
            Err(e) => sink.malformed(&format!("{}: {}", name, e)),
        }
    }
}

/// Re-read one snapshot file and replace the buffer with its array
fn poll_snapshot(dir: &Path, file: &str, array_key: &str, sink: &Sink) {
    let path = dir.join(file);
    let value = match read_json(&path) {
        Ok(value) => value,
        // Not written yet
        Err(e) if e.kind() == ErrorKind::NotFound => return,
        Err(e) => {
            sink.malformed(&format!("{}: {}", file, e));
            return;
        }
    };

    let items = match value.get(array_key).and_then(|v| v.as_array()) {
        Some(items) => items,
        None => {
            sink.malformed(&format!("{} has no '{}' array", file, array_key));
            return;
        }
    };

    let events = items
        .iter()
        .map(|item| DecodedEvent::new(Payload::Json(item.clone())).with_source(file))
        .collect();
    sink.replace(events);
}

fn read_json(path: &Path) -> io::Result<serde_json::Value> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))
}
