//! RTL-SDR capture via rtl_sdr process
//!
//! Spawns `rtl_sdr` writing raw 8-bit IQ to stdout, converts it on a
//! dedicated reader thread and hands blocks over a bounded channel.

use std::io::{BufRead, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use num_complex::Complex32;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::samples::SampleTable;
use super::source::{DeviceDriver, IqDevice};
use crate::device::TuningState;
use crate::error::{HubError, Result};
use crate::tools::{self, Tool};

/// Samples per block handed from the reader thread (32 KiB of IQ bytes)
const BLOCK_SAMPLES: usize = 16 * 1024;

/// Blocks buffered between reader thread and consumer
const BLOCK_QUEUE: usize = 64;

/// Identification strings reported by rtl_sdr on startup
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceInfo {
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
}

/// Sanitize a string to only contain printable ASCII characters
fn sanitize_string(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Generate a hash-based device ID from manufacturer and product strings
fn generate_device_hash(manufacturer: &Option<String>, product: &Option<String>, device_index: u32) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    manufacturer.as_deref().unwrap_or("Unknown").hash(&mut hasher);
    product.as_deref().unwrap_or("RTL-SDR").hash(&mut hasher);
    device_index.hash(&mut hasher);
    format!("{:08X}", hasher.finish() as u32)
}

/// Parse the device listing rtl_sdr prints on stderr.
///
/// Lines look like `  0:  Realtek, RTL2838UHIDIR, SN: 00000001` and
/// `Using device 0: Generic RTL2832U`.
fn parse_device_listing<I>(lines: I, device_index: u32) -> DeviceInfo
where
    I: IntoIterator<Item = String>,
{
    let mut info = DeviceInfo::default();
    let mut raw_serial: Option<String> = None;
    let prefix = format!("{}:", device_index);

    for line in lines {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix(&prefix) {
            let fields: Vec<&str> = rest.trim().split(',').collect();
            if let Some(mfr) = fields.first().map(|f| sanitize_string(f)) {
                if !mfr.is_empty() {
                    info.manufacturer = Some(mfr);
                }
            }
            if let Some(prd) = fields.get(1).map(|f| sanitize_string(f)) {
                if !prd.is_empty() {
                    info.product = Some(prd);
                }
            }
            if let Some(sn) = fields.get(2).and_then(|f| f.trim().strip_prefix("SN:")) {
                raw_serial = Some(sn.trim().to_string());
            }
        }
        if let Some(rest) = trimmed.strip_prefix("Using device") {
            if let Some(idx) = rest.find(':') {
                let name = sanitize_string(&rest[idx + 1..]);
                if info.product.is_none() && !name.is_empty() {
                    info.product = Some(name);
                }
            }
        }
    }

    // Default or empty serials are replaced by a stable hash
    info.serial = raw_serial.map(|s| {
        let sanitized = sanitize_string(&s);
        if sanitized.is_empty() || sanitized == "00000001" {
            debug!("Device serial '{}' is default/empty, generating hash-based ID", s);
            generate_device_hash(&info.manufacturer, &info.product, device_index)
        } else {
            sanitized
        }
    });

    info
}

/// Query manufacturer, product and serial by running rtl_sdr for one sample
pub fn probe_device(rtl_sdr_path: &str, device_index: u32) -> Option<DeviceInfo> {
    let mut cmd = Command::new(rtl_sdr_path);
    cmd.arg("-d")
        .arg(device_index.to_string())
        .arg("-f")
        .arg("100000000")
        .arg("-s")
        .arg("2048000")
        .arg("-n")
        .arg("1")
        .arg("-")
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to query device info: {}", e);
            return None;
        }
    };

    let stderr = child.stderr.take()?;
    let reader = std::io::BufReader::new(stderr);
    let info = parse_device_listing(reader.lines().map_while(|l| l.ok()), device_index);
    let _ = child.wait();
    Some(info)
}

/// Opens capture sessions backed by the rtl_sdr executable
pub struct RtlSdrDriver {
    tool: Tool,
    read_timeout: Duration,
}

impl RtlSdrDriver {
    pub fn new(rtl_sdr_path: &str, read_timeout: Duration) -> Self {
        let tool = if rtl_sdr_path == tools::RTL_SDR.name {
            tools::RTL_SDR
        } else {
            Tool::owned(rtl_sdr_path, tools::RTL_SDR.install_hint.to_string())
        };
        Self { tool, read_timeout }
    }
}

impl DeviceDriver for RtlSdrDriver {
    fn name(&self) -> &str {
        &self.tool.name
    }

    fn open(&self, tuning: &TuningState) -> Result<Box<dyn IqDevice>> {
        let path = self.tool.require()?;
        let mut capture = RtlSdrCapture {
            rtl_sdr_path: path.to_string_lossy().to_string(),
            tuning: *tuning,
            read_timeout: self.read_timeout,
            session: None,
            pending: Vec::new(),
            retune: false,
        };
        capture.restart()?;
        Ok(Box::new(capture))
    }
}

/// One running rtl_sdr process and its reader thread
struct CaptureSession {
    child: Child,
    running: Arc<AtomicBool>,
    blocks: Receiver<Vec<Complex32>>,
    reader: Option<JoinHandle<()>>,
}

impl CaptureSession {
    fn shutdown(mut self) {
        self.running.store(false, Ordering::SeqCst);
        // Kill the rtl_sdr process; the reader sees EOF and exits
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

struct RtlSdrCapture {
    rtl_sdr_path: String,
    tuning: TuningState,
    read_timeout: Duration,
    session: Option<CaptureSession>,
    pending: Vec<Complex32>,
    retune: bool,
}

impl RtlSdrCapture {
    fn build_command(&self) -> Command {
        // rtl_sdr -d <device> -f <freq> -s <rate> [-g <gain>] [-p <ppm>] -
        let mut cmd = Command::new(&self.rtl_sdr_path);
        cmd.arg("-d")
            .arg(self.tuning.device_index.to_string())
            .arg("-f")
            .arg(self.tuning.center_freq.to_string())
            .arg("-s")
            .arg(self.tuning.sample_rate.to_string());

        // Omitting -g leaves the tuner in automatic gain mode
        if let crate::device::Gain::Db(db) = self.tuning.gain {
            cmd.arg("-g").arg(db.to_string());
        }
        if self.tuning.ppm_error != 0 {
            cmd.arg("-p").arg(self.tuning.ppm_error.to_string());
        }

        // Output to stdout (continuous mode)
        cmd.arg("-");
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    fn restart(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            session.shutdown();
        }
        self.pending.clear();
        self.retune = false;

        let mut cmd = self.build_command();
        debug!("Executing: {:?}", cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| HubError::DeviceUnavailable(format!("failed to spawn rtl_sdr: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HubError::DeviceUnavailable("failed to capture rtl_sdr stdout".into()))?;

        if let Some(stderr) = child.stderr.take() {
            thread::spawn(move || {
                let reader = std::io::BufReader::new(stderr);
                for line in reader.lines().map_while(|l| l.ok()) {
                    if !line.trim().is_empty() {
                        debug!("[rtl_sdr] {}", line.trim());
                    }
                }
            });
        }

        let running = Arc::new(AtomicBool::new(true));
        let (block_tx, block_rx) = bounded::<Vec<Complex32>>(BLOCK_QUEUE);

        let thread_running = running.clone();
        let reader = thread::Builder::new()
            .name("rtl-sdr-capture".to_string())
            .spawn(move || run_capture(stdout, thread_running, block_tx))
            .map_err(|e| HubError::DeviceUnavailable(format!("failed to spawn capture thread: {}", e)))?;

        info!(
            "rtl_sdr capture started: {:.4} MHz, {} S/s (pid {})",
            self.tuning.center_freq as f64 / 1e6,
            self.tuning.sample_rate,
            child.id()
        );

        self.session = Some(CaptureSession {
            child,
            running,
            blocks: block_rx,
            reader: Some(reader),
        });
        Ok(())
    }
}

impl IqDevice for RtlSdrCapture {
    fn apply(&mut self, tuning: &TuningState) -> Result<()> {
        if *tuning != self.tuning {
            self.tuning = *tuning;
            self.retune = true;
        }
        Ok(())
    }

    fn read(&mut self, n: usize) -> Result<Vec<Complex32>> {
        if self.retune || self.session.is_none() {
            self.restart()?;
        }
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| HubError::DeviceUnavailable("rtl_sdr not running".into()))?;

        // Only samples captured after this call count
        self.pending.clear();
        loop {
            match session.blocks.try_recv() {
                Ok(_) => continue,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return Err(HubError::DeviceUnavailable("rtl_sdr exited".into()));
                }
            }
        }

        while self.pending.len() < n {
            match session.blocks.recv_timeout(self.read_timeout) {
                Ok(block) => self.pending.extend_from_slice(&block),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(HubError::DeviceUnavailable(format!(
                        "no samples from rtl_sdr within {:?}",
                        self.read_timeout
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(HubError::DeviceUnavailable("rtl_sdr exited".into()));
                }
            }
        }

        let samples: Vec<Complex32> = self.pending.drain(..n).collect();
        Ok(samples)
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.shutdown();
            info!("rtl_sdr capture stopped");
        }
        self.pending.clear();
    }
}

impl Drop for RtlSdrCapture {
    fn drop(&mut self) {
        self.close();
    }
}

/// Capture loop (runs in dedicated thread)
fn run_capture<R: Read>(mut stdout: R, running: Arc<AtomicBool>, block_tx: Sender<Vec<Complex32>>) {
    let table = SampleTable::new();
    let mut buffer = vec![0u8; BLOCK_SAMPLES * 2];
    let mut carry: Option<u8> = None;
    let mut first_data = true;

    while running.load(Ordering::SeqCst) {
        match stdout.read(&mut buffer) {
            Ok(0) => {
                if running.load(Ordering::SeqCst) {
                    warn!("rtl_sdr stdout closed (EOF)");
                }
                break;
            }
            Ok(n_read) => {
                if first_data {
                    debug!("First IQ data received ({} bytes)", n_read);
                    first_data = false;
                }

                let mut block = Vec::with_capacity(n_read / 2 + 1);
                let mut bytes = &buffer[..n_read];
                // Re-pair an I byte left over from the previous read
                if let Some(i) = carry.take() {
                    block.push(table.sample(i, bytes[0]));
                    bytes = &bytes[1..];
                }
                table.extend_from_bytes(bytes, &mut block);
                if bytes.len() % 2 == 1 {
                    carry = bytes.last().copied();
                }

                if block_tx.try_send(block).is_err() {
                    debug!("IQ block queue full, dropping block");
                }
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    error!("Error reading from rtl_sdr: {}", e);
                }
                break;
            }
        }
    }
}
