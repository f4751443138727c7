//! ELM327 OBD-II adapter over a serial or RFCOMM port.
//!
//! Every exchange is `<command>\r` followed by the adapter's reply, which
//! always ends with the `>` prompt.

use serialport::SerialPort;
use std::collections::BTreeSet;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ObdConfig;
use crate::obd::{Measurement, ObdCommand, ObdError, ObdSampler};

pub const DEFAULT_BAUD_RATE: u32 = 38400;

/// Consecutive read timeouts tolerated while initializing a port (about 5 s).
pub const INIT_IDLE_READS: u32 = 10;
const READ_TIMEOUT: Duration = Duration::from_millis(500);

const PROMPT: u8 = b'>';
const INIT_COMMANDS: [&str; 5] = ["ATE0", "ATL0", "ATS0", "ATH0", "ATSP0"];
const ADAPTER_ERRORS: [&str; 7] = [
    "?",
    "NO DATA",
    "UNABLE TO CONNECT",
    "CAN ERROR",
    "BUS ERROR",
    "STOPPED",
    "BUFFER FULL",
];

pub struct Elm327<T> {
    port: T,
    label: String,
    idle_limit: Option<u32>,
    cancel: Option<CancellationToken>,
}

impl<T: Read + Write> Elm327<T> {
    pub fn new(port: T, label: impl Into<String>) -> Self {
        Self {
            port,
            label: label.into(),
            idle_limit: None,
            cancel: None,
        }
    }

    /// Pending and future exchanges fail with [`ObdError::Interrupted`] once
    /// `token` is cancelled, even while the adapter is silent.
    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancel = Some(token);
    }

    /// Resets the adapter and configures it for compact, header-less replies.
    /// Returns the identification banner.
    pub fn initialize(&mut self) -> Result<String, ObdError> {
        let banner = self.command("ATZ")?;
        let version = banner
            .iter()
            .find(|l| l.contains("ELM"))
            .cloned()
            .ok_or(ObdError::NoAdapter)?;

        for cmd in INIT_COMMANDS {
            let reply = self.command(cmd)?;
            if !reply.iter().any(|l| l == "OK") {
                return Err(ObdError::Adapter {
                    command: cmd.to_string(),
                    message: reply.join(" "),
                });
            }
        }

        info!("{} ready on {}", version, self.label);
        Ok(version)
    }

    /// [`initialize`](Self::initialize), giving up after `idle_reads`
    /// consecutive read timeouts. Queries afterwards wait indefinitely.
    pub fn initialize_within(&mut self, idle_reads: u32) -> Result<String, ObdError> {
        self.idle_limit = Some(idle_reads);
        let result = self.initialize();
        self.idle_limit = None;
        result
    }

    /// Sends one command and returns the non-empty reply lines.
    pub fn command(&mut self, cmd: &str) -> Result<Vec<String>, ObdError> {
        self.check_cancelled()?;
        self.port.write_all(cmd.as_bytes())?;
        self.port.write_all(b"\r")?;
        self.port.flush()?;

        let raw = self.read_until_prompt(cmd)?;
        let lines = raw
            .split(['\r', '\n'])
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect::<Vec<_>>();
        debug!("{} -> {:?}", cmd, lines);
        Ok(lines)
    }

    fn check_cancelled(&self) -> Result<(), ObdError> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(ObdError::Interrupted),
            _ => Ok(()),
        }
    }

    fn read_until_prompt(&mut self, cmd: &str) -> Result<String, ObdError> {
        let mut reply = Vec::new();
        let mut buf = [0u8; 64];
        let mut idle = 0;
        loop {
            match self.port.read(&mut buf) {
                Ok(0) => return Err(ObdError::Disconnected),
                Ok(n) => {
                    idle = 0;
                    reply.extend_from_slice(&buf[..n]);
                    if let Some(pos) = reply.iter().position(|&b| b == PROMPT) {
                        reply.truncate(pos);
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    self.check_cancelled()?;
                    idle += 1;
                    if self.idle_limit.is_some_and(|limit| idle >= limit) {
                        return Err(ObdError::Timeout(cmd.to_string()));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        reply.retain(|&b| b != 0);
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }
}

/// Progress messages printed during protocol search.
fn is_status_line(upper: &str) -> bool {
    upper == "SEARCHING..." || (upper.starts_with("BUS INIT") && !upper.contains("ERROR"))
}

fn is_adapter_error(upper: &str) -> bool {
    ADAPTER_ERRORS.iter().any(|e| upper.starts_with(e)) || upper.starts_with("BUS INIT")
}

/// Extracts the data bytes of a mode 01 reply for `command`.
pub fn parse_response(command: ObdCommand, lines: &[String]) -> Result<Vec<u8>, ObdError> {
    for line in lines {
        let upper = line.trim().to_ascii_uppercase();
        if is_status_line(&upper) {
            continue;
        }
        if upper.starts_with("NO DATA") {
            return Err(ObdError::NoData(command));
        }
        if is_adapter_error(&upper) {
            return Err(ObdError::Adapter {
                command: command.request(),
                message: line.clone(),
            });
        }

        let hex: String = upper.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = decode_hex(&hex).ok_or_else(|| ObdError::Malformed {
            command: command.request(),
            line: line.clone(),
        })?;
        if bytes.len() >= 2 && bytes[0] == 0x41 && bytes[1] == command.pid() {
            return Ok(bytes[2..].to_vec());
        }
    }
    Err(ObdError::NoData(command))
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

impl<T: Read + Write> ObdSampler for Elm327<T> {
    fn query(&mut self, command: ObdCommand) -> Result<Measurement, ObdError> {
        let lines = self.command(&command.request())?;
        let data = parse_response(command, &lines)?;
        command.decode(&data)
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// Returns the first candidate `open` brings up, skipping the ones that fail.
pub fn first_responding<T, F>(candidates: &[String], mut open: F) -> Result<Elm327<T>, ObdError>
where
    F: FnMut(&str) -> Result<Elm327<T>, ObdError>,
{
    for name in candidates {
        match open(name) {
            Ok(elm) => return Ok(elm),
            Err(e) => warn!("Skipping {}: {}", name, e),
        }
    }
    Err(ObdError::NoAdapter)
}

impl Elm327<Box<dyn SerialPort>> {
    /// Opens the configured port, or tries every candidate when it is `"auto"`.
    pub fn connect(config: &ObdConfig) -> Result<Self, ObdError> {
        let baud = config.baud_rate.unwrap_or(DEFAULT_BAUD_RATE);
        let candidates = if config.port == "auto" {
            list_ports()
        } else {
            vec![config.port.clone()]
        };

        first_responding(&candidates, |name| Self::open(name, baud))
    }

    pub fn open(name: &str, baud: u32) -> Result<Self, ObdError> {
        let port = serialport::new(name, baud)
            .timeout(READ_TIMEOUT)
            .open()?;
        let mut elm = Elm327::new(port, name);
        elm.port.clear(serialport::ClearBuffer::All)?;
        elm.initialize_within(INIT_IDLE_READS)?;
        Ok(elm)
    }
}


/// Bluetooth RFCOMM links first, then USB adapters, then whatever else the
/// serial API reports.
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in ["rfcomm", "ttyUSB", "ttyACM"].iter().enumerate() {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank as u8, num, basename.to_string());
        }
    }
    (3, 0, basename.to_string())
}

pub fn list_ports() -> Vec<String> {
    let mut names: BTreeSet<String> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(|p| p.port_name)
        .collect();

    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if ["rfcomm", "ttyUSB", "ttyACM"].iter().any(|p| fname.starts_with(p)) {
                    names.insert(format!("/dev/{}", fname));
                }
            }
        }
    }

    let mut v: Vec<String> = names.into_iter().collect();
    v.sort_by_key(|n| port_sort_key(n));
    v
}
