use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ObdError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serial Error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("Adapter answered {command} with '{message}'")]
    Adapter { command: String, message: String },
    #[error("No data for {0}")]
    NoData(ObdCommand),
    #[error("Malformed response to {command}: {line}")]
    Malformed { command: String, line: String },
    #[error("{0} response too short ({1} bytes)")]
    ShortResponse(ObdCommand, usize),
    #[error("No ELM327 adapter found")]
    NoAdapter,
    #[error("Adapter closed the connection")]
    Disconnected,
    #[error("No reply to {0}")]
    Timeout(String),
    #[error("Interrupted by operator")]
    Interrupted,
}

/// Mode 01 parameters sampled by the logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObdCommand {
    Rpm,
    Speed,
    ThrottlePos,
    EngineLoad,
    FuelStatus,
}

impl ObdCommand {
    /// Query order for one sample.
    pub const ALL: [ObdCommand; 5] = [
        ObdCommand::Rpm,
        ObdCommand::Speed,
        ObdCommand::ThrottlePos,
        ObdCommand::EngineLoad,
        ObdCommand::FuelStatus,
    ];

    pub fn pid(&self) -> u8 {
        match self {
            ObdCommand::Rpm => 0x0C,
            ObdCommand::Speed => 0x0D,
            ObdCommand::ThrottlePos => 0x11,
            ObdCommand::EngineLoad => 0x04,
            ObdCommand::FuelStatus => 0x03,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ObdCommand::Rpm => "RPM",
            ObdCommand::Speed => "SPEED",
            ObdCommand::ThrottlePos => "THROTTLE_POS",
            ObdCommand::EngineLoad => "ENGINE_LOAD",
            ObdCommand::FuelStatus => "FUEL_STATUS",
        }
    }

    pub fn request(&self) -> String {
        format!("01{:02X}", self.pid())
    }

    fn data_len(&self) -> usize {
        match self {
            ObdCommand::Rpm | ObdCommand::FuelStatus => 2,
            _ => 1,
        }
    }

    /// Decodes the data bytes following `41 <pid>`.
    pub fn decode(&self, data: &[u8]) -> Result<Measurement, ObdError> {
        if data.len() < self.data_len() {
            return Err(ObdError::ShortResponse(*self, data.len()));
        }
        let a = data[0] as f64;

        let (magnitude, unit) = match self {
            ObdCommand::Rpm => ((a * 256.0 + data[1] as f64) / 4.0, "rpm"),
            ObdCommand::Speed => (a, "km/h"),
            ObdCommand::ThrottlePos | ObdCommand::EngineLoad => (a * 100.0 / 255.0, "percent"),
            // Fuel system 1 status bits, passed through.
            ObdCommand::FuelStatus => (a, "status"),
        };
        Ok(Measurement { magnitude, unit })
    }
}

impl fmt::Display for ObdCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub magnitude: f64,
    pub unit: &'static str,
}

/// One reading of every logged metric.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EngineSample {
    pub rpm: f64,
    pub speed: f64,
    pub throttle: f64,
    pub load: f64,
    pub fuel_status: f64,
}

impl EngineSample {
    pub fn engine_stopped(&self) -> bool {
        self.rpm == 0.0
    }
}

pub trait ObdSampler {
    fn query(&mut self, command: ObdCommand) -> Result<Measurement, ObdError>;
    fn name(&self) -> &str;

    fn sample(&mut self) -> Result<EngineSample, ObdError> {
        Ok(EngineSample {
            rpm: self.query(ObdCommand::Rpm)?.magnitude,
            speed: self.query(ObdCommand::Speed)?.magnitude,
            throttle: self.query(ObdCommand::ThrottlePos)?.magnitude,
            load: self.query(ObdCommand::EngineLoad)?.magnitude,
            fuel_status: self.query(ObdCommand::FuelStatus)?.magnitude,
        })
    }
}

/// Replays a fixed list of samples, one per `sample()` call.
pub struct ScriptedObd {
    samples: VecDeque<EngineSample>,
}

impl ScriptedObd {
    pub fn new(samples: impl IntoIterator<Item = EngineSample>) -> Self {
        Self { samples: samples.into_iter().collect() }
    }

    /// A short drive that idles down to a stop.
    pub fn demo_drive() -> Self {
        let rpms = [850.0, 1500.0, 2200.0, 2600.0, 1900.0, 1200.0, 800.0, 0.0];
        Self::new(rpms.iter().map(|&rpm| EngineSample {
            rpm,
            speed: (rpm / 40.0).round(),
            throttle: if rpm > 1000.0 { rpm / 100.0 } else { 0.0 },
            load: rpm / 80.0,
            fuel_status: if rpm > 0.0 { 2.0 } else { 0.0 },
        }))
    }

    pub fn remaining(&self) -> usize {
        self.samples.len()
    }

    fn current(&self, command: ObdCommand) -> Result<&EngineSample, ObdError> {
        self.samples.front().ok_or(ObdError::NoData(command))
    }
}

impl ObdSampler for ScriptedObd {
    fn query(&mut self, command: ObdCommand) -> Result<Measurement, ObdError> {
        let s = self.current(command)?;
        let (magnitude, unit) = match command {
            ObdCommand::Rpm => (s.rpm, "rpm"),
            ObdCommand::Speed => (s.speed, "km/h"),
            ObdCommand::ThrottlePos => (s.throttle, "percent"),
            ObdCommand::EngineLoad => (s.load, "percent"),
            ObdCommand::FuelStatus => (s.fuel_status, "status"),
        };
        Ok(Measurement { magnitude, unit })
    }

    fn name(&self) -> &str {
        "Scripted"
    }

    fn sample(&mut self) -> Result<EngineSample, ObdError> {
        self.samples.pop_front().ok_or(ObdError::NoData(ObdCommand::Rpm))
    }
}
