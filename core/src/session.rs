use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::OutputConfig;
use crate::obd::{ObdError, ObdSampler};
use crate::rtc::{Clock, RtcError};
use crate::storage::{self, SampleRow, StorageError};
use crate::trip::TripNamer;

pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("RTC fault: {0}")]
    Rtc(#[from] RtcError),
    #[error("OBD fault: {0}")]
    Obd(#[from] ObdError),
    #[error("Storage fault: {0}")]
    Storage(#[from] StorageError),
    #[error("Session was interrupted by the operator")]
    Cancelled,
    #[error("Session already ended")]
    AlreadyTerminated,
}

impl SessionError {
    pub fn is_device_fault(&self) -> bool {
        matches!(self, SessionError::Rtc(_) | SessionError::Obd(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// A zero-RPM sample was logged; it was also written to `trip_file`.
    EngineStopped { trip_file: PathBuf },
    Interrupted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Running,
    Terminated(StopReason),
}

/// One logging run: clock and OBD link in, CSV rows out.
pub struct Session {
    clock: Box<dyn Clock + Send>,
    obd: Box<dyn ObdSampler + Send>,
    output: OutputConfig,
    trips: TripNamer,
    state: SessionState,
    rows_written: u64,
    console: Box<dyn Write + Send>,
}

impl Session {
    pub fn new(
        clock: Box<dyn Clock + Send>,
        obd: Box<dyn ObdSampler + Send>,
        output: OutputConfig,
        trips: TripNamer,
    ) -> Self {
        info!(
            "Session using clock '{}', OBD '{}', logging to {}",
            clock.name(),
            obd.name(),
            output.log_path().display()
        );
        Self {
            clock,
            obd,
            output,
            trips,
            state: SessionState::Running,
            rows_written: 0,
            console: Box::new(std::io::stdout()),
        }
    }

    /// Operator-facing lines go here instead of stdout.
    pub fn with_console(mut self, console: Box<dyn Write + Send>) -> Self {
        self.console = console;
        self
    }

    fn say(&mut self, line: impl fmt::Display) {
        // Console output is best effort; the CSV files are the record.
        let _ = writeln!(self.console, "{}", line);
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Rows appended to the cumulative log so far.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn cancel(&mut self) {
        if self.state == SessionState::Running {
            info!("Session cancelled after {} rows", self.rows_written);
            self.state = SessionState::Terminated(StopReason::Interrupted);
        }
    }

    /// Takes one sample and logs it. A zero-RPM sample also goes to the next
    /// trip file and ends the session.
    pub fn step(&mut self) -> Result<SessionState, SessionError> {
        match self.state {
            SessionState::Running => {}
            SessionState::Terminated(StopReason::Interrupted) => return Err(SessionError::Cancelled),
            SessionState::Terminated(_) => return Err(SessionError::AlreadyTerminated),
        }

        let now = self.clock.read_datetime()?;
        self.say(format_args!("date: {}", now.format("%Y-%m-%d")));
        self.say(format_args!("hour: {}", now.format("%H:%M:%S")));

        let sample = self.obd.sample()?;
        let row = SampleRow::new(now, sample);
        debug!("Sample {:?}", row);

        storage::append_row(&self.output.log_path(), &row)?;
        self.rows_written += 1;

        if sample.engine_stopped() {
            let trip_file = self.output.directory.join(self.trips.next_file_name());
            storage::append_row(&trip_file, &row)?;
            self.say(format_args!("logging ended, information is in: {}", trip_file.display()));
            info!("Engine stopped after {} rows", self.rows_written);
            self.state = SessionState::Terminated(StopReason::EngineStopped { trip_file });
        }

        Ok(self.state.clone())
    }

    /// Steps once per [`SAMPLE_INTERVAL`] until the engine stops or
    /// `shutdown` is cancelled. A query blocked on a silent adapter observes
    /// the cancellation when its sampler holds the same token.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<StopReason, SessionError> {
        loop {
            if shutdown.is_cancelled() {
                return Ok(self.interrupt());
            }

            match self.step() {
                Ok(SessionState::Terminated(reason)) => return Ok(reason),
                Ok(SessionState::Running) => {}
                Err(SessionError::Obd(ObdError::Interrupted)) => return Ok(self.interrupt()),
                Err(e) => return Err(e),
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(self.interrupt()),
                _ = tokio::time::sleep(SAMPLE_INTERVAL) => {}
            }
        }
    }

    fn interrupt(&mut self) -> StopReason {
        self.say("exiting");
        self.cancel();
        StopReason::Interrupted
    }
}
