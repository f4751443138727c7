#[cfg(test)]
mod tests {
    use crate::config::OutputConfig;
    use crate::elm327::Elm327;
    use crate::hardware::HardwareError;
    use crate::obd::{EngineSample, ScriptedObd};
    use crate::rtc::{Clock, RtcError};
    use crate::session::{Session, SessionError, SessionState, StopReason};
    use crate::trip::TripNamer;
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use std::io::{self, Read, Write};
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;

    /// Starts at 2024-07-21 14:15:30 and advances one second per read.
    struct TickingClock {
        now: NaiveDateTime,
    }

    impl Clock for TickingClock {
        fn read_datetime(&mut self) -> Result<NaiveDateTime, RtcError> {
            let now = self.now;
            self.now += Duration::seconds(1);
            Ok(now)
        }

        fn set_datetime(&mut self, dt: &NaiveDateTime) -> Result<(), RtcError> {
            self.now = *dt;
            Ok(())
        }

        fn name(&self) -> &str {
            "ticking"
        }
    }

    struct UnpluggedClock;

    impl Clock for UnpluggedClock {
        fn read_datetime(&mut self) -> Result<NaiveDateTime, RtcError> {
            Err(RtcError::Bus(HardwareError::Io(std::io::Error::from(std::io::ErrorKind::NotFound))))
        }

        fn set_datetime(&mut self, _dt: &NaiveDateTime) -> Result<(), RtcError> {
            Err(RtcError::Bus(HardwareError::Io(std::io::Error::from(std::io::ErrorKind::NotFound))))
        }

        fn name(&self) -> &str {
            "unplugged"
        }
    }

    /// An adapter that accepts commands and never answers.
    struct SilentPort;

    impl Read for SilentPort {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            std::thread::sleep(std::time::Duration::from_millis(1));
            Err(io::Error::from(io::ErrorKind::TimedOut))
        }
    }

    impl Write for SilentPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Captures what the session prints.
    #[derive(Clone, Default)]
    struct Console(Arc<Mutex<Vec<u8>>>);

    impl Console {
        fn lines(&self) -> Vec<String> {
            let buf = self.0.lock().unwrap();
            String::from_utf8_lossy(&buf).lines().map(String::from).collect()
        }
    }

    impl Write for Console {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn clock() -> Box<TickingClock> {
        let now = NaiveDate::from_ymd_opt(2024, 7, 21).unwrap().and_hms_opt(14, 15, 30).unwrap();
        Box::new(TickingClock { now })
    }

    fn drive(rpms: &[f64]) -> Box<ScriptedObd> {
        Box::new(ScriptedObd::new(rpms.iter().map(|&rpm| EngineSample {
            rpm,
            speed: if rpm > 0.0 { 30.0 } else { 0.0 },
            throttle: if rpm > 0.0 { 12.5 } else { 0.0 },
            load: if rpm > 0.0 { 40.0 } else { 0.0 },
            fuel_status: if rpm > 0.0 { 2.0 } else { 0.0 },
        })))
    }

    fn output(dir: &Path) -> OutputConfig {
        OutputConfig {
            directory: dir.to_path_buf(),
            log_file: "datetime_log.csv".to_string(),
        }
    }

    fn session(dir: &Path, rpms: &[f64]) -> Session {
        Session::new(clock(), drive(rpms), output(dir), TripNamer::with_prefix("trip_"))
    }

    fn rows(path: &Path) -> Vec<Vec<String>> {
        csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap()
            .records()
            .map(|r| r.unwrap().iter().map(String::from).collect())
            .collect()
    }

    #[test]
    fn test_engine_stop_rolls_over() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), &[1500.0, 1200.0, 0.0]);

        assert_eq!(s.step().unwrap(), SessionState::Running);
        assert_eq!(s.step().unwrap(), SessionState::Running);
        assert!(!dir.path().join("trip_1.csv").exists());

        let trip_file = dir.path().join("trip_1.csv");
        assert_eq!(
            s.step().unwrap(),
            SessionState::Terminated(StopReason::EngineStopped { trip_file: trip_file.clone() })
        );

        let log = rows(&dir.path().join("datetime_log.csv"));
        assert_eq!(log.len(), 3);
        assert_eq!(log[0], vec!["2024-07-21", "14:15:30", "1500", "30", "12.5", "40", "2"]);
        assert_eq!(log[2], vec!["2024-07-21", "14:15:32", "0", "0", "0", "0", "0"]);

        let trip = rows(&trip_file);
        assert_eq!(trip, vec![log[2].clone()]);
        assert!(!dir.path().join("trip_2.csv").exists());
        assert_eq!(s.rows_written(), 3);
    }

    #[test]
    fn test_completion_message_names_trip_file() {
        let dir = tempfile::tempdir().unwrap();
        let console = Console::default();
        let mut s = session(dir.path(), &[1500.0, 0.0]).with_console(Box::new(console.clone()));

        s.step().unwrap();
        s.step().unwrap();

        let out = console.lines();
        assert_eq!(&out[..2], ["date: 2024-07-21", "hour: 14:15:30"]);
        let last = out.last().unwrap();
        assert!(last.starts_with("logging ended, information is in: "));
        assert!(last.ends_with("trip_1.csv"));
    }

    #[test]
    fn test_first_sample_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), &[0.0, 900.0]);
        assert!(matches!(s.step().unwrap(), SessionState::Terminated(StopReason::EngineStopped { .. })));
        assert_eq!(rows(&dir.path().join("datetime_log.csv")).len(), 1);
    }

    #[test]
    fn test_terminated_is_final() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), &[0.0, 900.0]);
        s.step().unwrap();
        assert!(matches!(s.step(), Err(SessionError::AlreadyTerminated)));
        s.cancel();
        assert!(matches!(s.state(), SessionState::Terminated(StopReason::EngineStopped { .. })));
        assert_eq!(rows(&dir.path().join("datetime_log.csv")).len(), 1);
    }

    #[test]
    fn test_cancel_before_sampling() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), &[900.0]);
        s.cancel();
        assert!(matches!(s.step(), Err(SessionError::Cancelled)));
        assert!(!dir.path().join("datetime_log.csv").exists());
    }

    #[test]
    fn test_clock_fault_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = Session::new(Box::new(UnpluggedClock), drive(&[900.0]), output(dir.path()), TripNamer::with_prefix("trip_"));
        let err = s.step().unwrap_err();
        assert!(matches!(err, SessionError::Rtc(_)));
        assert!(err.is_device_fault());
        assert!(!dir.path().join("datetime_log.csv").exists());
    }

    #[test]
    fn test_obd_fault_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), &[]);
        let err = s.step().unwrap_err();
        assert!(matches!(err, SessionError::Obd(_)));
        assert!(err.is_device_fault());
        assert!(!dir.path().join("datetime_log.csv").exists());
    }

    #[test]
    fn test_storage_fault() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(&dir.path().join("missing"), &[900.0]);
        let err = s.step().unwrap_err();
        assert!(matches!(err, SessionError::Storage(_)));
        assert!(!err.is_device_fault());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_engine_stops() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), &[1500.0, 1200.0, 0.0]);

        let started = tokio::time::Instant::now();
        let reason = s.run(CancellationToken::new()).await.unwrap();

        assert_eq!(reason, StopReason::EngineStopped { trip_file: dir.path().join("trip_1.csv") });
        let waited = started.elapsed();
        assert!(waited >= std::time::Duration::from_secs(2));
        assert!(waited < std::time::Duration::from_secs(3));
        assert_eq!(rows(&dir.path().join("datetime_log.csv")).len(), 3);
        assert_eq!(rows(&dir.path().join("trip_1.csv")).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let console = Console::default();
        let mut s = session(dir.path(), &[900.0; 10]).with_console(Box::new(console.clone()));

        let shutdown = CancellationToken::new();
        let on_signal = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
            on_signal.cancel();
        });
        let reason = s.run(shutdown).await.unwrap();

        assert_eq!(reason, StopReason::Interrupted);
        assert_eq!(console.lines().last().map(String::as_str), Some("exiting"));
        assert_eq!(s.state(), &SessionState::Terminated(StopReason::Interrupted));
        assert_eq!(rows(&dir.path().join("datetime_log.csv")).len(), 3);
        assert!(!dir.path().join("trip_1.csv").exists());
        assert!(matches!(s.step(), Err(SessionError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_propagates_faults() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), &[900.0, 900.0]);
        let err = s.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SessionError::Obd(_)));
        assert_eq!(rows(&dir.path().join("datetime_log.csv")).len(), 2);
    }

    #[tokio::test]
    async fn test_interrupt_during_blocked_query() {
        let dir = tempfile::tempdir().unwrap();
        let shutdown = CancellationToken::new();
        let mut elm = Elm327::new(SilentPort, "silent");
        elm.set_cancellation(shutdown.clone());
        let console = Console::default();
        let mut s = Session::new(clock(), Box::new(elm), output(dir.path()), TripNamer::with_prefix("trip_"))
            .with_console(Box::new(console.clone()));

        let on_signal = shutdown.clone();
        let signal = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            on_signal.cancel();
        });
        let reason = s.run(shutdown).await.unwrap();
        signal.join().unwrap();

        assert_eq!(reason, StopReason::Interrupted);
        assert_eq!(s.state(), &SessionState::Terminated(StopReason::Interrupted));
        assert_eq!(console.lines().last().map(String::as_str), Some("exiting"));
        assert!(!dir.path().join("datetime_log.csv").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_already_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), &[900.0]);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        assert_eq!(s.run(shutdown).await.unwrap(), StopReason::Interrupted);
        assert_eq!(s.rows_written(), 0);
        assert!(!dir.path().join("datetime_log.csv").exists());
    }
}
