//! The acquisition-and-dispatch loop.
//!
//! Each cycle runs to completion: acquire (with retries), calibrate, then
//! hand the result to the CSV log, InfluxDB and the status display in that
//! order. A failing sink is logged and skipped. Cycles fire on absolute
//! deadlines `start + n * interval`, so time spent inside a cycle never
//! pushes later cycles back.

use crate::acquire::{AcquisitionOutcome, ReadingSource, RetryAcquirer};
use crate::calibration::Calibrator;
use crate::sinks::{SampleSink, StatusSink};
use log::{error, info, warn};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Absolute deadlines spaced one interval apart.
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    interval: Duration,
    target: Instant,
}

impl Cadence {
    pub fn start(at: Instant, interval: Duration) -> Self {
        Cadence {
            interval,
            target: at,
        }
    }

    /// Moves to the next deadline. If a cycle overran it, the deadline becomes
    /// `now`: the next cycle fires straight away and later ones follow from there.
    pub fn advance(&mut self, now: Instant) -> Instant {
        self.target += self.interval;
        if self.target < now {
            self.target = now;
        }
        self.target
    }
}

/// The fixed set of consumers.
pub struct Sinks {
    pub log: Box<dyn SampleSink>,
    pub remote: Box<dyn SampleSink>,
    pub display: Box<dyn StatusSink>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub success: bool,
    pub failed_sinks: Vec<&'static str>,
}

pub struct CycleScheduler<S> {
    acquirer: RetryAcquirer<S>,
    calibrator: Calibrator,
    sinks: Sinks,
    interval: Duration,
    state: SchedulerState,
}

impl<S: ReadingSource> CycleScheduler<S> {
    pub fn new(
        acquirer: RetryAcquirer<S>,
        calibrator: Calibrator,
        sinks: Sinks,
        interval: Duration,
    ) -> Self {
        CycleScheduler {
            acquirer,
            calibrator,
            sinks,
            interval,
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        info!("Attempting to read sensor data...");
        let acquired = self.acquirer.acquire().await;
        let outcome = AcquisitionOutcome::from_acquisition(acquired, &self.calibrator);

        self.dispatch(&outcome)
    }

    /// Samples go to every sink; failures only to the display.
    pub fn dispatch(&mut self, outcome: &AcquisitionOutcome) -> CycleReport {
        let mut report = CycleReport {
            success: outcome.is_success(),
            failed_sinks: Vec::new(),
        };

        if let AcquisitionOutcome::Success(sample) = outcome {
            info!(
                "Calibrated reading: Temp={:.1}°C, Humidity={:.1}%, Timestamp={}",
                sample.temperature(),
                sample.humidity(),
                sample.taken_at().format("%Y-%m-%d %H:%M:%S")
            );

            for sink in [&mut self.sinks.log, &mut self.sinks.remote] {
                if let Err(e) = sink.write(sample) {
                    error!("Error writing to {}: {}", sink.name(), e);
                    report.failed_sinks.push(sink.name());
                }
            }
        }

        if let Err(e) = self.sinks.display.update(outcome) {
            error!("Failed to write {} file: {}", self.sinks.display.name(), e);
            report.failed_sinks.push(self.sinks.display.name());
        }

        report
    }

    /// Runs cycles until `shutdown` turns true. The flag is checked after each
    /// cycle and while sleeping, never mid-cycle. Returns the number of cycles run.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> u64 {
        self.state = SchedulerState::Running;
        info!(
            "Starting measurement loop ({} read attempts per cycle)...",
            self.acquirer.max_attempts()
        );

        let mut cadence = Cadence::start(Instant::now(), self.interval);
        let mut cycles = 0;

        loop {
            let report = self.run_cycle().await;
            cycles += 1;
            if !report.failed_sinks.is_empty() {
                warn!(
                    "Cycle {} finished with failed sinks: {}",
                    cycles,
                    report.failed_sinks.join(", ")
                );
            }

            if *shutdown.borrow() {
                break;
            }

            let now = Instant::now();
            let deadline = cadence.advance(now);
            info!(
                "Sleeping for {:.2} seconds...",
                deadline.saturating_duration_since(now).as_secs_f64()
            );

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                _ = stop_requested(&mut shutdown) => break,
            }
        }

        self.state = SchedulerState::Stopping;
        info!("Stopping logger...");
        self.sinks.log.close();
        self.sinks.remote.close();

        self.state = SchedulerState::Stopped;
        info!("Logger stopped");
        cycles
    }
}

// Resolves once the flag is true. A dropped sender can never ask us to stop,
// so that case waits forever.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::tests::{reading, ScriptedSource};
    use crate::acquire::RawReading;
    use crate::calibration::{CalibrationOffsets, Sample};
    use crate::sinks::SinkError;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Journal = Rc<RefCell<Vec<String>>>;

    struct RecordingSink {
        name: &'static str,
        journal: Journal,
        fail: bool,
    }

    impl SampleSink for RecordingSink {
        fn name(&self) -> &'static str {
            self.name
        }

        fn write(&mut self, sample: &Sample) -> Result<(), SinkError> {
            self.journal.borrow_mut().push(format!(
                "{} {:.1} {:.1}",
                self.name,
                sample.temperature(),
                sample.humidity()
            ));
            if self.fail {
                return Err(SinkError::Http("connection refused".to_string()));
            }
            Ok(())
        }

        fn close(&mut self) {
            self.journal.borrow_mut().push(format!("{} closed", self.name));
        }
    }

    struct RecordingDisplay {
        journal: Journal,
        fail: bool,
    }

    impl StatusSink for RecordingDisplay {
        fn name(&self) -> &'static str {
            "display"
        }

        fn update(&mut self, outcome: &AcquisitionOutcome) -> Result<(), SinkError> {
            let line = match outcome {
                AcquisitionOutcome::Success(_) => "display ok".to_string(),
                AcquisitionOutcome::Failure(reason) => format!("display {}", reason),
            };
            self.journal.borrow_mut().push(line);
            if self.fail {
                return Err(SinkError::Io(std::io::Error::other("read-only")));
            }
            Ok(())
        }
    }

    fn sinks(journal: &Journal, log_fails: bool, remote_fails: bool, display_fails: bool) -> Sinks {
        Sinks {
            log: Box::new(RecordingSink {
                name: "CSV",
                journal: journal.clone(),
                fail: log_fails,
            }),
            remote: Box::new(RecordingSink {
                name: "DB",
                journal: journal.clone(),
                fail: remote_fails,
            }),
            display: Box::new(RecordingDisplay {
                journal: journal.clone(),
                fail: display_fails,
            }),
        }
    }

    fn scheduler(
        script: Vec<Result<RawReading, &'static str>>,
        journal: &Journal,
        remote_fails: bool,
    ) -> CycleScheduler<ScriptedSource> {
        CycleScheduler::new(
            RetryAcquirer::new(ScriptedSource::new(script), 3),
            Calibrator::new(CalibrationOffsets {
                temperature: 0.5,
                humidity: -1.0,
            }),
            sinks(journal, false, remote_fails, false),
            Duration::from_secs(60),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn success_reaches_every_sink_in_order() {
        let journal = Journal::default();
        let mut scheduler = scheduler(vec![reading(21.95, 45.95)], &journal, false);

        let report = scheduler.run_cycle().await;

        assert_eq!(report, CycleReport { success: true, failed_sinks: vec![] });
        assert_eq!(
            *journal.borrow(),
            vec!["CSV 22.5 45.0", "DB 22.5 45.0", "display ok"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failing_remote_does_not_stop_other_sinks() {
        let journal = Journal::default();
        let mut scheduler = scheduler(vec![reading(20.0, 50.0)], &journal, true);

        let report = scheduler.run_cycle().await;

        assert!(report.success);
        assert_eq!(report.failed_sinks, vec!["DB"]);
        assert_eq!(
            *journal.borrow(),
            vec!["CSV 20.5 49.0", "DB 20.5 49.0", "display ok"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failing_log_does_not_stop_other_sinks() {
        let journal = Journal::default();
        let mut scheduler = CycleScheduler::new(
            RetryAcquirer::new(ScriptedSource::new(vec![reading(20.0, 50.0)]), 3),
            Calibrator::new(CalibrationOffsets {
                temperature: 0.5,
                humidity: -1.0,
            }),
            sinks(&journal, true, false, false),
            Duration::from_secs(60),
        );

        let report = scheduler.run_cycle().await;

        assert!(report.success);
        assert_eq!(report.failed_sinks, vec!["CSV"]);
        assert_eq!(
            *journal.borrow(),
            vec!["CSV 20.5 49.0", "DB 20.5 49.0", "display ok"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_read_only_reaches_display() {
        let journal = Journal::default();
        let mut scheduler = scheduler(vec![], &journal, false);

        let report = scheduler.run_cycle().await;

        assert!(!report.success);
        assert_eq!(
            *journal.borrow(),
            vec!["display invalid or missing sensor data"]
        );
    }

    #[test]
    fn display_failure_is_contained() {
        let journal = Journal::default();
        let mut scheduler = CycleScheduler::new(
            RetryAcquirer::new(ScriptedSource::new(vec![]), 1),
            Calibrator::default(),
            sinks(&journal, false, false, true),
            Duration::from_secs(60),
        );

        let report = scheduler.dispatch(&AcquisitionOutcome::Failure("x".into()));

        assert_eq!(report.failed_sinks, vec!["display"]);
    }

    #[test]
    fn cadence_is_additive() {
        let start = Instant::now();
        let interval = Duration::from_secs(60);
        let mut cadence = Cadence::start(start, interval);

        // Cycles that finish early or late (within the interval) don't shift the grid.
        assert_eq!(cadence.advance(start + Duration::from_secs(3)), start + interval);
        assert_eq!(
            cadence.advance(start + interval + Duration::from_secs(59)),
            start + interval * 2
        );
    }

    #[test]
    fn cadence_overrun_fires_once_immediately() {
        let start = Instant::now();
        let interval = Duration::from_secs(60);
        let mut cadence = Cadence::start(start, interval);

        let late = start + Duration::from_secs(150);
        assert_eq!(cadence.advance(late), late);
        // No burst of catch-up deadlines after the overrun.
        assert_eq!(cadence.advance(late), late + interval);
    }

    /// Records when each read starts, then spends a varying amount of time reading.
    struct TimedSource {
        fired: Rc<RefCell<Vec<Instant>>>,
        busy: Vec<Duration>,
    }

    impl ReadingSource for TimedSource {
        type Error = &'static str;

        async fn read(&mut self) -> Result<RawReading, &'static str> {
            let n = {
                let mut fired = self.fired.borrow_mut();
                fired.push(Instant::now());
                fired.len()
            };
            tokio::time::sleep(self.busy[n % self.busy.len()]).await;
            Ok(RawReading {
                temperature: Some(20.0),
                humidity: Some(50.0),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hundred_cycles_without_drift() {
        let interval = Duration::from_secs(60);
        let fired = Rc::new(RefCell::new(Vec::new()));
        let source = TimedSource {
            fired: fired.clone(),
            busy: [0, 3_000, 17_250, 250, 41_000, 59_000]
                .iter()
                .map(|&ms| Duration::from_millis(ms))
                .collect(),
        };
        let journal = Journal::default();
        let mut scheduler = CycleScheduler::new(
            RetryAcquirer::new(source, 3),
            Calibrator::default(),
            sinks(&journal, false, false, false),
            interval,
        );

        let start = Instant::now();
        let (stop, shutdown) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep_until(start + interval * 100 + interval / 2).await;
            stop.send(true).unwrap();
        });

        let cycles = scheduler.run(shutdown).await;

        assert_eq!(cycles, 101);
        let fired = fired.borrow();
        for (n, at) in fired.iter().enumerate() {
            let expected = start + interval * n as u32;
            let skew = at.saturating_duration_since(expected) + expected.saturating_duration_since(*at);
            assert!(skew < Duration::from_millis(10), "cycle {} off by {:?}", n, skew);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_finishes_cycle_and_closes_sinks() {
        let journal = Journal::default();
        let mut scheduler = scheduler(vec![reading(20.0, 50.0)], &journal, false);
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        let (_stop, shutdown) = watch::channel(true);
        let cycles = scheduler.run(shutdown).await;

        assert_eq!(cycles, 1);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(
            *journal.borrow(),
            vec![
                "CSV 20.5 49.0",
                "DB 20.5 49.0",
                "display ok",
                "CSV closed",
                "DB closed"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_the_sleep() {
        let journal = Journal::default();
        let mut scheduler = scheduler(
            vec![reading(20.0, 50.0), reading(20.0, 50.0)],
            &journal,
            false,
        );
        let (stop, shutdown) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(90)).await;
            stop.send(true).unwrap();
        });
        let start = Instant::now();

        let cycles = scheduler.run(shutdown).await;

        // Cycles at 0 s and 60 s; the stop at 90 s cuts the sleep towards 120 s.
        assert_eq!(cycles, 2);
        assert!(start.elapsed() < Duration::from_secs(91));
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }
}
