use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use sceneweaver_contracts::errors::ApiError;
use sceneweaver_contracts::events::EventLog;
use sceneweaver_contracts::images::{ImageRecord, Resolution};
use sceneweaver_contracts::session::{GenerationSession, Observation, SessionEvent};

use crate::backend::StoryboardBackend;
use crate::{lock, SharedCollection, SharedSession};

/// Fans session events out to the view channel and, when configured, the JSONL log.
///
/// Both ends are best effort: a closed receiver or an unwritable log never stops the worker.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<SessionEvent>,
    log: Option<EventLog>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<SessionEvent>, log: Option<EventLog>) -> Self {
        Self { tx, log }
    }

    pub fn log(&self) -> Option<&EventLog> {
        self.log.as_ref()
    }

    pub fn emit(&self, event: SessionEvent) {
        if let Some(log) = self.log.as_ref() {
            let _ = log.record(&event);
        }
        let _ = self.tx.send(event);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Finished,
}

/// Drives one generation session from dispatch to completion.
///
/// The reconciler only touches the session whose id it was created for, so a stale worker
/// left behind by a cancel cannot advance a newer session.
pub struct PollingReconciler {
    backend: Arc<dyn StoryboardBackend>,
    storyboard_id: i64,
    session_id: String,
    collection: SharedCollection,
    session: SharedSession,
    sink: EventSink,
    max_poll_failures: Option<u32>,
    consecutive_failures: u32,
    cancelled: Arc<AtomicBool>,
}

impl PollingReconciler {
    pub fn new(
        backend: Arc<dyn StoryboardBackend>,
        storyboard_id: i64,
        session_id: impl Into<String>,
        collection: SharedCollection,
        session: SharedSession,
        sink: EventSink,
    ) -> Self {
        Self {
            backend,
            storyboard_id,
            session_id: session_id.into(),
            collection,
            session,
            sink,
            max_poll_failures: None,
            consecutive_failures: 0,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_max_poll_failures(mut self, limit: Option<u32>) -> Self {
        self.max_poll_failures = limit.filter(|value| *value > 0);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sends the generate request. Returns `true` once the session is polling.
    pub fn dispatch(&mut self, story: &str, resolution: Resolution) -> bool {
        match self.backend.generate(self.storyboard_id, story, resolution) {
            Ok(()) => {
                let accepted = self
                    .own_session()
                    .map(|mut session| session.dispatch_accepted())
                    .unwrap_or(false);
                if accepted {
                    self.sink.emit(SessionEvent::Dispatched {
                        session_id: self.session_id.clone(),
                    });
                }
                accepted
            }
            Err(err) => {
                self.fail_session(format!("Generation request failed: {err}"));
                false
            }
        }
    }

    /// One poll: fetch, reconcile, then evaluate progress.
    pub fn tick(&mut self) -> TickOutcome {
        if self.is_cancelled() {
            return TickOutcome::Finished;
        }
        let polling = self
            .own_session()
            .map(|session| session.is_polling())
            .unwrap_or(false);
        if !polling {
            return TickOutcome::Finished;
        }

        let fetched_at = lock(&self.collection).epoch();
        match self.backend.list_images(self.storyboard_id) {
            Ok(remote) => self.apply_snapshot(remote, fetched_at),
            Err(err) => self.record_failure(&err),
        }
    }

    fn apply_snapshot(&mut self, remote: Vec<ImageRecord>, fetched_at: u64) -> TickOutcome {
        self.consecutive_failures = 0;
        let (observation, fraction) = {
            let mut collection = lock(&self.collection);
            // checked under the lock: teardown takes it after raising the flag
            if self.is_cancelled() {
                return TickOutcome::Finished;
            }
            collection.reconcile_since(remote, fetched_at);
            // observed with the collection still held so a confirmed delete cannot land between
            // the size read and the baseline it is compared against
            let Some(mut session) = self.own_session() else {
                return TickOutcome::Finished;
            };
            let observation = session.observe(collection.len());
            if matches!(observation, Observation::Completed { .. }) {
                session.finish();
            }
            (observation, session.progress_fraction())
        };

        match observation {
            Observation::Inactive => TickOutcome::Finished,
            Observation::Unchanged { .. } => TickOutcome::Continue,
            Observation::Progressed {
                observed_new,
                expected_new,
                fraction,
            } => {
                self.sink.emit(SessionEvent::ProgressChanged {
                    session_id: self.session_id.clone(),
                    observed_new,
                    expected_new,
                    fraction,
                });
                TickOutcome::Continue
            }
            Observation::Completed {
                observed_new,
                expected_new,
            } => {
                self.sink.emit(SessionEvent::ProgressChanged {
                    session_id: self.session_id.clone(),
                    observed_new,
                    expected_new,
                    fraction,
                });
                self.sink.emit(SessionEvent::Completed {
                    session_id: self.session_id.clone(),
                    observed_new,
                    expected_new,
                });
                TickOutcome::Finished
            }
        }
    }

    fn record_failure(&mut self, err: &ApiError) -> TickOutcome {
        if self.is_cancelled() {
            return TickOutcome::Finished;
        }
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.sink.emit(SessionEvent::PollFailed {
            session_id: self.session_id.clone(),
            consecutive_failures: self.consecutive_failures,
            message: err.to_string(),
        });
        match self.max_poll_failures {
            Some(limit) if self.consecutive_failures >= limit => {
                self.fail_session(format!(
                    "Stopped checking for images after {} failed attempts: {err}",
                    self.consecutive_failures
                ));
                TickOutcome::Finished
            }
            _ => TickOutcome::Continue,
        }
    }

    fn fail_session(&self, message: String) {
        let failed = match self.own_session() {
            Some(mut session) => {
                let failed = session.fail(message.clone());
                session.settle();
                failed
            }
            None => false,
        };
        if failed {
            self.sink.emit(SessionEvent::Failed {
                session_id: self.session_id.clone(),
                message,
            });
        }
    }

    fn own_session(&self) -> Option<MutexGuard<'_, GenerationSession>> {
        if self.is_cancelled() {
            return None;
        }
        let session = lock(&self.session);
        if session.session_id() == Some(self.session_id.as_str()) {
            Some(session)
        } else {
            None
        }
    }
}

enum PollCommand {
    TickNow,
    Stop,
}

/// Owns the worker thread of one session. Dropping the handle cancels the session's polling.
pub struct PollHandle {
    stop_flag: Arc<AtomicBool>,
    sender: Option<mpsc::Sender<PollCommand>>,
    handle: Option<thread::JoinHandle<()>>,
    collection: SharedCollection,
}

impl PollHandle {
    /// Starts the worker: dispatch first, then one tick per `interval` until the session ends.
    pub fn spawn(
        reconciler: PollingReconciler,
        story: String,
        resolution: Resolution,
        interval: Duration,
    ) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let stop_flag = reconciler.cancel_flag();
        let collection = Arc::clone(&reconciler.collection);
        let worker = PollWorker {
            reconciler,
            story,
            resolution,
            interval,
            stop_flag: Arc::clone(&stop_flag),
        };
        let handle = thread::Builder::new()
            .name("sceneweaver-poll".to_string())
            .spawn(move || worker.run(rx))
            .context("failed spawning poll worker")?;
        Ok(Self {
            stop_flag,
            sender: Some(tx),
            handle: Some(handle),
            collection,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(true)
    }

    /// Skips the rest of the current wait and polls right away.
    pub fn poll_now(&self) {
        if let Some(tx) = self.sender.as_ref() {
            let _ = tx.send(PollCommand::TickNow);
        }
    }

    /// Stops polling without waiting for an in-flight fetch; its result will be discarded.
    pub fn cancel(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(tx) = self.sender.take() {
            let _ = tx.send(PollCommand::Stop);
        }
        // a reconcile that already passed the flag check finishes before this returns
        drop(lock(&self.collection));
        self.handle = None;
    }

    /// Waits for the worker to end on its own (completion, failure or cancel).
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        if self.handle.is_some() || self.sender.is_some() {
            self.cancel();
        }
    }
}

struct PollWorker {
    reconciler: PollingReconciler,
    story: String,
    resolution: Resolution,
    interval: Duration,
    stop_flag: Arc<AtomicBool>,
}

impl PollWorker {
    fn run(mut self, rx: mpsc::Receiver<PollCommand>) {
        if !self.reconciler.dispatch(&self.story, self.resolution) {
            return;
        }
        while !self.stop_flag.load(Ordering::SeqCst) {
            match rx.recv_timeout(self.interval) {
                Ok(PollCommand::TickNow) | Err(mpsc::RecvTimeoutError::Timeout) => {}
                Ok(PollCommand::Stop) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
            if self.stop_flag.load(Ordering::SeqCst) {
                break;
            }
            if self.reconciler.tick() == TickOutcome::Finished {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use sceneweaver_contracts::errors::ApiError;
    use sceneweaver_contracts::events::EventLog;
    use sceneweaver_contracts::images::{ImageCollection, Resolution};
    use sceneweaver_contracts::session::{GenerationSession, SessionEvent, SessionPhase};

    use super::{EventSink, PollHandle, PollingReconciler, TickOutcome};
    use crate::testing::{record, ScriptedBackend};
    use crate::{lock, SharedCollection, SharedSession};

    struct Fixture {
        backend: Arc<ScriptedBackend>,
        collection: SharedCollection,
        session: SharedSession,
        events: mpsc::Receiver<SessionEvent>,
        reconciler: PollingReconciler,
    }

    fn fixture(story: &str, existing: usize, log: Option<EventLog>) -> anyhow::Result<Fixture> {
        let rows = (1..=existing as i64)
            .map(|id| record(id, "existing"))
            .collect::<Vec<_>>();
        let backend = Arc::new(ScriptedBackend::new(rows.clone()));
        let collection = Arc::new(Mutex::new(ImageCollection::from_records(rows)));
        let mut machine = GenerationSession::new();
        let start = machine
            .begin(story, existing)
            .map_err(|err| anyhow::anyhow!("{err}"))?;
        let session = Arc::new(Mutex::new(machine));
        let (tx, rx) = mpsc::channel();
        let reconciler = PollingReconciler::new(
            backend.clone(),
            7,
            start.session_id,
            Arc::clone(&collection),
            Arc::clone(&session),
            EventSink::new(tx, log),
        );
        Ok(Fixture {
            backend,
            collection,
            session,
            events: rx,
            reconciler,
        })
    }

    fn drain(rx: &mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn ticks_report_progress_then_complete() -> anyhow::Result<()> {
        let mut fx = fixture("A cat sat. It ran away.", 1, None)?;
        assert!(fx.reconciler.dispatch("A cat sat. It ran away.", Resolution::Square));

        fx.backend.produce(&["A cat sat."]);
        assert_eq!(fx.reconciler.tick(), TickOutcome::Continue);
        assert_eq!(fx.reconciler.tick(), TickOutcome::Continue);
        fx.backend.produce(&["It ran away."]);
        assert_eq!(fx.reconciler.tick(), TickOutcome::Finished);

        let events = drain(&fx.events);
        let fractions = events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::ProgressChanged { fraction, .. } => Some(*fraction),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(fractions, vec![0.5, 1.0]);
        assert!(matches!(events.first(), Some(SessionEvent::Dispatched { .. })));
        assert!(matches!(events.last(), Some(SessionEvent::Completed { .. })));
        assert_eq!(lock(&fx.session).phase(), SessionPhase::Idle);
        assert_eq!(lock(&fx.collection).len(), 3);

        assert_eq!(fx.reconciler.tick(), TickOutcome::Finished);
        assert_eq!(fx.backend.calls("list"), 3);
        Ok(())
    }

    #[test]
    fn dispatch_failure_fails_and_settles_session() -> anyhow::Result<()> {
        let mut fx = fixture("One.", 0, None)?;
        fx.backend
            .fail_next("generate", ApiError::rejected(500, "queue unavailable"));
        assert!(!fx.reconciler.dispatch("One.", Resolution::Square));

        let session = lock(&fx.session);
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(session
            .last_error()
            .map(|message| message.contains("queue unavailable"))
            .unwrap_or(false));
        drop(session);
        assert!(matches!(
            drain(&fx.events).as_slice(),
            [SessionEvent::Failed { .. }]
        ));
        Ok(())
    }

    #[test]
    fn transient_failures_keep_polling_until_the_bound() -> anyhow::Result<()> {
        let fx = fixture("One. Two.", 0, None)?;
        let mut reconciler = fx.reconciler.with_max_poll_failures(Some(3));
        assert!(reconciler.dispatch("One. Two.", Resolution::Square));

        fx.backend.push_list_error(ApiError::transport("connection reset"));
        fx.backend.push_list_error(ApiError::transport("connection reset"));
        assert_eq!(reconciler.tick(), TickOutcome::Continue);
        assert_eq!(reconciler.tick(), TickOutcome::Continue);
        fx.backend.produce(&["One."]);
        assert_eq!(reconciler.tick(), TickOutcome::Continue);
        assert_eq!(reconciler.consecutive_failures(), 0);

        for _ in 0..3 {
            fx.backend.push_list_error(ApiError::rejected(503, "busy"));
        }
        assert_eq!(reconciler.tick(), TickOutcome::Continue);
        assert_eq!(reconciler.tick(), TickOutcome::Continue);
        assert_eq!(reconciler.tick(), TickOutcome::Finished);

        let session = lock(&fx.session);
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(session.last_error().is_some());
        drop(session);
        let failed = drain(&fx.events)
            .into_iter()
            .filter(|event| matches!(event, SessionEvent::Failed { .. }))
            .count();
        assert_eq!(failed, 1);
        Ok(())
    }

    #[test]
    fn cancelled_in_flight_fetch_is_discarded() -> anyhow::Result<()> {
        let fx = fixture("One.", 0, None)?;
        let mut reconciler = fx.reconciler;
        assert!(reconciler.dispatch("One.", Resolution::Square));
        let flag = reconciler.cancel_flag();

        fx.backend.push_snapshot(vec![record(1, "late")]);
        let gate = fx.backend.gate("list");
        let worker = thread::spawn(move || reconciler.tick());
        gate.wait_entered()?;

        flag.store(true, std::sync::atomic::Ordering::SeqCst);
        lock(&fx.session).cancel();
        gate.release();
        let outcome = worker
            .join()
            .map_err(|_| anyhow::anyhow!("tick panicked"))?;

        assert_eq!(outcome, TickOutcome::Finished);
        assert!(lock(&fx.collection).is_empty());
        Ok(())
    }

    #[test]
    fn stale_worker_leaves_newer_session_alone() -> anyhow::Result<()> {
        let mut fx = fixture("One.", 0, None)?;
        assert!(fx.reconciler.dispatch("One.", Resolution::Square));
        {
            let mut session = lock(&fx.session);
            session.cancel();
            session
                .begin("Two. Three.", 0)
                .map_err(|err| anyhow::anyhow!("{err}"))?;
            session.dispatch_accepted();
        }
        fx.backend.produce(&["Two."]);
        assert_eq!(fx.reconciler.tick(), TickOutcome::Finished);
        assert_eq!(lock(&fx.session).observed_new(), 0);
        Ok(())
    }

    #[test]
    fn worker_thread_runs_to_completion_and_logs() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let log_path = temp.path().join("events.jsonl");
        let fx = fixture("Only one.", 0, Some(EventLog::new(&log_path, 7)))?;
        fx.backend.produce(&["Only one."]);

        let handle = PollHandle::spawn(
            fx.reconciler,
            "Only one.".to_string(),
            Resolution::Portrait,
            Duration::from_millis(5),
        )?;
        handle.join();

        assert_eq!(lock(&fx.session).phase(), SessionPhase::Idle);
        assert_eq!(fx.backend.calls("list"), 1);
        let log = std::fs::read_to_string(&log_path)?;
        let types = log
            .lines()
            .map(serde_json::from_str::<serde_json::Value>)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|event| event["type"].as_str().map(str::to_string))
            .collect::<Vec<_>>();
        assert_eq!(types, vec!["dispatched", "progress_changed", "completed"]);
        Ok(())
    }

    #[test]
    fn dropping_the_handle_stops_polling() -> anyhow::Result<()> {
        let fx = fixture("One. Two.", 0, None)?;
        let handle = PollHandle::spawn(
            fx.reconciler,
            "One. Two.".to_string(),
            Resolution::Square,
            Duration::from_millis(5),
        )?;
        thread::sleep(Duration::from_millis(30));
        drop(handle);
        thread::sleep(Duration::from_millis(20));
        let calls = fx.backend.calls("list");
        thread::sleep(Duration::from_millis(50));
        assert_eq!(fx.backend.calls("list"), calls);
        Ok(())
    }
}
