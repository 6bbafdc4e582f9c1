use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sceneweaver_contracts::errors::ApiError;
use sceneweaver_contracts::events::EventLog;
use sceneweaver_contracts::images::{ImageCollection, ImageId, ImageRecord, Resolution};
use sceneweaver_contracts::pagination::{caption_label, PaginationCursor};
use sceneweaver_contracts::session::{
    GenerationSession, SessionEvent, SessionPhase, SessionStart, StartRejected,
};

use crate::backend::StoryboardBackend;
use crate::config::ClientConfig;
use crate::coordinator::{MutationCoordinator, ViewScope};
use crate::reconciler::{EventSink, PollHandle, PollingReconciler};
use crate::{lock, SharedCollection, SharedSession};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Started(SessionStart),
    /// A session is still dispatching or polling; nothing was sent.
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleImage {
    pub index: usize,
    pub label: String,
    pub record: ImageRecord,
}

/// Everything one open storyboard needs: its images, the generation session, the page cursor,
/// and the worker polling on the session's behalf.
///
/// Dropping the view closes its scope and stops any polling it started.
pub struct StoryboardView {
    backend: Arc<dyn StoryboardBackend>,
    storyboard_id: i64,
    config: ClientConfig,
    collection: SharedCollection,
    session: SharedSession,
    cursor: PaginationCursor,
    scope: ViewScope,
    coordinator: MutationCoordinator,
    sink: EventSink,
    events: mpsc::Receiver<SessionEvent>,
    poller: Option<PollHandle>,
}

impl StoryboardView {
    pub fn new(
        backend: Arc<dyn StoryboardBackend>,
        storyboard_id: i64,
        config: ClientConfig,
        log: Option<EventLog>,
    ) -> Self {
        let collection: SharedCollection = Arc::new(Mutex::new(ImageCollection::new()));
        let session: SharedSession = Arc::new(Mutex::new(GenerationSession::with_sentence_limit(
            config.sentence_limit,
        )));
        let scope = ViewScope::new();
        let coordinator = MutationCoordinator::new(
            Arc::clone(&backend),
            storyboard_id,
            Arc::clone(&collection),
            scope.clone(),
        )
        .with_session(Arc::clone(&session))
        .with_event_log(log.clone());
        let (tx, rx) = mpsc::channel();
        Self {
            backend,
            storyboard_id,
            cursor: PaginationCursor::new(config.page_size),
            config,
            collection,
            session,
            scope,
            coordinator,
            sink: EventSink::new(tx, log),
            events: rx,
            poller: None,
        }
    }

    pub fn storyboard_id(&self) -> i64 {
        self.storyboard_id
    }

    /// Fetches the current image list. Returns the number of images now known.
    pub fn load(&mut self) -> Result<usize, ApiError> {
        let fetched_at = lock(&self.collection).epoch();
        let remote = self.backend.list_images(self.storyboard_id)?;
        let len = {
            let mut collection = lock(&self.collection);
            collection.reconcile_since(remote, fetched_at);
            collection.len()
        };
        self.cursor.clamp(len);
        Ok(len)
    }

    /// Starts a generation session for `text`. Dispatch and polling run on a worker thread.
    pub fn submit(&mut self, text: &str, resolution: Resolution) -> Result<SubmitOutcome, ApiError> {
        if self.poller.as_ref().is_some_and(PollHandle::is_finished) {
            self.poller = None;
        }
        let begun = {
            let collection = lock(&self.collection);
            lock(&self.session).begin(text, collection.len())
        };
        let start = match begun {
            Ok(start) => start,
            Err(StartRejected::AlreadyActive(_)) => return Ok(SubmitOutcome::AlreadyRunning),
            Err(rejected) => return Err(ApiError::validation(rejected.to_string())),
        };
        self.sink.emit(SessionEvent::Started {
            session_id: start.session_id.clone(),
            baseline_count: start.baseline_count,
            expected_new: start.expected_new,
        });

        let reconciler = PollingReconciler::new(
            Arc::clone(&self.backend),
            self.storyboard_id,
            start.session_id.clone(),
            Arc::clone(&self.collection),
            Arc::clone(&self.session),
            self.sink.clone(),
        )
        .with_max_poll_failures(self.config.max_poll_failures);

        match PollHandle::spawn(
            reconciler,
            text.to_string(),
            resolution,
            self.config.poll_interval,
        ) {
            Ok(handle) => {
                self.poller = Some(handle);
                Ok(SubmitOutcome::Started(start))
            }
            Err(err) => {
                let message = format!("{err:#}");
                {
                    let mut session = lock(&self.session);
                    session.fail(message.clone());
                    session.settle();
                }
                self.sink.emit(SessionEvent::Failed {
                    session_id: start.session_id,
                    message: message.clone(),
                });
                Err(ApiError::transport(message))
            }
        }
    }

    /// Abandons the running session. Returns `false` when nothing was running.
    pub fn cancel_generation(&mut self) -> bool {
        if let Some(mut poller) = self.poller.take() {
            poller.cancel();
        }
        let cancelled = lock(&self.session).cancel();
        match cancelled {
            Some(session_id) => {
                self.sink.emit(SessionEvent::Cancelled { session_id });
                true
            }
            None => false,
        }
    }

    /// Skips the wait before the next poll.
    pub fn poll_now(&self) {
        if let Some(poller) = self.poller.as_ref() {
            poller.poll_now();
        }
    }

    pub fn drain_events(&self) -> Vec<SessionEvent> {
        self.events.try_iter().collect()
    }

    pub fn wait_event(&self, timeout: Duration) -> Option<SessionEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    pub fn phase(&self) -> SessionPhase {
        lock(&self.session).phase()
    }

    pub fn is_generating(&self) -> bool {
        lock(&self.session).is_active()
    }

    pub fn progress(&self) -> f64 {
        lock(&self.session).progress_fraction()
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.session).last_error().map(str::to_string)
    }

    pub fn images(&self) -> Vec<ImageRecord> {
        lock(&self.collection).records().to_vec()
    }

    pub fn len(&self) -> usize {
        lock(&self.collection).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cursor(&self) -> PaginationCursor {
        self.cursor
    }

    /// The current page, after pulling the cursor back inside the collection.
    pub fn visible_page(&mut self) -> Vec<VisibleImage> {
        let collection = lock(&self.collection);
        self.cursor.clamp(collection.len());
        let range = self.cursor.window(collection.len());
        let start = range.start;
        collection
            .window(range)
            .iter()
            .enumerate()
            .map(|(offset, record)| VisibleImage {
                index: start + offset,
                label: caption_label(start + offset),
                record: record.clone(),
            })
            .collect()
    }

    pub fn next_page(&mut self) {
        let len = self.len();
        self.cursor.clamp(len);
        self.cursor.next(len);
    }

    pub fn prev_page(&mut self) {
        let len = self.len();
        self.cursor.clamp(len);
        self.cursor.prev(len);
    }

    /// Jumps to a 1-based page, clamped to the pages that exist.
    pub fn go_to_page(&mut self, page_number: usize) {
        let len = self.len();
        self.cursor.clamp(len);
        let target = page_number.max(1).min(self.cursor.page_count(len));
        while self.cursor.page_number() != target {
            if self.cursor.page_number() < target {
                self.cursor.next(len);
            } else {
                self.cursor.prev(len);
            }
        }
    }

    pub fn coordinator(&self) -> &MutationCoordinator {
        &self.coordinator
    }

    /// Deletes through the coordinator and keeps the cursor on a valid page.
    pub fn delete_image(&mut self, image_id: ImageId) -> Result<(), ApiError> {
        let result = self.coordinator.delete_image(image_id);
        let len = self.len();
        self.cursor.clamp(len);
        result
    }
}

impl Drop for StoryboardView {
    fn drop(&mut self) {
        self.scope.close();
        self.cancel_generation();
    }
}
