use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use sceneweaver_contracts::errors::ApiError;
use sceneweaver_contracts::events::{EventLog, EventPayload};
use sceneweaver_contracts::images::{ImageCollection, ImageId, ImageRecord};
use serde_json::json;

use crate::backend::{RegenerateRequest, StoryboardBackend};
use crate::{lock, SharedCollection, SharedSession};

/// Liveness of the view that issued a mutation. Closed scopes drop late results.
#[derive(Debug, Clone)]
pub struct ViewScope(Arc<AtomicBool>);

impl ViewScope {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for ViewScope {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegenerateOutcome {
    /// The record to keep selected after the refresh.
    pub record: ImageRecord,
    /// False when the follow-up list refresh failed and only the returned record was applied.
    pub refreshed: bool,
}

/// User edits against the shared collection.
///
/// Nothing is written locally until the backend confirms, and confirmed writes are stamped so a
/// poll snapshot fetched before them cannot undo them.
#[derive(Clone)]
pub struct MutationCoordinator {
    backend: Arc<dyn StoryboardBackend>,
    storyboard_id: i64,
    collection: SharedCollection,
    session: Option<SharedSession>,
    deleting: Arc<Mutex<BTreeSet<ImageId>>>,
    scope: ViewScope,
    log: Option<EventLog>,
}

impl MutationCoordinator {
    pub fn new(
        backend: Arc<dyn StoryboardBackend>,
        storyboard_id: i64,
        collection: SharedCollection,
        scope: ViewScope,
    ) -> Self {
        Self {
            backend,
            storyboard_id,
            collection,
            session: None,
            deleting: Arc::new(Mutex::new(BTreeSet::new())),
            scope,
            log: None,
        }
    }

    /// Confirmed deletions are reported to this session so they do not hide generation progress.
    pub fn with_session(mut self, session: SharedSession) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_event_log(mut self, log: Option<EventLog>) -> Self {
        self.log = log;
        self
    }

    pub fn is_deleting(&self, image_id: ImageId) -> bool {
        lock(&self.deleting).contains(&image_id)
    }

    pub fn deleting_ids(&self) -> Vec<ImageId> {
        lock(&self.deleting).iter().copied().collect()
    }

    pub fn update_caption(&self, image_id: ImageId, caption: &str) -> Result<ImageRecord, ApiError> {
        let caption = caption.trim();
        if caption.is_empty() {
            return Err(ApiError::validation("Caption cannot be empty."));
        }
        let result = self.backend.update_caption(image_id, caption);
        self.record_outcome("caption_updated", image_id, &result);
        let confirmed = result?;
        self.apply(|collection| {
            collection.upsert(confirmed.clone());
        });
        Ok(confirmed)
    }

    /// Regenerates one frame, then refreshes the whole list so the collection picks up the new
    /// image the way the backend stored it.
    pub fn regenerate(
        &self,
        image_id: ImageId,
        request: &RegenerateRequest,
    ) -> Result<RegenerateOutcome, ApiError> {
        if request.prompt.trim().is_empty() {
            return Err(ApiError::validation("Prompt cannot be empty."));
        }
        let result = self.backend.regenerate(image_id, request);
        self.record_outcome("image_regenerated", image_id, &result);
        let returned = result?;

        let mut fetched_at = 0;
        self.apply(|collection| {
            collection.upsert(returned.clone());
            fetched_at = collection.epoch();
        });
        if !self.scope.is_open() {
            return Ok(RegenerateOutcome {
                record: returned,
                refreshed: false,
            });
        }

        let refreshed = match self.backend.list_images(self.storyboard_id) {
            Ok(remote) => {
                self.apply(|collection| collection.reconcile_since(remote, fetched_at));
                true
            }
            Err(err) => {
                self.record_outcome::<()>("images_refreshed", image_id, &Err(err));
                false
            }
        };

        let record = {
            let collection = lock(&self.collection);
            collection
                .get(image_id)
                .or_else(|| collection.get(returned.id))
                .cloned()
        }
        .unwrap_or(returned);
        Ok(RegenerateOutcome { record, refreshed })
    }

    /// Deletes one image. A second request for the same id while the first is running is refused.
    pub fn delete_image(&self, image_id: ImageId) -> Result<(), ApiError> {
        if !lock(&self.deleting).insert(image_id) {
            return Err(ApiError::validation(format!(
                "Image {image_id} is already being deleted."
            )));
        }
        let result = self.backend.delete_image(image_id);
        lock(&self.deleting).remove(&image_id);
        self.record_outcome("image_deleted", image_id, &result);
        result?;

        // The baseline drops once per confirmed delete even when a poll already dropped the row.
        // Both change under the collection lock so a tick never sees one without the other.
        self.apply(|collection| {
            collection.remove(image_id);
            if let Some(session) = self.session.as_ref() {
                lock(session).note_local_removal();
            }
        });
        Ok(())
    }

    fn apply(&self, write: impl FnOnce(&mut ImageCollection)) {
        let mut collection = lock(&self.collection);
        if self.scope.is_open() {
            write(&mut collection);
        }
    }

    fn record_outcome<T>(&self, event_type: &str, image_id: ImageId, result: &Result<T, ApiError>) {
        let Some(log) = self.log.as_ref() else {
            return;
        };
        let mut payload = EventPayload::new();
        payload.insert("image_id".to_string(), json!(image_id));
        payload.insert("ok".to_string(), json!(result.is_ok()));
        if let Err(err) = result {
            payload.insert("error".to_string(), json!(err.message()));
        }
        let _ = log.emit(event_type, payload);
    }
}
