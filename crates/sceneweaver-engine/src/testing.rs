use std::collections::{HashMap, VecDeque};
use std::sync::mpsc;
use std::sync::Mutex;
use std::time::Duration;

use sceneweaver_contracts::errors::ApiError;
use sceneweaver_contracts::images::{ImageId, ImageRecord, Resolution};

use crate::backend::{RegenerateRequest, StoryboardBackend};
use crate::lock;

pub(crate) fn record(id: i64, caption: &str) -> ImageRecord {
    ImageRecord::new(id, format!("https://cdn.test/{id}.png"), caption)
}

/// In-process backend driven by the test.
///
/// `list_images` pops scripted responses first and falls back to the current server-side
/// records. Any operation can be made to fail once, or be held at a gate until the test
/// releases it.
pub(crate) struct ScriptedBackend {
    state: Mutex<ScriptState>,
    gates: Mutex<HashMap<&'static str, Gate>>,
}

#[derive(Default)]
struct ScriptState {
    server: Vec<ImageRecord>,
    scripted: VecDeque<Result<Vec<ImageRecord>, ApiError>>,
    failures: HashMap<&'static str, ApiError>,
    calls: HashMap<&'static str, usize>,
    next_id: i64,
    regenerate_as_new: bool,
}

struct Gate {
    entered: mpsc::Sender<()>,
    release: mpsc::Receiver<()>,
}

/// Test side of a gate: wait for the call to arrive, then let it go.
pub(crate) struct GateControl {
    entered: mpsc::Receiver<()>,
    release: mpsc::Sender<()>,
}

impl GateControl {
    pub(crate) fn wait_entered(&self) -> anyhow::Result<()> {
        self.entered
            .recv_timeout(Duration::from_secs(5))
            .map_err(|err| anyhow::anyhow!("gated call never arrived: {err}"))
    }

    pub(crate) fn release(&self) {
        let _ = self.release.send(());
    }
}

impl ScriptedBackend {
    pub(crate) fn new(server: Vec<ImageRecord>) -> Self {
        let next_id = server.iter().map(|row| row.id.0).max().unwrap_or(0) + 1;
        Self {
            state: Mutex::new(ScriptState {
                server,
                next_id,
                ..ScriptState::default()
            }),
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn push_snapshot(&self, records: Vec<ImageRecord>) {
        lock(&self.state).scripted.push_back(Ok(records));
    }

    pub(crate) fn push_list_error(&self, err: ApiError) {
        lock(&self.state).scripted.push_back(Err(err));
    }

    /// Makes the next call to `op` fail with `err`.
    pub(crate) fn fail_next(&self, op: &'static str, err: ApiError) {
        lock(&self.state).failures.insert(op, err);
    }

    /// Holds the next call to `op` until the returned control releases it.
    pub(crate) fn gate(&self, op: &'static str) -> GateControl {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        lock(&self.gates).insert(
            op,
            Gate {
                entered: entered_tx,
                release: release_rx,
            },
        );
        GateControl {
            entered: entered_rx,
            release: release_tx,
        }
    }

    /// Adds records to the server side, as if generation produced them.
    pub(crate) fn produce(&self, captions: &[&str]) -> Vec<ImageRecord> {
        let mut state = lock(&self.state);
        let mut created = Vec::new();
        for caption in captions {
            let id = state.next_id;
            state.next_id += 1;
            let row = record(id, caption);
            state.server.push(row.clone());
            created.push(row);
        }
        created
    }

    /// Makes `regenerate` replace the row with a freshly numbered one instead of editing it.
    pub(crate) fn regenerate_as_new(&self) {
        lock(&self.state).regenerate_as_new = true;
    }

    pub(crate) fn calls(&self, op: &'static str) -> usize {
        lock(&self.state).calls.get(op).copied().unwrap_or(0)
    }

    pub(crate) fn server_records(&self) -> Vec<ImageRecord> {
        lock(&self.state).server.clone()
    }

    fn enter(&self, op: &'static str) -> Result<(), ApiError> {
        let failure = {
            let mut state = lock(&self.state);
            *state.calls.entry(op).or_default() += 1;
            state.failures.remove(op)
        };
        let gate = lock(&self.gates).remove(op);
        if let Some(gate) = gate {
            let _ = gate.entered.send(());
            let _ = gate.release.recv_timeout(Duration::from_secs(5));
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl StoryboardBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn list_images(&self, _storyboard_id: i64) -> Result<Vec<ImageRecord>, ApiError> {
        // scripted responses are picked before the gate so a held call returns what was queued
        let scripted = lock(&self.state).scripted.pop_front();
        self.enter("list")?;
        match scripted {
            Some(response) => response,
            None => {
                let mut rows = lock(&self.state).server.clone();
                rows.reverse();
                Ok(rows)
            }
        }
    }

    fn generate(
        &self,
        _storyboard_id: i64,
        _story: &str,
        _resolution: Resolution,
    ) -> Result<(), ApiError> {
        self.enter("generate")
    }

    fn update_caption(&self, image_id: ImageId, caption: &str) -> Result<ImageRecord, ApiError> {
        self.enter("caption")?;
        let mut state = lock(&self.state);
        let row = state
            .server
            .iter_mut()
            .find(|row| row.id == image_id)
            .ok_or_else(|| ApiError::rejected(404, "Image not found"))?;
        row.caption = caption.to_string();
        Ok(row.clone())
    }

    fn regenerate(
        &self,
        image_id: ImageId,
        request: &RegenerateRequest,
    ) -> Result<ImageRecord, ApiError> {
        self.enter("regenerate")?;
        let mut state = lock(&self.state);
        if state.regenerate_as_new {
            let position = state
                .server
                .iter()
                .position(|row| row.id == image_id)
                .ok_or_else(|| ApiError::rejected(404, "Image not found"))?;
            let old = state.server.remove(position);
            let id = state.next_id;
            state.next_id += 1;
            let mut row = record(id, &old.caption);
            row.image_path = format!("https://cdn.test/{id}-from-{image_id}.png");
            state.server.push(row.clone());
            return Ok(row);
        }
        let row = state
            .server
            .iter_mut()
            .find(|row| row.id == image_id)
            .ok_or_else(|| ApiError::rejected(404, "Image not found"))?;
        row.image_path = format!(
            "https://cdn.test/{}-{}.png",
            image_id,
            request.seed.unwrap_or_default()
        );
        Ok(row.clone())
    }

    fn delete_image(&self, image_id: ImageId) -> Result<(), ApiError> {
        self.enter("delete")?;
        let mut state = lock(&self.state);
        let before = state.server.len();
        state.server.retain(|row| row.id != image_id);
        if state.server.len() == before {
            return Err(ApiError::rejected(404, "Image not found"));
        }
        Ok(())
    }
}
