use std::collections::VecDeque;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Context;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use sceneweaver_contracts::errors::ApiError;
use sceneweaver_contracts::events::timestamp_now;
use sceneweaver_contracts::images::{ImageId, ImageRecord, Resolution};
use sceneweaver_contracts::session::split_sentences;
use sceneweaver_contracts::storyboards::{validate_storyboard_name, StoryboardSummary};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::backend::{RegenerateRequest, StoryboardBackend, StoryboardCatalog};
use crate::lock;

/// Offline backend that behaves like the real one from the client's point of view.
///
/// `generate` queues one frame per sentence; each `list_images` call releases up to
/// `release_per_poll` queued frames, so a session sees its progress advance poll by poll.
/// Frames are tiny solid-color PNGs (color hashed from caption and seed) embedded as
/// `data:` URIs.
///
/// A backend opened with [`DryrunBackend::open`] keeps its state in a JSON file and rewrites it
/// after every call that changes something, so separate processes share one fake server.
pub struct DryrunBackend {
    state: Mutex<DryrunState>,
    release_per_poll: usize,
    list_calls: AtomicUsize,
    state_path: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct DryrunState {
    next_image_id: i64,
    next_storyboard_id: i64,
    next_seed: u64,
    released: Vec<ImageRecord>,
    pending: VecDeque<ImageRecord>,
    storyboards: Vec<StoryboardSummary>,
}

impl Default for DryrunBackend {
    fn default() -> Self {
        Self::new(1)
    }
}

impl DryrunBackend {
    pub fn new(release_per_poll: usize) -> Self {
        Self {
            state: Mutex::new(DryrunState {
                next_image_id: 1,
                next_storyboard_id: 1,
                ..DryrunState::default()
            }),
            release_per_poll: release_per_poll.max(1),
            list_calls: AtomicUsize::new(0),
            state_path: None,
        }
    }

    /// Loads state saved at `path` by an earlier run, or starts empty when the file is missing.
    pub fn open(path: impl Into<PathBuf>, release_per_poll: usize) -> anyhow::Result<Self> {
        let path = path.into();
        let mut backend = Self::new(release_per_poll);
        if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed reading {}", path.display()))?;
            let state: DryrunState = serde_json::from_str(&raw)
                .with_context(|| format!("failed parsing dryrun state {}", path.display()))?;
            backend.state = Mutex::new(state.normalized());
        }
        backend.state_path = Some(path);
        Ok(backend)
    }

    pub fn state_path(&self) -> Option<&Path> {
        self.state_path.as_deref()
    }

    /// Seeds already-generated frames for `storyboard_id`, one per caption.
    pub fn preload(&self, storyboard_id: i64, captions: &[&str]) -> Vec<ImageRecord> {
        let mut state = lock(&self.state);
        let mut created = Vec::new();
        for caption in captions {
            let record = state.new_record(storyboard_id, caption, Resolution::Square);
            state.released.push(record.clone());
            created.push(record);
        }
        created
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> usize {
        lock(&self.state).pending.len()
    }
}

impl DryrunState {
    /// Repairs counters a hand-edited or truncated state file may carry.
    fn normalized(mut self) -> Self {
        let max_image = self
            .released
            .iter()
            .chain(self.pending.iter())
            .map(|record| record.id.0)
            .max()
            .unwrap_or(0);
        let max_board = self.storyboards.iter().map(|board| board.id).max().unwrap_or(0);
        self.next_image_id = self.next_image_id.max(max_image + 1);
        self.next_storyboard_id = self.next_storyboard_id.max(max_board + 1);
        self
    }

    fn save(&self, path: Option<&Path>) -> Result<(), ApiError> {
        let Some(path) = path else {
            return Ok(());
        };
        write_state(path, self)
            .map_err(|err| ApiError::transport(format!("Failed saving dryrun state: {err:#}")))
    }

    fn new_record(&mut self, storyboard_id: i64, caption: &str, resolution: Resolution) -> ImageRecord {
        let id = self.next_image_id;
        self.next_image_id += 1;
        let seed = self.take_seed();
        ImageRecord {
            id: ImageId(id),
            image_path: placeholder_uri(caption, seed, resolution),
            caption: caption.to_string(),
            storyboard_id: Some(storyboard_id),
        }
    }

    fn take_seed(&mut self) -> u64 {
        self.next_seed += 1;
        self.next_seed
    }

    fn find_mut(&mut self, image_id: ImageId) -> Result<&mut ImageRecord, ApiError> {
        self.released
            .iter_mut()
            .find(|record| record.id == image_id)
            .ok_or_else(|| not_found("Image not found"))
    }
}

impl StoryboardBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn list_images(&self, storyboard_id: i64) -> Result<Vec<ImageRecord>, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.state);
        let mut released = 0;
        let mut kept = VecDeque::new();
        while let Some(record) = state.pending.pop_front() {
            if released < self.release_per_poll && record.storyboard_id == Some(storyboard_id) {
                state.released.push(record);
                released += 1;
            } else {
                kept.push_back(record);
            }
        }
        state.pending = kept;
        if released > 0 {
            state.save(self.state_path())?;
        }

        // newest first: arrival order is not id order
        Ok(state
            .released
            .iter()
            .rev()
            .filter(|record| record.storyboard_id == Some(storyboard_id))
            .cloned()
            .collect())
    }

    fn generate(
        &self,
        storyboard_id: i64,
        story: &str,
        resolution: Resolution,
    ) -> Result<(), ApiError> {
        let mut sentences = split_sentences(story);
        if sentences.is_empty() {
            let trimmed = story.trim();
            if trimmed.is_empty() {
                return Err(ApiError::rejected(422, "Story cannot be empty"));
            }
            sentences.push(trimmed.to_string());
        }
        let mut state = lock(&self.state);
        for sentence in sentences {
            let record = state.new_record(storyboard_id, &sentence, resolution);
            state.pending.push_back(record);
        }
        state.save(self.state_path())
    }

    fn update_caption(&self, image_id: ImageId, caption: &str) -> Result<ImageRecord, ApiError> {
        let mut state = lock(&self.state);
        let record = state.find_mut(image_id)?;
        record.caption = caption.to_string();
        let updated = record.clone();
        state.save(self.state_path())?;
        Ok(updated)
    }

    fn regenerate(
        &self,
        image_id: ImageId,
        request: &RegenerateRequest,
    ) -> Result<ImageRecord, ApiError> {
        let mut state = lock(&self.state);
        let seed = match request.seed {
            Some(seed) => seed,
            None => state.take_seed(),
        };
        let record = state.find_mut(image_id)?;
        record.image_path = placeholder_uri(&request.prompt, seed, request.resolution);
        let updated = record.clone();
        state.save(self.state_path())?;
        Ok(updated)
    }

    fn delete_image(&self, image_id: ImageId) -> Result<(), ApiError> {
        let mut state = lock(&self.state);
        let before = state.released.len();
        state.released.retain(|record| record.id != image_id);
        if state.released.len() == before {
            return Err(not_found("Image not found"));
        }
        state.save(self.state_path())
    }
}

impl StoryboardCatalog for DryrunBackend {
    fn list_storyboards(&self) -> Result<Vec<StoryboardSummary>, ApiError> {
        Ok(lock(&self.state).storyboards.clone())
    }

    fn create_storyboard(&self, name: &str) -> Result<StoryboardSummary, ApiError> {
        let name = validate_storyboard_name(name)?;
        let mut state = lock(&self.state);
        if state.storyboards.iter().any(|board| board.name == name) {
            return Err(ApiError::from_response(
                400,
                &json!({"detail": "Storyboard with this name already exists"}).to_string(),
            ));
        }
        let id = state.next_storyboard_id;
        state.next_storyboard_id += 1;
        let now = timestamp_now();
        let summary = StoryboardSummary {
            id,
            name,
            owner_id: 1,
            created_at: Some(now.clone()),
            updated_at: Some(now),
            thumbnail: String::new(),
        };
        state.storyboards.push(summary.clone());
        state.save(self.state_path())?;
        Ok(summary)
    }

    fn rename_storyboard(&self, id: i64, name: &str) -> Result<StoryboardSummary, ApiError> {
        let name = validate_storyboard_name(name)?;
        let mut state = lock(&self.state);
        let board = state
            .storyboards
            .iter_mut()
            .find(|board| board.id == id)
            .ok_or_else(|| not_found("Storyboard not found or not owned by user"))?;
        board.name = name;
        board.updated_at = Some(timestamp_now());
        let renamed = board.clone();
        state.save(self.state_path())?;
        Ok(renamed)
    }

    fn delete_storyboard(&self, id: i64) -> Result<(), ApiError> {
        let mut state = lock(&self.state);
        let before = state.storyboards.len();
        state.storyboards.retain(|board| board.id != id);
        if state.storyboards.len() == before {
            return Err(not_found("Storyboard not found or not owned by user"));
        }
        state
            .released
            .retain(|record| record.storyboard_id != Some(id));
        state
            .pending
            .retain(|record| record.storyboard_id != Some(id));
        state.save(self.state_path())
    }
}

fn not_found(detail: &str) -> ApiError {
    ApiError::from_response(404, &json!({ "detail": detail }).to_string())
}

fn placeholder_uri(prompt: &str, seed: u64, resolution: Resolution) -> String {
    let (width, height) = resolution.dimensions();
    let color = placeholder_color(prompt, seed);
    let frame = RgbImage::from_pixel(width, height, color);
    let mut bytes = Vec::new();
    match DynamicImage::ImageRgb8(frame).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
    {
        Ok(()) => format!("data:image/png;base64,{}", BASE64.encode(&bytes)),
        Err(_) => {
            let Rgb([r, g, b]) = color;
            format!("dryrun://{seed}-{r:02x}{g:02x}{b:02x}.png")
        }
    }
}

/// Same prompt and seed always give the same color, so a reused seed is visible in the frame.
fn placeholder_color(prompt: &str, seed: u64) -> Rgb<u8> {
    let digest = Sha256::new()
        .chain_update(seed.to_le_bytes())
        .chain_update(prompt.trim().as_bytes())
        .finalize();
    Rgb([digest[0], digest[1], digest[2]])
}

fn write_state(path: &Path, state: &DryrunState) -> anyhow::Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let encoded = serde_json::to_string_pretty(state)?;
    let staged = path.with_extension("json.tmp");
    fs::write(&staged, encoded)?;
    fs::rename(&staged, path)?;
    Ok(())
}
