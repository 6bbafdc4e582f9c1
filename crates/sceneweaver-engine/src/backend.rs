use std::path::Path;

use anyhow::Context;
use sceneweaver_contracts::errors::ApiError;
use sceneweaver_contracts::images::{ImageId, ImageRecord, Resolution};
use sceneweaver_contracts::storyboards::StoryboardSummary;

/// Everything the client needs from the image backend.
///
/// `list_images` must be safe to call repeatedly. `generate` only queues work; results show up
/// in later `list_images` calls and no job id is handed back.
pub trait StoryboardBackend: Send + Sync {
    fn name(&self) -> &str;
    fn list_images(&self, storyboard_id: i64) -> Result<Vec<ImageRecord>, ApiError>;
    fn generate(
        &self,
        storyboard_id: i64,
        story: &str,
        resolution: Resolution,
    ) -> Result<(), ApiError>;
    fn update_caption(&self, image_id: ImageId, caption: &str) -> Result<ImageRecord, ApiError>;
    fn regenerate(
        &self,
        image_id: ImageId,
        request: &RegenerateRequest,
    ) -> Result<ImageRecord, ApiError>;
    fn delete_image(&self, image_id: ImageId) -> Result<(), ApiError>;
}

/// Storyboard CRUD for the home screen.
pub trait StoryboardCatalog: Send + Sync {
    fn list_storyboards(&self) -> Result<Vec<StoryboardSummary>, ApiError>;
    fn create_storyboard(&self, name: &str) -> Result<StoryboardSummary, ApiError>;
    fn rename_storyboard(&self, id: i64, name: &str) -> Result<StoryboardSummary, ApiError>;
    fn delete_storyboard(&self, id: i64) -> Result<(), ApiError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoseImage {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl PoseImage {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|value| value.to_str())
            .filter(|value| !value.is_empty())
            .unwrap_or("pose.png")
            .to_string();
        Ok(Self {
            file_name,
            mime_type: mime_for_path(path).unwrap_or("image/png").to_string(),
            bytes,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegenerateRequest {
    pub prompt: String,
    pub seed: Option<u64>,
    pub resolution: Resolution,
    pub use_openpose: bool,
    pub pose_image: Option<PoseImage>,
}

impl RegenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Sets the seed from user text; anything but a non-negative integer leaves it to the server.
    pub fn with_seed_text(mut self, raw: &str) -> Self {
        self.seed = parse_seed(raw);
        self
    }
}

pub fn parse_seed(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    trimmed.parse::<u64>().ok()
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}
