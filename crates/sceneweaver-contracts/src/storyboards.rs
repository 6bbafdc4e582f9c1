use serde::{Deserialize, Serialize};

use crate::errors::ApiError;

/// A storyboard as listed on the home screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryboardSummary {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub thumbnail: String,
}

pub fn validate_storyboard_name(name: &str) -> Result<String, ApiError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation("Storyboard name cannot be empty"));
    }
    Ok(trimmed.to_string())
}
