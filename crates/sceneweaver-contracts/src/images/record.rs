use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Backend-assigned image identifier. Ids grow monotonically, so they double as creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(pub i64);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ImageId {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        raw.trim()
            .parse::<i64>()
            .map(ImageId)
            .map_err(|_| format!("invalid image id '{}'", raw.trim()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: ImageId,
    pub image_path: String,
    pub caption: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storyboard_id: Option<i64>,
}

impl ImageRecord {
    pub fn new(id: i64, image_path: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            id: ImageId(id),
            image_path: image_path.into(),
            caption: caption.into(),
            storyboard_id: None,
        }
    }
}

/// Aspect ratio requested for generated frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Resolution {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
}

impl Resolution {
    pub const ALL: [Resolution; 3] = [
        Resolution::Square,
        Resolution::Landscape,
        Resolution::Portrait,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
        }
    }

    /// Pixel size used for placeholder frames.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Square => (64, 64),
            Self::Landscape => (96, 54),
            Self::Portrait => (54, 96),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "1:1" | "square" => Ok(Self::Square),
            "16:9" | "landscape" => Ok(Self::Landscape),
            "9:16" | "portrait" => Ok(Self::Portrait),
            _ => Err(format!(
                "unsupported resolution '{}' (expected 1:1, 16:9 or 9:16)",
                raw.trim()
            )),
        }
    }
}
