//! Video state records

use serde::de::value::{Error as ValueError, StrDeserializer};
use serde::de::IntoDeserializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Visual state of a tracked item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualState {
    /// Rendered as-is
    #[default]
    Normal,
    /// Rendered with reduced emphasis
    Dimmed,
    /// Not rendered
    Hidden,
}

impl VisualState {
    /// Lowercase name used in logs and fixtures
    pub fn as_str(self) -> &'static str {
        match self {
            VisualState::Normal => "normal",
            VisualState::Dimmed => "dimmed",
            VisualState::Hidden => "hidden",
        }
    }
}

/// Parses the same lowercase names used on the wire
impl FromStr for VisualState {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let de: StrDeserializer<'_, ValueError> = s.into_deserializer();
        Self::deserialize(de)
    }
}

impl fmt::Display for VisualState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote-owned visibility state for one video
///
/// Records are never mutated in place; caches replace them wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStateRecord {
    /// Video identifier
    pub video_id: String,
    /// Desired visual state
    pub state: VisualState,
    /// Title captured when the state was set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Last update (Unix milliseconds), if the writer supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
}

impl VideoStateRecord {
    /// Create a record with an explicit update timestamp
    pub fn new(video_id: impl Into<String>, state: VisualState, updated_at: u64) -> Self {
        Self {
            video_id: video_id.into(),
            state,
            title: None,
            updated_at: Some(updated_at),
        }
    }

    /// Attach a title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}
