use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TrackId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Int(i64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Int(value) => Self(value.to_string()),
            RawId::Text(value) => Self(value),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Public,
}

impl Visibility {
    pub fn from_is_public(is_public: bool) -> Self {
        if is_public {
            Self::Public
        } else {
            Self::Private
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SongScope {
    Private,
    Public,
}

impl SongScope {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Private => "api/songs/private",
            Self::Public => "api/songs/public",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Private => "Your Songs",
            Self::Public => "Public Songs",
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            Self::Private => Self::Public,
            Self::Public => Self::Private,
        }
    }

    fn default_visibility(&self) -> Visibility {
        match self {
            Self::Private => Visibility::Private,
            Self::Public => Visibility::Public,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub audio_url: String,
    pub visibility: Visibility,
    pub owner: Option<String>,
}

impl Track {
    pub fn same_song(&self, other: &Track) -> bool {
        self.id == other.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SongRecord {
    pub id: TrackId,
    pub title: String,
    pub audio_url: String,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub username: Option<String>,
}

impl SongRecord {
    pub fn into_track(self, scope: SongScope) -> Track {
        let visibility = self
            .is_public
            .map(Visibility::from_is_public)
            .unwrap_or_else(|| scope.default_visibility());
        Track {
            id: self.id,
            title: self.title,
            audio_url: self.audio_url,
            visibility,
            owner: self.username,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskStatusResponse {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToggleResponse {
    pub is_public: bool,
}

// Open string set; only `pending` and `complete` mean anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Complete,
    Other(String),
}

impl From<String> for TaskStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pending" => Self::Pending,
            "complete" => Self::Complete,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for TaskStatus {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Complete,
    Failed,
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Generating",
            Self::Complete => "Done",
            Self::Failed => "Failed",
            Self::Unknown => "Submitted",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationJob {
    pub task_id: String,
    pub status: JobStatus,
}

impl GenerationJob {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self { task_id: task_id.into(), status: JobStatus::Unknown }
    }
}
