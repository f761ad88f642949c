mod persist;
mod store;
mod trim;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use persist::{Persistence, SaveOutcome};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
pub use trim::{TrimReport, estimate_size, trim};

/// Number of pads in every tab.
pub const PADS_PER_TAB: usize = 12;

/// Soft ceiling on the serialized size of a persisted snapshot.
pub const STORAGE_CEILING: usize = 25 * 1024 * 1024;

/// Version written into every envelope.
pub const SNAPSHOT_VERSION: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleId(pub String);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TabId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for SampleId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// One pad's assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: SampleId,
    pub name: String,
    /// Transient playable reference, empty while the pad is unassigned.
    #[serde(default)]
    pub url: String,
    /// Encoded audio payload. In memory this is a full data URL; on disk it is
    /// the bare base64 form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Media type of `data` when it is not the default. Only set on disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl Sample {
    /// Placeholder for pad `index`.
    pub fn placeholder(index: usize) -> Self {
        Self {
            id: SampleId(format!("sample-{index}")),
            name: format!("Sample {}", index + 1),
            url: String::new(),
            data: None,
            format: None,
        }
    }

    /// The payload, if the pad has one. Empty strings count as no payload.
    pub fn payload(&self) -> Option<&str> {
        self.data.as_deref().filter(|data| !data.is_empty())
    }

    pub fn is_assigned(&self) -> bool {
        self.payload().is_some()
    }
}

/// A bank of pads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tab {
    pub id: TabId,
    pub name: String,
    pub samples: Vec<Sample>,
}

impl Tab {
    /// A tab with a full grid of placeholder samples.
    pub fn new(id: TabId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            samples: (0..PADS_PER_TAB).map(Sample::placeholder).collect(),
        }
    }

    pub fn sample(&self, id: &SampleId) -> Option<&Sample> {
        self.samples.iter().find(|s| &s.id == id)
    }

    pub fn sample_mut(&mut self, id: &SampleId) -> Option<&mut Sample> {
        self.samples.iter_mut().find(|s| &s.id == id)
    }
}

/// The durable part of the application state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub tabs: Vec<Tab>,
    pub volume: f32,
}

/// On-disk wrapper: `{"state": {...}, "version": 0}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub state: PersistedState,
    #[serde(default)]
    pub version: u32,
}

impl Envelope {
    pub fn new(state: PersistedState) -> Self {
        Self {
            state,
            version: SNAPSHOT_VERSION,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
