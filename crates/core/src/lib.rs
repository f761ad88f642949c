mod assign;
pub mod config;
pub mod playback;
pub mod state;
mod store;

pub use config::Config;
pub use playback::{BackendFactory, EngineBackend, EngineSlot, PlaybackBackend, PlaybackError, PlaybackEvent};
pub use state::SamplerState;
pub use store::{SamplerError, SamplerStore};

pub use padbank_decode::{AudioFile, codec, decode_file, decode_payload};
pub use padbank_project::{
    FileStore, KeyValueStore, MemoryStore, PADS_PER_TAB, PersistedState, Persistence, Sample,
    SampleId, SaveOutcome, Tab, TabId,
};
pub use padbank_transport::{AudioArc, VoiceId};
