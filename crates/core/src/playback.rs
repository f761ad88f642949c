//! Playback seam between the store and an audio output.
//!
//! The store talks to a [`PlaybackBackend`]. The real one wraps the cpal
//! engine; tests substitute their own. The backend lives in an
//! [`EngineSlot`] owned by the store and is built the first time something
//! needs to play.

use padbank_engine::AudioEngineHandle;
use padbank_transport::{AudioArc, Status, VoiceId};

#[derive(Debug, Clone, thiserror::Error)]
pub enum PlaybackError {
    #[error("failed to decode sample: {0}")]
    Decode(String),

    #[error("audio device error: {0}")]
    Device(String),

    /// A newer playback replaced this one before it started.
    #[error("playback interrupted")]
    Interrupted,
}

impl PlaybackError {
    /// Interruptions are expected whenever pads are triggered in quick
    /// succession and are not worth reporting.
    pub fn is_interruption(&self) -> bool {
        matches!(self, PlaybackError::Interrupted)
    }
}

#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    Started(VoiceId),
    Finished(VoiceId),
    Failed(VoiceId, PlaybackError),
}

pub trait PlaybackBackend {
    /// Begin playing `audio` at `volume` under `voice`.
    fn start(&mut self, voice: VoiceId, audio: AudioArc, volume: f32) -> Result<(), PlaybackError>;

    /// Halt `voice` and rewind it. Its buffer may be released later.
    fn stop(&mut self, voice: VoiceId);

    fn set_volume(&mut self, voice: VoiceId, volume: f32);

    /// Sample rate buffers should be converted to before `start`.
    fn sample_rate(&self) -> Option<u32> {
        None
    }

    /// Drain events produced since the last call.
    fn poll_events(&mut self) -> Vec<PlaybackEvent> {
        Vec::new()
    }
}

/// Backend driving the cpal output stream.
pub struct EngineBackend {
    engine: AudioEngineHandle,
}

impl EngineBackend {
    pub fn start_default() -> anyhow::Result<Self> {
        Ok(Self {
            engine: padbank_engine::start()?,
        })
    }
}

impl PlaybackBackend for EngineBackend {
    fn start(&mut self, voice: VoiceId, audio: AudioArc, volume: f32) -> Result<(), PlaybackError> {
        self.engine
            .play(voice, audio, volume)
            .map_err(|e| PlaybackError::Device(e.to_string()))
    }

    // The audio thread drops the buffer on its next callback; `poll_events`
    // frees it.
    fn stop(&mut self, voice: VoiceId) {
        self.engine.stop(voice);
    }

    fn set_volume(&mut self, voice: VoiceId, volume: f32) {
        self.engine.set_gain(voice, volume);
    }

    fn sample_rate(&self) -> Option<u32> {
        Some(self.engine.sample_rate)
    }

    fn poll_events(&mut self) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        while let Ok(status) = self.engine.status.pop() {
            events.push(match status {
                Status::Started(voice) => PlaybackEvent::Started(voice),
                Status::Finished(voice) => PlaybackEvent::Finished(voice),
                Status::Interrupted(voice) => {
                    PlaybackEvent::Failed(voice, PlaybackError::Interrupted)
                }
            });
        }
        self.engine.collect();
        events
    }
}

pub type BackendFactory = Box<dyn FnMut() -> anyhow::Result<Box<dyn PlaybackBackend>>>;

/// Owns the playback backend and builds it on first use.
///
/// Once a backend has been built it is kept for the lifetime of the slot.
/// A failed build is reported and retried on the next request.
pub struct EngineSlot {
    factory: BackendFactory,
    backend: Option<Box<dyn PlaybackBackend>>,
}

impl EngineSlot {
    pub fn new(factory: BackendFactory) -> Self {
        Self {
            factory,
            backend: None,
        }
    }

    /// Slot that opens the default audio output.
    pub fn default_output() -> Self {
        Self::new(Box::new(|| {
            let backend: Box<dyn PlaybackBackend> = Box::new(EngineBackend::start_default()?);
            Ok(backend)
        }))
    }

    pub fn is_started(&self) -> bool {
        self.backend.is_some()
    }

    /// The backend, building it if this is the first request.
    pub fn get(&mut self) -> Result<&mut (dyn PlaybackBackend + 'static), PlaybackError> {
        let backend = match self.backend.take() {
            Some(backend) => backend,
            None => {
                log::debug!("starting playback backend");
                (self.factory)().map_err(|e| PlaybackError::Device(e.to_string()))?
            }
        };
        Ok(self.backend.insert(backend).as_mut())
    }

    /// The backend, only if it has already been built.
    pub fn started(&mut self) -> Option<&mut (dyn PlaybackBackend + 'static)> {
        self.backend.as_deref_mut()
    }
}
