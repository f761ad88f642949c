use crate::assign::{Assigner, Encoded};
use crate::config::Config;
use crate::playback::{EngineSlot, PlaybackError, PlaybackEvent};
use crate::state::{SamplerState, clamp_volume};
use padbank_decode::AudioFile;
use padbank_project::{
    FileStore, KeyValueStore, Persistence, Sample, SampleId, SaveOutcome, Tab, TabId,
};
use padbank_transport::VoiceId;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const MIB: u64 = 1024 * 1024;

/// A user action the store refused. Nothing was changed.
#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("'{name}' is too large: files must be under {} MB", .limit / MIB)]
    FileTooLarge { name: String, size: u64, limit: u64 },

    #[error("cannot remove the last tab")]
    LastTab,

    #[error("no tab with id '{0}'")]
    UnknownTab(TabId),

    #[error("tab '{tab}' has no pad '{sample}'")]
    UnknownSample { tab: TabId, sample: SampleId },

    #[error("failed to start encoder: {0}")]
    Spawn(#[from] std::io::Error),
}

/// The soundboard's state and everything that mutates it.
///
/// Each mutation writes the durable part of the state through the
/// persistence layer. Persistence and playback failures are logged and never
/// returned; only rejected user actions produce a [`SamplerError`].
pub struct SamplerStore<S: KeyValueStore> {
    state: Arc<SamplerState>,
    persistence: Persistence<S>,
    storage_key: String,
    max_sample_bytes: u64,
    engine: EngineSlot,
    current: Option<VoiceId>,
    next_voice: u64,
    assigner: Assigner,
}

impl SamplerStore<FileStore> {
    /// Open the store described by `config`, playing through the default
    /// audio output.
    pub fn from_config(config: &Config) -> Self {
        let store = FileStore::new(config.storage_dir()).with_quota(config.storage_quota_bytes);
        log::info!("sampler storage at {}", store.root().display());
        let persistence = Persistence::new(store).with_ceiling(config.storage_ceiling_bytes);

        Self::open(persistence, config.storage_key.clone(), EngineSlot::default_output())
            .with_max_sample_bytes(config.max_sample_bytes)
    }
}

impl<S: KeyValueStore> SamplerStore<S> {
    /// Load the state saved under `storage_key`, or start fresh.
    pub fn open(persistence: Persistence<S>, storage_key: impl Into<String>, engine: EngineSlot) -> Self {
        let storage_key = storage_key.into();
        let state = persistence
            .load(&storage_key)
            .map(SamplerState::from_persisted)
            .unwrap_or_else(SamplerState::initial);

        Self {
            state: Arc::new(state),
            persistence,
            storage_key,
            max_sample_bytes: Config::default().max_sample_bytes,
            engine,
            current: None,
            next_voice: 0,
            assigner: Assigner::new(),
        }
    }

    pub fn with_max_sample_bytes(mut self, limit: u64) -> Self {
        self.max_sample_bytes = limit;
        self
    }

    /// Snapshot of the current state. Later mutations do not affect it.
    pub fn state(&self) -> Arc<SamplerState> {
        Arc::clone(&self.state)
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.state.tabs
    }

    pub fn active_tab_id(&self) -> &TabId {
        &self.state.active_tab_id
    }

    pub fn active_tab(&self) -> Option<&Tab> {
        self.state.active_tab()
    }

    pub fn volume(&self) -> f32 {
        self.state.volume
    }

    /// The voice currently tracked for `stop`, if any.
    pub fn current_playback(&self) -> Option<VoiceId> {
        self.current
    }

    pub fn pending_assignments(&self) -> usize {
        self.assigner.pending()
    }

    pub fn persistence(&self) -> &Persistence<S> {
        &self.persistence
    }

    fn state_mut(&mut self) -> &mut SamplerState {
        Arc::make_mut(&mut self.state)
    }

    fn persist(&mut self) -> SaveOutcome {
        let snapshot = self.state.to_persisted();
        let outcome = self
            .persistence
            .save(&self.storage_key, &snapshot, &self.state.active_tab_id);
        log::debug!("saved state: {outcome:?}");
        outcome
    }

    fn unused_tab_id(&self) -> TabId {
        let mut stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        loop {
            let id = TabId(format!("tab-{stamp}"));
            if self.state.tab(&id).is_none() {
                return id;
            }
            stamp += 1;
        }
    }

    /// Append a new bank of empty pads.
    pub fn add_tab(&mut self, name: impl Into<String>) -> TabId {
        let id = self.unused_tab_id();
        self.state_mut().tabs.push(Tab::new(id.clone(), name));
        self.persist();
        id
    }

    /// Append a bank named after its position, e.g. "Bank 3".
    pub fn add_default_tab(&mut self) -> TabId {
        let name = format!("Bank {}", self.state.tabs.len() + 1);
        self.add_tab(name)
    }

    pub fn remove_tab(&mut self, id: &TabId) -> Result<(), SamplerError> {
        if self.state.tab(id).is_none() {
            return Err(SamplerError::UnknownTab(id.clone()));
        }
        if self.state.tabs.len() <= 1 {
            log::warn!("refusing to remove the last tab");
            return Err(SamplerError::LastTab);
        }

        let state = self.state_mut();
        state.tabs.retain(|t| &t.id != id);
        if &state.active_tab_id == id {
            state.active_tab_id = state.tabs[0].id.clone();
        }

        self.persist();
        Ok(())
    }

    /// Switch the visible bank. Session-only, so nothing is saved.
    pub fn set_active_tab(&mut self, id: &TabId) -> Result<(), SamplerError> {
        if self.state.tab(id).is_none() {
            return Err(SamplerError::UnknownTab(id.clone()));
        }
        self.state_mut().active_tab_id = id.clone();
        Ok(())
    }

    pub fn rename_tab(&mut self, id: &TabId, name: impl Into<String>) -> Result<(), SamplerError> {
        let tab = self
            .state_mut()
            .tab_mut(id)
            .ok_or_else(|| SamplerError::UnknownTab(id.clone()))?;
        tab.name = name.into();
        self.persist();
        Ok(())
    }

    /// Set the master volume, clamped to `[0, 1]`, and apply it to the sound
    /// that is playing.
    pub fn set_volume(&mut self, volume: f32) {
        let volume = clamp_volume(volume);
        self.state_mut().volume = volume;

        if let (Some(voice), Some(backend)) = (self.current, self.engine.started()) {
            backend.set_volume(voice, volume);
        }
        self.persist();
    }

    /// Assign an audio file to a pad.
    ///
    /// The file is encoded on a worker thread; [`poll`](Self::poll) or
    /// [`wait_for_assignments`](Self::wait_for_assignments) commits the
    /// result. If the same pad is assigned again before that, only the newest
    /// file is kept.
    pub fn assign_sample(
        &mut self,
        tab_id: &TabId,
        sample_id: &SampleId,
        file: AudioFile,
    ) -> Result<(), SamplerError> {
        let size = file.len() as u64;
        if size > self.max_sample_bytes {
            log::warn!(
                "rejecting '{}' ({size} bytes, limit {})",
                file.name,
                self.max_sample_bytes
            );
            return Err(SamplerError::FileTooLarge {
                name: file.name,
                size,
                limit: self.max_sample_bytes,
            });
        }

        let tab = self
            .state
            .tab(tab_id)
            .ok_or_else(|| SamplerError::UnknownTab(tab_id.clone()))?;
        if tab.sample(sample_id).is_none() {
            return Err(SamplerError::UnknownSample {
                tab: tab_id.clone(),
                sample: sample_id.clone(),
            });
        }

        let version = self
            .assigner
            .submit(tab_id.clone(), sample_id.clone(), file)?;
        log::debug!("encoding assignment v{version} for {tab_id}/{sample_id}");
        Ok(())
    }

    fn commit(&mut self, encoded: Encoded) -> bool {
        if !self.assigner.is_current(&encoded) {
            log::debug!(
                "dropping superseded assignment v{} for {}/{}",
                encoded.version,
                encoded.tab_id,
                encoded.sample_id
            );
            return false;
        }

        let Some(sample) = self
            .state_mut()
            .tab_mut(&encoded.tab_id)
            .and_then(|tab| tab.sample_mut(&encoded.sample_id))
        else {
            log::debug!("pad {}/{} no longer exists", encoded.tab_id, encoded.sample_id);
            return false;
        };

        sample.name = encoded.name;
        sample.url = encoded.url;
        sample.data = Some(encoded.data);
        self.persist();
        true
    }

    /// Apply finished assignments and drain playback events. Returns the
    /// number of assignments committed.
    pub fn poll(&mut self) -> usize {
        let mut committed = 0;
        while let Some(encoded) = self.assigner.try_recv() {
            if self.commit(encoded) {
                committed += 1;
            }
        }
        self.poll_playback();
        committed
    }

    /// Block until every outstanding assignment has been applied or
    /// `timeout` passes. Returns the number committed.
    pub fn wait_for_assignments(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut committed = 0;

        while self.assigner.pending() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let Some(encoded) = self.assigner.recv_timeout(remaining) else {
                break;
            };
            if self.commit(encoded) {
                committed += 1;
            }
        }
        committed
    }

    fn poll_playback(&mut self) {
        let Some(backend) = self.engine.started() else {
            return;
        };

        for event in backend.poll_events() {
            match event {
                PlaybackEvent::Started(voice) => log::debug!("voice {voice:?} started"),
                PlaybackEvent::Finished(voice) => {
                    if self.current == Some(voice) {
                        self.current = None;
                    }
                }
                PlaybackEvent::Failed(voice, err) => {
                    if !err.is_interruption() {
                        log::warn!("audio playback failed: {err}");
                    }
                    if self.current == Some(voice) {
                        self.current = None;
                    }
                }
            }
        }
    }

    /// Play the pad's sample, replacing whatever is playing.
    pub fn play(&mut self, tab_id: &TabId, sample_id: &SampleId) {
        let Some(sample) = self.state.sample(tab_id, sample_id).cloned() else {
            log::debug!("play: no pad {tab_id}/{sample_id}");
            return;
        };
        self.play_sample(&sample);
    }

    /// Play `sample`. Does nothing when it has no payload.
    pub fn play_sample(&mut self, sample: &Sample) {
        let Some(payload) = sample.payload() else {
            return;
        };

        self.stop();

        if let Err(err) = self.start_voice(payload) {
            if !err.is_interruption() {
                log::warn!("audio initialization failed: {err}");
            }
        }
    }

    fn start_voice(&mut self, payload: &str) -> Result<(), PlaybackError> {
        let audio = padbank_decode::decode_payload(payload)
            .map_err(|e| PlaybackError::Decode(e.to_string()))?;

        let backend = self.engine.get()?;
        let audio = match backend.sample_rate() {
            Some(rate) => audio
                .resample(rate)
                .map_err(|e| PlaybackError::Decode(e.to_string()))?,
            None => audio,
        };

        self.next_voice += 1;
        let voice = VoiceId(self.next_voice);
        log::debug!("starting voice {voice:?} ({:.2?})", audio.duration());
        backend.start(voice, audio, self.state.volume)?;
        self.current = Some(voice);
        Ok(())
    }

    /// Stop the tracked sound, if any, and forget it.
    pub fn stop(&mut self) {
        if let Some(voice) = self.current.take() {
            if let Some(backend) = self.engine.started() {
                backend.stop(voice);
            }
        }
    }
}
