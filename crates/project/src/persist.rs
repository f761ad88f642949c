use crate::store::KeyValueStore;
use crate::trim::trim;
use crate::{Envelope, PersistError, PersistedState, STORAGE_CEILING, TabId};
use padbank_decode::codec;

/// What a save attempt ended up writing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The (possibly trimmed) snapshot was written.
    Written { evicted: Vec<TabId> },
    /// The store rejected the full snapshot; it was cleared and only `kept`
    /// was written.
    WrittenReduced { kept: TabId },
    /// Nothing was written. The cause has been logged.
    Failed,
}

/// Reads and writes [`PersistedState`] through a [`KeyValueStore`].
///
/// Payloads are stored bare and restored to data URLs on load. Neither
/// `load` nor `save` report errors to the caller: a failed load behaves like
/// an empty store and a failed save leaves the previous durable state in
/// place.
#[derive(Debug)]
pub struct Persistence<S> {
    store: S,
    ceiling: usize,
}

impl<S: KeyValueStore> Persistence<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            ceiling: STORAGE_CEILING,
        }
    }

    pub fn with_ceiling(mut self, ceiling: usize) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn load(&self, key: &str) -> Option<PersistedState> {
        match self.try_load(key) {
            Ok(state) => state,
            Err(e) => {
                log::warn!("error reading '{key}' from storage, using initial state: {e}");
                None
            }
        }
    }

    fn try_load(&self, key: &str) -> Result<Option<PersistedState>, PersistError> {
        let Some(bytes) = self.store.get(key)? else {
            return Ok(None);
        };

        let envelope: Envelope = serde_json::from_slice(&bytes)?;
        let mut state = envelope.state;
        decode_payloads(&mut state);

        log::debug!("loaded {} tabs from '{key}'", state.tabs.len());
        Ok(Some(state))
    }

    /// Write `state` under `key`.
    ///
    /// `active_tab_id` picks the tab kept by the reduced write when the store
    /// rejects the full snapshot. If trimming evicted that tab, the first
    /// surviving tab is kept instead.
    pub fn save(&mut self, key: &str, state: &PersistedState, active_tab_id: &TabId) -> SaveOutcome {
        match self.try_save(key, state, active_tab_id) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("storage operation failed: {e}");
                SaveOutcome::Failed
            }
        }
    }

    fn try_save(
        &mut self,
        key: &str,
        state: &PersistedState,
        active_tab_id: &TabId,
    ) -> Result<SaveOutcome, PersistError> {
        let mut encoded = state.clone();
        encode_payloads(&mut encoded);
        let mut envelope = Envelope::new(encoded);

        let report = trim(&mut envelope, self.ceiling)?;
        if !report.evicted.is_empty() {
            log::info!(
                "evicted {} tab(s) to fit {} byte ceiling: {:?}",
                report.evicted.len(),
                self.ceiling,
                report.evicted
            );
        }

        let bytes = serde_json::to_vec(&envelope)?;
        let err = match self.store.set(key, &bytes) {
            Ok(()) => {
                return Ok(SaveOutcome::Written {
                    evicted: report.evicted,
                });
            }
            Err(err) => err,
        };

        let Some(first) = envelope.state.tabs.first() else {
            return Err(err.into());
        };
        log::warn!("storage rejected write ({err}), retrying with only the active tab");

        let kept = if envelope.state.tabs.iter().any(|t| &t.id == active_tab_id) {
            active_tab_id.clone()
        } else {
            first.id.clone()
        };
        envelope.state.tabs.retain(|t| t.id == kept);

        let reduced = serde_json::to_vec(&envelope)?;
        self.store.clear_all()?;
        self.store.set(key, &reduced)?;

        Ok(SaveOutcome::WrittenReduced { kept })
    }
}

fn encode_payloads(state: &mut PersistedState) {
    for sample in state.tabs.iter_mut().flat_map(|t| t.samples.iter_mut()) {
        let Some(data) = sample.payload() else {
            sample.data = None;
            continue;
        };

        let format = codec::media_type(data)
            .filter(|_| data.starts_with(codec::AUDIO_MARKER))
            .filter(|media_type| *media_type != codec::DEFAULT_MEDIA_TYPE)
            .map(str::to_string);
        let bare = codec::encode(data);

        sample.format = format;
        sample.data = Some(bare);
    }
}

fn decode_payloads(state: &mut PersistedState) {
    for sample in state.tabs.iter_mut().flat_map(|t| t.samples.iter_mut()) {
        let format = sample.format.take();
        sample.data = sample.payload().map(|data| {
            codec::decode_as(data, format.as_deref().unwrap_or(codec::DEFAULT_MEDIA_TYPE))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileStore, MemoryStore, StoreError};
    use crate::trim::estimate_size;
    use crate::{PersistedState, Tab};
    use tempfile::tempdir;

    const KEY: &str = "sampler-storage";

    fn tab_with_payload(id: &str, payload_len: usize) -> Tab {
        let mut tab = Tab::new(TabId::from(id), id);
        tab.samples[0].name = format!("{id}.mp3");
        tab.samples[0].url = format!("memory:{id}.mp3");
        tab.samples[0].data = Some(format!("data:audio/mpeg;base64,{}", "A".repeat(payload_len)));
        tab
    }

    fn state(tabs: Vec<Tab>) -> PersistedState {
        PersistedState { tabs, volume: 0.75 }
    }

    fn stored_envelope<S: KeyValueStore>(persistence: &Persistence<S>) -> Envelope {
        let bytes = persistence.store().get(KEY).unwrap().expect("stored value");
        serde_json::from_slice(&bytes).expect("valid envelope")
    }

    /// Store whose writes always fail.
    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(None)
        }

        fn set(&mut self, _key: &str, _value: &[u8]) -> Result<(), StoreError> {
            Err(StoreError::QuotaExceeded { needed: 1, quota: 0 })
        }

        fn clear_all(&mut self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn test_load_missing_key() {
        let persistence = Persistence::new(MemoryStore::new());
        assert_eq!(persistence.load(KEY), None);
    }

    #[test]
    fn test_load_corrupt_value_fails_soft() {
        let mut store = MemoryStore::new();
        store.set(KEY, b"not json at all").unwrap();
        let persistence = Persistence::new(store);

        assert_eq!(persistence.load(KEY), None);
    }

    #[test]
    fn test_load_wrong_shape_fails_soft() {
        let mut store = MemoryStore::new();
        store.set(KEY, br#"{"state":{"tabs":"nope"}}"#).unwrap();
        let persistence = Persistence::new(store);

        assert_eq!(persistence.load(KEY), None);
    }

    #[test]
    fn test_save_stores_bare_payload() {
        let mut persistence = Persistence::new(MemoryStore::new());
        let original = state(vec![tab_with_payload("a", 8)]);

        let outcome = persistence.save(KEY, &original, &TabId::from("a"));

        assert_eq!(outcome, SaveOutcome::Written { evicted: vec![] });
        let stored = stored_envelope(&persistence);
        assert_eq!(stored.version, 0);
        assert_eq!(stored.state.tabs[0].samples[0].data.as_deref(), Some("AAAAAAAA"));
        assert_eq!(stored.state.tabs[0].samples[0].format, None);
        assert_eq!(stored.state.tabs[0].samples[1].data, None);
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let mut persistence = Persistence::new(MemoryStore::new());
        let original = state(vec![tab_with_payload("a", 8), tab_with_payload("b", 4)]);

        persistence.save(KEY, &original, &TabId::from("a"));

        assert_eq!(persistence.load(KEY), Some(original));
    }

    #[test]
    fn test_non_default_format_survives_roundtrip() {
        let mut persistence = Persistence::new(MemoryStore::new());
        let mut tab = Tab::new(TabId::from("a"), "A");
        tab.samples[3].data = Some("data:audio/wav;base64,UklGRg==".to_string());
        let original = state(vec![tab]);

        persistence.save(KEY, &original, &TabId::from("a"));

        let stored = stored_envelope(&persistence);
        assert_eq!(stored.state.tabs[0].samples[3].data.as_deref(), Some("UklGRg=="));
        assert_eq!(stored.state.tabs[0].samples[3].format.as_deref(), Some("audio/wav"));
        assert_eq!(persistence.load(KEY), Some(original));
    }

    #[test]
    fn test_load_legacy_bare_payload_gets_default_prefix() {
        let mut store = MemoryStore::new();
        store
            .set(
                KEY,
                br#"{"state":{"tabs":[{"id":"tab-1","name":"Bank 1","samples":[{"id":"sample-0","name":"x.mp3","url":"blob:x","data":"SUQz"},{"id":"sample-1","name":"Sample 2","url":"","data":""}]}],"volume":0.3},"version":0}"#,
            )
            .unwrap();
        let persistence = Persistence::new(store);

        let loaded = persistence.load(KEY).expect("state");

        let samples = &loaded.tabs[0].samples;
        assert_eq!(samples[0].data.as_deref(), Some("data:audio/mpeg;base64,SUQz"));
        assert_eq!(samples[1].data, None);
        assert!((loaded.volume - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_save_trims_oldest_tabs() {
        let tabs = vec![
            tab_with_payload("a", 1000),
            tab_with_payload("b", 1000),
            tab_with_payload("c", 1000),
        ];
        let mut reference = Envelope::new(state(tabs.clone()));
        encode_payloads(&mut reference.state);
        reference.state.tabs.remove(0);
        let ceiling = estimate_size(&reference).unwrap();

        let mut persistence = Persistence::new(MemoryStore::new()).with_ceiling(ceiling);
        let outcome = persistence.save(KEY, &state(tabs), &TabId::from("c"));

        assert_eq!(
            outcome,
            SaveOutcome::Written {
                evicted: vec![TabId::from("a")]
            }
        );
        let stored = stored_envelope(&persistence);
        let ids: Vec<_> = stored.state.tabs.iter().map(|t| t.id.0.as_str()).collect();
        assert_eq!(ids, ["b", "c"]);
    }

    #[test]
    fn test_fallback_keeps_only_active_tab() {
        let tabs = vec![
            tab_with_payload("a", 1000),
            tab_with_payload("b", 1000),
            tab_with_payload("c", 1000),
        ];

        let mut single = Envelope::new(state(vec![tabs[2].clone()]));
        encode_payloads(&mut single.state);
        let single_size = estimate_size(&single).unwrap();
        let mut pair = Envelope::new(state(vec![tabs[1].clone(), tabs[2].clone()]));
        encode_payloads(&mut pair.state);
        let pair_size = estimate_size(&pair).unwrap();

        // Trimming drops "a"; the store then refuses two tabs but takes one.
        let mut store = MemoryStore::with_quota((KEY.len() + single_size) as u64);
        store.set("unrelated", b"x").unwrap();
        let mut persistence = Persistence::new(store).with_ceiling(pair_size);

        let outcome = persistence.save(KEY, &state(tabs), &TabId::from("c"));

        assert_eq!(
            outcome,
            SaveOutcome::WrittenReduced {
                kept: TabId::from("c")
            }
        );
        let stored = stored_envelope(&persistence);
        assert_eq!(stored.state.tabs.len(), 1);
        assert_eq!(stored.state.tabs[0].id, TabId::from("c"));
        assert_eq!(persistence.store().get("unrelated").unwrap(), None);
    }

    #[test]
    fn test_fallback_retargets_when_active_tab_was_evicted() {
        let tabs = vec![tab_with_payload("a", 10), tab_with_payload("b", 10)];
        let mut survivor = Envelope::new(state(vec![tabs[1].clone()]));
        encode_payloads(&mut survivor.state);
        let quota = (KEY.len() + estimate_size(&survivor).unwrap()) as u64;

        let mut persistence = Persistence::new(MemoryStore::with_quota(quota)).with_ceiling(0);
        persistence.store_mut().set("other", b"12345").unwrap();

        // Trimming evicts the active tab "a", so the reduced write keeps "b"
        // instead of an empty bank list.
        let outcome = persistence.save(KEY, &state(tabs), &TabId::from("a"));

        assert_eq!(
            outcome,
            SaveOutcome::WrittenReduced {
                kept: TabId::from("b")
            }
        );
        let stored = stored_envelope(&persistence);
        assert_eq!(stored.state.tabs.len(), 1);
        assert_eq!(stored.state.tabs[0].id, TabId::from("b"));
    }

    #[test]
    fn test_failed_retry_is_swallowed() {
        let mut persistence = Persistence::new(BrokenStore);

        let outcome = persistence.save(KEY, &state(vec![tab_with_payload("a", 4)]), &TabId::from("a"));

        assert_eq!(outcome, SaveOutcome::Failed);
    }

    #[test]
    fn test_file_store_persistence_roundtrip() {
        let dir = tempdir().expect("tempdir");
        let original = state(vec![tab_with_payload("a", 16)]);

        let mut persistence = Persistence::new(FileStore::new(dir.path()));
        persistence.save(KEY, &original, &TabId::from("a"));

        let reopened = Persistence::new(FileStore::new(dir.path()));
        assert_eq!(reopened.load(KEY), Some(original));
    }
}
