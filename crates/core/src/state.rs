use padbank_project::{PersistedState, Sample, SampleId, Tab, TabId};

/// In-memory application state.
///
/// `tabs` is never empty and `active_tab_id` always names one of them. The
/// store hands this out behind an `Arc` and replaces it copy-on-write, so a
/// snapshot held by a reader never changes underneath it.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerState {
    pub tabs: Vec<Tab>,
    pub active_tab_id: TabId,
    pub volume: f32,
}

impl SamplerState {
    /// One empty bank, full volume.
    pub fn initial() -> Self {
        let tab = Tab::new(TabId::from("tab-1"), "Bank 1");
        Self {
            active_tab_id: tab.id.clone(),
            tabs: vec![tab],
            volume: 1.0,
        }
    }

    /// Rebuild session state from a persisted snapshot. The first tab becomes
    /// active; an empty snapshot yields the initial state.
    pub fn from_persisted(persisted: PersistedState) -> Self {
        let Some(first) = persisted.tabs.first() else {
            log::warn!("persisted state has no tabs, using initial state");
            return Self::initial();
        };

        Self {
            active_tab_id: first.id.clone(),
            volume: clamp_volume(persisted.volume),
            tabs: persisted.tabs,
        }
    }

    pub fn to_persisted(&self) -> PersistedState {
        PersistedState {
            tabs: self.tabs.clone(),
            volume: self.volume,
        }
    }

    pub fn tab(&self, id: &TabId) -> Option<&Tab> {
        self.tabs.iter().find(|t| &t.id == id)
    }

    pub fn tab_mut(&mut self, id: &TabId) -> Option<&mut Tab> {
        self.tabs.iter_mut().find(|t| &t.id == id)
    }

    pub fn sample(&self, tab_id: &TabId, sample_id: &SampleId) -> Option<&Sample> {
        self.tab(tab_id)?.sample(sample_id)
    }

    pub fn active_tab(&self) -> Option<&Tab> {
        self.tab(&self.active_tab_id)
    }
}

pub(crate) fn clamp_volume(volume: f32) -> f32 {
    if volume.is_finite() {
        volume.clamp(0.0, 1.0)
    } else {
        1.0
    }
}
