//! Background encoding of assigned audio files.
//!
//! Every request gets a version number. The latest version issued for a pad
//! is the only one allowed to commit, so an older encode that finishes late
//! cannot overwrite a newer assignment.

use padbank_decode::AudioFile;
use padbank_project::{SampleId, TabId};
use std::collections::HashMap;
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

type Slot = (TabId, SampleId);

#[derive(Debug)]
pub(crate) struct Encoded {
    pub tab_id: TabId,
    pub sample_id: SampleId,
    pub version: u64,
    pub name: String,
    pub url: String,
    pub data: String,
}

pub(crate) struct Assigner {
    tx: Sender<Encoded>,
    rx: Receiver<Encoded>,
    latest: HashMap<Slot, u64>,
    next_version: u64,
    pending: usize,
}

impl Assigner {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            latest: HashMap::new(),
            next_version: 0,
            pending: 0,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    fn issue(&mut self, tab_id: &TabId, sample_id: &SampleId) -> u64 {
        self.next_version += 1;
        self.latest
            .insert((tab_id.clone(), sample_id.clone()), self.next_version);
        self.next_version
    }

    /// Start encoding `file` for a pad on a worker thread.
    pub fn submit(&mut self, tab_id: TabId, sample_id: SampleId, file: AudioFile) -> io::Result<u64> {
        let version = self.issue(&tab_id, &sample_id);
        let tx = self.tx.clone();

        thread::Builder::new()
            .name("sample-encoder".to_string())
            .spawn(move || {
                let encoded = Encoded {
                    data: file.to_data_url(),
                    url: file.playable_url(),
                    name: file.name,
                    tab_id,
                    sample_id,
                    version,
                };
                let _ = tx.send(encoded);
            })?;

        self.pending += 1;
        Ok(version)
    }

    /// Whether `encoded` is still the newest request for its pad.
    pub fn is_current(&self, encoded: &Encoded) -> bool {
        self.latest
            .get(&(encoded.tab_id.clone(), encoded.sample_id.clone()))
            == Some(&encoded.version)
    }

    pub fn try_recv(&mut self) -> Option<Encoded> {
        let encoded = self.rx.try_recv().ok()?;
        self.pending = self.pending.saturating_sub(1);
        Some(encoded)
    }

    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<Encoded> {
        match self.rx.recv_timeout(timeout) {
            Ok(encoded) => {
                self.pending = self.pending.saturating_sub(1);
                Some(encoded)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}
