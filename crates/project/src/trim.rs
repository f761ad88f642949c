use crate::{Envelope, TabId};
use serde::Serialize;
use std::io;

/// Byte length of the compact JSON form of `value`.
///
/// Counts bytes as they are produced instead of building the string, so
/// sizing a large snapshot does not allocate a second copy of it.
pub fn estimate_size<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<usize> {
    let mut counter = ByteCounter(0);
    serde_json::to_writer(&mut counter, value)?;
    Ok(counter.0)
}

struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimReport {
    /// Evicted tabs, in eviction order.
    pub evicted: Vec<TabId>,
    /// Estimated size after trimming.
    pub size: usize,
}

/// Evict tabs from the front until the envelope fits in `ceiling` bytes or a
/// single tab remains.
///
/// Eviction is strictly by position. Tab contents and the active tab are not
/// considered.
pub fn trim(envelope: &mut Envelope, ceiling: usize) -> serde_json::Result<TrimReport> {
    let mut size = estimate_size(envelope)?;
    let mut evicted = Vec::new();

    while size > ceiling && envelope.state.tabs.len() > 1 {
        let tab = envelope.state.tabs.remove(0);
        // Compact JSON: dropping the head of a multi-element array removes
        // the element and one comma.
        size -= estimate_size(&tab)? + 1;
        evicted.push(tab.id);
    }

    Ok(TrimReport { evicted, size })
}
