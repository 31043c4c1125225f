use super::CommitLog;
use commitlog_tonic_core::{Error, Result, proto::Record, types::Offset};
use parking_lot::RwLock;
use tokio::sync::watch;

/// In-process commit log backed by a vector.
///
/// Offsets start at zero and are assigned under the write lock, so concurrent
/// appends are serialized and each receives a unique, increasing offset.
/// After every append the next offset is published on a watch channel so
/// tailing readers can wake up instead of polling. Published values only
/// ever increase.
pub struct MemoryLog {
    records: RwLock<Vec<Record>>,
    tail: watch::Sender<Offset>,
}

impl MemoryLog {
    pub fn new() -> Self {
        let (tail, _) = watch::channel(0);
        Self {
            records: RwLock::new(Vec::new()),
            tail,
        }
    }

    /// Number of records written so far, which is also the next offset.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[tonic::async_trait]
impl CommitLog for MemoryLog {
    async fn append(&self, mut record: Record) -> Result<Offset> {
        let mut records = self.records.write();
        let offset = records.len() as Offset;
        record.offset = offset;
        records.push(record);
        // Published under the write lock so the tail never moves backwards.
        // `send_modify` publishes even with no subscribers.
        self.tail.send_modify(|tail| *tail = (*tail).max(offset + 1));
        Ok(offset)
    }

    async fn read(&self, offset: Offset) -> Result<Record> {
        let records = self.records.read();
        usize::try_from(offset)
            .ok()
            .and_then(|idx| records.get(idx))
            .cloned()
            .ok_or(Error::OffsetOutOfRange { offset })
    }

    fn watch_tail(&self) -> Option<watch::Receiver<Offset>> {
        Some(self.tail.subscribe())
    }
}
