use parking_lot::Mutex;

use crate::codec::Record;

/// Holder of the most recent accepted record.
pub trait RecordCache: Send + Sync {
    fn set(&self, record: Record);
    fn get(&self) -> Option<Record>;
}

/// Single-slot cache behind one exclusive lock.
#[derive(Default)]
pub struct LatestRecord {
    slot: Mutex<Option<Record>>,
}

impl LatestRecord {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordCache for LatestRecord {
    fn set(&self, record: Record) {
        *self.slot.lock() = Some(record);
    }

    fn get(&self) -> Option<Record> {
        *self.slot.lock()
    }
}
