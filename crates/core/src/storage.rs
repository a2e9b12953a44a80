//! Handoff storage: the single slot that carries a finished session's
//! record from the lesson flow to the feedback flow.
//!
//! The slot is written exactly once at session termination (overwriting any
//! stale record) and consumed exactly once when feedback generation begins.
//! A missing or unreadable record reads as `None`; callers redirect to the
//! session-start flow instead of crashing.

use crate::session::SessionRecord;
use std::sync::Mutex;

/// Single-writer, single-reader handoff slot.
pub trait HandoffStore: Send + Sync {
    /// Stores the record, replacing any previous one.
    fn put(&self, record: &SessionRecord);

    /// Removes and returns the stored record, if a readable one exists.
    fn take(&self) -> Option<SessionRecord>;
}

/// In-memory slot holding the record as JSON, mirroring how the handoff
/// travels between pages.
pub struct MemoryHandoffSlot {
    slot: Mutex<Option<String>>,
}

impl MemoryHandoffSlot {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl Default for MemoryHandoffSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl HandoffStore for MemoryHandoffSlot {
    fn put(&self, record: &SessionRecord) {
        match serde_json::to_string(record) {
            Ok(json) => {
                if let Ok(mut slot) = self.slot.lock() {
                    *slot = Some(json);
                } else {
                    tracing::error!("handoff slot lock poisoned; dropping session record");
                }
            }
            Err(e) => tracing::error!("failed to serialize session record: {e}"),
        }
    }

    fn take(&self) -> Option<SessionRecord> {
        let json = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => {
                tracing::error!("handoff slot lock poisoned; treating as empty");
                None
            }
        }?;
        match serde_json::from_str(&json) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("discarding unreadable session record: {e}");
                None
            }
        }
    }
}
