use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollPosition {
    pub x: f32,
    pub y: f32,
}

/// Scroll offsets keyed by an opaque per-navigation-entry identity. Entries
/// live for the process lifetime; there is no eviction.
#[derive(Default)]
pub struct ScrollMemory {
    positions: Mutex<HashMap<String, ScrollPosition>>,
}

impl ScrollMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the offset when a view is navigated away from.
    pub fn save(&self, key: &str, position: ScrollPosition) {
        self.positions
            .lock()
            .unwrap()
            .insert(key.to_string(), position);
    }

    /// Offset recorded for this navigation entry, if any; the caller falls
    /// back to the top of the page on `None`. Restoring does not consume
    /// the entry.
    pub fn restore(&self, key: &str) -> Option<ScrollPosition> {
        self.positions.lock().unwrap().get(key).copied()
    }
}
