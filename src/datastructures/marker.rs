//! Resettable visited-markers with O(1) bulk reset.
//!
//! Instead of clearing the backing array between searches, the marker bumps a
//! timestamp; a slot counts as set only if it stores the current timestamp.

#[derive(Debug, Clone)]
pub struct Marker {
    stamps: Vec<u32>,
    current: u32,
}

impl Marker {
    pub fn new(size: usize) -> Self {
        Self { stamps: vec![0; size], current: 1 }
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    pub fn set(&mut self, i: usize) {
        self.stamps[i] = self.current;
    }

    pub fn get(&self, i: usize) -> bool {
        self.stamps[i] == self.current
    }

    /// Invalidates all markers without touching the backing storage.
    pub fn reset(&mut self) {
        self.current = self.current.checked_add(1).unwrap_or_else(|| {
            self.stamps.fill(0);
            1
        });
    }
}
