//! Global core map: one slot per global core index.
//!
//! The map is a flat arena indexed by global core index. It grows when an
//! agent registers a range past its current end; slots no agent covers stay
//! `Unmapped`.

use std::ops::Range;

use crate::ledger::JobKey;

/// Ownership state of one global core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreSlot {
    /// No registered agent covers this index.
    Unmapped,
    Free,
    Owned(JobKey),
}

impl CoreSlot {
    pub fn is_free(&self) -> bool {
        matches!(self, CoreSlot::Free)
    }

    pub fn owner(&self) -> Option<&JobKey> {
        match self {
            CoreSlot::Owned(key) => Some(key),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct CoreMap {
    slots: Vec<CoreSlot>,
}

impl CoreMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots, i.e. one past the highest mapped index.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> Option<&CoreSlot> {
        self.slots.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &CoreSlot)> {
        self.slots.iter().enumerate()
    }

    /// Marks every unmapped slot in `range` as free, growing the arena if
    /// needed. Owned slots are left untouched.
    pub fn map_range(&mut self, range: Range<usize>) {
        if self.slots.len() < range.end {
            self.slots.resize(range.end, CoreSlot::Unmapped);
        }
        for slot in &mut self.slots[range] {
            if matches!(slot, CoreSlot::Unmapped) {
                *slot = CoreSlot::Free;
            }
        }
    }

    /// Marks every slot in `range` as unmapped and trims trailing gaps.
    pub fn unmap_range(&mut self, range: Range<usize>) {
        let end = range.end.min(self.slots.len());
        for slot in &mut self.slots[range.start.min(end)..end] {
            *slot = CoreSlot::Unmapped;
        }
        while matches!(self.slots.last(), Some(CoreSlot::Unmapped)) {
            self.slots.pop();
        }
    }

    pub fn free_count(&self, range: Range<usize>) -> usize {
        self.within(range).filter(|(_, s)| s.is_free()).count()
    }

    pub fn owned_count(&self, range: Range<usize>) -> usize {
        self.within(range)
            .filter(|(_, s)| s.owner().is_some())
            .count()
    }

    /// Lowest `n` free indices in `range`; fewer if the range runs out.
    pub fn free_indices(&self, range: Range<usize>, n: usize) -> Vec<usize> {
        self.within(range)
            .filter(|(_, s)| s.is_free())
            .map(|(i, _)| i)
            .take(n)
            .collect()
    }

    pub(crate) fn set(&mut self, index: usize, slot: CoreSlot) {
        if let Some(current) = self.slots.get_mut(index) {
            *current = slot;
        }
    }

    fn within(&self, range: Range<usize>) -> impl Iterator<Item = (usize, &CoreSlot)> {
        let end = range.end.min(self.slots.len());
        let start = range.start.min(end);
        self.slots[start..end]
            .iter()
            .enumerate()
            .map(move |(i, s)| (start + i, s))
    }
}
