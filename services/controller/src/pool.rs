//! The core map and the ledger, mutated together.
//!
//! `CorePool` is the only place that changes ownership, so the map and the
//! ledger always agree. It does no locking; the scheduler actor serializes
//! access.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::core_map::{CoreMap, CoreSlot};
use crate::ledger::{Allocation, JobKey, Ledger};

#[derive(Debug, Default)]
pub struct CorePool {
    map: CoreMap,
    ledger: Ledger,
}

impl CorePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(&self) -> &CoreMap {
        &self.map
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn map_range(&mut self, range: Range<usize>) {
        self.map.map_range(range);
    }

    pub fn unmap_range(&mut self, range: Range<usize>) {
        self.map.unmap_range(range);
    }

    pub fn free_count(&self, range: Range<usize>) -> usize {
        self.map.free_count(range)
    }

    pub fn free_indices(&self, range: Range<usize>, n: usize) -> Vec<usize> {
        self.map.free_indices(range, n)
    }

    /// Gives `indices` to `key`, opening its ledger entry if needed.
    ///
    /// Indices owned by another job move to `key`; the previous owners are
    /// returned with the indices they lost. Unmapped indices are ignored.
    pub fn assign(
        &mut self,
        key: &JobKey,
        pid: u32,
        cores_requested: usize,
        indices: &[usize],
    ) -> BTreeMap<JobKey, Vec<usize>> {
        if !self.ledger.contains(key) {
            self.ledger.open(key.clone(), pid, cores_requested);
        }

        let mut losers: BTreeMap<JobKey, Vec<usize>> = BTreeMap::new();
        let mut gained = Vec::with_capacity(indices.len());

        for &index in indices {
            match self.map.slot(index) {
                Some(CoreSlot::Free) => {}
                Some(CoreSlot::Owned(prior)) if prior != key => {
                    let prior = prior.clone();
                    if let Some(alloc) = self.ledger.get_mut(&prior) {
                        alloc.cores.remove(&index);
                    }
                    losers.entry(prior).or_default().push(index);
                }
                Some(CoreSlot::Owned(_)) => continue,
                Some(CoreSlot::Unmapped) | None => continue,
            }
            self.map.set(index, CoreSlot::Owned(key.clone()));
            gained.push(index);
        }

        if let Some(alloc) = self.ledger.get_mut(key) {
            alloc.cores.extend(gained);
        }
        self.ledger.touch(key);
        for prior in losers.keys() {
            self.ledger.touch(prior);
        }

        losers
    }

    /// Frees every core owned by `key` and drops its ledger entry.
    pub fn release(&mut self, key: &JobKey) -> Option<Allocation> {
        let alloc = self.ledger.remove(key)?;
        for &index in &alloc.cores {
            self.map.set(index, CoreSlot::Free);
        }
        Some(alloc)
    }

    /// Checks that the map and the ledger agree.
    ///
    /// Every owned slot must appear in its owner's ledger entry and every
    /// ledger index must be owned by that entry in the map.
    pub fn check_consistency(&self) -> Result<(), String> {
        for (index, slot) in self.map.iter() {
            if let CoreSlot::Owned(key) = slot {
                let Some(alloc) = self.ledger.get(key) else {
                    return Err(format!("core {index} owned by {key} which has no allocation"));
                };
                if !alloc.cores.contains(&index) {
                    return Err(format!("core {index} owned by {key} but missing from its ledger"));
                }
            }
        }
        for (key, alloc) in self.ledger.iter() {
            for &index in &alloc.cores {
                if self.map.slot(index).and_then(CoreSlot::owner) != Some(key) {
                    return Err(format!("ledger of {key} lists core {index} it does not own"));
                }
            }
        }
        Ok(())
    }
}
