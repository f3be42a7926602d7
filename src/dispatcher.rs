//! Adapter between an entity collection and the fork-join pool.
//!
//! A subsystem (turret targeting, steering, path requests) keeps its
//! entities in a [`LoopDispatcher`] together with a per-entity loop body and
//! calls [`LoopDispatcher::run_one_frame`] once per simulation frame. Each
//! index gets exclusive access to its own entity, so bodies may mutate
//! entity-local state freely but cannot reach another entity.

use crate::ForkJoinPool;
use crate::error::Result;
use crate::iter::UnsafeSlice;
use log::{debug, warn};
use std::ops::Range;

/// Whether an entity takes part in the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Residency {
    /// In use; the loop body runs for it.
    #[default]
    Active,
    /// Parked in a reuse pool; skipped.
    Dormant,
}

impl Residency {
    pub fn is_active(self) -> bool {
        self == Residency::Active
    }
}

/// Entities that report their own residency.
pub trait Resident {
    fn residency(&self) -> Residency;
}

/// Per-subsystem entity collection plus the body run for each entity.
pub struct LoopDispatcher<E, F> {
    items: Vec<E>,
    body: F,
}

impl<E, F> LoopDispatcher<E, F>
where
    E: Resident + Send,
    F: Fn(&mut E) + Sync,
{
    pub fn new(body: F) -> Self {
        LoopDispatcher {
            items: Vec::new(),
            body,
        }
    }

    /// Registers an entity and re-sorts so active entities stay in front.
    pub fn add(&mut self, item: E) {
        self.items.push(item);
        self.resort();
    }

    /// Stable sort putting active entities first.
    pub fn resort(&mut self) {
        self.items.sort_by_key(|item| !item.residency().is_active());
    }

    /// Drops every entity, e.g. on level unload.
    pub fn clear(&mut self) {
        debug!("dispatcher cleared {} entities", self.items.len());
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Length of the active prefix as of the last resort. Only a hint:
    /// residency may have changed since.
    pub fn active_len(&self) -> usize {
        self.items
            .partition_point(|item| item.residency().is_active())
    }

    pub fn items(&self) -> &[E] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [E] {
        &mut self.items
    }

    /// Runs the body for every active entity across the pool and blocks
    /// until the frame's work is done.
    pub fn run_one_frame(&mut self, pool: &mut ForkJoinPool) -> Result<()> {
        let len = self.items.len();
        self.run_range(pool, 0..len)
    }

    /// Runs the body for each index in `range`. Indices with no entity
    /// behind them, e.g. a range computed before a teardown shrank the
    /// collection, are logged and skipped.
    pub fn run_range(&mut self, pool: &mut ForkJoinPool, range: Range<usize>) -> Result<()> {
        let items = UnsafeSlice::new(&mut self.items);
        let body = &self.body;
        pool.run_parallel(&items, range, |items, index| {
            Self::loop_body(body, items, index)
        })
    }

    fn loop_body(body: &F, items: &UnsafeSlice<E>, index: usize) {
        // SAFETY: each index belongs to exactly one partition, so no other
        // worker touches this entity during the call.
        let Some(item) = (unsafe { items.get_mut(index) }) else {
            warn!(
                "dispatcher index {} out of range ({} entities)",
                index,
                items.len()
            );
            return;
        };
        // Every index is inspected; the active-first order is never assumed.
        if !item.residency().is_active() {
            return;
        }
        body(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Turret {
        residency: Residency,
        shots: u32,
    }

    impl Resident for Turret {
        fn residency(&self) -> Residency {
            self.residency
        }
    }

    fn turret(residency: Residency) -> Turret {
        Turret {
            residency,
            shots: 0,
        }
    }

    #[test]
    fn test_add_keeps_active_first() {
        let mut dispatcher = LoopDispatcher::new(|t: &mut Turret| t.shots += 1);
        dispatcher.add(turret(Residency::Dormant));
        dispatcher.add(turret(Residency::Active));
        dispatcher.add(turret(Residency::Dormant));
        dispatcher.add(turret(Residency::Active));

        assert_eq!(dispatcher.active_len(), 2);
        let order: Vec<_> = dispatcher.items().iter().map(|t| t.residency).collect();
        assert_eq!(
            order,
            vec![
                Residency::Active,
                Residency::Active,
                Residency::Dormant,
                Residency::Dormant
            ]
        );
    }

    #[test]
    fn test_run_one_frame_skips_dormant() {
        let mut pool = ForkJoinPool::new(4).unwrap();
        let mut dispatcher = LoopDispatcher::new(|t: &mut Turret| t.shots += 1);
        for i in 0..40 {
            let residency = if i % 3 == 0 {
                Residency::Dormant
            } else {
                Residency::Active
            };
            dispatcher.add(turret(residency));
        }

        // Residency flips after the resort; correctness must not depend on it.
        dispatcher.items_mut()[0].residency = Residency::Dormant;

        for _ in 0..3 {
            dispatcher.run_one_frame(&mut pool).unwrap();
        }

        for t in dispatcher.items() {
            let expected = if t.residency.is_active() { 3 } else { 0 };
            assert_eq!(t.shots, expected);
        }
    }

    #[test]
    fn test_range_past_end_skips_missing_entities() {
        let mut pool = ForkJoinPool::new(4).unwrap();
        let mut dispatcher = LoopDispatcher::new(|t: &mut Turret| t.shots += 1);
        for _ in 0..10 {
            dispatcher.add(turret(Residency::Active));
        }

        // Range sized for a collection that has since shrunk.
        dispatcher.run_range(&mut pool, 0..25).unwrap();
        assert!(dispatcher.items().iter().all(|t| t.shots == 1));

        dispatcher.run_range(&mut pool, 10..25).unwrap();
        assert!(dispatcher.items().iter().all(|t| t.shots == 1));
        // Missing entities are skipped by the lookup, not by unwinding.
        assert_eq!(pool.metrics().indices_skipped, 0);
    }

    #[test]
    fn test_clear_empties_collection() {
        let mut pool = ForkJoinPool::new(2).unwrap();
        let mut dispatcher = LoopDispatcher::new(|t: &mut Turret| t.shots += 1);
        dispatcher.add(turret(Residency::Active));
        dispatcher.clear();

        assert!(dispatcher.is_empty());
        dispatcher.run_one_frame(&mut pool).unwrap();
    }
}
