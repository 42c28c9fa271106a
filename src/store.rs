/// store.rs – Authoritative open-position map, broker PnL entries and the
/// lazily rebuilt PnL-sorted ordering derived from them.
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::models::{Position, PositionId, SymbolId};

// ---------------------------------------------------------------------------
// Ordering cache
// ---------------------------------------------------------------------------

/// PnL-descending view over the store. Either dirty or exactly equal to a
/// stable sort of the current positions (missing PnL = 0.0).
#[derive(Debug, Default)]
pub struct OrderingCache {
    sequence: Vec<PositionId>,
    dirty: bool,
    rebuilds: u64,
}

impl OrderingCache {
    pub fn new() -> Self {
        Self {
            sequence: Vec::new(),
            dirty: true,
            rebuilds: 0,
        }
    }

    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of times the sequence has been recomputed.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    fn ordered<'a>(
        &'a mut self,
        positions: &BTreeMap<PositionId, Position>,
        pnl: &HashMap<PositionId, f64>,
    ) -> &'a [PositionId] {
        if self.dirty {
            self.dirty = false;
            self.rebuild(positions, pnl);
        }
        &self.sequence
    }

    fn rebuild(
        &mut self,
        positions: &BTreeMap<PositionId, Position>,
        pnl: &HashMap<PositionId, f64>,
    ) {
        let key = |id: &PositionId| pnl.get(id).copied().unwrap_or(0.0);
        self.sequence.clear();
        self.sequence.extend(positions.keys().copied());
        // sort_by is stable: ties keep the map's ascending-id order.
        self.sequence.sort_by(|a, b| {
            key(b)
                .partial_cmp(&key(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.rebuilds += 1;
    }
}

// ---------------------------------------------------------------------------
// Position store
// ---------------------------------------------------------------------------

/// Result of a wholesale reconcile replace.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReplaceOutcome {
    pub added: Vec<PositionId>,
    pub removed: Vec<PositionId>,
    /// Symbols referenced by newly added positions.
    pub added_symbols: BTreeSet<SymbolId>,
    /// Every symbol referenced after the replace.
    pub referenced_symbols: BTreeSet<SymbolId>,
}

/// Result of removing a single position.
#[derive(Debug, Clone, PartialEq)]
pub struct Removed {
    pub position: Position,
    /// True when no remaining position references the removed position's symbol.
    pub symbol_released: bool,
}

#[derive(Debug, Default)]
pub struct PositionStore {
    positions: BTreeMap<PositionId, Position>,
    pnl: HashMap<PositionId, f64>,
    ordering: OrderingCache,
}

impl PositionStore {
    pub fn new() -> Self {
        Self {
            positions: BTreeMap::new(),
            pnl: HashMap::new(),
            ordering: OrderingCache::new(),
        }
    }

    /// Replace every position with a reconcile snapshot.
    pub fn replace_all(&mut self, snapshot: impl IntoIterator<Item = Position>) -> ReplaceOutcome {
        let next: BTreeMap<PositionId, Position> = snapshot
            .into_iter()
            .map(|p| (p.position_id, p))
            .collect();

        let added: Vec<PositionId> = next
            .keys()
            .filter(|id| !self.positions.contains_key(id))
            .copied()
            .collect();
        let removed: Vec<PositionId> = self
            .positions
            .keys()
            .filter(|id| !next.contains_key(id))
            .copied()
            .collect();
        let added_symbols = added.iter().map(|id| next[id].symbol_id).collect();
        let referenced_symbols = next.values().map(|p| p.symbol_id).collect();

        for id in &removed {
            self.pnl.remove(id);
        }
        self.positions = next;
        self.ordering.invalidate();

        ReplaceOutcome {
            added,
            removed,
            added_symbols,
            referenced_symbols,
        }
    }

    /// Insert or overwrite one position (execution fills).
    pub fn upsert(&mut self, position: Position) {
        self.positions.insert(position.position_id, position);
        self.ordering.invalidate();
    }

    /// Delete a position and its PnL entry. Unknown ids are a no-op.
    pub fn remove(&mut self, position_id: PositionId) -> Option<Removed> {
        let position = self.positions.remove(&position_id)?;
        self.pnl.remove(&position_id);
        self.ordering.invalidate();
        let symbol_released = !self
            .positions
            .values()
            .any(|p| p.symbol_id == position.symbol_id);
        Some(Removed {
            position,
            symbol_released,
        })
    }

    pub fn get(&self, position_id: PositionId) -> Option<&Position> {
        self.positions.get(&position_id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn symbols_in_use(&self) -> BTreeSet<SymbolId> {
        self.positions.values().map(|p| p.symbol_id).collect()
    }

    // ------------------------------------------------------------------
    // Broker-reported PnL
    // ------------------------------------------------------------------

    /// Record the broker's net PnL. Returns true when the stored value changed.
    /// Reports for positions not in the store are dropped.
    pub fn set_pnl(&mut self, position_id: PositionId, net: f64) -> bool {
        if !self.positions.contains_key(&position_id) {
            return false;
        }
        let prev = self.pnl.insert(position_id, net);
        let changed = prev != Some(net);
        if changed {
            self.ordering.invalidate();
        }
        changed
    }

    pub fn pnl(&self, position_id: PositionId) -> Option<f64> {
        self.pnl.get(&position_id).copied()
    }

    // ------------------------------------------------------------------
    // Ordering
    // ------------------------------------------------------------------

    pub fn invalidate(&mut self) {
        self.ordering.invalidate();
    }

    /// PnL-descending position ids, rebuilt only when dirty.
    pub fn ordered(&mut self) -> &[PositionId] {
        self.ordering.ordered(&self.positions, &self.pnl)
    }

    /// Position at `index` of the ordering, with the index clamped into range.
    pub fn selected(&mut self, index: usize) -> Option<&Position> {
        let ordered = self.ordering.ordered(&self.positions, &self.pnl);
        let last = ordered.len().checked_sub(1)?;
        let id = ordered[index.min(last)];
        self.positions.get(&id)
    }

    pub fn ordering_rebuilds(&self) -> u64 {
        self.ordering.rebuilds()
    }

    pub fn ordering_dirty(&self) -> bool {
        self.ordering.is_dirty()
    }
}
