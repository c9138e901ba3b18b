//! # Receiver window and buffers
//!
//! Two bounded buffers: received source symbols keyed by id, received repair
//! symbols keyed by their last protected id. Every repair insertion feeds the
//! coding scheme and drains whatever became recoverable; recovered symbols
//! are injected upward (as if the original packet had arrived) and their ids
//! queued for a `RECOVERED` frame back to the sender.
//!
//! Both buffers evict their minimum when full; a source symbol older than an
//! already-evicted minimum is rejected outright.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::error::FecError;
use crate::scheme::{ReceiverScheme, SourceSymbolView};
use crate::stats::ReceiverFecStats;
use crate::symbol::{RepairSymbol, SourceSymbol, SymbolId, INITIAL_SYMBOL_ID};

// ─── Source-Symbol Buffer ───────────────────────────────────────────────────

/// Bounded buffer of received source symbols, keyed by id.
pub struct ReceivedSourceBuffer {
    map: BTreeMap<SymbolId, SourceSymbol>,
    capacity: usize,
    /// Ids below this were evicted (or never accepted); late arrivals with
    /// smaller ids are rejected.
    floor: SymbolId,
}

impl ReceivedSourceBuffer {
    pub fn new(capacity: usize) -> Self {
        ReceivedSourceBuffer {
            map: BTreeMap::new(),
            capacity,
            floor: INITIAL_SYMBOL_ID,
        }
    }

    /// Insert a symbol. Idempotent on duplicate ids; rejects ids below the
    /// eviction floor. Returns whether the symbol was newly inserted.
    pub fn add(&mut self, ss: SourceSymbol) -> bool {
        if ss.id < self.floor {
            trace!(id = ss.id, floor = self.floor, "source symbol below floor");
            return false;
        }
        if self.map.contains_key(&ss.id) {
            return false;
        }
        self.map.insert(ss.id, ss);
        if self.map.len() > self.capacity {
            // Evict the minimum; the contiguous frontier silently advances.
            if let Some((&min_id, _)) = self.map.iter().next() {
                self.map.remove(&min_id);
                self.floor = self.floor.max(min_id.wrapping_add(1));
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, id: SymbolId) -> Option<&SourceSymbol> {
        self.map.get(&id)
    }

    /// Highest id such that every id from the buffer's first up to it is
    /// present.
    pub fn highest_contiguous(&self) -> Option<SymbolId> {
        let mut iter = self.map.keys();
        let mut last = *iter.next()?;
        for &id in iter {
            if id != last.wrapping_add(1) {
                break;
            }
            last = id;
        }
        Some(last)
    }
}

impl SourceSymbolView for ReceivedSourceBuffer {
    fn contains(&self, id: SymbolId) -> bool {
        self.map.contains_key(&id)
    }

    fn whole_data(&self, id: SymbolId) -> Option<&[u8]> {
        self.map.get(&id).map(|s| s.whole_data())
    }

    fn first_id(&self) -> Option<SymbolId> {
        self.map.keys().next().copied()
    }
}

// ─── Repair-Symbol Buffer ───────────────────────────────────────────────────

/// Bounded buffer of received repair symbols, keyed by
/// `(last protected id, fss)` so batch members stay distinct. Evicts the
/// oldest (smallest key) when full.
pub struct ReceivedRepairBuffer {
    map: BTreeMap<(SymbolId, u32), RepairSymbol>,
    capacity: usize,
}

impl ReceivedRepairBuffer {
    pub fn new(capacity: usize) -> Self {
        ReceivedRepairBuffer {
            map: BTreeMap::new(),
            capacity,
        }
    }

    /// Insert a repair symbol, evicting the oldest when full. Idempotent on
    /// duplicates. Returns whether the symbol was newly inserted.
    pub fn add(&mut self, rs: RepairSymbol) -> bool {
        let key = (rs.metadata.last_protected_id(), rs.metadata.fss);
        if self.map.contains_key(&key) {
            return false;
        }
        self.map.insert(key, rs);
        if self.map.len() > self.capacity {
            if let Some((&min_key, _)) = self.map.iter().next() {
                self.map.remove(&min_key);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drop every repair whose last protected id is at or below the
    /// contiguously received frontier.
    pub fn remove_unused(&mut self, highest_contiguous: SymbolId) {
        self.map.retain(|&(last, _), _| last > highest_contiguous);
    }
}

// ─── Receiver FEC Context ───────────────────────────────────────────────────

/// Receiver-side FEC state: both buffers plus the scheme, with recovered
/// symbols surfacing as injections and `RECOVERED` ids.
pub struct ReceiverFec {
    sources: ReceivedSourceBuffer,
    repairs: ReceivedRepairBuffer,
    scheme: ReceiverScheme,
    /// Ids recovered but not yet announced to the sender.
    pending_recovered_ids: Vec<SymbolId>,
    stats: ReceiverFecStats,
}

impl ReceiverFec {
    pub fn new(scheme: ReceiverScheme, window_capacity: usize) -> Self {
        ReceiverFec {
            // Source buffer holds about two windows' worth of symbols.
            sources: ReceivedSourceBuffer::new(window_capacity * 2),
            repairs: ReceivedRepairBuffer::new(window_capacity),
            scheme,
            pending_recovered_ids: Vec::new(),
            stats: ReceiverFecStats::default(),
        }
    }

    /// A source symbol arrived in a regular packet.
    /// Returns the symbols this arrival allowed the scheme to recover.
    pub fn on_source_symbol(&mut self, ss: SourceSymbol) -> Result<Vec<SourceSymbol>, FecError> {
        self.stats.source_symbols_received += 1;
        if !self.sources.add(ss.clone()) {
            self.stats.duplicates += 1;
            return Ok(Vec::new());
        }
        self.scheme.receive_source_symbol(&ss)?;
        Ok(self.drain_recovered())
    }

    /// A repair symbol arrived in a FEC frame.
    /// Returns any symbols recovered as a consequence.
    pub fn on_repair_symbol(&mut self, rs: RepairSymbol) -> Result<Vec<SourceSymbol>, FecError> {
        self.stats.repair_symbols_received += 1;
        if !self.repairs.add(rs.clone()) {
            self.stats.duplicates += 1;
            return Ok(Vec::new());
        }
        self.scheme.receive_repair_symbol(&rs, &self.sources)?;
        Ok(self.drain_recovered())
    }

    /// Move freshly recovered symbols into the source buffer and the
    /// announcement queue, handing copies upward for injection.
    fn drain_recovered(&mut self) -> Vec<SourceSymbol> {
        let recovered = self.scheme.drain_recovered();
        let mut out = Vec::with_capacity(recovered.len());
        for ss in recovered {
            if !self.sources.add(ss.clone()) {
                continue; // stale or duplicate recovery
            }
            debug!(id = ss.id, "injecting recovered symbol");
            self.stats.symbols_recovered += 1;
            self.pending_recovered_ids.push(ss.id);
            out.push(ss);
        }
        out
    }

    /// Sorted ids for the next `RECOVERED` frame (drained).
    pub fn take_recovered_ids(&mut self) -> Vec<SymbolId> {
        let mut ids = std::mem::take(&mut self.pending_recovered_ids);
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Called after the host's ACK emitter advanced its cumulative ack:
    /// drop repair symbols and scheme equations that can no longer matter.
    pub fn remove_unused(&mut self, highest_contiguous: SymbolId) {
        self.repairs.remove_unused(highest_contiguous);
        self.scheme.remove_unused(highest_contiguous);
    }

    pub fn sources(&self) -> &ReceivedSourceBuffer {
        &self.sources
    }

    pub fn repair_buffer_len(&self) -> usize {
        self.repairs.len()
    }

    pub fn stats(&self) -> &ReceiverFecStats {
        &self.stats
    }
}
