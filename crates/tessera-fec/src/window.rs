//! # Sender window and repair queue
//!
//! The window is a ring indexed by `id mod W`. Ids in transit always form a
//! contiguous range `[smallest_in_transit, highest_in_transit]`; when the
//! window is empty both equal the sentinel `INITIAL_SYMBOL_ID - 1`. A source
//! symbol leaves the window only once its packet is acknowledged (or a later
//! landing closes the gap below it) — a nacked symbol stays, because FEC on
//! the peer may still rescue it.
//!
//! Generated repair symbols wait in a small bounded ring until the packetizer
//! has room for a FEC frame. Enqueuing over a full ring overwrites the
//! occupant (documented loss of redundancy; the controller sizes r so this
//! stays rare).

use bytes::BytesMut;
use tracing::{debug, trace};

use crate::error::FecError;
use crate::symbol::{id_max, id_min, RepairSymbol, SourceSymbol, SymbolId, INITIAL_SYMBOL_ID};
use crate::wire::{encode_repair_frame, REPAIR_FRAME_OVERHEAD};

/// Upper bound on repair symbols awaiting transmission.
pub const MAX_QUEUED_REPAIR_SYMBOLS: usize = 6;

/// Sentinel id meaning "window empty".
const SENTINEL: SymbolId = INITIAL_SYMBOL_ID - 1;

// ─── Window ─────────────────────────────────────────────────────────────────

struct WindowSlot {
    symbol: SourceSymbol,
    received: bool,
}

/// Sender-side sliding window of in-flight source symbols.
pub struct SenderWindow {
    slots: Vec<Option<WindowSlot>>,
    capacity: usize,
    /// Last id handed out by `protect_source_symbol`.
    max_id: SymbolId,
    smallest_in_transit: SymbolId,
    highest_in_transit: SymbolId,
    len: usize,
}

impl SenderWindow {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        SenderWindow {
            slots,
            capacity,
            max_id: SENTINEL,
            smallest_in_transit: SENTINEL,
            highest_in_transit: SENTINEL,
            len: 0,
        }
    }

    #[inline]
    fn index(&self, id: SymbolId) -> usize {
        id as usize % self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn smallest_in_transit(&self) -> SymbolId {
        self.smallest_in_transit
    }

    pub fn highest_in_transit(&self) -> SymbolId {
        self.highest_in_transit
    }

    /// Assign the next id to a payload and store it. Fails with `WindowFull`
    /// when `highest - smallest + 1` would exceed W; the caller throttles
    /// until the next ACK.
    pub fn protect_source_symbol(
        &mut self,
        payload: &[u8],
        symbol_size: usize,
    ) -> Result<SymbolId, FecError> {
        if self.is_full() {
            return Err(FecError::WindowFull);
        }
        let id = self.max_id.wrapping_add(1);
        let idx = self.index(id);
        if self.slots[idx].is_some() {
            return Err(FecError::WindowFull);
        }

        self.slots[idx] = Some(WindowSlot {
            symbol: SourceSymbol::new(id, payload, symbol_size),
            received: false,
        });
        self.max_id = id;
        if self.len == 0 {
            self.smallest_in_transit = id;
        }
        self.highest_in_transit = id;
        self.len += 1;
        trace!(id, len = self.len, "source symbol protected");
        Ok(id)
    }

    /// The packet carrying this symbol left the endpoint.
    pub fn symbol_sent(&mut self, id: SymbolId) {
        if self.is_empty() {
            return;
        }
        self.highest_in_transit = id_max(self.highest_in_transit, id);
        self.smallest_in_transit = id_min(self.smallest_in_transit, id);
    }

    /// ACK/NACK outcome for the packet carrying this symbol. On
    /// `received = true` the slot is marked and, if it closes the bottom of
    /// the window, pruned along with the contiguous received run above it.
    /// On `received = false` the symbol stays resident.
    pub fn symbol_landed(&mut self, id: SymbolId, received: bool) {
        if !received {
            return;
        }
        let idx = self.index(id);
        let matches = self.slots[idx]
            .as_ref()
            .map(|s| s.symbol.id == id)
            .unwrap_or(false);
        if !matches {
            return;
        }
        self.slots[idx].as_mut().unwrap().received = true;

        if self.is_empty() || id != self.smallest_in_transit {
            return;
        }
        // Prune the received run starting at the bottom of the window.
        loop {
            let idx = self.index(self.smallest_in_transit);
            match &self.slots[idx] {
                Some(slot) if slot.received => {
                    self.slots[idx] = None;
                    self.len -= 1;
                    self.smallest_in_transit = self.smallest_in_transit.wrapping_add(1);
                }
                _ => break,
            }
            if self.len == 0 {
                self.smallest_in_transit = SENTINEL;
                self.highest_in_transit = SENTINEL;
                break;
            }
        }
        debug!(
            smallest = self.smallest_in_transit,
            highest = self.highest_in_transit,
            "window pruned"
        );
    }

    /// Look up a resident symbol.
    pub fn get(&self, id: SymbolId) -> Option<&SourceSymbol> {
        self.slots[self.index(id)]
            .as_ref()
            .filter(|s| s.symbol.id == id)
            .map(|s| &s.symbol)
    }

    /// Borrow the contiguous run `[first_id, first_id + k)`. `None` when any
    /// of the ids is no longer resident.
    pub fn range(&self, first_id: SymbolId, k: u16) -> Option<Vec<&SourceSymbol>> {
        let mut out = Vec::with_capacity(k as usize);
        for i in 0..k as u32 {
            out.push(self.get(first_id.wrapping_add(i))?);
        }
        Some(out)
    }

    /// All resident ids from `smallest_in_transit` to `highest_in_transit`,
    /// for whole-window (RLC) protection. `None` if the run has holes.
    pub fn in_flight(&self) -> Option<(SymbolId, Vec<&SourceSymbol>)> {
        if self.is_empty() {
            return None;
        }
        let first = self.smallest_in_transit;
        let k = self
            .highest_in_transit
            .wrapping_sub(first)
            .wrapping_add(1) as u16;
        Some((first, self.range(first, k)?))
    }
}

// ─── Repair Queue ───────────────────────────────────────────────────────────

struct QueueItem {
    symbol: RepairSymbol,
}

/// Bounded ring of repair symbols awaiting a reserved FEC frame.
pub struct RepairQueue {
    items: Vec<Option<QueueItem>>,
    head: usize,
    len: usize,
}

impl RepairQueue {
    pub fn new() -> Self {
        let mut items = Vec::with_capacity(MAX_QUEUED_REPAIR_SYMBOLS);
        items.resize_with(MAX_QUEUED_REPAIR_SYMBOLS, || None);
        RepairQueue {
            items,
            head: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Enqueue one repair symbol. A full ring overwrites the tail position;
    /// if that position was the head, the head advances and its (would-be)
    /// fragmentation state resets with it.
    pub fn push(&mut self, symbol: RepairSymbol) {
        let idx = (self.head + self.len) % MAX_QUEUED_REPAIR_SYMBOLS;
        if self.items[idx].is_some() {
            debug!(idx, "repair queue overwrites unsent symbol");
            self.items[idx] = None;
            if self.len > 1 && self.head == idx {
                self.head = (self.head + 1) % MAX_QUEUED_REPAIR_SYMBOLS;
            }
            self.len -= 1;
        }
        self.items[idx] = Some(QueueItem { symbol });
        if self.len == 0 {
            self.head = idx;
        }
        self.len += 1;
    }

    pub fn extend(&mut self, symbols: Vec<RepairSymbol>) {
        for s in symbols {
            self.push(s);
        }
    }

    /// Peek the head symbol's frame size.
    pub fn head_frame_len(&self) -> Option<usize> {
        self.items[self.head]
            .as_ref()
            .map(|item| REPAIR_FRAME_OVERHEAD + item.symbol.payload.len())
    }

    /// Pop the head symbol as an encoded FEC frame, with its feedback flag.
    /// A symbol is never split across frames: when it does not fit
    /// `max_bytes` the queue is left untouched and the caller must reserve a
    /// larger frame or defer.
    pub fn next_frame(&mut self, max_bytes: usize) -> Result<Option<(BytesMut, bool)>, FecError> {
        let needed = match self.head_frame_len() {
            Some(n) => n,
            None => return Ok(None),
        };
        if needed > max_bytes {
            return Err(FecError::FrameTooLarge {
                needed,
                available: max_bytes,
            });
        }

        let item = self.items[self.head].take().expect("head checked above");
        self.head = (self.head + 1) % MAX_QUEUED_REPAIR_SYMBOLS;
        self.len -= 1;

        let mut buf = BytesMut::with_capacity(needed);
        encode_repair_frame(&item.symbol, &mut buf);
        Ok(Some((buf, item.symbol.metadata.is_fb_fec)))
    }
}

impl Default for RepairQueue {
    fn default() -> Self {
        Self::new()
    }
}
