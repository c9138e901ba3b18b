//! # ACK/loss integration
//!
//! Two sender-side tables tie the QUIC packet space to the FEC symbol space:
//!
//! - the **sent-packet log** maps packet numbers to their slot, kind and
//!   first protected id, for ACK and loss-detection callbacks;
//! - the **lost-packet table** keeps packets the sender declared lost but
//!   whose symbols FEC may still rescue at the receiver. An entry leaves when
//!   a late ACK arrives, a peer `RECOVERED` notification names its symbol, or
//!   the symbol falls out of the window.
//!
//! Both are keyed by packet number, so re-processing an ACK range is a no-op
//! (the entries are already gone).

use std::collections::BTreeMap;

use crate::symbol::SymbolId;

/// What a congestion-controlled packet carried, FEC-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentKind {
    /// Source symbols `[first_id, first_id + n)`.
    Data { first_id: SymbolId, n_symbols: u16 },
    /// A repair symbol in a FEC frame.
    Repair { fb_fec: bool },
    /// Nothing FEC-related (still consumes a slot).
    Plain,
}

/// Log entry for one sent packet.
#[derive(Debug, Clone, Copy)]
pub struct SentPacketInfo {
    pub slot: u64,
    pub kind: SentKind,
}

impl SentPacketInfo {
    /// Carried source-symbol data (the window cares about its landing).
    pub fn fec_protected(&self) -> bool {
        matches!(self.kind, SentKind::Data { .. })
    }

    /// Relevant to the controller (data or repair).
    pub fn fec_related(&self) -> bool {
        !matches!(self.kind, SentKind::Plain)
    }
}

/// Packet-number-keyed log of packets awaiting feedback.
#[derive(Debug, Default)]
pub struct SentPacketLog {
    map: BTreeMap<u64, SentPacketInfo>,
}

impl SentPacketLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, pn: u64, info: SentPacketInfo) {
        self.map.insert(pn, info);
    }

    /// Consume the entry for an acked or lost packet. `None` when the packet
    /// was already processed (idempotence).
    pub fn take(&mut self, pn: u64) -> Option<SentPacketInfo> {
        self.map.remove(&pn)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Entry of the lost-packet table.
#[derive(Debug, Clone, Copy)]
pub struct LostPacket {
    pub slot: u64,
    pub first_id: SymbolId,
    pub n_symbols: u16,
}

impl LostPacket {
    fn covers(&self, id: SymbolId) -> bool {
        let delta = id.wrapping_sub(self.first_id);
        delta < self.n_symbols as u32
    }
}

/// Packets declared lost whose symbols may still be rescued by FEC.
#[derive(Debug, Default)]
pub struct LostPacketTable {
    map: BTreeMap<u64, LostPacket>,
}

impl LostPacketTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pn: u64, entry: LostPacket) {
        self.map.insert(pn, entry);
    }

    /// A late ACK for `pn`: the peer got it after all (possibly via FEC).
    pub fn dequeue(&mut self, pn: u64) -> Option<LostPacket> {
        self.map.remove(&pn)
    }

    /// A peer `RECOVERED` frame named `id`: find and consume the packet that
    /// carried it.
    pub fn dequeue_by_symbol(&mut self, id: SymbolId) -> Option<(u64, LostPacket)> {
        let pn = self
            .map
            .iter()
            .find(|(_, lp)| lp.covers(id))
            .map(|(&pn, _)| pn)?;
        self.map.remove(&pn).map(|lp| (pn, lp))
    }

    /// Drop entries whose symbols fell below the window.
    pub fn prune_below(&mut self, smallest_in_transit: SymbolId) {
        self.map.retain(|_, lp| {
            lp.first_id.wrapping_add(lp.n_symbols as u32) > smallest_in_transit
        });
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sent_log_take_is_idempotent() {
        let mut log = SentPacketLog::new();
        log.record(
            10,
            SentPacketInfo {
                slot: 3,
                kind: SentKind::Data {
                    first_id: 7,
                    n_symbols: 1,
                },
            },
        );
        assert!(log.take(10).is_some());
        assert!(log.take(10).is_none(), "second take finds nothing");
    }

    #[test]
    fn kind_classification() {
        let data = SentPacketInfo {
            slot: 0,
            kind: SentKind::Data {
                first_id: 1,
                n_symbols: 2,
            },
        };
        let repair = SentPacketInfo {
            slot: 1,
            kind: SentKind::Repair { fb_fec: false },
        };
        let plain = SentPacketInfo {
            slot: 2,
            kind: SentKind::Plain,
        };
        assert!(data.fec_protected() && data.fec_related());
        assert!(!repair.fec_protected() && repair.fec_related());
        assert!(!plain.fec_protected() && !plain.fec_related());
    }

    #[test]
    fn lost_table_lookup_by_symbol() {
        let mut table = LostPacketTable::new();
        table.add(
            100,
            LostPacket {
                slot: 5,
                first_id: 40,
                n_symbols: 3,
            },
        );
        assert!(table.dequeue_by_symbol(39).is_none());
        let (pn, lp) = table.dequeue_by_symbol(42).unwrap();
        assert_eq!(pn, 100);
        assert_eq!(lp.slot, 5);
        assert!(table.is_empty(), "entry consumed");
    }

    #[test]
    fn lost_table_prunes_out_of_window() {
        let mut table = LostPacketTable::new();
        table.add(
            1,
            LostPacket {
                slot: 0,
                first_id: 10,
                n_symbols: 1,
            },
        );
        table.add(
            2,
            LostPacket {
                slot: 1,
                first_id: 20,
                n_symbols: 1,
            },
        );
        table.prune_below(15);
        assert_eq!(table.len(), 1);
        assert!(table.dequeue(2).is_some());
    }
}
