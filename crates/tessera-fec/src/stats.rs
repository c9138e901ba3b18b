//! # FEC statistics
//!
//! Counters for both directions, serializable for export by the host.

use serde::Serialize;

// ─── Sender Stats ───────────────────────────────────────────────────────────

/// Sender-side FEC statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SenderFecStats {
    /// Source symbols admitted to the window.
    pub source_symbols_protected: u64,
    /// Repair symbols generated (all batches).
    pub repair_symbols_generated: u64,
    /// Repair symbols actually shipped in FEC frames.
    pub repair_symbols_sent: u64,
    /// Feedback repairs (single-symbol plugs) among those sent.
    pub fb_fec_sent: u64,
    /// Queued repair symbols overwritten before transmission.
    pub repair_symbols_dropped: u64,
    /// Packets the loss detector handed to the lost-packet table.
    pub packets_declared_lost: u64,
    /// Lost packets later confirmed received (late ACK or peer recovery).
    pub lost_packets_rescued: u64,
}

impl SenderFecStats {
    /// Redundancy actually put on the wire, relative to source symbols.
    pub fn redundancy_ratio(&self) -> f64 {
        if self.source_symbols_protected == 0 {
            0.0
        } else {
            self.repair_symbols_sent as f64 / self.source_symbols_protected as f64
        }
    }
}

// ─── Receiver Stats ─────────────────────────────────────────────────────────

/// Receiver-side FEC statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReceiverFecStats {
    /// Source symbols received in regular packets.
    pub source_symbols_received: u64,
    /// Repair symbols received in FEC frames.
    pub repair_symbols_received: u64,
    /// Duplicate symbols (either kind).
    pub duplicates: u64,
    /// Source symbols restored by the coding scheme.
    pub symbols_recovered: u64,
}

impl ReceiverFecStats {
    /// Fraction of delivered symbols that owe their delivery to FEC.
    pub fn recovery_ratio(&self) -> f64 {
        let delivered = self.source_symbols_received + self.symbols_recovered;
        if delivered == 0 {
            0.0
        } else {
            self.symbols_recovered as f64 / delivered as f64
        }
    }
}
