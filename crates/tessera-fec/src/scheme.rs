//! # Coding-scheme dispatch
//!
//! Two scheme realizations, one contract: given k source symbols produce r
//! repair symbols such that any k of the k+r suffice to recover the sources;
//! accumulate received symbols on the far side and drain whatever became
//! recoverable. Dispatch is a tagged variant per side — no registries, no
//! vtables.

use std::rc::Rc;

use crate::error::FecError;
use crate::reed_solomon::{RsCodec, RsReceiver, RsSender};
use crate::rlc::{RlcReceiver, RlcSender};
use crate::symbol::{RepairSymbol, SourceSymbol, SymbolId};

/// Scheme identifier negotiated at handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchemeId {
    /// Block Reed-Solomon over GF(65536).
    ReedSolomonGf65536 = 0x01,
    /// Random Linear Code over GF(256), TinyMT coefficients.
    RlcGf256 = 0x02,
}

impl SchemeId {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(SchemeId::ReedSolomonGf65536),
            0x02 => Some(SchemeId::RlcGf256),
            _ => None,
        }
    }
}

/// Read access to the receiver's source-symbol buffer, as the schemes see it.
pub trait SourceSymbolView {
    fn contains(&self, id: SymbolId) -> bool;
    /// The full S-sized codeword block for a buffered id.
    fn whole_data(&self, id: SymbolId) -> Option<&[u8]>;
    /// Smallest buffered id.
    fn first_id(&self) -> Option<SymbolId>;
}

// ─── Sender side ────────────────────────────────────────────────────────────

/// Sender-side scheme state.
pub enum SenderScheme {
    ReedSolomon(RsSender),
    Rlc(RlcSender),
}

impl SenderScheme {
    /// Instantiate the sender half; the RS variant shares its field tables
    /// with a matching receiver via the codec handle.
    pub fn new(id: SchemeId, rs_codec: &Rc<RsCodec>) -> Self {
        match id {
            SchemeId::ReedSolomonGf65536 => SenderScheme::ReedSolomon(RsSender::new(rs_codec.clone())),
            SchemeId::RlcGf256 => SenderScheme::Rlc(RlcSender::new()),
        }
    }

    /// Produce `r` repair symbols for the contiguous symbols starting at
    /// `first_id`. `slot` seeds the RLC coefficient stream.
    pub fn generate(
        &mut self,
        symbols: &[&SourceSymbol],
        first_id: SymbolId,
        r: u16,
        symbol_size: usize,
        slot: u64,
    ) -> Result<Vec<RepairSymbol>, FecError> {
        match self {
            SenderScheme::ReedSolomon(s) => s.generate(symbols, first_id, r, symbol_size),
            SenderScheme::Rlc(s) => s.generate(symbols, first_id, r, symbol_size, slot),
        }
    }
}

// ─── Receiver side ──────────────────────────────────────────────────────────

/// Receiver-side scheme state.
pub enum ReceiverScheme {
    ReedSolomon(RsReceiver),
    Rlc(RlcReceiver),
}

impl ReceiverScheme {
    pub fn new(id: SchemeId, rs_codec: &Rc<RsCodec>) -> Self {
        match id {
            SchemeId::ReedSolomonGf65536 => {
                ReceiverScheme::ReedSolomon(RsReceiver::new(rs_codec.clone()))
            }
            SchemeId::RlcGf256 => ReceiverScheme::Rlc(RlcReceiver::new()),
        }
    }

    /// Accumulate a received source symbol.
    pub fn receive_source_symbol(&mut self, ss: &SourceSymbol) -> Result<(), FecError> {
        match self {
            ReceiverScheme::ReedSolomon(s) => s.receive_source_symbol(ss),
            ReceiverScheme::Rlc(s) => s.receive_source_symbol(ss),
        }
    }

    /// Accumulate a repair symbol; attempt recovery.
    pub fn receive_repair_symbol(
        &mut self,
        rs: &RepairSymbol,
        sources: &dyn SourceSymbolView,
    ) -> Result<(), FecError> {
        match self {
            ReceiverScheme::ReedSolomon(s) => s.receive_repair_symbol(rs, sources),
            ReceiverScheme::Rlc(s) => s.receive_repair_symbol(rs, sources),
        }
    }

    /// Drain source symbols recovered since the last call.
    pub fn drain_recovered(&mut self) -> Vec<SourceSymbol> {
        match self {
            ReceiverScheme::ReedSolomon(s) => s.drain_recovered(),
            ReceiverScheme::Rlc(s) => s.drain_recovered(),
        }
    }

    /// Drop scheme-internal state fully below the contiguous frontier.
    pub fn remove_unused(&mut self, highest_contiguous: SymbolId) {
        match self {
            ReceiverScheme::ReedSolomon(s) => s.remove_unused(highest_contiguous),
            ReceiverScheme::Rlc(s) => s.remove_unused(highest_contiguous),
        }
    }
}
