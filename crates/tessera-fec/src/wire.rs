//! # FEC wire format
//!
//! Three frames, all fields in network byte order:
//!
//! ```text
//! Repair frame
//! +----+--------+------+-----+-----+-------+--------+---------+
//! | T  | first  | nprot| nrep| idx | fbfec | length | payload |
//! | u8 |  u32   | u16  | u16 | u16 |  u8   |  u16   |   S     |
//! +----+--------+------+-----+-----+-------+--------+---------+
//!
//! Source-symbol-ID frame:  T' | first_id:u32 | n_symbols:u16
//! Recovered frame:         T'' | count:u16 | ids: u32 × count
//! ```
//!
//! `nrep`/`idx` are the two halves of the 32-bit scheme-specific field: the
//! (n_repair, index) pair for Reed-Solomon, the PRNG seed for RLC. The frame
//! type bytes are host-assigned; the constants below are defaults.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::FecError;
use crate::symbol::{RepairMetadata, RepairSymbol, SymbolId};

/// Default frame-type byte for repair frames.
pub const REPAIR_FRAME_TYPE: u8 = 0x2D;
/// Default frame-type byte for source-symbol-ID frames.
pub const SOURCE_ID_FRAME_TYPE: u8 = 0x2E;
/// Default frame-type byte for recovered frames.
pub const RECOVERED_FRAME_TYPE: u8 = 0x2F;

/// Fixed overhead of a repair frame before the payload.
pub const REPAIR_FRAME_OVERHEAD: usize = 1 + 4 + 2 + 2 + 2 + 1 + 2;

// ─── Repair Frame ───────────────────────────────────────────────────────────

/// Serialize a repair symbol into a frame. `buf` grows as needed.
pub fn encode_repair_frame(rs: &RepairSymbol, buf: &mut BytesMut) {
    let md = rs.metadata;
    buf.put_u8(REPAIR_FRAME_TYPE);
    buf.put_u32(md.first_id);
    buf.put_u16(md.n_protected);
    buf.put_u16((md.fss >> 16) as u16);
    buf.put_u16(md.fss as u16);
    buf.put_u8(md.is_fb_fec as u8);
    buf.put_u16(rs.payload.len() as u16);
    buf.put_slice(&rs.payload);
}

/// Parse a repair frame body (after the type byte has been consumed).
///
/// `symbol_size` is the negotiated S; the declared payload length must not
/// exceed it and the payload is zero-extended to S.
pub fn decode_repair_frame(buf: &mut impl Buf, symbol_size: usize) -> Result<RepairSymbol, FecError> {
    if buf.remaining() < REPAIR_FRAME_OVERHEAD - 1 {
        return Err(FecError::ProtocolViolation("short repair frame"));
    }
    let first_id = buf.get_u32();
    let n_protected = buf.get_u16();
    let nrep = buf.get_u16();
    let idx = buf.get_u16();
    let fbfec = buf.get_u8();
    let length = buf.get_u16() as usize;

    if fbfec > 1 {
        return Err(FecError::ProtocolViolation("bad fb-fec flag"));
    }
    if n_protected == 0 {
        return Err(FecError::ProtocolViolation("repair protects nothing"));
    }
    if length > symbol_size {
        return Err(FecError::ProtocolViolation("repair payload exceeds symbol size"));
    }
    if buf.remaining() < length {
        return Err(FecError::ProtocolViolation("truncated repair payload"));
    }

    let mut payload = vec![0u8; symbol_size];
    buf.copy_to_slice(&mut payload[..length]);

    Ok(RepairSymbol {
        metadata: RepairMetadata {
            first_id,
            n_protected,
            fss: ((nrep as u32) << 16) | idx as u32,
            is_fb_fec: fbfec == 1,
        },
        payload,
    })
}

// ─── Source-Symbol-ID Frame ─────────────────────────────────────────────────

/// Announces the id range of the source symbols constituted by the packet
/// payload that follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceIdFrame {
    pub first_id: SymbolId,
    pub n_symbols: u16,
}

impl SourceIdFrame {
    pub const ENCODED_LEN: usize = 1 + 4 + 2;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(SOURCE_ID_FRAME_TYPE);
        buf.put_u32(self.first_id);
        buf.put_u16(self.n_symbols);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, FecError> {
        if buf.remaining() < Self::ENCODED_LEN - 1 {
            return Err(FecError::ProtocolViolation("short source-id frame"));
        }
        let first_id = buf.get_u32();
        let n_symbols = buf.get_u16();
        if n_symbols == 0 {
            return Err(FecError::ProtocolViolation("empty source-id frame"));
        }
        Ok(SourceIdFrame {
            first_id,
            n_symbols,
        })
    }
}

// ─── Recovered Frame ────────────────────────────────────────────────────────

/// Sorted list of source-symbol ids the receiver recovered out-of-band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredFrame {
    pub ids: Vec<SymbolId>,
}

impl RecoveredFrame {
    pub fn encoded_len(&self) -> usize {
        1 + 2 + 4 * self.ids.len()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        debug_assert!(self.ids.windows(2).all(|w| w[0] < w[1]));
        buf.put_u8(RECOVERED_FRAME_TYPE);
        buf.put_u16(self.ids.len() as u16);
        for &id in &self.ids {
            buf.put_u32(id);
        }
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, FecError> {
        if buf.remaining() < 2 {
            return Err(FecError::ProtocolViolation("short recovered frame"));
        }
        let count = buf.get_u16() as usize;
        if buf.remaining() < 4 * count {
            return Err(FecError::ProtocolViolation("truncated recovered frame"));
        }
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let id = buf.get_u32();
            if let Some(&last) = ids.last() {
                if id <= last {
                    return Err(FecError::ProtocolViolation("recovered ids not ascending"));
                }
            }
            ids.push(id);
        }
        Ok(RecoveredFrame { ids })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn repair_symbol(first_id: u32, n: u16, fss: u32, fb: bool, payload: Vec<u8>) -> RepairSymbol {
        RepairSymbol {
            metadata: RepairMetadata {
                first_id,
                n_protected: n,
                fss,
                is_fb_fec: fb,
            },
            payload,
        }
    }

    // ─── Repair Frame ───────────────────────────────────────────────────

    #[test]
    fn repair_frame_roundtrip() {
        let rs = repair_symbol(7, 8, RepairMetadata::pack_rs(2, 1), false, vec![0xAB; 32]);
        let mut buf = BytesMut::new();
        encode_repair_frame(&rs, &mut buf);
        assert_eq!(buf.len(), REPAIR_FRAME_OVERHEAD + 32);

        let mut cursor = buf.freeze();
        assert_eq!(cursor.get_u8(), REPAIR_FRAME_TYPE);
        let decoded = decode_repair_frame(&mut cursor, 32).unwrap();
        assert_eq!(decoded, rs);
        assert_eq!(decoded.metadata.n_repair(), 2);
        assert_eq!(decoded.metadata.repair_index(), 1);
    }

    #[test]
    fn repair_frame_pads_short_payload() {
        // length < S on the wire: decoded payload is zero-extended.
        let rs = repair_symbol(1, 1, RepairMetadata::pack_rs(1, 0), true, vec![0xCD; 8]);
        let mut buf = BytesMut::new();
        encode_repair_frame(&rs, &mut buf);
        let mut cursor = buf.freeze();
        let _ = cursor.get_u8();
        let decoded = decode_repair_frame(&mut cursor, 16).unwrap();
        assert_eq!(&decoded.payload[..8], &[0xCD; 8]);
        assert_eq!(&decoded.payload[8..], &[0; 8]);
    }

    #[test]
    fn repair_frame_rejects_oversize_payload() {
        let rs = repair_symbol(1, 4, 0, false, vec![0; 64]);
        let mut buf = BytesMut::new();
        encode_repair_frame(&rs, &mut buf);
        let mut cursor = buf.freeze();
        let _ = cursor.get_u8();
        assert!(matches!(
            decode_repair_frame(&mut cursor, 32),
            Err(FecError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn repair_frame_rejects_bad_flag() {
        let rs = repair_symbol(1, 4, 0, false, vec![0; 4]);
        let mut buf = BytesMut::new();
        encode_repair_frame(&rs, &mut buf);
        let mut raw = buf.to_vec();
        raw[1 + 4 + 2 + 2 + 2] = 2; // fbfec byte
        let mut cursor = &raw[1..];
        assert!(matches!(
            decode_repair_frame(&mut cursor, 4),
            Err(FecError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn repair_frame_truncated() {
        let rs = repair_symbol(1, 4, 0, false, vec![0; 16]);
        let mut buf = BytesMut::new();
        encode_repair_frame(&rs, &mut buf);
        let raw = buf.to_vec();
        let mut cursor = &raw[1..raw.len() - 3];
        assert!(matches!(
            decode_repair_frame(&mut cursor, 16),
            Err(FecError::ProtocolViolation(_))
        ));
    }

    // ─── Source-ID Frame ────────────────────────────────────────────────

    #[test]
    fn source_id_frame_roundtrip() {
        let frame = SourceIdFrame {
            first_id: 0xDEAD_BEEF,
            n_symbols: 3,
        };
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        assert_eq!(buf.len(), SourceIdFrame::ENCODED_LEN);
        let mut cursor = buf.freeze();
        assert_eq!(cursor.get_u8(), SOURCE_ID_FRAME_TYPE);
        assert_eq!(SourceIdFrame::decode(&mut cursor).unwrap(), frame);
    }

    #[test]
    fn source_id_frame_rejects_empty() {
        let mut buf = BytesMut::new();
        buf.put_u32(10);
        buf.put_u16(0);
        assert!(SourceIdFrame::decode(&mut buf.freeze()).is_err());
    }

    // ─── Recovered Frame ────────────────────────────────────────────────

    #[test]
    fn recovered_frame_roundtrip() {
        let frame = RecoveredFrame {
            ids: vec![5, 9, 10, 4000],
        };
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        assert_eq!(buf.len(), frame.encoded_len());
        let mut cursor = buf.freeze();
        assert_eq!(cursor.get_u8(), RECOVERED_FRAME_TYPE);
        assert_eq!(RecoveredFrame::decode(&mut cursor).unwrap(), frame);
    }

    #[test]
    fn recovered_frame_rejects_unsorted() {
        let mut buf = BytesMut::new();
        buf.put_u16(2);
        buf.put_u32(9);
        buf.put_u32(5);
        assert!(RecoveredFrame::decode(&mut buf.freeze()).is_err());
    }

    // ─── Property Tests ─────────────────────────────────────────────────

    proptest! {
        #[test]
        fn proptest_repair_roundtrip(
            first_id in any::<u32>(),
            n in 1u16..=512,
            fss in any::<u32>(),
            fb in any::<bool>(),
            len in 0usize..=64,
        ) {
            let symbol_size = 64;
            let mut payload = vec![0u8; symbol_size];
            for (i, b) in payload.iter_mut().enumerate().take(len) {
                *b = (i * 7 + 1) as u8;
            }
            let rs = repair_symbol(first_id, n, fss, fb, payload);
            let mut buf = BytesMut::new();
            encode_repair_frame(&rs, &mut buf);
            let mut cursor = buf.freeze();
            prop_assert_eq!(cursor.get_u8(), REPAIR_FRAME_TYPE);
            let decoded = decode_repair_frame(&mut cursor, symbol_size).unwrap();
            prop_assert_eq!(decoded, rs);
        }

        #[test]
        fn proptest_recovered_roundtrip(raw in proptest::collection::btree_set(any::<u32>(), 0..64)) {
            let frame = RecoveredFrame { ids: raw.into_iter().collect() };
            let mut buf = BytesMut::new();
            frame.encode(&mut buf);
            let mut cursor = buf.freeze();
            let _ = cursor.get_u8();
            prop_assert_eq!(RecoveredFrame::decode(&mut cursor).unwrap(), frame);
        }
    }
}
