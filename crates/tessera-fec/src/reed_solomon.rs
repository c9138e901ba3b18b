//! # Reed-Solomon over GF(65536)
//!
//! Block scheme: symbol positions are unions of cyclotomic cosets, chosen
//! greedily. Encoding computes the syndrome of the information polynomial via
//! the cyclotomic FFT, multiplies by the locator polynomial of the repair
//! positions, and derives repair values with Forney's formula. Decoding with
//! t erasures (t ≤ r) builds the erasure locator `Λ(x) = Π(1 + α^{p_i} x)`,
//! the evaluator `Ω = Λ·S mod x^t`, and restores position `p_i` as
//! `α^{p_i} · Ω(α^{-p_i}) / Λ'(α^{-p_i})`.
//!
//! Retransmission is the degenerate k = r = 1 case: the "repair" is the
//! source block itself, tagged `is_fb_fec`.

use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::coset::{cosets_to_positions, CosetTable};
use crate::error::FecError;
use crate::fft;
use crate::gf65536::{Gf16, N};
use crate::scheme::SourceSymbolView;
use crate::symbol::{RepairMetadata, RepairSymbol, SourceSymbol, SymbolId, SymbolSeq};

/// Default bound on repair equations buffered by the receiver.
const DEFAULT_MAX_BUFFERED_SYMBOLS: usize = 2000;

// ─── Codec (shared tables) ──────────────────────────────────────────────────

/// Field and coset tables shared by the sender and receiver halves.
pub struct RsCodec {
    gf: Gf16,
    cosets: CosetTable,
}

impl RsCodec {
    pub fn new() -> Self {
        RsCodec {
            gf: Gf16::new(),
            cosets: CosetTable::new(),
        }
    }

    /// `Λ(x) = Π_d (1 + α^{positions[d]} x)` into `locator`
    /// (length `positions.len() + 1`).
    fn locator_poly(&self, positions: &[u16], locator: &mut [u16]) {
        debug_assert!(locator.len() >= positions.len() + 1);
        locator.fill(0);
        locator[0] = 1;
        for (d, &pos) in positions.iter().enumerate() {
            let coef = self.gf.pow(pos as u32);
            for i in (1..=d + 1).rev() {
                locator[i] ^= self.gf.mul(locator[i - 1], coef);
            }
        }
    }

    /// Locator of all repair positions. Because the positions form whole
    /// cosets, every coefficient lands in GF(2), which the composition loop
    /// exploits (XOR-merge instead of full polynomial multiplication).
    fn repair_locator_poly(&self, r: u16, rep_cosets: &[crate::coset::Coset]) -> Vec<u16> {
        let mut locator = vec![0u16; r as usize + 1];
        locator[0] = 1;
        let mut d = 0usize;

        let mut coset_locator = vec![0u16; crate::coset::MAX_COSET_SIZE + 1];
        for coset in rep_cosets {
            let mut elements = Vec::with_capacity(coset.size as usize);
            let mut cur = coset.leader;
            for _ in 0..coset.size {
                elements.push(cur);
                cur = crate::coset::next_coset_element(cur);
            }
            self.locator_poly(&elements, &mut coset_locator[..coset.size as usize + 1]);

            for i in (0..=d).rev() {
                if locator[i] == 1 {
                    for j in 1..=coset.size as usize {
                        locator[i + j] ^= coset_locator[j];
                    }
                }
            }
            d += coset.size as usize;
            debug_assert_eq!(locator[d], 1);
        }
        debug_assert_eq!(d, r as usize);
        locator
    }

    /// Forney coefficient `α^{pos} / Λ'(α^{-pos})` for a locator of degree d.
    /// The derivative in characteristic 2 keeps only odd-power terms.
    fn forney_coef(&self, locator: &[u16], d: u16, pos: u16) -> u16 {
        let p = self.gf.pow(pos as u32);
        let mut q = 0u16;
        let mut j = 0u32;
        while j < d as u32 {
            let coef = locator[j as usize + 1];
            if coef != 0 {
                let term = self.gf.pow((j * (N - pos as u32)) % N);
                if coef == 1 {
                    q ^= term;
                } else {
                    q ^= self.gf.mul(term, coef);
                }
            }
            j += 2;
        }
        self.gf.div(p, q)
    }

    /// Produce `r` repair payloads for `k` information blocks.
    ///
    /// Precondition: `k + r <= N`; all blocks are `symbol_size` long.
    pub fn generate(&self, sources: &[&[u8]], symbol_size: usize, r: u16) -> Vec<Vec<u8>> {
        let k = sources.len() as u16;
        debug_assert!(k as u32 + r as u32 <= N);
        debug_assert!(r >= 1);

        let (inf_cosets, rep_cosets) = self.cosets.select(k, r);
        let inf_positions = cosets_to_positions(&inf_cosets, k as usize);
        let rep_positions = cosets_to_positions(&rep_cosets, r as usize);

        let mut syndrome = SymbolSeq::zeroed(r as usize, symbol_size);
        fft::transform(&self.gf, sources, &inf_positions, &mut syndrome);

        let locator = self.repair_locator_poly(r, &rep_cosets);

        // Ω = Λ·S mod x^r
        let mut evaluator = SymbolSeq::zeroed(r as usize, symbol_size);
        for i in 0..r as usize {
            let coef = locator[i];
            if coef == 0 {
                continue;
            }
            for j in 0..r as usize - i {
                self.gf
                    .madd_slice(evaluator.symbol_mut(i + j), coef, syndrome.symbol(j));
            }
        }

        let mut repair = SymbolSeq::zeroed(r as usize, symbol_size);
        let rows: Vec<&[u8]> = (0..evaluator.len()).map(|i| evaluator.symbol(i)).collect();
        fft::partial_transform(&self.gf, &rows, &rep_cosets, &mut repair);

        let mut out = repair.into_rows();
        for (i, row) in out.iter_mut().enumerate() {
            let coef = self.forney_coef(&locator, r, rep_positions[i]);
            self.gf.mul_slice(row, coef);
        }
        out
    }
}

impl Default for RsCodec {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Sender half ────────────────────────────────────────────────────────────

/// Sender-side RS scheme: turns a contiguous sub-window into repair symbols.
pub struct RsSender {
    codec: Rc<RsCodec>,
}

impl RsSender {
    pub fn new(codec: Rc<RsCodec>) -> Self {
        RsSender { codec }
    }

    /// Generate `r` repair symbols protecting `symbols` (ids contiguous from
    /// `first_id`). Any k of the k+r total suffice on the far side.
    pub fn generate(
        &mut self,
        symbols: &[&SourceSymbol],
        first_id: SymbolId,
        r: u16,
        symbol_size: usize,
    ) -> Result<Vec<RepairSymbol>, FecError> {
        let k = symbols.len() as u16;
        if k == 0 || r == 0 {
            return Err(FecError::UnexpectedState("empty code parameters"));
        }
        if k as u32 + r as u32 > N {
            return Err(FecError::UnexpectedState("k + r exceeds field order"));
        }

        // Retransmission path: the repair is the source block itself.
        if k == 1 && r == 1 {
            return Ok(vec![RepairSymbol {
                metadata: RepairMetadata {
                    first_id,
                    n_protected: 1,
                    fss: RepairMetadata::pack_rs(1, 0),
                    is_fb_fec: true,
                },
                payload: symbols[0].whole_data().to_vec(),
            }]);
        }

        let blocks: Vec<&[u8]> = symbols.iter().map(|s| s.whole_data()).collect();
        let payloads = self.codec.generate(&blocks, symbol_size, r);
        debug!(first_id, k, r, "generated repair batch");

        Ok(payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| RepairSymbol {
                metadata: RepairMetadata {
                    first_id,
                    n_protected: k,
                    fss: RepairMetadata::pack_rs(r, i as u16),
                    is_fb_fec: false,
                },
                payload,
            })
            .collect())
    }
}

// ─── Receiver half ──────────────────────────────────────────────────────────

/// On-the-fly decoding state for one protected range.
struct CodeData {
    first_id: SymbolId,
    k: u16,
    r: u16,
    /// Symbols still erased (missing sources + unseen repairs).
    t: u16,
    /// Codeword positions, information first, then repair.
    positions: Vec<u16>,
    erased: Vec<bool>,
    /// Syndrome rows; rewritten in place into the evaluator at decode time.
    poly: SymbolSeq,
}

impl CodeData {
    fn new(
        codec: &RsCodec,
        symbol_size: usize,
        first_id: SymbolId,
        k: u16,
        r: u16,
        sources: &dyn SourceSymbolView,
    ) -> Self {
        let (inf_cosets, rep_cosets) = codec.cosets.select(k, r);
        let mut positions = cosets_to_positions(&inf_cosets, k as usize);
        positions.extend(cosets_to_positions(&rep_cosets, r as usize));

        let mut erased = vec![false; (k + r) as usize];
        let mut t = 0u16;
        let mut blocks: Vec<&[u8]> = Vec::with_capacity(k as usize);
        for idx in 0..k {
            let id = first_id.wrapping_add(idx as u32);
            match sources.whole_data(id) {
                Some(block) => blocks.push(block),
                None => {
                    blocks.push(&[]);
                    erased[idx as usize] = true;
                    t += 1;
                }
            }
        }
        for idx in k..k + r {
            erased[idx as usize] = true;
            t += 1;
        }

        let mut poly = SymbolSeq::zeroed(r as usize, symbol_size);
        fft::transform(&codec.gf, &blocks, &positions[..k as usize], &mut poly);

        CodeData {
            first_id,
            k,
            r,
            t,
            positions,
            erased,
            poly,
        }
    }

    /// Account a newly arrived symbol (source or repair) at codeword index
    /// `i`, then decode if the erasure count has dropped to r.
    fn add_symbol_and_try_recover(
        &mut self,
        codec: &RsCodec,
        i: usize,
        data: &[u8],
        recovered: &mut Vec<SourceSymbol>,
    ) {
        if self.t <= self.r || !self.erased[i] {
            // Already decodable (or decoded); nothing left to accumulate.
            return;
        }
        self.erased[i] = false;
        self.t -= 1;

        let pos = self.positions[i] as u32;
        for j in 0..self.r as u32 {
            let coef = codec.gf.pow((pos * j) % N);
            codec.gf.madd_slice(self.poly.symbol_mut(j as usize), coef, data);
        }

        self.try_recover(codec, recovered);
    }

    fn try_recover(&mut self, codec: &RsCodec, recovered: &mut Vec<SourceSymbol>) {
        if self.t > self.r {
            return; // silent: not enough information yet
        }
        let t = self.t as usize;

        let erased_positions: Vec<u16> = self
            .erased
            .iter()
            .enumerate()
            .filter(|(_, &e)| e)
            .map(|(i, _)| self.positions[i])
            .collect();
        debug_assert_eq!(erased_positions.len(), t);

        let mut locator = vec![0u16; t + 1];
        codec.locator_poly(&erased_positions, &mut locator);

        // Evaluator Ω = Λ·S mod x^t, built in place over the syndrome rows
        // (descending i keeps untouched syndrome values where needed).
        for i in (0..t).rev() {
            let si = self.poly.symbol(i).to_vec();
            for j in 1..t - i {
                codec
                    .gf
                    .madd_slice(self.poly.symbol_mut(i + j), locator[j], &si);
            }
            codec.gf.mul_slice(self.poly.symbol_mut(i), locator[0]);
        }

        let symbol_size = self.poly.symbol_size();
        for pos_idx in 0..self.k as usize {
            if !self.erased[pos_idx] {
                continue;
            }
            let pos = self.positions[pos_idx] as u32;
            let forney = codec.forney_coef(&locator, t as u16, pos as u16);

            let mut block = vec![0u8; symbol_size];
            for i in 0..t {
                let coef = codec
                    .gf
                    .mul(forney, codec.gf.pow((i as u32 * (N - pos)) % N));
                codec.gf.madd_slice(&mut block, coef, self.poly.symbol(i));
            }

            let id = self.first_id.wrapping_add(pos_idx as u32);
            match SourceSymbol::from_recovered(id, block) {
                Some(ss) => {
                    debug!(id, "recovered source symbol");
                    recovered.push(ss);
                }
                None => warn!(id, "recovered block failed self-check, dropping"),
            }
        }
    }

}

/// Receiver-side RS scheme: accumulates source and repair symbols per
/// protected range, recovering erasures as soon as t ≤ r.
pub struct RsReceiver {
    codec: Rc<RsCodec>,
    max_symbols: usize,
    n_symbols: usize,
    /// key: last protected id.
    code_data: BTreeMap<SymbolId, CodeData>,
    /// Ids detected missing, ascending, with a recovered flag each.
    unknown: Vec<(SymbolId, bool)>,
    recovered: Vec<SourceSymbol>,
}

impl RsReceiver {
    pub fn new(codec: Rc<RsCodec>) -> Self {
        RsReceiver {
            codec,
            max_symbols: DEFAULT_MAX_BUFFERED_SYMBOLS,
            n_symbols: 0,
            code_data: BTreeMap::new(),
            unknown: Vec::new(),
            recovered: Vec::new(),
        }
    }

    /// Bound the number of buffered repair equations (peer-advertised).
    pub fn set_max_symbols(&mut self, max_symbols: usize) {
        self.max_symbols = max_symbols;
    }

    /// Accumulate a received source symbol.
    pub fn receive_source_symbol(&mut self, ss: &SourceSymbol) -> Result<(), FecError> {
        self.receive_source_data(ss.id, ss.whole_data())
    }

    fn receive_source_data(&mut self, id: SymbolId, data: &[u8]) -> Result<(), FecError> {
        let index = match self.unknown.iter().position(|&(u, _)| u == id) {
            // Below the tracked range (already contiguous) or above it
            // (nothing protects it yet): nothing to do.
            None => return Ok(()),
            Some(i) => i,
        };
        if self.unknown[index].1 {
            return Ok(()); // already recovered through coding
        }

        let (&last_protected, data_entry) = match self.code_data.range_mut(id..).next() {
            Some(e) => e,
            None => return Err(FecError::UnexpectedState("missing id without equations")),
        };
        if id < data_entry.first_id || id > last_protected {
            return Err(FecError::UnexpectedState("id outside ceiling range"));
        }

        let i = (id - data_entry.first_id) as usize;
        data_entry.add_symbol_and_try_recover(&self.codec, i, data, &mut self.recovered);
        self.unknown[index].1 = true;
        Ok(())
    }

    /// Accumulate a repair symbol; attempt recovery.
    pub fn receive_repair_symbol(
        &mut self,
        rs: &RepairSymbol,
        sources: &dyn SourceSymbolView,
    ) -> Result<(), FecError> {
        let md = rs.metadata;
        let k = md.n_protected;
        let r = md.n_repair();

        if md.is_fb_fec || (k == 1 && r == 1) {
            return self.receive_fb_fec(rs, sources);
        }

        let key = md.last_protected_id();
        if !self.code_data.contains_key(&key) {
            if self.n_symbols + r as usize > self.max_symbols {
                return Ok(()); // not enough free space in the buffer
            }

            let missing: Vec<SymbolId> = (0..k)
                .map(|i| md.first_id.wrapping_add(i as u32))
                .filter(|&id| !sources.contains(id))
                .collect();
            if missing.is_empty() {
                return Ok(()); // no unknown ids in the window, ignore
            }

            self.extend_unknown(&missing, sources)?;

            let data = CodeData::new(
                &self.codec,
                rs.payload.len(),
                md.first_id,
                k,
                r,
                sources,
            );
            self.code_data.insert(key, data);
            self.n_symbols += r as usize;
        }

        let i = (k + md.repair_index()) as usize;
        let entry = self
            .code_data
            .get_mut(&key)
            .expect("entry inserted above");
        entry.add_symbol_and_try_recover(&self.codec, i, &rs.payload, &mut self.recovered);
        Ok(())
    }

    fn receive_fb_fec(
        &mut self,
        rs: &RepairSymbol,
        sources: &dyn SourceSymbolView,
    ) -> Result<(), FecError> {
        let md = rs.metadata;
        if md.n_protected != 1 || md.n_repair() != 1 || md.repair_index() != 0 {
            return Err(FecError::UnexpectedState("malformed feedback repair"));
        }

        let id = md.first_id;
        if !sources.contains(id) {
            match SourceSymbol::from_recovered(id, rs.payload.clone()) {
                Some(ss) => {
                    debug!(id, "feedback repair recovered source symbol");
                    self.recovered.push(ss);
                }
                None => return Err(FecError::ProtocolViolation("bad feedback repair payload")),
            }
        }

        // Feed the block into any equation set that still counts it missing.
        self.receive_source_data(id, &rs.payload)
    }

    /// Track freshly observed gaps: every absent id between the end of the
    /// tracked range and each missing id of the new window.
    fn extend_unknown(
        &mut self,
        missing: &[SymbolId],
        sources: &dyn SourceSymbolView,
    ) -> Result<(), FecError> {
        for &current in missing {
            match self.unknown.last() {
                Some(&(last, _)) if current <= last => {
                    if current < self.unknown[0].0 {
                        return Err(FecError::UnexpectedState("gap below tracked range"));
                    }
                    // Already tracked.
                }
                last => {
                    let after_last = last.map(|&(l, _)| l.wrapping_add(1));
                    let start = match (after_last, sources.first_id()) {
                        (Some(a), Some(f)) => a.max(f),
                        (Some(a), None) => a,
                        (None, Some(f)) => f.min(current),
                        (None, None) => current,
                    };
                    for id in start..=current {
                        if !sources.contains(id) {
                            self.unknown.push((id, false));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Drain source symbols recovered since the last call.
    pub fn drain_recovered(&mut self) -> Vec<SourceSymbol> {
        std::mem::take(&mut self.recovered)
    }

    /// Drop every equation set fully below the contiguously received
    /// frontier, and the gap bookkeeping with it.
    pub fn remove_unused(&mut self, highest_contiguous: SymbolId) {
        if self.unknown.is_empty() || highest_contiguous < self.unknown[0].0 {
            return;
        }

        while let Some((&last_protected, entry)) = self.code_data.iter().next() {
            if highest_contiguous < last_protected {
                break;
            }
            self.n_symbols -= entry.r as usize;
            self.code_data.remove(&last_protected);
        }

        if self.code_data.is_empty() {
            self.unknown.clear();
        } else {
            self.unknown.retain(|&(id, _)| id > highest_contiguous);
        }
    }

    /// Number of repair equations currently buffered.
    pub fn buffered_symbols(&self) -> usize {
        self.n_symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct MapView(BTreeMap<SymbolId, Vec<u8>>);

    impl SourceSymbolView for MapView {
        fn contains(&self, id: SymbolId) -> bool {
            self.0.contains_key(&id)
        }
        fn whole_data(&self, id: SymbolId) -> Option<&[u8]> {
            self.0.get(&id).map(|v| v.as_slice())
        }
        fn first_id(&self) -> Option<SymbolId> {
            self.0.keys().next().copied()
        }
    }

    const S: usize = 32;

    fn make_symbols(first_id: SymbolId, k: usize) -> Vec<SourceSymbol> {
        (0..k)
            .map(|i| {
                let payload: Vec<u8> = (0..S - 8).map(|j| (i * 31 + j + 7) as u8).collect();
                SourceSymbol::new(first_id + i as u32, &payload, S)
            })
            .collect()
    }

    fn encode(symbols: &[SourceSymbol], first_id: SymbolId, r: u16) -> Vec<RepairSymbol> {
        let codec = Rc::new(RsCodec::new());
        let mut sender = RsSender::new(codec);
        let refs: Vec<&SourceSymbol> = symbols.iter().collect();
        sender.generate(&refs, first_id, r, S).unwrap()
    }

    fn view_without(symbols: &[SourceSymbol], drop: &[SymbolId]) -> MapView {
        MapView(
            symbols
                .iter()
                .filter(|s| !drop.contains(&s.id))
                .map(|s| (s.id, s.whole_data().to_vec()))
                .collect(),
        )
    }

    // ─── Encode Shape ───────────────────────────────────────────────────

    #[test]
    fn generate_produces_r_symbols_with_metadata() {
        let symbols = make_symbols(1, 8);
        let repairs = encode(&symbols, 1, 2);
        assert_eq!(repairs.len(), 2);
        for (i, rs) in repairs.iter().enumerate() {
            assert_eq!(rs.metadata.first_id, 1);
            assert_eq!(rs.metadata.n_protected, 8);
            assert_eq!(rs.metadata.n_repair(), 2);
            assert_eq!(rs.metadata.repair_index(), i as u16);
            assert!(!rs.metadata.is_fb_fec);
            assert_eq!(rs.payload.len(), S);
        }
    }

    #[test]
    fn retransmission_is_fb_fec_copy() {
        let symbols = make_symbols(5, 1);
        let repairs = encode(&symbols, 5, 1);
        assert_eq!(repairs.len(), 1);
        let rs = &repairs[0];
        assert!(rs.metadata.is_fb_fec);
        assert_eq!(rs.metadata.fss, RepairMetadata::pack_rs(1, 0));
        assert_eq!(rs.payload, symbols[0].whole_data());
    }

    // ─── Recovery Scenarios ─────────────────────────────────────────────

    #[test]
    fn no_loss_recovers_nothing() {
        let symbols = make_symbols(1, 8);
        let repairs = encode(&symbols, 1, 2);
        let view = view_without(&symbols, &[]);

        let mut rx = RsReceiver::new(Rc::new(RsCodec::new()));
        for rs in &repairs {
            rx.receive_repair_symbol(rs, &view).unwrap();
        }
        assert!(rx.drain_recovered().is_empty());
        assert_eq!(rx.buffered_symbols(), 0, "complete window is ignored");
    }

    #[test]
    fn single_loss_recovered() {
        let symbols = make_symbols(1, 8);
        let repairs = encode(&symbols, 1, 2);
        let view = view_without(&symbols, &[5]);

        let mut rx = RsReceiver::new(Rc::new(RsCodec::new()));
        rx.receive_repair_symbol(&repairs[0], &view).unwrap();

        let recovered = rx.drain_recovered();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].id, 5);
        assert_eq!(recovered[0].whole_data(), symbols[4].whole_data());
    }

    #[test]
    fn two_losses_recovered_with_two_repairs() {
        let symbols = make_symbols(1, 8);
        let repairs = encode(&symbols, 1, 2);
        let view = view_without(&symbols, &[3, 7]);

        let mut rx = RsReceiver::new(Rc::new(RsCodec::new()));
        rx.receive_repair_symbol(&repairs[0], &view).unwrap();
        assert!(rx.drain_recovered().is_empty(), "one repair is not enough");

        rx.receive_repair_symbol(&repairs[1], &view).unwrap();
        let mut recovered = rx.drain_recovered();
        recovered.sort_by_key(|s| s.id);
        assert_eq!(recovered.len(), 2);
        assert_eq!(recovered[0].id, 3);
        assert_eq!(recovered[0].whole_data(), symbols[2].whole_data());
        assert_eq!(recovered[1].id, 7);
        assert_eq!(recovered[1].whole_data(), symbols[6].whole_data());
    }

    #[test]
    fn three_losses_stay_pending_with_two_repairs() {
        let symbols = make_symbols(1, 8);
        let repairs = encode(&symbols, 1, 2);
        let view = view_without(&symbols, &[2, 4, 6]);

        let mut rx = RsReceiver::new(Rc::new(RsCodec::new()));
        for rs in &repairs {
            rx.receive_repair_symbol(rs, &view).unwrap();
        }
        assert!(rx.drain_recovered().is_empty());
        assert_eq!(rx.buffered_symbols(), 2, "repairs kept pending");
    }

    #[test]
    fn late_source_completes_recovery() {
        let symbols = make_symbols(1, 8);
        let repairs = encode(&symbols, 1, 2);
        // Three losses: beyond r=2 until one of them shows up late.
        let view = view_without(&symbols, &[2, 4, 6]);

        let mut rx = RsReceiver::new(Rc::new(RsCodec::new()));
        for rs in &repairs {
            rx.receive_repair_symbol(rs, &view).unwrap();
        }
        assert!(rx.drain_recovered().is_empty());

        // Id 4 arrives after all; the remaining two erasures become solvable.
        rx.receive_source_symbol(&symbols[3]).unwrap();
        let mut recovered = rx.drain_recovered();
        recovered.sort_by_key(|s| s.id);
        assert_eq!(
            recovered.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![2, 6]
        );
        assert_eq!(recovered[0].whole_data(), symbols[1].whole_data());
        assert_eq!(recovered[1].whole_data(), symbols[5].whole_data());
    }

    #[test]
    fn fb_fec_reconstructs_directly() {
        let symbols = make_symbols(9, 1);
        let repairs = encode(&symbols, 9, 1);
        let view = MapView(BTreeMap::new());

        let mut rx = RsReceiver::new(Rc::new(RsCodec::new()));
        rx.receive_repair_symbol(&repairs[0], &view).unwrap();
        let recovered = rx.drain_recovered();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].id, 9);
        assert_eq!(recovered[0].whole_data(), symbols[0].whole_data());
    }

    #[test]
    fn malformed_fb_fec_is_fatal() {
        let symbols = make_symbols(1, 8);
        let mut repairs = encode(&symbols, 1, 2);
        repairs[0].metadata.is_fb_fec = true; // k=8 but flagged as feedback
        let view = view_without(&symbols, &[5]);

        let mut rx = RsReceiver::new(Rc::new(RsCodec::new()));
        assert!(matches!(
            rx.receive_repair_symbol(&repairs[0], &view),
            Err(FecError::UnexpectedState(_))
        ));
    }

    // ─── Pruning & Bounds ───────────────────────────────────────────────

    #[test]
    fn remove_unused_drops_stale_equations() {
        let symbols = make_symbols(1, 8);
        let repairs = encode(&symbols, 1, 2);
        let view = view_without(&symbols, &[2, 4, 6]);

        let mut rx = RsReceiver::new(Rc::new(RsCodec::new()));
        for rs in &repairs {
            rx.receive_repair_symbol(rs, &view).unwrap();
        }
        assert_eq!(rx.buffered_symbols(), 2);

        rx.remove_unused(8);
        assert_eq!(rx.buffered_symbols(), 0);

        // A duplicate repair for the pruned window opens a fresh set; the
        // unknown list was reset so only genuinely absent ids get tracked.
        rx.remove_unused(100);
        assert_eq!(rx.buffered_symbols(), 0);
    }

    #[test]
    fn buffer_cap_ignores_new_windows() {
        let symbols = make_symbols(1, 8);
        let repairs = encode(&symbols, 1, 2);
        let view = view_without(&symbols, &[5]);

        let mut rx = RsReceiver::new(Rc::new(RsCodec::new()));
        rx.set_max_symbols(1);
        rx.receive_repair_symbol(&repairs[0], &view).unwrap();
        // r=2 exceeds the cap of 1; the window was never opened.
        assert_eq!(rx.buffered_symbols(), 0);
        assert!(rx.drain_recovered().is_empty());
    }
}
