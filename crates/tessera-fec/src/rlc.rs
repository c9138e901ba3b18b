//! # Random Linear Code over GF(256)
//!
//! A repair symbol is `Σ c_j · s_j` over the symbols currently in flight,
//! with coefficients drawn from a TinyMT-32 stream seeded by the slot number
//! (zero draws are promoted to 1 so every window symbol participates). The
//! seed travels in the scheme-specific field, so the receiver regenerates the
//! exact coefficient vector and never ships it on the wire.
//!
//! The decoder keeps a system of linear equations: each arriving repair adds
//! a row, each arriving source symbol eliminates a column, and Gaussian
//! elimination drains whatever became solvable. The code is densely coded and
//! non-MDS; it is sized for the single-symbol "plug" repairs the causal
//! controller emits.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::error::FecError;
use crate::gf256;
use crate::scheme::SourceSymbolView;
use crate::symbol::{RepairMetadata, RepairSymbol, SourceSymbol, SymbolId};

// ─── TinyMT-32 ──────────────────────────────────────────────────────────────

/// TinyMT-32 parameters used by the coefficient stream. These are part of the
/// wire contract: both endpoints must derive identical coefficients from a
/// slot number.
const TINYMT_MAT1: u32 = 0x8f70_11ee;
const TINYMT_MAT2: u32 = 0xfc78_ff1f;
const TINYMT_TMAT: u32 = 0x3793_fdff;

const TINYMT_MASK: u32 = 0x7fff_ffff;
const TINYMT_SH0: u32 = 1;
const TINYMT_SH1: u32 = 10;
const TINYMT_SH8: u32 = 8;
const MIN_LOOP: u32 = 8;
const PRE_LOOP: u32 = 8;

/// Deterministic 32-bit PRNG (TinyMT variant of the Mersenne Twister).
pub struct TinyMt32 {
    status: [u32; 4],
}

impl TinyMt32 {
    pub fn new(seed: u32) -> Self {
        let mut status = [seed, TINYMT_MAT1, TINYMT_MAT2, TINYMT_TMAT];
        for i in 1..MIN_LOOP {
            let prev = status[((i - 1) & 3) as usize];
            status[(i & 3) as usize] ^=
                i.wrapping_add(1_812_433_253u32.wrapping_mul(prev ^ (prev >> 30)));
        }
        // Period certification: the all-zero state is not allowed.
        if status[0] & TINYMT_MASK == 0 && status[1] == 0 && status[2] == 0 && status[3] == 0 {
            status = [b'T' as u32, b'I' as u32, b'N' as u32, b'Y' as u32];
        }
        let mut prng = TinyMt32 { status };
        for _ in 0..PRE_LOOP {
            prng.next_state();
        }
        prng
    }

    fn next_state(&mut self) {
        let mut x = (self.status[0] & TINYMT_MASK) ^ self.status[1] ^ self.status[2];
        let mut y = self.status[3];
        x ^= x << TINYMT_SH0;
        y ^= (y >> TINYMT_SH0) ^ x;
        self.status[0] = self.status[1];
        self.status[1] = self.status[2];
        self.status[2] = x ^ (y << TINYMT_SH1);
        self.status[3] = y;
        if y & 1 != 0 {
            self.status[1] ^= TINYMT_MAT1;
            self.status[2] ^= TINYMT_MAT2;
        }
    }

    fn temper(&self) -> u32 {
        let mut t0 = self.status[3];
        let t1 = self.status[0].wrapping_add(self.status[2] >> TINYMT_SH8);
        t0 ^= t1;
        if t1 & 1 != 0 {
            t0 ^ TINYMT_TMAT
        } else {
            t0
        }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.next_state();
        self.temper()
    }
}

/// Coefficient vector for `n` window symbols from the given seed.
/// Zero draws are promoted to 1.
pub fn coefficients(seed: u32, n: usize) -> Vec<u8> {
    let mut prng = TinyMt32::new(seed);
    (0..n)
        .map(|_| {
            let c = prng.next_u32() as u8;
            if c == 0 {
                1
            } else {
                c
            }
        })
        .collect()
}

// ─── Sender half ────────────────────────────────────────────────────────────

/// Sender-side RLC scheme.
pub struct RlcSender;

impl RlcSender {
    pub fn new() -> Self {
        RlcSender
    }

    /// Generate `r` coded symbols over the window, seeding the i-th from
    /// `slot + i` so each carries its own reproducible coefficient vector.
    pub fn generate(
        &mut self,
        symbols: &[&SourceSymbol],
        first_id: SymbolId,
        r: u16,
        symbol_size: usize,
        slot: u64,
    ) -> Result<Vec<RepairSymbol>, FecError> {
        let k = symbols.len() as u16;
        if k == 0 || r == 0 {
            return Err(FecError::UnexpectedState("empty code parameters"));
        }

        let mut out = Vec::with_capacity(r as usize);
        for i in 0..r as u32 {
            let seed = (slot as u32).wrapping_add(i);
            let coefs = coefficients(seed, k as usize);

            let mut payload = vec![0u8; symbol_size];
            for (j, sym) in symbols.iter().enumerate() {
                gf256::madd_slice(&mut payload, coefs[j], sym.whole_data());
            }

            out.push(RepairSymbol {
                metadata: RepairMetadata {
                    first_id,
                    n_protected: k,
                    fss: seed,
                    is_fb_fec: false,
                },
                payload,
            });
        }
        Ok(out)
    }
}

impl Default for RlcSender {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Receiver half ──────────────────────────────────────────────────────────

/// One buffered repair equation, with coefficients aligned to `window_start`.
#[derive(Clone)]
struct Equation {
    coeffs: Vec<u8>,
    data: Vec<u8>,
}

/// Receiver-side RLC scheme: a Gaussian-elimination system over the ids the
/// buffered equations cover.
pub struct RlcReceiver {
    rows: Vec<Equation>,
    window_start: SymbolId,
    window_len: usize,
    /// Symbols this decoder itself restored (kept so late equations reduce).
    recovered_blocks: BTreeMap<SymbolId, Vec<u8>>,
    recovered: Vec<SourceSymbol>,
    /// Bound on buffered equations; oldest-covering rows go first.
    max_rows: usize,
}

const DEFAULT_MAX_ROWS: usize = 256;

impl RlcReceiver {
    pub fn new() -> Self {
        RlcReceiver {
            rows: Vec::new(),
            window_start: 0,
            window_len: 0,
            recovered_blocks: BTreeMap::new(),
            recovered: Vec::new(),
            max_rows: DEFAULT_MAX_ROWS,
        }
    }

    /// A directly received source symbol eliminates its column from every
    /// buffered equation.
    pub fn receive_source_symbol(&mut self, ss: &SourceSymbol) -> Result<(), FecError> {
        self.reduce_all_with(ss.id, ss.whole_data());
        self.try_recover();
        Ok(())
    }

    /// Buffer a repair equation and attempt recovery.
    pub fn receive_repair_symbol(
        &mut self,
        rs: &RepairSymbol,
        sources: &dyn SourceSymbolView,
    ) -> Result<(), FecError> {
        let md = rs.metadata;
        let k = md.n_protected as usize;
        if k == 0 {
            return Err(FecError::UnexpectedState("repair protects nothing"));
        }

        if self.rows.is_empty() && self.recovered_blocks.is_empty() {
            self.window_start = md.first_id;
            self.window_len = 0;
        }
        // Grow the coordinate system to cover this equation.
        let coded_end = md.first_id.wrapping_add(md.n_protected as u32);
        let current_end = self.window_start.wrapping_add(self.window_len as u32);
        if coded_end > current_end {
            self.window_len = (coded_end - self.window_start) as usize;
            for row in &mut self.rows {
                row.coeffs.resize(self.window_len, 0);
            }
        }

        let coefs = coefficients(md.seed(), k);
        let mut full = vec![0u8; self.window_len];
        let mut data = rs.payload.clone();
        for (j, &c) in coefs.iter().enumerate() {
            let id = md.first_id.wrapping_add(j as u32);
            if id < self.window_start {
                // Below the coordinate origin: the symbol must be known, or
                // the equation can no longer be represented.
                match sources.whole_data(id) {
                    Some(block) => gf256::madd_slice(&mut data, c, block),
                    None => {
                        trace!(id, "repair references an evicted symbol, dropping");
                        return Ok(());
                    }
                }
            } else {
                full[(id - self.window_start) as usize] = c;
            }
        }

        // Cancel out everything already known.
        for (i, c) in full.iter_mut().enumerate() {
            if *c == 0 {
                continue;
            }
            let id = self.window_start.wrapping_add(i as u32);
            let known = sources
                .whole_data(id)
                .or_else(|| self.recovered_blocks.get(&id).map(|v| v.as_slice()));
            if let Some(block) = known {
                gf256::madd_slice(&mut data, *c, block);
                *c = 0;
            }
        }

        if full.iter().all(|&c| c == 0) {
            trace!(first_id = md.first_id, "repair carried no new information");
            return Ok(());
        }

        if self.rows.len() == self.max_rows {
            self.rows.remove(0);
        }
        self.rows.push(Equation { coeffs: full, data });
        self.try_recover();
        Ok(())
    }

    /// Reduce every equation with a now-known block for `id`.
    fn reduce_all_with(&mut self, id: SymbolId, block: &[u8]) {
        let col = id.wrapping_sub(self.window_start) as usize;
        if col >= self.window_len {
            return;
        }
        for row in &mut self.rows {
            let c = row.coeffs[col];
            if c != 0 {
                gf256::madd_slice(&mut row.data, c, block);
                row.coeffs[col] = 0;
            }
        }
        self.rows.retain(|r| r.coeffs.iter().any(|&c| c != 0));
    }

    /// Gauss-Jordan over the buffered rows; fully reduced unit rows yield
    /// recovered symbols. Failure is silent (rows stay buffered).
    fn try_recover(&mut self) {
        let n = self.window_len;
        if n == 0 || self.rows.is_empty() {
            return;
        }

        let max_len = self.rows.iter().map(|r| r.data.len()).max().unwrap_or(0);
        for row in &mut self.rows {
            row.data.resize(max_len, 0);
        }

        let mut pivot_row = 0usize;
        let mut pivot_cols: Vec<Option<usize>> = vec![None; n];

        for col in 0..n {
            let found = (pivot_row..self.rows.len()).find(|&ri| self.rows[ri].coeffs[col] != 0);
            let ri = match found {
                Some(ri) => ri,
                None => continue,
            };
            self.rows.swap(pivot_row, ri);

            let inv = gf256::inv(self.rows[pivot_row].coeffs[col]);
            gf256::mul_slice(&mut self.rows[pivot_row].coeffs, inv);
            gf256::mul_slice(&mut self.rows[pivot_row].data, inv);

            let (pivot_coeffs, pivot_data) = {
                let row = &self.rows[pivot_row];
                (row.coeffs.clone(), row.data.clone())
            };
            for (other, row) in self.rows.iter_mut().enumerate() {
                if other == pivot_row {
                    continue;
                }
                let factor = row.coeffs[col];
                if factor == 0 {
                    continue;
                }
                gf256::madd_slice(&mut row.coeffs, factor, &pivot_coeffs);
                gf256::madd_slice(&mut row.data, factor, &pivot_data);
            }

            pivot_cols[col] = Some(pivot_row);
            pivot_row += 1;
        }

        let mut solved: Vec<(usize, SymbolId)> = Vec::new();
        for (col, prow) in pivot_cols.iter().enumerate() {
            let prow = match prow {
                Some(p) => *p,
                None => continue,
            };
            let is_unit = self.rows[prow]
                .coeffs
                .iter()
                .enumerate()
                .all(|(j, &c)| if j == col { c == 1 } else { c == 0 });
            if is_unit {
                solved.push((prow, self.window_start.wrapping_add(col as u32)));
            }
        }

        // Highest row index first so removals do not shift pending ones.
        solved.sort_by(|a, b| b.0.cmp(&a.0));
        for (prow, id) in solved {
            let row = self.rows.remove(prow);
            if self.recovered_blocks.contains_key(&id) {
                continue;
            }
            match SourceSymbol::from_recovered(id, row.data) {
                Some(ss) => {
                    debug!(id, "rlc recovered source symbol");
                    self.recovered_blocks.insert(id, ss.whole_data().to_vec());
                    self.recovered.push(ss);
                }
                None => trace!(id, "rlc solution failed self-check"),
            }
        }
    }

    /// Drain symbols recovered since the last call.
    pub fn drain_recovered(&mut self) -> Vec<SourceSymbol> {
        std::mem::take(&mut self.recovered)
    }

    /// Drop equations and cached blocks at or below the contiguous frontier,
    /// and advance the coordinate origin past it.
    pub fn remove_unused(&mut self, highest_contiguous: SymbolId) {
        self.recovered_blocks
            .retain(|&id, _| id > highest_contiguous);
        if self.window_len == 0 || highest_contiguous < self.window_start {
            return;
        }

        // Columns at or below the frontier are dropped.
        let cut = (highest_contiguous - self.window_start) as usize + 1;
        if cut >= self.window_len {
            self.rows.clear();
            self.window_len = 0;
            self.window_start = highest_contiguous.wrapping_add(1);
            return;
        }

        // A row is stale if nothing it covers lies beyond the frontier. The
        // surviving rows have all-zero prefixes (everything at or below a
        // contiguously received frontier is known, hence already cancelled).
        self.rows.retain(|row| {
            row.coeffs.iter().skip(cut).any(|&c| c != 0)
                && row.coeffs.iter().take(cut).all(|&c| c == 0)
        });
        for row in &mut self.rows {
            row.coeffs.drain(..cut);
        }
        self.window_start = highest_contiguous.wrapping_add(1);
        self.window_len -= cut;
    }
}

impl Default for RlcReceiver {
    fn default() -> Self {
        Self::new()
    }
}
