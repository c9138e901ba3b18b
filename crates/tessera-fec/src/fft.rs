//! # Cyclotomic FFT over GF(65536)
//!
//! Computes selected components of a length-N discrete Fourier transform in
//! O(k·log²k) field operations. The trick: components whose indices share a
//! cyclotomic coset can be produced together from m accumulator symbols built
//! with XOR only (via the normal-basis representation of the twiddle
//! factors), followed by m² multiply-adds against the basis elements.
//!
//! `transform` feeds the RS syndrome (components 0..t of the information
//! polynomial evaluated at coset-structured positions); `partial_transform`
//! evaluates the repair evaluator polynomial at the negatives of the repair
//! cosets.

use crate::coset::{coset_size, next_coset_element, Coset, MAX_COSET_SIZE};
use crate::gf65536::{add_slice, Gf16, N};
use crate::symbol::SymbolSeq;

/// Compute the first `res.len()` DFT components of the sequence whose i-th
/// coefficient sits at position `positions[i]`.
///
/// `f[i]` are the coefficient symbols (all `symbol_size` long; zero-length
/// entries are treated as absent and contribute nothing).
pub fn transform(gf: &Gf16, f: &[&[u8]], positions: &[u16], res: &mut SymbolSeq) {
    debug_assert_eq!(f.len(), positions.len());

    let symbol_size = res.symbol_size();
    let mut calculated = vec![false; res.len()];
    let mut u = SymbolSeq::zeroed(MAX_COSET_SIZE, symbol_size);

    for s in 0..res.len() as u32 {
        if calculated[s as usize] {
            continue;
        }

        let m = coset_size(s as u16);

        for t in 0..m as usize {
            u.clear_symbol(t);
        }

        // Accumulate the coset's m partial sums with XOR only.
        for (i, sym) in f.iter().enumerate() {
            if sym.is_empty() {
                continue;
            }
            let repr = gf.normal_repr(m, (s * positions[i] as u32) % N);
            for t in 0..m as usize {
                if repr & (1 << t) != 0 {
                    add_slice(u.symbol_mut(t), sym);
                }
            }
        }

        // Expand the partial sums into every component of the coset that
        // falls below the requested bound.
        let mut idx = s as u16;
        for j in 0..m {
            if (idx as usize) < res.len() {
                res.clear_symbol(idx as usize);
                for t in 0..m {
                    let coef = gf.normal_basis_element(m, (j + t) % m);
                    gf.madd_slice(res.symbol_mut(idx as usize), coef, u.symbol(t as usize));
                }
                calculated[idx as usize] = true;
            }
            idx = next_coset_element(idx);
        }
        debug_assert_eq!(idx, s as u16);
    }
}

/// Evaluate the polynomial with coefficients `f[0..]` (at implicit positions
/// 0, 1, 2, ...) at the negatives of the given cosets, writing one component
/// per coset element into `res` in selection order.
pub fn partial_transform(gf: &Gf16, f: &[&[u8]], cosets: &[Coset], res: &mut SymbolSeq) {
    let symbol_size = res.symbol_size();
    let mut u = SymbolSeq::zeroed(MAX_COSET_SIZE, symbol_size);
    let mut idx = 0usize;

    for coset in cosets {
        let s = N - coset.leader as u32;
        let m = coset.size;

        for t in 0..m as usize {
            u.clear_symbol(t);
        }

        for (i, sym) in f.iter().enumerate() {
            if sym.is_empty() {
                continue;
            }
            let repr = gf.normal_repr(m, (s * i as u32) % N);
            for t in 0..m as usize {
                if repr & (1 << t) != 0 {
                    add_slice(u.symbol_mut(t), sym);
                }
            }
        }

        for j in 0..m {
            debug_assert!(idx < res.len());
            res.clear_symbol(idx);
            for t in 0..m {
                let coef = gf.normal_basis_element(m, (j + t) % m);
                gf.madd_slice(res.symbol_mut(idx), coef, u.symbol(t as usize));
            }
            idx += 1;
        }
    }

    debug_assert_eq!(idx, res.len());
}
