//! Encode-path benchmarks: Reed-Solomon batch generation and RLC
//! single-symbol generation over MTU-sized blocks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::rc::Rc;

use tessera_fec::reed_solomon::{RsCodec, RsSender};
use tessera_fec::rlc::RlcSender;
use tessera_fec::symbol::SourceSymbol;

const S: usize = 1200;

fn make_symbols(k: usize) -> Vec<SourceSymbol> {
    (0..k)
        .map(|i| {
            let payload: Vec<u8> = (0..S - 8).map(|j| (i * 31 + j) as u8).collect();
            SourceSymbol::new(1 + i as u32, &payload, S)
        })
        .collect()
}

fn bench_rs_encode(c: &mut Criterion) {
    let codec = Rc::new(RsCodec::new());
    let symbols = make_symbols(32);
    let refs: Vec<&SourceSymbol> = symbols.iter().collect();

    c.bench_function("rs_encode_k32_r4", |b| {
        let mut sender = RsSender::new(codec.clone());
        b.iter(|| {
            let repairs = sender.generate(black_box(&refs), 1, 4, S).unwrap();
            black_box(repairs);
        })
    });
}

fn bench_rlc_encode(c: &mut Criterion) {
    let symbols = make_symbols(32);
    let refs: Vec<&SourceSymbol> = symbols.iter().collect();

    c.bench_function("rlc_encode_k32_r1", |b| {
        let mut sender = RlcSender::new();
        let mut slot = 0u64;
        b.iter(|| {
            let repairs = sender
                .generate(black_box(&refs), 1, 1, S, slot)
                .unwrap();
            slot += 1;
            black_box(repairs);
        })
    });
}

criterion_group!(benches, bench_rs_encode, bench_rlc_encode);
criterion_main!(benches);
