//! # tessera-fec
//!
//! Tessera windowed FEC core for a QUIC endpoint.
//!
//! A sliding window of source symbols (one per outbound 1-RTT packet) is
//! continuously protected by repair symbols from a pluggable coding scheme
//! (Reed-Solomon over GF(65536) or Random Linear Codes over GF(256)). A
//! redundancy controller decides, per send opportunity, whether the next slot
//! carries new data, a repair symbol, or a feedback-driven repair symbol.
//!
//! The crate is pure logic — no sockets, no timers, no async. The host
//! transport drives it through [`session::FecSession`] and drains
//! [`session::CoreEvent`]s.
//!
//! ## Crate structure
//!
//! - [`gf256`] / [`gf65536`] / [`coset`] / [`fft`] — Galois-field arithmetic
//!   and the cyclotomic FFT kernel
//! - [`symbol`] — source/repair symbol model
//! - [`scheme`] — pluggable coding-scheme dispatch
//! - [`reed_solomon`] / [`rlc`] — the two scheme realizations
//! - [`window`] — sender window and repair queue
//! - [`recovery`] — receiver buffers and symbol recovery
//! - [`controller`] — redundancy controllers (bulk, buffer-limited,
//!   message-based, causal)
//! - [`ack`] — ACK/loss integration and the lost-packet table
//! - [`sack`] — received packet-number ranges and the float16 ack delay
//! - [`wire`] — FEC frame serialization
//! - [`session`] — the connection-owned context tying everything together
//! - [`stats`] — sender/receiver statistics

pub mod ack;
pub mod controller;
pub mod coset;
pub mod error;
pub mod fft;
pub mod gf256;
pub mod gf65536;
pub mod recovery;
pub mod reed_solomon;
pub mod rlc;
pub mod sack;
pub mod scheme;
pub mod session;
pub mod stats;
pub mod symbol;
pub mod window;
pub mod wire;

pub use error::FecError;
pub use session::{CoreEvent, FecConfig, FecSession, SendDecision};
