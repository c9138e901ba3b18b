//! # Connection-owned FEC context
//!
//! `FecSession` is the single object the host transport talks to. It owns the
//! sender window, repair queue, coding schemes, redundancy controller,
//! receiver buffers, sent/lost packet tables and the SACK list — components
//! exchange ids and slots, never pointers to each other.
//!
//! The host drives the session from its connection event loop:
//!
//! 1. `on_send_opportunity` before every send decides what the slot carries
//!    (and hands back an encoded FEC frame when it is a repair);
//! 2. `on_packet_sent` accounts the slot once the packet is out;
//! 3. `on_ack_range` / `on_packet_lost` feed the feedback path;
//! 4. incoming frames go through `on_source_packet` / `on_repair_frame` /
//!    `on_recovered_frame`;
//! 5. `drain_events` yields frame reservations, recovered-payload injections
//!    and wake requests.

use std::rc::Rc;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::ack::{LostPacket, LostPacketTable, SentKind, SentPacketInfo, SentPacketLog};
use crate::controller::{
    ControllerKind, Decision, PathMetrics, ProtectParams, RedundancyController, WindowView,
};
use crate::error::FecError;
use crate::recovery::ReceiverFec;
use crate::reed_solomon::RsCodec;
use crate::sack::SackList;
use crate::scheme::{ReceiverScheme, SchemeId, SenderScheme};
use crate::stats::{ReceiverFecStats, SenderFecStats};
use crate::symbol::{SourceSymbol, SymbolId, CHUNK_PREFIX_LEN};
use crate::window::{RepairQueue, SenderWindow};
use crate::wire::{decode_repair_frame, RecoveredFrame, REPAIR_FRAME_OVERHEAD};

// ─── Configuration ──────────────────────────────────────────────────────────

/// Session parameters fixed at handshake.
#[derive(Debug, Clone)]
pub struct FecConfig {
    /// Symbol size S in bytes. Even, immutable per connection.
    pub symbol_size: u16,
    /// Window capacity W (≥ 2× BDP in symbols).
    pub window_capacity: usize,
    pub scheme: SchemeId,
    pub controller: ControllerKind,
    /// Budget for a reserved FEC frame (header + payload).
    pub max_frame_bytes: usize,
}

impl Default for FecConfig {
    fn default() -> Self {
        FecConfig {
            symbol_size: 1200,
            window_capacity: 64,
            scheme: SchemeId::ReedSolomonGf65536,
            controller: ControllerKind::Bulk,
            max_frame_bytes: 1500,
        }
    }
}

impl FecConfig {
    fn validate(&self) -> Result<(), FecError> {
        if self.symbol_size % 2 != 0 || (self.symbol_size as usize) <= CHUNK_PREFIX_LEN {
            return Err(FecError::ProtocolViolation("symbol size must be even"));
        }
        if self.window_capacity < 2 {
            return Err(FecError::ProtocolViolation("window capacity too small"));
        }
        if self.max_frame_bytes < REPAIR_FRAME_OVERHEAD + self.symbol_size as usize {
            return Err(FecError::ProtocolViolation("frame budget below symbol size"));
        }
        Ok(())
    }
}

// ─── Host-Facing Types ──────────────────────────────────────────────────────

/// Outcome of a send opportunity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendDecision {
    /// The slot should carry fresh application data.
    NewData,
    /// The slot should carry this encoded repair frame.
    Repair(Bytes),
    /// The slot should carry this encoded feedback-repair frame.
    FbRepair(Bytes),
    /// Nothing to send from the FEC side.
    Nothing,
}

/// Events for the host, drained after each entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// Register a pending frame with the packetizer (recovered-id frames).
    ReserveFrame { bytes: Bytes },
    /// Hand this payload to the QUIC decoder as if its packet had arrived.
    InjectRecovered { payload: Bytes },
    /// Advisory: poll `on_send_opportunity` again at this time.
    WakeAt(u64),
}

// ─── Session ────────────────────────────────────────────────────────────────

/// The FEC core of one connection.
pub struct FecSession {
    config: FecConfig,
    window: SenderWindow,
    repair_queue: RepairQueue,
    sender_scheme: SenderScheme,
    controller: RedundancyController,
    receiver: ReceiverFec,
    sent_log: SentPacketLog,
    lost_table: LostPacketTable,
    sacks: SackList,
    next_slot: u64,
    events: Vec<CoreEvent>,
    stats: SenderFecStats,
}

impl FecSession {
    pub fn new(config: FecConfig) -> Result<Self, FecError> {
        config.validate()?;

        // The RS field tables are shared between both halves.
        let rs_codec = Rc::new(RsCodec::new());
        let sender_scheme = SenderScheme::new(config.scheme, &rs_codec);
        let receiver_scheme = ReceiverScheme::new(config.scheme, &rs_codec);
        let receiver = ReceiverFec::new(receiver_scheme, config.window_capacity);

        Ok(FecSession {
            window: SenderWindow::new(config.window_capacity),
            repair_queue: RepairQueue::new(),
            sender_scheme,
            controller: RedundancyController::new(config.controller),
            receiver,
            sent_log: SentPacketLog::new(),
            lost_table: LostPacketTable::new(),
            sacks: SackList::new(),
            next_slot: 0,
            events: Vec::new(),
            stats: SenderFecStats::default(),
            config,
        })
    }

    /// The peer echoed its symbol size in its transport parameters.
    /// A mismatch is a connection error.
    pub fn on_handshake_done(&mut self, peer_symbol_size: u16) -> Result<(), FecError> {
        if peer_symbol_size != self.config.symbol_size {
            return Err(FecError::ProtocolViolation("symbol size mismatch"));
        }
        debug!(symbol_size = peer_symbol_size, "fec handshake complete");
        Ok(())
    }

    pub fn config(&self) -> &FecConfig {
        &self.config
    }

    // ─── Sender Path ────────────────────────────────────────────────────

    /// Register an outbound packet payload as a source symbol.
    /// Fails with `WindowFull` when the caller must throttle.
    pub fn protect_source_symbol(&mut self, payload: &[u8]) -> Result<SymbolId, FecError> {
        let max_chunk = self.config.symbol_size as usize - CHUNK_PREFIX_LEN;
        if payload.len() > max_chunk {
            return Err(FecError::FrameTooLarge {
                needed: payload.len(),
                available: max_chunk,
            });
        }
        let id = self
            .window
            .protect_source_symbol(payload, self.config.symbol_size as usize)?;
        self.stats.source_symbols_protected += 1;
        Ok(id)
    }

    /// Register a delivery deadline for the message starting at `first_id`
    /// (message-based controller; others ignore it).
    pub fn register_deadline(
        &mut self,
        deadline_us: u64,
        first_id: SymbolId,
        now: u64,
    ) -> Result<(), FecError> {
        self.controller.register_deadline(deadline_us, first_id, now)
    }

    /// Decide what the next congestion-controlled slot carries.
    pub fn on_send_opportunity(
        &mut self,
        now: u64,
        metrics: &PathMetrics,
    ) -> Result<SendDecision, FecError> {
        let window_full = self.window.is_full();
        let view = self.window_view();

        let mut decision = self
            .controller
            .what_to_send(metrics, &view, window_full, now);

        // A queued-but-unsent repair takes precedence over fresh generation.
        if decision == Decision::NewData && !self.repair_queue.is_empty() {
            decision = Decision::Repair;
        }

        // Rate controllers express protection through their params; probe
        // them whenever the slot is not already claimed.
        if decision == Decision::NewData && self.repair_queue.is_empty() {
            if let Some(params) = self.controller.protect_params(metrics, &view, now) {
                self.generate_and_queue_repair(params, false)?;
                decision = Decision::Repair;
            }
        }

        if let Some(t) = self.controller.take_wake_request() {
            self.events.push(CoreEvent::WakeAt(t));
        }

        match decision {
            Decision::NewData => Ok(SendDecision::NewData),
            Decision::Nothing => Ok(SendDecision::Nothing),
            Decision::Repair | Decision::FbRepair => {
                if self.repair_queue.is_empty() {
                    // Causal repair slot: code the whole in-flight window.
                    let params = match self.controller.protect_params(metrics, &view, now) {
                        Some(p) => p,
                        None => return Ok(SendDecision::NewData),
                    };
                    self.generate_and_queue_repair(params, decision == Decision::FbRepair)?;
                }
                match self.repair_queue.next_frame(self.config.max_frame_bytes) {
                    Ok(Some((frame, fb))) => {
                        let bytes = frame.freeze();
                        if fb {
                            Ok(SendDecision::FbRepair(bytes))
                        } else {
                            Ok(SendDecision::Repair(bytes))
                        }
                    }
                    Ok(None) => Ok(SendDecision::NewData),
                    Err(FecError::FrameTooLarge { .. }) => {
                        // Fully local: keep the symbol queued and yield.
                        Ok(SendDecision::Nothing)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Generate repair symbols for a batch and queue them for transmission.
    /// `fb` marks the batch as feedback repair (causal plugs).
    fn generate_and_queue_repair(
        &mut self,
        params: ProtectParams,
        fb: bool,
    ) -> Result<(), FecError> {
        let symbols = self
            .window
            .range(params.first_id, params.k)
            .ok_or(FecError::UnexpectedState("protected range left the window"))?;

        let mut repairs = self.sender_scheme.generate(
            &symbols,
            params.first_id,
            params.r,
            self.config.symbol_size as usize,
            self.next_slot,
        )?;
        if fb {
            for rs in &mut repairs {
                rs.metadata.is_fb_fec = true;
            }
        }

        self.stats.repair_symbols_generated += repairs.len() as u64;
        let before = self.repair_queue.len();
        let pushed = repairs.len();
        self.repair_queue.extend(repairs);
        let overwritten = (before + pushed).saturating_sub(self.repair_queue.len());
        if overwritten > 0 {
            warn!(overwritten, "repair queue overflow, redundancy lost");
            self.stats.repair_symbols_dropped += overwritten as u64;
        }
        Ok(())
    }

    /// A congestion-controlled packet left the endpoint. Assigns its slot.
    pub fn on_packet_sent(&mut self, pn: u64, kind: SentKind, now: u64) {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.sent_log.record(pn, SentPacketInfo { slot, kind });

        let view = self.window_view();
        match kind {
            SentKind::Data {
                first_id,
                n_symbols,
            } => {
                for i in 0..n_symbols {
                    self.window.symbol_sent(first_id.wrapping_add(i as u32));
                }
                self.controller
                    .sent_packet(Decision::NewData, slot, view, now);
            }
            SentKind::Repair { fb_fec } => {
                let decision = if fb_fec {
                    Decision::FbRepair
                } else {
                    Decision::Repair
                };
                self.controller.sent_packet(decision, slot, view, now);
                self.stats.repair_symbols_sent += 1;
                if fb_fec {
                    self.stats.fb_fec_sent += 1;
                }
            }
            SentKind::Plain => {
                // A slot passed without any feedback-worthy payload.
                self.controller.free_slot_without_feedback();
            }
        }
    }

    /// Process one range of an incoming ACK frame. Ranges are handed in
    /// highest-first; re-processing a range is a no-op.
    pub fn on_ack_range(&mut self, highest: u64, range_len: u64) {
        for off in 0..range_len {
            let pn = match highest.checked_sub(off) {
                Some(pn) => pn,
                None => break,
            };

            if let Some(lp) = self.lost_table.dequeue(pn) {
                // Declared lost, but the peer got it after all.
                debug!(pn, "late ack rescued lost packet");
                self.land_symbols(lp.first_id, lp.n_symbols, true);
                self.controller.slot_acked(lp.slot);
                self.stats.lost_packets_rescued += 1;
                continue;
            }

            if let Some(info) = self.sent_log.take(pn) {
                match info.kind {
                    SentKind::Data {
                        first_id,
                        n_symbols,
                    } => {
                        self.land_symbols(first_id, n_symbols, true);
                        self.controller.slot_acked(info.slot);
                    }
                    SentKind::Repair { .. } => self.controller.slot_acked(info.slot),
                    SentKind::Plain => {}
                }
            }
        }

        self.lost_table.prune_below(self.window.smallest_in_transit());
    }

    /// The host's loss detector declared a packet lost.
    pub fn on_packet_lost(&mut self, pn: u64) {
        let info = match self.sent_log.take(pn) {
            Some(info) => info,
            None => return,
        };
        match info.kind {
            SentKind::Data {
                first_id,
                n_symbols,
            } => {
                // The symbols stay in the window: the peer may still recover
                // them from repair symbols in flight.
                self.lost_table.add(
                    pn,
                    LostPacket {
                        slot: info.slot,
                        first_id,
                        n_symbols,
                    },
                );
                self.stats.packets_declared_lost += 1;
                self.controller.slot_nacked(info.slot);
            }
            SentKind::Repair { .. } => self.controller.slot_nacked(info.slot),
            SentKind::Plain => {}
        }
    }

    /// The peer announced symbols it recovered out-of-band. Each id counts
    /// as an ACK of the packet that carried it, minus the RTT sample.
    pub fn on_frame_recovered(&mut self, ids: &[SymbolId]) {
        for &id in ids {
            if let Some((pn, lp)) = self.lost_table.dequeue_by_symbol(id) {
                debug!(pn, id, "peer recovered symbol of lost packet");
                self.land_symbols(lp.first_id, lp.n_symbols, true);
                self.controller.slot_acked(lp.slot);
                self.stats.lost_packets_rescued += 1;
            } else {
                self.window.symbol_landed(id, true);
            }
        }
        self.lost_table.prune_below(self.window.smallest_in_transit());
    }

    /// Sender side of a received `RECOVERED` frame.
    pub fn on_recovered_frame(&mut self, buf: &mut impl Buf) -> Result<(), FecError> {
        let frame = RecoveredFrame::decode(buf)?;
        self.on_frame_recovered(&frame.ids);
        Ok(())
    }

    fn land_symbols(&mut self, first_id: SymbolId, n_symbols: u16, received: bool) {
        for i in 0..n_symbols {
            self.window
                .symbol_landed(first_id.wrapping_add(i as u32), received);
        }
    }

    fn window_view(&self) -> WindowView {
        if self.window.is_empty() {
            WindowView { start: 0, end: 0 }
        } else {
            WindowView {
                start: self.window.smallest_in_transit(),
                end: self.window.highest_in_transit().wrapping_add(1),
            }
        }
    }

    // ─── Receiver Path ──────────────────────────────────────────────────

    /// Record a received 1-RTT packet number. Returns `true` on duplicates.
    pub fn on_packet_received(&mut self, pn: u64, now: u64) -> bool {
        self.sacks.record_pn_received(pn, now)
    }

    /// A packet announced source symbols: `first_id` from its
    /// source-symbol-ID frame, the packet payload constituting the symbols.
    pub fn on_source_packet(
        &mut self,
        first_id: SymbolId,
        n_symbols: u16,
        payload: &[u8],
    ) -> Result<(), FecError> {
        if n_symbols == 0 {
            return Err(FecError::ProtocolViolation("empty source-id frame"));
        }
        let chunk_max = self.config.symbol_size as usize - CHUNK_PREFIX_LEN;
        if payload.len() > n_symbols as usize * chunk_max {
            return Err(FecError::ProtocolViolation("payload exceeds symbol range"));
        }

        for i in 0..n_symbols {
            let lo = (i as usize * chunk_max).min(payload.len());
            let hi = ((i as usize + 1) * chunk_max).min(payload.len());
            let ss = SourceSymbol::new(
                first_id.wrapping_add(i as u32),
                &payload[lo..hi],
                self.config.symbol_size as usize,
            );
            let recovered = self.receiver.on_source_symbol(ss)?;
            self.publish_recovered(recovered);
        }
        Ok(())
    }

    /// A FEC frame arrived; `buf` points just past the frame-type byte.
    pub fn on_repair_frame(&mut self, buf: &mut impl Buf) -> Result<(), FecError> {
        let rs = decode_repair_frame(buf, self.config.symbol_size as usize)?;
        let recovered = self.receiver.on_repair_symbol(rs)?;
        self.publish_recovered(recovered);
        Ok(())
    }

    /// The host's ACK emitter advanced its cumulative ack: drop receiver
    /// state that can no longer contribute.
    pub fn prune_receiver_state(&mut self) {
        if let Some(frontier) = self.receiver.sources().highest_contiguous() {
            self.receiver.remove_unused(frontier);
        }
    }

    fn publish_recovered(&mut self, recovered: Vec<SourceSymbol>) {
        if recovered.is_empty() {
            return;
        }
        for ss in &recovered {
            self.events.push(CoreEvent::InjectRecovered {
                payload: Bytes::copy_from_slice(ss.chunk()),
            });
        }
        let ids = self.receiver.take_recovered_ids();
        if !ids.is_empty() {
            let frame = RecoveredFrame { ids };
            let mut buf = BytesMut::with_capacity(frame.encoded_len());
            frame.encode(&mut buf);
            self.events.push(CoreEvent::ReserveFrame {
                bytes: buf.freeze(),
            });
        }
    }

    // ─── Timers & Events ────────────────────────────────────────────────

    /// Periodic tick; returns the next wake deadline, if any.
    pub fn on_tick(&mut self, _now: u64) -> Option<u64> {
        let wake = self.controller.take_wake_request();
        if let Some(t) = wake {
            self.events.push(CoreEvent::WakeAt(t));
        }
        wake
    }

    /// Drain pending host events.
    pub fn drain_events(&mut self) -> Vec<CoreEvent> {
        std::mem::take(&mut self.events)
    }

    // ─── Introspection ──────────────────────────────────────────────────

    pub fn sacks(&self) -> &SackList {
        &self.sacks
    }

    pub fn sender_stats(&self) -> &SenderFecStats {
        &self.stats
    }

    pub fn receiver_stats(&self) -> &ReceiverFecStats {
        self.receiver.stats()
    }

    pub fn in_flight_symbols(&self) -> usize {
        self.window.len()
    }

    pub fn queued_repair_symbols(&self) -> usize {
        self.repair_queue.len()
    }

    pub fn n_fec_in_flight(&self) -> u64 {
        self.controller.n_fec_in_flight()
    }

    pub fn lost_packets_pending(&self) -> usize {
        self.lost_table.len()
    }

    /// Repair symbols buffered on the receiver side, pending recovery.
    pub fn receiver_buffered_repairs(&self) -> usize {
        self.receiver.repair_buffer_len()
    }
}
