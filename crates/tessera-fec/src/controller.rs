//! # Redundancy controllers
//!
//! A controller decides, for every send opportunity, whether the slot should
//! carry new data, a repair symbol, or a feedback repair — and with which
//! `(first_id, k, r)`. All decisions are pure functions of the path metrics,
//! the current window, the current time and the controller's own state.
//!
//! Loss parameters arrive at a fixed-point `GRANULARITY` G: `loss/G` is the
//! estimated loss fraction, `G/gemodel_p` the mean gap between loss bursts,
//! `G/gemodel_r` the mean burst length (Gilbert-Elliott model).

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::error::FecError;
use crate::symbol::SymbolId;

/// Fixed-point denominator for loss-rate parameters.
pub const GRANULARITY: u64 = 1000;

/// Extra slack subtracted from a deadline before FEC becomes urgent.
const DEADLINE_CRITICAL_THRESHOLD_US: u64 = 5_000;

/// Deadlines further ahead than this are rejected as nonsensical.
const MAX_DEADLINE_AHEAD_US: u64 = 1 << 32;

#[inline]
fn div_ceil(a: u64, b: u64) -> u64 {
    debug_assert!(b > 0);
    (a + b - 1) / b
}

// ─── Inputs ─────────────────────────────────────────────────────────────────

/// Loss estimate at granularity G.
#[derive(Debug, Clone, Copy, Default)]
pub struct LossEstimate {
    /// Loss rate × G.
    pub loss: u64,
    /// Gilbert-Elliott p (good→bad transition) × G.
    pub gemodel_p: u64,
    /// Gilbert-Elliott r (bad→good transition) × G.
    pub gemodel_r: u64,
}

/// Path state sampled by the host before each send opportunity.
#[derive(Debug, Clone, Copy)]
pub struct PathMetrics {
    pub smoothed_rtt_us: u64,
    pub cwin_bytes: u64,
    pub bytes_in_transit: u64,
    pub send_mtu: u64,
    pub loss: LossEstimate,
    /// Whether the application has FEC-protected data waiting to be sent.
    pub has_data_to_send: bool,
    /// Timestamp of the next application message, if the host knows it.
    pub next_message_at: Option<u64>,
}

impl Default for PathMetrics {
    fn default() -> Self {
        PathMetrics {
            smoothed_rtt_us: 100_000,
            cwin_bytes: 12_000,
            bytes_in_transit: 0,
            send_mtu: 1_280,
            loss: LossEstimate::default(),
            has_data_to_send: false,
            next_message_at: None,
        }
    }
}

/// The window as the controller sees it: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowView {
    pub start: SymbolId,
    pub end: SymbolId,
}

impl WindowView {
    pub fn len(&self) -> u64 {
        self.end.wrapping_sub(self.start) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

// ─── Outputs ────────────────────────────────────────────────────────────────

/// What the next slot should carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    NewData,
    Repair,
    FbRepair,
    Nothing,
}

/// Code parameters for one protection batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectParams {
    pub first_id: SymbolId,
    pub k: u16,
    pub r: u16,
}

// ─── Shared Pieces ──────────────────────────────────────────────────────────

/// State common to the window-rate controllers.
#[derive(Debug, Default)]
struct RateState {
    first_unprotected: SymbolId,
    /// Repair symbols sent but neither acked nor nacked.
    n_fec_in_flight: u64,
    /// Slot → was-repair, for in-flight accounting on feedback.
    slot_kinds: BTreeMap<u64, bool>,
}

impl RateState {
    fn sent(&mut self, slot: u64, is_repair: bool) {
        self.slot_kinds.insert(slot, is_repair);
        if is_repair {
            self.n_fec_in_flight += 1;
        }
    }

    fn landed(&mut self, slot: u64) {
        if self.slot_kinds.remove(&slot) == Some(true) {
            self.n_fec_in_flight = self.n_fec_in_flight.saturating_sub(1);
        }
    }
}

/// `r_max = 1 + max(2·⌈|W|·L/(G−L)⌉, G/gemodel_r)`.
fn r_max(window_len: u64, loss: u64, gemodel_r: u64) -> u64 {
    let lr = loss.min(GRANULARITY - 1);
    let burst_term = if gemodel_r == 0 {
        0
    } else {
        GRANULARITY / gemodel_r
    };
    1 + (2 * div_ceil(window_len * lr, GRANULARITY - lr)).max(burst_term)
}

/// `r = max(1, ⌈k·L/(G−L)⌉)`.
fn base_r(k: u64, loss: u64) -> u64 {
    let lr = loss.min(GRANULARITY - 1);
    div_ceil(k * lr, GRANULARITY - lr).max(1)
}

/// `r` floor from the mean burst length: one extra repair per expected
/// back-to-back loss.
fn burst_r(gemodel_r: u64) -> u64 {
    if gemodel_r == 0 || gemodel_r == GRANULARITY {
        1
    } else {
        1 + GRANULARITY / gemodel_r
    }
}

// ─── Bulk ───────────────────────────────────────────────────────────────────

/// Protect only when the sender is idle: no pending data and no new id sent
/// within rtt/8. Aimed at bulk transfers where FEC must not steal bandwidth
/// from fresh data.
#[derive(Debug, Default)]
pub struct BulkController {
    rate: RateState,
    last_sent_id_at: u64,
    wake_at: Option<u64>,
}

impl BulkController {
    fn protect_params(
        &mut self,
        metrics: &PathMetrics,
        window: &WindowView,
        now: u64,
    ) -> Option<ProtectParams> {
        if metrics.has_data_to_send {
            return None;
        }

        let threshold = metrics.smoothed_rtt_us >> 3;
        if now < self.last_sent_id_at + threshold {
            self.wake_at = Some(self.last_sent_id_at + threshold);
            return None;
        }

        self.rate.first_unprotected = self.rate.first_unprotected.max(window.start);
        let k = window.end.wrapping_sub(self.rate.first_unprotected);
        if k == 0 || k > u16::MAX as u32 {
            return None;
        }

        let rmax = r_max(window.len(), metrics.loss.loss, metrics.loss.gemodel_r);
        if self.rate.n_fec_in_flight >= rmax {
            trace!(in_flight = self.rate.n_fec_in_flight, rmax, "bulk: repair budget spent");
            return None;
        }

        let r = base_r(k as u64, metrics.loss.loss)
            .min(rmax - self.rate.n_fec_in_flight)
            .min(u16::MAX as u64);
        let params = ProtectParams {
            first_id: self.rate.first_unprotected,
            k: k as u16,
            r: r as u16,
        };
        debug!(?params, "bulk: protecting");
        self.rate.first_unprotected = self.rate.first_unprotected.wrapping_add(k);
        Some(params)
    }
}

// ─── Buffer-Limited ─────────────────────────────────────────────────────────

/// Like bulk, but only once enough fresh symbols have accumulated
/// (`k ≥ G/gemodel_p`), with the loss rate clamped and `r` additionally
/// capped by the remaining congestion window.
#[derive(Debug, Default)]
pub struct BufferLimitedController {
    rate: RateState,
}

impl BufferLimitedController {
    fn protect_params(
        &mut self,
        metrics: &PathMetrics,
        window: &WindowView,
        _now: u64,
    ) -> Option<ProtectParams> {
        self.rate.first_unprotected = self.rate.first_unprotected.max(window.start);
        let k = window.end.wrapping_sub(self.rate.first_unprotected);
        if k == 0 || k > u16::MAX as u32 {
            return None;
        }

        let loss = (2 * metrics.loss.loss).min(GRANULARITY / 2);
        let gemodel_p = metrics.loss.gemodel_p.max(1);

        let fc_blocked = !metrics.has_data_to_send;
        let enough_accumulated = k as u64 >= GRANULARITY / gemodel_p;
        if !fc_blocked && !enough_accumulated {
            return None;
        }

        let rmax = r_max(window.len(), loss, metrics.loss.gemodel_r);
        if self.rate.n_fec_in_flight >= rmax {
            return None;
        }

        let rem_cwin_packets = div_ceil(
            metrics.cwin_bytes.saturating_sub(metrics.bytes_in_transit),
            metrics.send_mtu.max(1),
        );

        let r = burst_r(metrics.loss.gemodel_r)
            .max(base_r(k as u64, loss))
            .min(rmax - self.rate.n_fec_in_flight)
            .min(rem_cwin_packets)
            .min(u16::MAX as u64);
        if r == 0 {
            return None;
        }

        let params = ProtectParams {
            first_id: self.rate.first_unprotected,
            k: k as u16,
            r: r as u16,
        };
        debug!(?params, "buffer-limited: protecting");
        self.rate.first_unprotected = self.rate.first_unprotected.wrapping_add(k);
        Some(params)
    }
}

// ─── Message-Based ──────────────────────────────────────────────────────────

/// Deadline-aware controller: protect only when the next outgoing message
/// could not make its delivery deadline without FEC, and only while the
/// congestion window has at least 10% headroom.
#[derive(Debug, Default)]
pub struct MessageBasedController {
    rate: RateState,
    /// Delivery deadline (µs) → first id of the message.
    deadlines: BTreeMap<u64, SymbolId>,
    last_fully_protected_deadline: Option<u64>,
}

impl MessageBasedController {
    /// Register a delivery deadline for the message starting at `first_id`.
    /// Deadlines more than 2^32 µs ahead are rejected.
    pub fn register_deadline(
        &mut self,
        deadline_us: u64,
        first_id: SymbolId,
        now: u64,
    ) -> Result<(), FecError> {
        if deadline_us < now || deadline_us - now > MAX_DEADLINE_AHEAD_US {
            return Err(FecError::UnexpectedState("deadline out of range"));
        }
        self.deadlines.insert(deadline_us, first_id);
        Ok(())
    }

    fn protect_params(
        &mut self,
        metrics: &PathMetrics,
        window: &WindowView,
        now: u64,
    ) -> Option<ProtectParams> {
        self.rate.first_unprotected = self.rate.first_unprotected.max(window.start);
        let k = window.end.wrapping_sub(self.rate.first_unprotected);
        if k == 0 || k > u16::MAX as u32 {
            return None;
        }

        let owd = metrics.smoothed_rtt_us >> 1;

        // Soonest deadline not already fully protected that FEC could still
        // help (at least one-way delay away).
        let deadline_floor = self
            .last_fully_protected_deadline
            .map(|d| d + 1)
            .unwrap_or(0)
            .max(now.checked_add(owd)?);
        let soonest_deadline = self.deadlines.range(deadline_floor..).next().map(|(&d, _)| d);

        // Bandwidth headroom: cwin/bytes_in_transit must exceed 1.1.
        let headroom_ok = if metrics.bytes_in_transit == 0 {
            false
        } else {
            let ratio_g = GRANULARITY * metrics.cwin_bytes / metrics.bytes_in_transit;
            ratio_g > GRANULARITY + GRANULARITY / 10
        };
        let ew = !metrics.has_data_to_send && headroom_ok;

        // If the next message would still make its deadline without repair,
        // FEC can wait.
        let wait_for_next_message = metrics
            .next_message_at
            .map(|t| t.saturating_sub(now))
            .unwrap_or(0);
        let urgent = match (soonest_deadline, metrics.next_message_at) {
            (None, _) | (_, None) => true,
            (Some(deadline), Some(_)) => now
                .checked_add(wait_for_next_message)
                .and_then(|t| t.checked_add(owd))
                .and_then(|t| t.checked_add(DEADLINE_CRITICAL_THRESHOLD_US))
                .map(|t| t >= deadline)
                .unwrap_or(true),
        };

        if !(ew && urgent) {
            return None;
        }

        let r = burst_r(metrics.loss.gemodel_r)
            .max(base_r(k as u64, metrics.loss.loss))
            .min(u16::MAX as u64);
        let params = ProtectParams {
            first_id: self.rate.first_unprotected,
            k: k as u16,
            r: r as u16,
        };
        debug!(?params, "message-based: protecting");
        self.rate.first_unprotected = self.rate.first_unprotected.wrapping_add(k);
        if let Some((&max_deadline, _)) = self.deadlines.iter().next_back() {
            // The whole window is protected, so every registered message is.
            self.last_fully_protected_deadline = Some(max_deadline);
        }
        Some(params)
    }

    fn prune_deadlines(&mut self, now: u64) {
        self.deadlines.retain(|&d, _| d >= now);
    }
}

// ─── Causal ─────────────────────────────────────────────────────────────────

/// Phases of the causal controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CausalPhase {
    /// Ramp-up: push data, no proactive repair.
    SlowStart,
    /// A loss was reported: emit repairs until the inferred gap is covered.
    FecBurst,
    /// Gap closed by an acked repair: maintain a loss-proportional ratio.
    Steady,
}

/// Slot-indexed state machine for the RLC scheme. Every sent slot is
/// remembered with its kind and window snapshot; ACK/NACK feedback moves the
/// phase and sizes the feedback-FEC plugs.
pub struct CausalController {
    phase: CausalPhase,
    /// Slot → (was-repair, window snapshot at send time).
    history: BTreeMap<u64, (Decision, WindowView)>,
    n_fec_in_flight: u64,
    /// Losses reported but not yet plugged by a feedback repair.
    fb_fec_owed: u64,
    /// Bound on remembered slots.
    max_history: usize,
}

impl CausalController {
    pub fn new() -> Self {
        CausalController {
            phase: CausalPhase::SlowStart,
            history: BTreeMap::new(),
            n_fec_in_flight: 0,
            fb_fec_owed: 0,
            max_history: 1 << 12,
        }
    }

    fn what_to_send(&mut self, metrics: &PathMetrics, window: &WindowView, window_full: bool) -> Decision {
        if window.is_empty() {
            return Decision::NewData;
        }
        if window_full {
            // Window pressure forces a repair slot regardless of phase.
            return Decision::Repair;
        }
        if self.fb_fec_owed > 0 {
            return Decision::FbRepair;
        }
        match self.phase {
            CausalPhase::SlowStart => Decision::NewData,
            CausalPhase::FecBurst => Decision::Repair,
            CausalPhase::Steady => {
                let needed = base_r(window.len(), metrics.loss.loss);
                if self.n_fec_in_flight < needed {
                    Decision::Repair
                } else {
                    Decision::NewData
                }
            }
        }
    }

    fn sent(&mut self, kind: Decision, slot: u64, window: WindowView) {
        match kind {
            Decision::Repair | Decision::FbRepair => {
                self.n_fec_in_flight += 1;
                if kind == Decision::FbRepair {
                    self.fb_fec_owed = self.fb_fec_owed.saturating_sub(1);
                }
            }
            Decision::NewData | Decision::Nothing => {}
        }
        self.history.insert(slot, (kind, window));
        while self.history.len() > self.max_history {
            let oldest = *self.history.keys().next().expect("nonempty");
            self.history.remove(&oldest);
        }
    }

    fn slot_acked(&mut self, slot: u64) {
        if let Some((kind, _)) = self.history.remove(&slot) {
            if matches!(kind, Decision::Repair | Decision::FbRepair) {
                self.n_fec_in_flight = self.n_fec_in_flight.saturating_sub(1);
                if self.phase == CausalPhase::FecBurst && self.fb_fec_owed == 0 {
                    debug!("causal: repair ack closed the gap, entering steady");
                    self.phase = CausalPhase::Steady;
                }
            }
        }
    }

    fn slot_nacked(&mut self, slot: u64) {
        if let Some((kind, _)) = self.history.remove(&slot) {
            match kind {
                Decision::NewData => {
                    self.fb_fec_owed += 1;
                    self.phase = CausalPhase::FecBurst;
                    debug!(owed = self.fb_fec_owed, "causal: data loss, entering fec burst");
                }
                Decision::Repair | Decision::FbRepair => {
                    self.n_fec_in_flight = self.n_fec_in_flight.saturating_sub(1);
                }
                Decision::Nothing => {}
            }
        }
    }

    fn free_slot_without_feedback(&mut self) {
        if let Some((&oldest, _)) = self.history.iter().next() {
            self.slot_acked(oldest);
        }
    }
}

impl Default for CausalController {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Dispatch ───────────────────────────────────────────────────────────────

/// Which controller a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    Bulk,
    BufferLimited,
    MessageBased,
    Causal,
}

/// Tagged-variant dispatch over the controller implementations.
pub enum RedundancyController {
    Bulk(BulkController),
    BufferLimited(BufferLimitedController),
    MessageBased(MessageBasedController),
    Causal(CausalController),
}

impl RedundancyController {
    pub fn new(kind: ControllerKind) -> Self {
        match kind {
            ControllerKind::Bulk => RedundancyController::Bulk(BulkController::default()),
            ControllerKind::BufferLimited => {
                RedundancyController::BufferLimited(BufferLimitedController::default())
            }
            ControllerKind::MessageBased => {
                RedundancyController::MessageBased(MessageBasedController::default())
            }
            ControllerKind::Causal => RedundancyController::Causal(CausalController::new()),
        }
    }

    /// Decide what the next slot carries.
    pub fn what_to_send(
        &mut self,
        metrics: &PathMetrics,
        window: &WindowView,
        window_full: bool,
        now: u64,
    ) -> Decision {
        match self {
            RedundancyController::Causal(c) => c.what_to_send(metrics, window, window_full),
            // The rate controllers express protection through
            // `protect_params`; probing it without consuming state would be
            // wrong, so the decision is made by the session: repair when
            // params are available.
            _ => {
                let _ = now;
                if window_full {
                    Decision::Repair
                } else {
                    Decision::NewData
                }
            }
        }
    }

    /// Ask for a protection batch. `None` means abstain for now.
    pub fn protect_params(
        &mut self,
        metrics: &PathMetrics,
        window: &WindowView,
        now: u64,
    ) -> Option<ProtectParams> {
        match self {
            RedundancyController::Bulk(c) => c.protect_params(metrics, window, now),
            RedundancyController::BufferLimited(c) => c.protect_params(metrics, window, now),
            RedundancyController::MessageBased(c) => {
                c.prune_deadlines(now.saturating_sub(1_000_000));
                c.protect_params(metrics, window, now)
            }
            RedundancyController::Causal(_) => {
                // Whole in-flight window, single-symbol repair.
                if window.is_empty() {
                    return None;
                }
                Some(ProtectParams {
                    first_id: window.start,
                    k: window.len().min(u16::MAX as u64) as u16,
                    r: 1,
                })
            }
        }
    }

    /// Record a sent slot.
    pub fn sent_packet(&mut self, kind: Decision, slot: u64, window: WindowView, now: u64) {
        let is_repair = matches!(kind, Decision::Repair | Decision::FbRepair);
        match self {
            RedundancyController::Bulk(c) => {
                if kind == Decision::NewData {
                    c.last_sent_id_at = now;
                }
                c.rate.sent(slot, is_repair);
            }
            RedundancyController::BufferLimited(c) => c.rate.sent(slot, is_repair),
            RedundancyController::MessageBased(c) => c.rate.sent(slot, is_repair),
            RedundancyController::Causal(c) => c.sent(kind, slot, window),
        }
    }

    pub fn slot_acked(&mut self, slot: u64) {
        match self {
            RedundancyController::Bulk(c) => c.rate.landed(slot),
            RedundancyController::BufferLimited(c) => c.rate.landed(slot),
            RedundancyController::MessageBased(c) => c.rate.landed(slot),
            RedundancyController::Causal(c) => c.slot_acked(slot),
        }
    }

    pub fn slot_nacked(&mut self, slot: u64) {
        match self {
            RedundancyController::Bulk(c) => c.rate.landed(slot),
            RedundancyController::BufferLimited(c) => c.rate.landed(slot),
            RedundancyController::MessageBased(c) => c.rate.landed(slot),
            RedundancyController::Causal(c) => c.slot_nacked(slot),
        }
    }

    /// A send opportunity passed without any feedback-worthy packet.
    pub fn free_slot_without_feedback(&mut self) {
        if let RedundancyController::Causal(c) = self {
            c.free_slot_without_feedback();
        }
    }

    /// Deadline registration (message-based only; others ignore).
    pub fn register_deadline(
        &mut self,
        deadline_us: u64,
        first_id: SymbolId,
        now: u64,
    ) -> Result<(), FecError> {
        if let RedundancyController::MessageBased(c) = self {
            c.register_deadline(deadline_us, first_id, now)?;
        }
        Ok(())
    }

    /// Earliest time the controller wants to be polled again, drained.
    pub fn take_wake_request(&mut self) -> Option<u64> {
        if let RedundancyController::Bulk(c) = self {
            c.wake_at.take()
        } else {
            None
        }
    }

    /// Repair symbols in flight (sent, no feedback yet).
    pub fn n_fec_in_flight(&self) -> u64 {
        match self {
            RedundancyController::Bulk(c) => c.rate.n_fec_in_flight,
            RedundancyController::BufferLimited(c) => c.rate.n_fec_in_flight,
            RedundancyController::MessageBased(c) => c.rate.n_fec_in_flight,
            RedundancyController::Causal(c) => c.n_fec_in_flight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: SymbolId, end: SymbolId) -> WindowView {
        WindowView { start, end }
    }

    fn lossy_metrics(loss: u64) -> PathMetrics {
        PathMetrics {
            loss: LossEstimate {
                loss,
                gemodel_p: 0,
                gemodel_r: GRANULARITY,
            },
            ..PathMetrics::default()
        }
    }

    // ─── Bulk ───────────────────────────────────────────────────────────

    #[test]
    fn bulk_sizes_r_from_loss_rate() {
        // L/G = 100/1000 over 10 window symbols, idle sender:
        // r = max(1, ceil(10·100/900)) = 2.
        let mut c = RedundancyController::new(ControllerKind::Bulk);
        let metrics = lossy_metrics(100);
        let params = c
            .protect_params(&metrics, &window(1, 11), 1_000_000)
            .expect("idle sender must protect");
        assert_eq!(params, ProtectParams { first_id: 1, k: 10, r: 2 });
    }

    #[test]
    fn bulk_abstains_when_budget_spent() {
        let mut c = RedundancyController::new(ControllerKind::Bulk);
        let metrics = lossy_metrics(100);
        // Fill the in-flight budget: r_max = 1 + max(2·⌈10·100/900⌉, 1) = 5.
        for slot in 0..5 {
            c.sent_packet(Decision::Repair, slot, window(1, 11), 0);
        }
        assert_eq!(c.n_fec_in_flight(), 5);
        assert!(c.protect_params(&metrics, &window(1, 11), 1_000_000).is_none());

        // Feedback frees the budget.
        for slot in 0..5 {
            c.slot_acked(slot);
        }
        assert!(c.protect_params(&metrics, &window(1, 11), 1_000_000).is_some());
    }

    #[test]
    fn bulk_defers_while_data_pending() {
        let mut c = RedundancyController::new(ControllerKind::Bulk);
        let mut metrics = lossy_metrics(100);
        metrics.has_data_to_send = true;
        assert!(c.protect_params(&metrics, &window(1, 11), 1_000_000).is_none());
    }

    #[test]
    fn bulk_requests_wake_during_idle_gate() {
        let mut c = RedundancyController::new(ControllerKind::Bulk);
        let metrics = lossy_metrics(100);
        // A fresh id at t=100; rtt/8 = 12_500, so protecting at t=5000 must
        // wait and request a wake at 100 + 12_500.
        c.sent_packet(Decision::NewData, 0, window(1, 2), 100);
        assert!(c.protect_params(&metrics, &window(1, 2), 5_000).is_none());
        assert_eq!(c.take_wake_request(), Some(12_600));
        assert_eq!(c.take_wake_request(), None, "request drained");
    }

    #[test]
    fn bulk_advances_first_unprotected() {
        let mut c = RedundancyController::new(ControllerKind::Bulk);
        let metrics = lossy_metrics(100);
        let p1 = c.protect_params(&metrics, &window(1, 11), 1_000_000).unwrap();
        assert_eq!(p1.first_id, 1);
        // Same window again: everything already protected.
        assert!(c.protect_params(&metrics, &window(1, 11), 2_000_000).is_none());
        // Window grew by 4 new symbols.
        let p2 = c.protect_params(&metrics, &window(1, 15), 3_000_000).unwrap();
        assert_eq!(p2.first_id, 11);
        assert_eq!(p2.k, 4);
    }

    // ─── Buffer-Limited ─────────────────────────────────────────────────

    #[test]
    fn buffer_limited_waits_for_accumulation() {
        let mut c = RedundancyController::new(ControllerKind::BufferLimited);
        let mut metrics = lossy_metrics(50);
        metrics.loss.gemodel_p = 100; // gate: k ≥ G/p = 10
        metrics.has_data_to_send = true; // not fc-blocked

        assert!(c.protect_params(&metrics, &window(1, 6), 0).is_none(), "k=5 < 10");
        assert!(c.protect_params(&metrics, &window(1, 12), 0).is_some(), "k=11 ≥ 10");
    }

    #[test]
    fn buffer_limited_caps_r_by_cwin_remainder() {
        let mut c = RedundancyController::new(ControllerKind::BufferLimited);
        let mut metrics = lossy_metrics(400); // clamped to G/2 = 500
        metrics.loss.gemodel_p = 1000;
        metrics.cwin_bytes = 3 * 1_280;
        metrics.bytes_in_transit = 1_280;
        // Unclamped r would be ceil(10·500/500) = 10; remaining cwin = 2 MTUs.
        let params = c.protect_params(&metrics, &window(1, 11), 0).unwrap();
        assert_eq!(params.r, 2);
    }

    #[test]
    fn buffer_limited_abstains_without_cwin_room() {
        let mut c = RedundancyController::new(ControllerKind::BufferLimited);
        let mut metrics = lossy_metrics(100);
        metrics.cwin_bytes = 1_280;
        metrics.bytes_in_transit = 1_280;
        assert!(c.protect_params(&metrics, &window(1, 11), 0).is_none());
    }

    // ─── Message-Based ──────────────────────────────────────────────────

    fn message_metrics() -> PathMetrics {
        PathMetrics {
            smoothed_rtt_us: 40_000, // owd = 20ms
            cwin_bytes: 100_000,
            bytes_in_transit: 50_000, // headroom 2.0 > 1.1
            send_mtu: 1_280,
            loss: LossEstimate {
                loss: 100,
                gemodel_p: 0,
                gemodel_r: GRANULARITY,
            },
            has_data_to_send: false,
            next_message_at: Some(1_030_000),
        }
    }

    #[test]
    fn message_based_rejects_far_deadlines() {
        let mut c = MessageBasedController::default();
        assert!(c.register_deadline(1_000, 1, 2_000).is_err(), "deadline in the past");
        assert!(c
            .register_deadline(MAX_DEADLINE_AHEAD_US + 2_000, 1, 1_000)
            .is_err());
        assert!(c.register_deadline(500_000, 1, 1_000).is_ok());
    }

    #[test]
    fn message_based_protects_urgent_deadline() {
        let mut c = RedundancyController::new(ControllerKind::MessageBased);
        let now = 1_000_000;
        // Deadline 40ms out; waiting for the next message (30ms) plus owd
        // (20ms) would miss it.
        c.register_deadline(now + 40_000, 1, now).unwrap();
        let params = c.protect_params(&message_metrics(), &window(1, 9), now);
        assert!(params.is_some());
        assert_eq!(params.unwrap().k, 8);
    }

    #[test]
    fn message_based_waits_when_deadline_is_far() {
        let mut c = RedundancyController::new(ControllerKind::MessageBased);
        let now = 1_000_000;
        // Deadline a full second out: the next message will easily make it.
        c.register_deadline(now + 1_000_000, 1, now).unwrap();
        assert!(c.protect_params(&message_metrics(), &window(1, 9), now).is_none());
    }

    #[test]
    fn message_based_needs_headroom() {
        let mut c = RedundancyController::new(ControllerKind::MessageBased);
        let now = 1_000_000;
        c.register_deadline(now + 40_000, 1, now).unwrap();
        let mut metrics = message_metrics();
        metrics.bytes_in_transit = metrics.cwin_bytes; // ratio 1.0 < 1.1
        assert!(c.protect_params(&metrics, &window(1, 9), now).is_none());
    }

    // ─── Causal ─────────────────────────────────────────────────────────

    #[test]
    fn causal_starts_in_slow_start() {
        let mut c = RedundancyController::new(ControllerKind::Causal);
        let metrics = lossy_metrics(100);
        assert_eq!(
            c.what_to_send(&metrics, &window(1, 5), false, 0),
            Decision::NewData
        );
    }

    #[test]
    fn causal_loss_drives_fb_fec_then_steady() {
        let mut c = RedundancyController::new(ControllerKind::Causal);
        let metrics = lossy_metrics(100);
        let w = window(1, 5);

        c.sent_packet(Decision::NewData, 0, w, 0);
        c.sent_packet(Decision::NewData, 1, w, 0);

        // Slot 0 reported lost: owe one plug.
        c.slot_nacked(0);
        assert_eq!(c.what_to_send(&metrics, &w, false, 0), Decision::FbRepair);
        c.sent_packet(Decision::FbRepair, 2, w, 0);

        // Plug sent; burst continues until a repair ack closes the gap.
        assert_eq!(c.what_to_send(&metrics, &w, false, 0), Decision::Repair);
        c.slot_acked(2);

        // Steady now: loss 10% over 4 symbols needs 1 in flight.
        assert_eq!(c.what_to_send(&metrics, &w, false, 0), Decision::Repair);
        c.sent_packet(Decision::Repair, 3, w, 0);
        assert_eq!(c.what_to_send(&metrics, &w, false, 0), Decision::NewData);
    }

    #[test]
    fn causal_window_pressure_forces_repair() {
        let mut c = RedundancyController::new(ControllerKind::Causal);
        let metrics = lossy_metrics(0);
        assert_eq!(
            c.what_to_send(&metrics, &window(1, 9), true, 0),
            Decision::Repair
        );
    }

    #[test]
    fn causal_params_cover_whole_window() {
        let mut c = RedundancyController::new(ControllerKind::Causal);
        let metrics = lossy_metrics(100);
        let params = c.protect_params(&metrics, &window(3, 9), 0).unwrap();
        assert_eq!(
            params,
            ProtectParams { first_id: 3, k: 6, r: 1 }
        );
    }

    #[test]
    fn empty_window_never_protects() {
        for kind in [
            ControllerKind::Bulk,
            ControllerKind::BufferLimited,
            ControllerKind::MessageBased,
            ControllerKind::Causal,
        ] {
            let mut c = RedundancyController::new(kind);
            let metrics = lossy_metrics(100);
            assert!(
                c.protect_params(&metrics, &window(5, 5), 1_000_000).is_none(),
                "{kind:?} must abstain on an empty window"
            );
        }
    }
}
