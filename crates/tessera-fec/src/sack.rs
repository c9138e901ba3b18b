//! # Received packet-number ranges
//!
//! The receiver keeps the set of received packet numbers as ordered ranges,
//! newest (highest) first, coalescing when an arrival bridges two ranges.
//! Each range remembers the arrival time of its newest packet; the ACK delay
//! is derived from the first range and encoded in the legacy float16 format
//! (11-bit mantissa, 5-bit exponent, clamped).

// ─── Sack List ──────────────────────────────────────────────────────────────

/// One maximal range `[start, end]` of received packet numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SackRange {
    pub start: u64,
    pub end: u64,
    /// Arrival time (µs) of the newest packet in the range.
    pub newest_arrival_us: u64,
}

/// Ordered set of received packet numbers, highest range first.
#[derive(Debug, Default)]
pub struct SackList {
    ranges: Vec<SackRange>,
}

impl SackList {
    pub fn new() -> Self {
        SackList { ranges: Vec::new() }
    }

    /// Record a received packet number. Returns `true` when the number was
    /// already recorded (duplicate).
    pub fn record_pn_received(&mut self, pn: u64, now_us: u64) -> bool {
        // Find the first range whose end is not above pn (descending order).
        let mut i = 0;
        while i < self.ranges.len() && pn < self.ranges[i].start {
            if pn == self.ranges[i].start - 1 {
                // Extend this range downward; maybe merge with the next.
                self.ranges[i].start = pn;
                if i + 1 < self.ranges.len() && self.ranges[i + 1].end + 1 == pn {
                    self.ranges[i].start = self.ranges[i + 1].start;
                    self.ranges.remove(i + 1);
                }
                return false;
            }
            i += 1;
        }

        if i == self.ranges.len() {
            // Below every range (or the list is empty): new lowest range.
            self.ranges.push(SackRange {
                start: pn,
                end: pn,
                newest_arrival_us: now_us,
            });
            return false;
        }

        let range = &mut self.ranges[i];
        if pn <= range.end {
            return true; // duplicate
        }
        if pn == range.end + 1 {
            range.end = pn;
            range.newest_arrival_us = now_us;
            // Merge with the range above if pn bridged the gap.
            if i > 0 && self.ranges[i - 1].start == pn + 1 {
                self.ranges[i - 1].start = self.ranges[i].start;
                self.ranges.remove(i);
            }
            return false;
        }

        // A new hole: fresh range above range i.
        self.ranges.insert(
            i,
            SackRange {
                start: pn,
                end: pn,
                newest_arrival_us: now_us,
            },
        );
        false
    }

    /// Whether a packet number was ever recorded.
    pub fn is_pn_already_received(&self, pn: u64) -> bool {
        for range in &self.ranges {
            if pn > range.end {
                return false; // ranges are descending; pn is in a hole above
            }
            if pn >= range.start {
                return true;
            }
        }
        false
    }

    /// Highest received packet number.
    pub fn highest_received(&self) -> Option<u64> {
        self.ranges.first().map(|r| r.end)
    }

    /// Delay since the newest packet arrived, for the next ACK frame.
    pub fn ack_delay_us(&self, now_us: u64) -> u64 {
        self.ranges
            .first()
            .map(|r| now_us.saturating_sub(r.newest_arrival_us))
            .unwrap_or(0)
    }

    /// Ranges, highest first, for the host's ACK-frame emitter.
    pub fn ranges(&self) -> &[SackRange] {
        &self.ranges
    }
}

// ─── Float16 Delay Codec ────────────────────────────────────────────────────

/// Encode a microsecond delta into the 16-bit float: 11-bit mantissa, 5-bit
/// exponent. Exponent 0 means a literal mantissa; otherwise an implicit
/// leading 1 with shift `exp - 1`. Values beyond the representable range
/// clamp to `0xFFFF`.
pub fn delta_to_float16(delta_us: u64) -> u16 {
    let mut exponent = 0u64;
    let mut mantissa = delta_us;

    while mantissa > 0x0FFF {
        exponent += 1;
        mantissa >>= 1;
    }

    if exponent > 30 {
        0xFFFF
    } else if mantissa & 0x0800 != 0 {
        ((mantissa & 0x07FF) | ((exponent + 1) << 11)) as u16
    } else {
        mantissa as u16
    }
}

/// Decode the 16-bit float back into microseconds.
pub fn float16_to_delta(encoded: u16) -> u64 {
    let exponent = encoded >> 11;
    let mut value = (encoded & 0x07FF) as u64;
    if exponent != 0 {
        value |= 0x0800;
        value <<= exponent - 1;
    }
    value
}
