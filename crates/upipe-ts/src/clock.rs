// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Program clock reference tracking and PTS/DTS unwrap.
//!
//! A program's PCR is a 42-bit, 27 MHz value (`base * 300 + extension`,
//! see [`crate::packet::read_pcr`]); PTS/DTS are 33-bit, 90 kHz values
//! carried in PES headers, read here already converted to 27 MHz by the
//! caller. `ProgramClock` reconstructs a continuous program time from the
//! wrapping 33-bit wire clock, the same algorithm the demux bin's PCR
//! handling runs per program.

/// Wraparound modulus of the 33-bit, 90 kHz PTS/DTS/PCR-base clock,
/// expressed in 27 MHz ticks.
pub const TS_CLOCK_MAX: u64 = (1u64 << 33) * 300;

/// Above this gap between consecutive PCRs, treat the stream as having
/// jumped rather than merely ticked forward: one second, in 27 MHz ticks.
pub const MAX_PCR_INTERVAL: u64 = 27_000_000;

/// Default window within which an ES's DTS is trusted relative to the
/// program's last PCR, absent a per-ES override: 1 s.
pub const DEFAULT_MAX_DELAY: u64 = 27_000_000;

/// Result of feeding one PCR to [`ProgramClock::update_pcr`]: the event
/// the demux bin throws as `CLOCK_REF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockRef {
    pub program_time: u64,
    pub discontinuity: bool,
}

/// Per-program PCR tracker. `last_pcr` is an unwrapped, monotonically
/// advancing running counter in 27 MHz ticks — once a PCR wraps,
/// `last_pcr` keeps counting past `TS_CLOCK_MAX` rather than resetting to
/// zero, so ordinary forward progress across a wrap never looks like a
/// jump. `offset` absorbs the gap whenever a genuine discontinuity forces
/// `last_pcr` to be reset to the raw incoming value.
///
/// `has_pcr` gates whether any PCR has been seen yet: `last_pcr` and
/// `timestamp_highest` start at plain `0` rather than a `TS_CLOCK_MAX`
/// sentinel, since a sentinel would make the very first PCR register as
/// a spurious gap against it.
pub struct ProgramClock {
    has_pcr: bool,
    last_pcr: u64,
    offset: i64,
    timestamp_highest: u64,
}

impl Default for ProgramClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramClock {
    #[must_use]
    pub fn new() -> Self {
        Self { has_pcr: false, last_pcr: 0, offset: 0, timestamp_highest: 0 }
    }

    #[must_use]
    pub fn last_pcr(&self) -> Option<u64> {
        self.has_pcr.then_some(self.last_pcr % TS_CLOCK_MAX)
    }

    /// Current program time: `last_pcr + offset`.
    #[must_use]
    pub fn program_time(&self) -> u64 {
        self.last_pcr.wrapping_add_signed(self.offset)
    }

    /// Feed a freshly read PCR (27 MHz units, as returned by
    /// [`crate::packet::read_pcr`]), wrapped to its 33-bit wire range
    /// first. `discontinuity_signalled` is the adaptation field's
    /// `discontinuity_indicator` (§2.4.3.5) carried alongside it — an
    /// externally-signalled discontinuity independent of the delta
    /// computed here (spec.md §4.7.3: "If delta ≤ MAX_PCR_INTERVAL **and
    /// no discontinuity was signalled**, advance `last_pcr`…"), e.g. a
    /// splice resetting the PCR base close to its previous value.  Returns
    /// the [`ClockRef`] event the caller throws.
    pub fn update_pcr(&mut self, pcr_27mhz: u64, discontinuity_signalled: bool) -> ClockRef {
        let pcr_orig = pcr_27mhz % TS_CLOCK_MAX;

        if !self.has_pcr {
            self.has_pcr = true;
            self.last_pcr = pcr_orig;
            self.offset = 0;
            self.timestamp_highest = self.program_time();
            return ClockRef { program_time: self.program_time(), discontinuity: false };
        }

        let delta = TS_CLOCK_MAX.wrapping_add(pcr_orig).wrapping_sub(self.last_pcr % TS_CLOCK_MAX) % TS_CLOCK_MAX;
        let discontinuity = discontinuity_signalled || delta > MAX_PCR_INTERVAL;

        if discontinuity {
            self.offset = i64::try_from(self.timestamp_highest).unwrap_or(i64::MAX) - i64::try_from(pcr_orig).unwrap_or(i64::MAX);
            self.last_pcr = pcr_orig;
        } else {
            self.last_pcr = self.last_pcr.wrapping_add(delta);
        }

        let program_time = self.program_time();
        if program_time > self.timestamp_highest {
            self.timestamp_highest = program_time;
        }
        ClockRef { program_time, discontinuity }
    }

    /// Reconstruct an ES's DTS/PTS against this program's clock: if the
    /// raw sample is within `max_delay` of the last PCR, return the
    /// unwrapped program time it corresponds to; otherwise the timestamp
    /// is untrustworthy and dropped.
    #[must_use]
    pub fn dts_prog(&mut self, dts_orig: u64, max_delay: Option<u64>) -> Option<u64> {
        if !self.has_pcr {
            return None;
        }
        let max_delay = max_delay.unwrap_or(DEFAULT_MAX_DELAY);
        let pcr_base = self.last_pcr % TS_CLOCK_MAX;
        let delta = TS_CLOCK_MAX.wrapping_add(dts_orig % TS_CLOCK_MAX).wrapping_sub(pcr_base) % TS_CLOCK_MAX;
        if delta > max_delay {
            tracing::debug!(dts_orig, delta, max_delay, "ES timestamp too far from last PCR, dropping dts_prog");
            return None;
        }
        let dts_prog = self.last_pcr.wrapping_add(delta).wrapping_add_signed(self.offset);
        if dts_prog > self.timestamp_highest {
            self.timestamp_highest = dts_prog;
        }
        Some(dts_prog)
    }

    /// Unwrap a raw 33-bit PTS/DTS sample to its nearest occurrence before
    /// wraparound truncation — here simply masked back into the wire's
    /// 33-bit range, since `pts_orig`/`dts_orig` are themselves defined as
    /// the raw wire value; [`Self::dts_prog`] is what actually unwraps
    /// against the program clock.
    #[must_use]
    pub fn reconstruct(&self, raw: u64) -> u64 {
        raw & ((1u64 << 33) - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcr_wrap_is_strictly_monotonic_with_no_discontinuity() {
        let mut clock = ProgramClock::new();
        let pcrs_90khz: [u64; 4] = [(1u64 << 33) - 1, 0, 1, 2];
        let mut program_times = Vec::new();
        for pcr in pcrs_90khz {
            let clock_ref = clock.update_pcr(pcr * 300, false);
            assert!(!clock_ref.discontinuity);
            program_times.push(clock_ref.program_time);
        }
        for window in program_times.windows(2) {
            assert!(window[1] > window[0]);
        }
    }

    #[test]
    fn pcr_gap_past_max_interval_is_a_discontinuity_and_reports_timestamp_highest() {
        let mut clock = ProgramClock::new();
        assert!(!clock.update_pcr(1000, false).discontinuity);
        assert!(!clock.update_pcr(1001, false).discontinuity);
        let clock_ref = clock.update_pcr(50_000_000, false);
        assert!(clock_ref.discontinuity);
        assert_eq!(clock_ref.program_time, 1001);
    }

    #[test]
    fn signalled_discontinuity_forces_offset_realignment_even_with_a_small_delta() {
        let mut clock = ProgramClock::new();
        assert!(!clock.update_pcr(27_000_000, false).discontinuity);
        // Delta from the previous PCR is tiny (well under MAX_PCR_INTERVAL)
        // but the adaptation field says discontinuous, e.g. a splice that
        // reset the PCR base close to its previous value.
        let clock_ref = clock.update_pcr(27_000_100, true);
        assert!(clock_ref.discontinuity);
        assert_eq!(clock_ref.program_time, 27_000_000);
    }

    #[test]
    fn dts_within_max_delay_reconstructs_against_the_program_clock() {
        let mut clock = ProgramClock::new();
        clock.update_pcr(27_000_000, false);
        let dts_prog = clock.dts_prog(27_000_000 + 3_000_000, None).unwrap();
        assert_eq!(dts_prog, 27_000_000 + 3_000_000);
    }

    #[test]
    fn dts_outside_max_delay_is_dropped() {
        let mut clock = ProgramClock::new();
        clock.update_pcr(0, false);
        assert!(clock.dts_prog(DEFAULT_MAX_DELAY + 1, None).is_none());
    }
}
