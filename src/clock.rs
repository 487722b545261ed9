//! Circular 60-minute clock arithmetic.
//!
//! A *slot-time* is seconds-within-the-hour, `[0, 3600)`. An absolute game instant is
//! the host simulation's monotonically increasing integer-seconds clock. None of this
//! module touches wall-clock time; the simulation supplies its own clock, and every
//! other component calls here rather than re-deriving modular arithmetic.

use serde::{Deserialize, Serialize};

use crate::model::Slot;

/// Seconds elapsed since the simulation's epoch. Not a calendar timestamp.
pub type GameInstant = i64;

pub const HOUR_SECS: i64 = 3600;
const HALF_HOUR_SECS: i64 = 1800;

/// Wrap an arbitrary integer into `[0, 3600)`.
#[inline]
pub fn wrap(t: i64) -> i64 {
    ((t % HOUR_SECS) + HOUR_SECS) % HOUR_SECS
}

#[inline]
pub fn arrival_of(slot: &Slot) -> i64 {
    slot.arrival_slot()
}

#[inline]
pub fn departure_of(slot: &Slot) -> i64 {
    slot.departure_slot()
}

/// Minimum circular distance between two slot-times, in `[0, 1800]`.
#[inline]
pub fn circular_diff(a: i64, b: i64) -> i64 {
    let a = wrap(a);
    let b = wrap(b);
    let d = (a - b).abs();
    d.min(HOUR_SECS - d)
}

/// Forward distance walking from `arr_slot` to `t`, i.e. how far `t` sits "after"
/// `arr_slot` going clockwise around the hour.
#[inline]
fn forward_from(arr_slot: i64, t: i64) -> i64 {
    wrap(t - arr_slot)
}

/// `true` iff, viewing `arr_slot` and `arr_slot + 1800 mod 3600` as a half-hour
/// window, `arrival_time mod 3600` falls within `[arr_slot, arr_slot+1800)` modulo
/// wrap. This is the "reasonable arrival window" policy: we keep the 30-minute
/// constant as a named threshold rather than re-deriving it at call sites.
pub fn after_arrival_slot(arr_slot: i64, arrival_time: i64) -> bool {
    forward_from(arr_slot, arrival_time) < HALF_HOUR_SECS
}

/// `true` iff the vehicle has moved past the slot's departure moment: its forward
/// offset from `arr_slot` exceeds the slot's own span. Handles both `arr_slot <=
/// dep_slot` and the wraparound case `arr_slot > dep_slot` uniformly, since `wrap`
/// absorbs the sign.
pub fn after_departure_slot(arr_slot: i64, dep_slot: i64, arrival_time: i64) -> bool {
    let span = forward_from(arr_slot, dep_slot);
    forward_from(arr_slot, arrival_time) > span
}

/// Seconds a vehicle must wait at `slot` given it arrived at `arrival_time`
/// (absolute seconds-since-start). Three cases:
/// - arrived within the slot's active span: wait until departure;
/// - moved past departure within the last half hour: wait = 0 (it's gone);
/// - further out than that: the vehicle is early for the *next* occurrence of this
///   slot, so wait the remainder of this hour plus the slot's own span.
pub fn wait_time(slot: &Slot, arrival_time: GameInstant) -> i64 {
    let arr_slot = arrival_of(slot);
    let dep_slot = departure_of(slot);
    let span = forward_from(arr_slot, dep_slot);
    let fwd = forward_from(arr_slot, arrival_time);

    if !after_departure_slot(arr_slot, dep_slot, arrival_time) {
        span - fwd
    } else if after_arrival_slot(arr_slot, arrival_time) {
        0
    } else {
        wrap(span + (HOUR_SECS - fwd))
    }
}

/// Applies per-stop min/max waiting-time clamps and computes the absolute
/// departure instant. Negative wait is clamped to zero before the bounds apply.
pub fn departure_time(
    arrival_time: GameInstant,
    wait: i64,
    min_wait: Option<i64>,
    min_wait_enabled: bool,
    max_wait: Option<i64>,
    max_wait_enabled: bool,
) -> GameInstant {
    let mut w = wait.max(0);
    if min_wait_enabled {
        if let Some(min_wait) = min_wait {
            w = w.max(min_wait);
        }
    }
    if max_wait_enabled {
        if let Some(max_wait) = max_wait {
            w = w.min(max_wait);
        }
    }
    arrival_time + w
}

/// A period of the day, `[start, end)` possibly wrapping past the hour boundary,
/// used to pick among several slot groups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimePeriod {
    pub start: i64,
    pub end: i64,
}

impl TimePeriod {
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start: wrap(start),
            end: wrap(end),
        }
    }

    pub fn contains(&self, t: i64) -> bool {
        if self.start == self.end {
            // Zero-width bounds mean "whole hour" (see `overlaps`); this is how a
            // flat slot list auto-promoted into a period, covering every slot-time
            // rather than none, is represented.
            return true;
        }
        let t = wrap(t);
        if self.start <= self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }

    /// Two periods overlap if their (possibly-wrapped) intervals intersect. A
    /// zero-width period (`start == end`) is treated as covering the full hour, the
    /// conventional meaning of an unset period bound.
    pub fn overlaps(&self, other: &TimePeriod) -> bool {
        if self.start == self.end || other.start == other.end {
            return true;
        }
        self.contains(other.start)
            || self.contains(wrap(other.end - 1))
            || other.contains(self.start)
            || other.contains(wrap(self.end - 1))
    }
}
