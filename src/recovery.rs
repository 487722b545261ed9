//! Delay recovery: five strategies that adjust a delayed vehicle's departure
//! time, selected per-station, falling back to the line default and then `CatchUp`.
//!
//! Open question resolved (see DESIGN.md): whether a `SkipStops` wait-reduction and
//! a `ResetAtTerminus` extra-wait effect could ever apply to the same arrival. We
//! treat the selected `RecoveryMode` as a single exclusive strategy — only its own
//! row of the table applies on any given evaluation, never both at once.

use serde::{Deserialize, Serialize};

pub const DEFAULT_RECOVERY_RATE: f64 = 0.1;
const CATCH_UP_LARGE_DELAY_THRESHOLD: i64 = 300;
const CATCH_UP_BUFFER: i64 = 30;
const ARRIVAL_DELAY_THRESHOLD: i64 = 30;
const RESET_AT_TERMINUS_CAP: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryMode {
    CatchUp,
    SkipToNext,
    HoldAtTerminus,
    GradualRecovery,
    SkipStops,
    ResetAtTerminus,
}

impl Default for RecoveryMode {
    fn default() -> Self {
        RecoveryMode::CatchUp
    }
}

/// Selects the effective mode: station override, then line default, then `CatchUp`.
pub fn resolve_mode(station: Option<RecoveryMode>, line: Option<RecoveryMode>) -> RecoveryMode {
    station.or(line).unwrap_or_default()
}

pub fn resolve_rate(station: Option<f64>, line: Option<f64>) -> f64 {
    station.or(line).unwrap_or(DEFAULT_RECOVERY_RATE)
}

/// The effect to apply when a vehicle's arrival delay exceeds 30 seconds, expressed as a transform on the freshly computed `wait`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArrivalEffect {
    None,
    ExtraWaitSeconds(i64),
    ReduceWaitByHalf,
}

pub fn on_arrival_effect(mode: RecoveryMode, delay: i64, is_terminus: bool) -> ArrivalEffect {
    if delay <= ARRIVAL_DELAY_THRESHOLD {
        return ArrivalEffect::None;
    }
    match mode {
        RecoveryMode::CatchUp | RecoveryMode::SkipToNext | RecoveryMode::GradualRecovery => {
            ArrivalEffect::None
        }
        RecoveryMode::HoldAtTerminus => {
            if is_terminus {
                ArrivalEffect::ExtraWaitSeconds(terminus_factor_extra(delay))
            } else {
                ArrivalEffect::None
            }
        }
        RecoveryMode::SkipStops => {
            if is_terminus {
                ArrivalEffect::None
            } else {
                ArrivalEffect::ReduceWaitByHalf
            }
        }
        RecoveryMode::ResetAtTerminus => {
            if is_terminus {
                ArrivalEffect::ExtraWaitSeconds(delay.min(RESET_AT_TERMINUS_CAP))
            } else {
                ArrivalEffect::None
            }
        }
    }
}

pub fn apply_arrival_effect(wait: i64, effect: ArrivalEffect) -> i64 {
    match effect {
        ArrivalEffect::None => wait,
        ArrivalEffect::ExtraWaitSeconds(extra) => wait + extra,
        ArrivalEffect::ReduceWaitByHalf => (wait as f64 * 0.5).round() as i64,
    }
}

/// Factor grows with delay magnitude, within a `[0.4, 0.6]` band; we scale linearly
/// up to a 10-minute delay, then cap at the top of the band.
fn terminus_factor_extra(delay: i64) -> i64 {
    let factor = 0.4 + 0.2 * (delay as f64 / 600.0).min(1.0);
    (delay as f64 * factor).round() as i64
}

/// Outcome of re-evaluating a vehicle that is still held past its stored departure
/// time while already delayed ("continued holding").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuedHoldingOutcome {
    /// Keep waiting, with a (possibly adjusted) departure instant.
    Depart(i64),
    /// The stored slot must be dropped; the caller re-runs slot assignment.
    Reselect,
}

#[allow(clippy::too_many_arguments)]
pub fn on_continued_holding(
    mode: RecoveryMode,
    stored_departure: i64,
    now: i64,
    recovery_rate: f64,
    is_terminus: bool,
) -> ContinuedHoldingOutcome {
    let delay = now - stored_departure;
    match mode {
        RecoveryMode::CatchUp => catch_up(stored_departure, now, delay),
        RecoveryMode::SkipToNext => ContinuedHoldingOutcome::Reselect,
        RecoveryMode::HoldAtTerminus => {
            if is_terminus {
                let extra = terminus_factor_extra(delay.max(0));
                ContinuedHoldingOutcome::Depart(stored_departure + extra)
            } else {
                catch_up(stored_departure, now, delay)
            }
        }
        RecoveryMode::GradualRecovery => {
            let adjusted = stored_departure + (delay as f64 * (1.0 - recovery_rate)).round() as i64;
            ContinuedHoldingOutcome::Depart(adjusted)
        }
        RecoveryMode::SkipStops => catch_up(stored_departure, now, delay),
        RecoveryMode::ResetAtTerminus => {
            if is_terminus {
                let extra = delay.max(0).min(RESET_AT_TERMINUS_CAP);
                ContinuedHoldingOutcome::Depart(stored_departure + extra)
            } else {
                catch_up(stored_departure, now, delay)
            }
        }
    }
}

fn catch_up(stored_departure: i64, now: i64, delay: i64) -> ContinuedHoldingOutcome {
    if delay > CATCH_UP_LARGE_DELAY_THRESHOLD {
        ContinuedHoldingOutcome::Depart(now + CATCH_UP_BUFFER)
    } else {
        ContinuedHoldingOutcome::Depart(stored_departure.max(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_mode_precedence() {
        assert_eq!(
            resolve_mode(Some(RecoveryMode::SkipToNext), Some(RecoveryMode::CatchUp)),
            RecoveryMode::SkipToNext
        );
        assert_eq!(resolve_mode(None, Some(RecoveryMode::GradualRecovery)), RecoveryMode::GradualRecovery);
        assert_eq!(resolve_mode(None, None), RecoveryMode::CatchUp);
    }

    #[test]
    fn on_arrival_ignores_small_delays() {
        assert_eq!(on_arrival_effect(RecoveryMode::HoldAtTerminus, 10, true), ArrivalEffect::None);
    }

    #[test]
    fn hold_at_terminus_only_applies_at_termini() {
        assert_eq!(on_arrival_effect(RecoveryMode::HoldAtTerminus, 100, false), ArrivalEffect::None);
        assert!(matches!(
            on_arrival_effect(RecoveryMode::HoldAtTerminus, 100, true),
            ArrivalEffect::ExtraWaitSeconds(_)
        ));
    }

    #[test]
    fn skip_stops_halves_wait_at_intermediate_stops() {
        assert_eq!(on_arrival_effect(RecoveryMode::SkipStops, 100, false), ArrivalEffect::ReduceWaitByHalf);
        assert_eq!(apply_arrival_effect(40, ArrivalEffect::ReduceWaitByHalf), 20);
    }

    #[test]
    fn catch_up_gives_large_delay_a_buffer() {
        match on_continued_holding(RecoveryMode::CatchUp, 100, 500, DEFAULT_RECOVERY_RATE, false) {
            ContinuedHoldingOutcome::Depart(t) => assert_eq!(t, 530),
            _ => panic!("expected Depart"),
        }
    }

    #[test]
    fn catch_up_without_large_delay_departs_now() {
        match on_continued_holding(RecoveryMode::CatchUp, 100, 150, DEFAULT_RECOVERY_RATE, false) {
            ContinuedHoldingOutcome::Depart(t) => assert_eq!(t, 150),
            _ => panic!("expected Depart"),
        }
    }

    #[test]
    fn skip_to_next_requests_reselection() {
        assert_eq!(
            on_continued_holding(RecoveryMode::SkipToNext, 30, 120, DEFAULT_RECOVERY_RATE, false),
            ContinuedHoldingOutcome::Reselect
        );
    }

    #[test]
    fn gradual_recovery_scales_by_rate() {
        match on_continued_holding(RecoveryMode::GradualRecovery, 1000, 1100, 0.1, false) {
            ContinuedHoldingOutcome::Depart(t) => assert_eq!(t, 1000 + (100.0 * 0.9).round() as i64),
            _ => panic!("expected Depart"),
        }
    }
}
