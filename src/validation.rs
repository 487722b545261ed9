//! Validation Engine: static checks over a line's timetable configuration,
//! independent of any running vehicle. Consumes `DelayStatistics` by reference
//! rather than importing `stats` circularly, per the dependency-injection design
//! note already used by slot assignment.

use serde::{Deserialize, Serialize};

use crate::model::{ArrDepForm, ConstraintVariant, Line, LineId, Slot, StopIndex, TimetableModel};
use crate::stats::DelayStatistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    DepartureBeforeArrival,
    SlotsTooClose,
    ImpossibleJourneyTime,
    OverlappingTimePeriods,
    InvalidTimePeriod,
    NoSlotsInPeriod,
    FrequencyMismatch,
    InsufficientBuffer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub severity: Severity,
    pub stop: Option<StopIndex>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub warnings: Vec<Warning>,
    pub suggestions: Vec<String>,
}

impl ValidationReport {
    pub fn has_high_severity_warnings(&self) -> bool {
        self.warnings.iter().any(|w| w.severity == Severity::High)
    }
}

/// Per-(line,stop) running time between consecutive stations, needed by
/// `ImpossibleJourneyTime`. The engine supplies this from `getLineInfo().sectionTimes`
///; validation has no facade access of its own.
pub fn validate_line(
    model: &TimetableModel,
    line_id: LineId,
    journey_times: &[i64],
    stats: &DelayStatistics,
) -> ValidationReport {
    let mut warnings = Vec::new();
    let mut suggestions = Vec::new();

    let Some(line) = model.lines.get(&line_id) else {
        return ValidationReport {
            valid: true,
            warnings,
            suggestions,
        };
    };

    let mut stops: Vec<StopIndex> = line.stations.keys().copied().collect();
    stops.sort_unstable();

    for &stop in &stops {
        let station = &line.stations[&stop];
        if let ConstraintVariant::ArrDep(form) = &station.constraint {
            // A freshly-created flat slot list with nothing added yet isn't a
            // misconfigured period, it's just "no timetable entered": only an
            // explicit `Periods` group with zero slots is worth flagging.
            match form {
                ArrDepForm::Slots(slots) if slots.is_empty() => {}
                _ => {
                    for slots in periods_of(form) {
                        check_slots(&slots, stop, journey_times.get(stop), &mut warnings);
                    }
                }
            }
            if let ArrDepForm::Periods(groups) = form {
                for group in groups {
                    if let Some(w) = validate_time_period_bounds(group.period.start, group.period.end) {
                        warnings.push(w);
                    }
                }
                let periods: Vec<crate::clock::TimePeriod> = groups.iter().map(|g| g.period.clone()).collect();
                warnings.extend(validate_no_overlaps(&periods));
            }
        }
        check_frequency(line, stop, &station.constraint, &mut warnings);
        if let Some(suggested) = stats.suggest_buffer_time(line_id, stop) {
            if let Some(s) = insufficient_buffer_warning(stats, line_id, stop, suggested) {
                warnings.push(s);
            }
            suggestions.push(format!("stop {stop}: suggested buffer {suggested}s"));
        }
    }

    for pair in stops.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        check_impossible_journey(line, a, b, journey_times.get(a).copied(), &mut warnings);
    }

    let valid = !warnings.iter().any(|w| w.severity == Severity::High);
    ValidationReport {
        valid,
        warnings,
        suggestions,
    }
}

/// Normalizes both `ArrDepForm` variants into per-period slot lists so the rest of
/// the checks don't need to branch on form.
fn periods_of(form: &ArrDepForm) -> Vec<Vec<Slot>> {
    match form {
        ArrDepForm::Slots(slots) => vec![slots.clone()],
        ArrDepForm::Periods(groups) => groups.iter().map(|g| g.slots.clone()).collect(),
    }
}

fn check_slots(slots: &[Slot], stop: StopIndex, journey_time: Option<&i64>, warnings: &mut Vec<Warning>) {
    if slots.is_empty() {
        warnings.push(Warning {
            kind: WarningKind::NoSlotsInPeriod,
            severity: Severity::Medium,
            stop: Some(stop),
            message: format!("stop {stop}: time period has no slots"),
        });
        return;
    }

    for slot in slots {
        let dwell = wrap_positive_span(slot.arrival_slot(), slot.departure_slot());
        if dwell == 0 {
            warnings.push(Warning {
                kind: WarningKind::DepartureBeforeArrival,
                severity: Severity::Low,
                stop: Some(stop),
                message: format!("stop {stop}: slot {slot:?} has zero dwell"),
            });
        } else if dwell > 60 && slot.departure_slot() < slot.arrival_slot() {
            warnings.push(Warning {
                kind: WarningKind::DepartureBeforeArrival,
                severity: Severity::Medium,
                stop: Some(stop),
                message: format!("stop {stop}: slot {slot:?} departs before it arrives by more than 60s"),
            });
        }
    }

    let mut sorted: Vec<&Slot> = slots.iter().collect();
    sorted.sort_by_key(|s| s.arrival_slot());
    for pair in sorted.windows(2) {
        let gap = wrap_positive_span(pair[0].departure_slot(), pair[1].arrival_slot());
        if let Some(&journey) = journey_time {
            if gap < journey {
                warnings.push(Warning {
                    kind: WarningKind::SlotsTooClose,
                    severity: Severity::High,
                    stop: Some(stop),
                    message: format!("stop {stop}: gap {gap}s between slots is shorter than the journey time"),
                });
                continue;
            }
        }
        if gap < 30 {
            warnings.push(Warning {
                kind: WarningKind::SlotsTooClose,
                severity: Severity::Medium,
                stop: Some(stop),
                message: format!("stop {stop}: gap {gap}s between consecutive slots"),
            });
        }
    }
}

fn check_impossible_journey(
    line: &Line,
    from_stop: StopIndex,
    to_stop: StopIndex,
    journey_time: Option<i64>,
    warnings: &mut Vec<Warning>,
) {
    let Some(journey) = journey_time else { return };
    let (Some(from), Some(to)) = (line.stations.get(&from_stop), line.stations.get(&to_stop)) else {
        return;
    };
    let (ConstraintVariant::ArrDep(from_form), ConstraintVariant::ArrDep(to_form)) = (&from.constraint, &to.constraint) else {
        return;
    };
    let from_slots: Vec<Slot> = periods_of(from_form).into_iter().flatten().collect();
    let to_slots: Vec<Slot> = periods_of(to_form).into_iter().flatten().collect();
    let Some(best_gap) = from_slots
        .iter()
        .flat_map(|f| to_slots.iter().map(move |t| wrap_positive_span(f.departure_slot(), t.arrival_slot())))
        .min()
    else {
        return;
    };
    if (best_gap as f64) < 0.8 * journey as f64 {
        warnings.push(Warning {
            kind: WarningKind::ImpossibleJourneyTime,
            severity: Severity::High,
            stop: Some(from_stop),
            message: format!(
                "stops {from_stop}->{to_stop}: best available gap {best_gap}s is under 80% of the {journey}s journey time"
            ),
        });
    }
}

fn check_frequency(line: &Line, stop: StopIndex, constraint: &ConstraintVariant, warnings: &mut Vec<Warning>) {
    let Some(frequency) = line.frequency else { return };
    let ConstraintVariant::ArrDep(form) = constraint else { return };
    for slots in periods_of(form) {
        if slots.len() < 2 {
            continue;
        }
        let mut arrivals: Vec<i64> = slots.iter().map(|s| s.arrival_slot()).collect();
        arrivals.sort_unstable();
        let span = arrivals.last().unwrap() - arrivals.first().unwrap();
        let expected = frequency * (arrivals.len() as i64 - 1);
        if expected == 0 {
            continue;
        }
        let divergence = ((span - expected).abs() as f64) / expected as f64;
        if divergence > 0.2 {
            warnings.push(Warning {
                kind: WarningKind::FrequencyMismatch,
                severity: Severity::Medium,
                stop: Some(stop),
                message: format!(
                    "stop {stop}: slot span {span}s diverges from frequency-implied {expected}s by {:.0}%",
                    divergence * 100.0
                ),
            });
        }
    }
}

fn insufficient_buffer_warning(stats: &DelayStatistics, line: LineId, stop: StopIndex, suggested: i64) -> Option<Warning> {
    let enhanced = stats.get_enhanced_statistics(line, stop)?;
    if enhanced.total_count <= 10 {
        return None;
    }
    if (suggested as f64) > 1.5 * enhanced.avg_delay {
        Some(Warning {
            kind: WarningKind::InsufficientBuffer,
            severity: Severity::Low,
            stop: Some(stop),
            message: format!("stop {stop}: suggested buffer {suggested}s exceeds 1.5x the average delay"),
        })
    } else {
        None
    }
}

/// Forward circular distance from `from` to `to`, both slot-times in `[0, 3600)`.
fn wrap_positive_span(from: i64, to: i64) -> i64 {
    crate::clock::wrap(to - from)
}

pub fn validate_time_period_bounds(start: i64, end: i64) -> Option<Warning> {
    if start >= end && end != 0 {
        Some(Warning {
            kind: WarningKind::InvalidTimePeriod,
            severity: Severity::High,
            stop: None,
            message: format!("time period [{start}, {end}) has start >= end"),
        })
    } else {
        None
    }
}

/// Splits a (possibly wrap-around) `TimePeriod` into one or two non-wrapping
/// `[start, stop)` spans so they can live in an interval tree alongside every other
/// period on the station without the tree needing to know about wraparound itself.
fn non_wrapping_spans(index: usize, period: &crate::clock::TimePeriod) -> Vec<rust_lapper::Interval<usize, usize>> {
    let (start, end) = (period.start, period.end);
    if start < end {
        vec![rust_lapper::Interval { start: start as usize, stop: end as usize, val: index }]
    } else if start > end {
        vec![
            rust_lapper::Interval { start: start as usize, stop: 3600, val: index },
            rust_lapper::Interval { start: 0, stop: end as usize, val: index },
        ]
    } else {
        // start == end means "whole day", per `TimePeriod::contains`.
        vec![rust_lapper::Interval { start: 0, stop: 3600, val: index }]
    }
}

/// Flags any pair of distinct periods whose spans intersect, using an interval tree
/// rather than the naive O(n^2) pairwise scan — the set of periods on a single
/// station is small in practice but this scales to the zone-wide validation pass
/// that walks every station on a line at once.
pub fn validate_no_overlaps(periods: &[crate::clock::TimePeriod]) -> Vec<Warning> {
    let intervals: Vec<rust_lapper::Interval<usize, usize>> = periods
        .iter()
        .enumerate()
        .flat_map(|(i, p)| non_wrapping_spans(i, p))
        .collect();
    let lapper = rust_lapper::Lapper::new(intervals.clone());

    let mut seen = std::collections::HashSet::new();
    let mut warnings = Vec::new();
    for iv in &intervals {
        for hit in lapper.find(iv.start, iv.stop) {
            if hit.val == iv.val {
                continue;
            }
            let pair = if iv.val < hit.val { (iv.val, hit.val) } else { (hit.val, iv.val) };
            if seen.insert(pair) {
                warnings.push(Warning {
                    kind: WarningKind::OverlappingTimePeriods,
                    severity: Severity::High,
                    stop: None,
                    message: format!("time periods {} and {} overlap", pair.0, pair.1),
                });
            }
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConstraintTag;

    #[test]
    fn empty_station_produces_no_warnings() {
        let mut model = TimetableModel::new();
        model.set_condition_type(1, 1, 100, ConstraintTag::ArrDep).unwrap();
        let stats = DelayStatistics::new();
        let report = validate_line(&model, 1, &[], &stats);
        assert!(report.warnings.is_empty());
        assert!(report.valid);
    }

    #[test]
    fn zero_dwell_slot_flags_low_severity() {
        let mut model = TimetableModel::new();
        model.set_condition_type(1, 1, 100, ConstraintTag::ArrDep).unwrap();
        model.add_condition(1, 1, 100, Slot::new(10, 0, 10, 0).unwrap()).unwrap();
        let stats = DelayStatistics::new();
        let report = validate_line(&model, 1, &[], &stats);
        assert!(report.warnings.iter().any(|w| w.kind == WarningKind::DepartureBeforeArrival));
        assert!(report.valid);
    }

    #[test]
    fn slots_too_close_flags_medium_or_high() {
        let mut model = TimetableModel::new();
        model.set_condition_type(1, 1, 100, ConstraintTag::ArrDep).unwrap();
        model.add_condition(1, 1, 100, Slot::new(10, 0, 10, 10).unwrap()).unwrap();
        model.add_condition(1, 1, 100, Slot::new(10, 20, 10, 30).unwrap()).unwrap();
        let stats = DelayStatistics::new();
        let report = validate_line(&model, 1, &[], &stats);
        assert!(report.warnings.iter().any(|w| w.kind == WarningKind::SlotsTooClose));
    }

    #[test]
    fn overlapping_periods_detected() {
        use crate::clock::TimePeriod;
        let warnings = validate_no_overlaps(&[TimePeriod::new(0, 1800), TimePeriod::new(900, 2700)]);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, Severity::High);
    }

    #[test]
    fn invalid_time_period_bounds() {
        assert!(validate_time_period_bounds(1800, 900).is_some());
        assert!(validate_time_period_bounds(0, 0).is_none());
    }
}
