//! Departure state machine: per-(vehicle, stop) release decision. Sits above skip-stop
//! patterns, slot assignment and delay recovery, applying them in a fixed order: skip
//! patterns first, then constraint-specific evaluation.
//!
//! This module never talks to the facade directly; the engine translates facade
//! state into `VehicleObservation` once per tick and applies the returned
//! `Decision` (restarting or force-stopping auto-departure as appropriate).

use crate::binding;
use crate::cache::CacheLayer;
use crate::clock::{self, wait_time};
use crate::model::{ConstraintTag, ConstraintVariant, LineId, Slot, StopIndex, TimetableModel, VehicleId, WaitingEntry};
use crate::recovery::{self, ContinuedHoldingOutcome, RecoveryMode};
use crate::slot_assign;
use crate::stats::DelayStatistics;

/// Everything the engine must resolve from facade state before calling in. Fields
/// the Unbunch/AutoUnbunch path alone needs are grouped at the end; the ArrDep path
/// ignores them.
pub struct VehicleObservation {
    pub vehicle: VehicleId,
    pub line: LineId,
    pub stop: StopIndex,
    pub now: i64,
    pub doors_opened_at: i64,
    pub is_terminus: bool,
    pub min_waiting_time: Option<i64>,
    pub max_waiting_time: Option<i64>,
    pub vehicle_index: Option<usize>,
    pub load_factor: Option<f64>,
    pub is_only_vehicle_on_line: bool,
    pub someone_arrived_earlier_at_stop: bool,
    pub previous_departure_across_line: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Release,
    Hold,
}

/// `readyToDepart`'s outer routing, folding in the skip-pattern bypass.
pub fn evaluate(
    model: &mut TimetableModel,
    cache: &mut CacheLayer,
    stats: &mut DelayStatistics,
    obs: &VehicleObservation,
) -> Decision {
    let Some(tag) = model
        .lines
        .get(&obs.line)
        .and_then(|l| l.stations.get(&obs.stop))
        .map(|s| s.constraint.tag())
    else {
        return Decision::Release;
    };

    let bound_slot = model
        .lines
        .get(&obs.line)
        .and_then(|l| l.stations.get(&obs.stop))
        .and_then(|s| binding::get_assigned_slot(s, obs.vehicle));
    let skipped = model
        .lines
        .get(&obs.line)
        .and_then(|l| l.stations.get(&obs.stop))
        .map(|s| {
            s.skip_patterns
                .is_skipped(obs.stop, obs.vehicle, obs.vehicle_index, bound_slot.as_ref())
        })
        .unwrap_or(false);
    if skipped {
        return Decision::Release;
    }

    match tag {
        ConstraintTag::None => Decision::Release,
        ConstraintTag::ArrDep => arr_dep_path(model, cache, stats, obs),
        ConstraintTag::Unbunch | ConstraintTag::AutoUnbunch => unbunch_path(model, obs),
    }
}

/// Evaluates a fixed-slot (`ArrDep`) constraint: assign or reuse a slot, then decide
/// hold vs. release against that slot's departure time.
fn arr_dep_path(
    model: &mut TimetableModel,
    cache: &mut CacheLayer,
    stats: &mut DelayStatistics,
    obs: &VehicleObservation,
) -> Decision {
    let slots: Vec<Slot> = cache.active_slots(model, obs.line, obs.stop, obs.now).to_vec();
    if slots.is_empty() {
        return Decision::Release;
    }

    let (min_wait_enabled, max_wait_enabled, line_mode, line_rate) = {
        let Some(line) = model.lines.get(&obs.line) else {
            return Decision::Release;
        };
        (line.min_wait_enabled, line.max_wait_enabled, line.delay_recovery_mode, line.recovery_rate)
    };
    let Some(station) = model.lines.get_mut(&obs.line).and_then(|l| l.stations.get_mut(&obs.stop)) else {
        return Decision::Release;
    };

    let mode = recovery::resolve_mode(station.delay_recovery_mode, line_mode);
    let rate = recovery::resolve_rate(station.recovery_rate, line_rate);

    if let Some(existing) = station.vehicles_waiting.get(&obs.vehicle).cloned() {
        let entry_is_fresh = existing.arrival_time >= obs.doors_opened_at;
        let slot_still_active = existing.slot.map(|s| slots.contains(&s)).unwrap_or(false);
        if entry_is_fresh && slot_still_active {
            let cur_delay = obs.now - existing.departure_time;
            let tolerance_exceeded = station.max_delay_tolerance_enabled
                && station.max_delay_tolerance.map(|t| cur_delay > t).unwrap_or(false);
            if !tolerance_exceeded {
                return continued_holding(station, stats, obs, mode, rate, existing);
            }
        }
        station.vehicles_waiting.remove(&obs.vehicle);
    }

    fresh_selection(
        station,
        stats,
        obs,
        &slots,
        mode,
        min_wait_enabled,
        max_wait_enabled,
    )
}

fn continued_holding(
    station: &mut crate::model::StationSlot,
    stats: &mut DelayStatistics,
    obs: &VehicleObservation,
    mode: RecoveryMode,
    rate: f64,
    existing: WaitingEntry,
) -> Decision {
    match recovery::on_continued_holding(mode, existing.departure_time, obs.now, rate, obs.is_terminus) {
        ContinuedHoldingOutcome::Reselect => {
            station.vehicles_waiting.remove(&obs.vehicle);
            Decision::Hold
        }
        ContinuedHoldingOutcome::Depart(new_departure) => {
            if obs.now >= new_departure {
                station.vehicles_waiting.remove(&obs.vehicle);
                stats.record_delay(obs.line, obs.stop, obs.now - new_departure);
                Decision::Release
            } else {
                if let Some(entry) = station.vehicles_waiting.get_mut(&obs.vehicle) {
                    entry.departure_time = new_departure;
                }
                Decision::Hold
            }
        }
    }
}

fn fresh_selection(
    station: &mut crate::model::StationSlot,
    stats: &mut DelayStatistics,
    obs: &VehicleObservation,
    slots: &[Slot],
    mode: RecoveryMode,
    min_wait_enabled: bool,
    max_wait_enabled: bool,
) -> Decision {
    let historical_delay = stats.get_historical_delay(obs.line, obs.stop).unwrap_or(0);
    let effective_arrival = obs.doors_opened_at + (historical_delay as f64 * 0.5).round() as i64;
    let contender_priority = binding::compute_priority(historical_delay, obs.load_factor);
    let bound_slot = binding::get_assigned_slot(station, obs.vehicle);

    let vehicles_waiting = station.vehicles_waiting.clone();
    let outcome = slot_assign::assign_slot(
        slots,
        effective_arrival,
        obs.now,
        &vehicles_waiting,
        obs.vehicle,
        bound_slot,
        contender_priority,
        |holder| vehicles_waiting.get(&holder).map(|e| e.priority).unwrap_or(50),
    );

    if outcome.binding_invalid {
        binding::remove_train_assignment(station, obs.vehicle);
    }
    if let Some(evicted) = outcome.evicted_waiting_vehicle {
        station.vehicles_waiting.remove(&evicted);
    }
    for stale in &outcome.stale_entries {
        station.vehicles_waiting.remove(stale);
    }
    if outcome.clear_all_waiting {
        station.vehicles_waiting.clear();
    }

    let Some(slot) = outcome.slot else {
        return Decision::Release;
    };

    let mut wait = wait_time(&slot, effective_arrival);
    let arrival_delay = clock::wrap(obs.doors_opened_at) - slot.arrival_slot();
    if arrival_delay > 30 {
        let effect = recovery::on_arrival_effect(mode, arrival_delay, obs.is_terminus);
        wait = recovery::apply_arrival_effect(wait, effect);
    }
    let departure_time = clock::departure_time(
        obs.doors_opened_at,
        wait,
        obs.min_waiting_time,
        min_wait_enabled,
        obs.max_waiting_time,
        max_wait_enabled,
    );

    stats.record_arrival_delay(obs.line, obs.stop, arrival_delay);
    station.vehicles_waiting.insert(
        obs.vehicle,
        WaitingEntry {
            arrival_time: obs.doors_opened_at,
            slot: Some(slot),
            departure_time,
            priority: contender_priority,
        },
    );

    if obs.now >= departure_time {
        station.vehicles_waiting.remove(&obs.vehicle);
        stats.record_delay(obs.line, obs.stop, obs.now - departure_time);
        Decision::Release
    } else {
        Decision::Hold
    }
}

/// Evaluates an unbunching constraint: holds a vehicle back until it trails the
/// line's most recent departure from this stop by at least the configured gap.
fn unbunch_path(model: &mut TimetableModel, obs: &VehicleObservation) -> Decision {
    let frequency = model.lines.get(&obs.line).and_then(|l| l.frequency);
    let Some(station) = model.lines.get_mut(&obs.line).and_then(|l| l.stations.get_mut(&obs.stop)) else {
        return Decision::Release;
    };

    if let Some(entry) = station.vehicles_waiting.get(&obs.vehicle).cloned() {
        if obs.now >= entry.departure_time {
            station.vehicles_waiting.remove(&obs.vehicle);
            Decision::Release
        } else {
            Decision::Hold
        }
    } else if obs.is_only_vehicle_on_line {
        Decision::Release
    } else if obs.someone_arrived_earlier_at_stop {
        Decision::Hold
    } else {
        let departure_time = match &station.constraint {
            ConstraintVariant::Unbunch { minutes, seconds } => {
                obs.previous_departure_across_line + *minutes as i64 * 60 + *seconds as i64
            }
            ConstraintVariant::AutoUnbunch { margin_min, margin_sec } => {
                obs.previous_departure_across_line + frequency.unwrap_or(0)
                    - (*margin_min as i64 * 60 + *margin_sec as i64)
            }
            _ => return Decision::Release,
        };
        station.vehicles_waiting.insert(
            obs.vehicle,
            WaitingEntry {
                arrival_time: obs.doors_opened_at,
                slot: None,
                departure_time,
                priority: 50,
            },
        );
        if obs.now >= departure_time {
            station.vehicles_waiting.remove(&obs.vehicle);
            Decision::Release
        } else {
            Decision::Hold
        }
    }
}

/// helper: `max(lineStopDepartures[stop] over every vehicle on the line,
/// every stored departureTime in the stop's vehiclesWaiting)`. Kept as a free
/// function so the engine can compute it once per tick per stop before evaluating
/// each vehicle in turn.
pub fn previous_departure_across_line(
    model: &TimetableModel,
    line: LineId,
    stop: StopIndex,
    line_stop_departures: impl Iterator<Item = i64>,
) -> i64 {
    let waiting_max = model
        .lines
        .get(&line)
        .and_then(|l| l.stations.get(&stop))
        .map(|s| s.vehicles_waiting.values().map(|e| e.departure_time).max().unwrap_or(i64::MIN))
        .unwrap_or(i64::MIN);
    line_stop_departures.max().unwrap_or(i64::MIN).max(waiting_max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_obs(vehicle: VehicleId, now: i64, doors_opened_at: i64) -> VehicleObservation {
        VehicleObservation {
            vehicle,
            line: 1,
            stop: 1,
            now,
            doors_opened_at,
            is_terminus: false,
            min_waiting_time: None,
            max_waiting_time: None,
            vehicle_index: None,
            load_factor: None,
            is_only_vehicle_on_line: false,
            someone_arrived_earlier_at_stop: false,
            previous_departure_across_line: 0,
        }
    }

    #[test]
    fn no_constraint_always_releases() {
        let mut model = TimetableModel::new();
        model.set_condition_type(1, 1, 100, ConstraintTag::None).unwrap();
        let mut cache = CacheLayer::new();
        let mut stats = DelayStatistics::new();
        let obs = base_obs(1, 10, 10);
        assert_eq!(evaluate(&mut model, &mut cache, &mut stats, &obs), Decision::Release);
    }

    #[test]
    fn missing_station_releases_defensively() {
        let mut model = TimetableModel::new();
        let mut cache = CacheLayer::new();
        let mut stats = DelayStatistics::new();
        let obs = base_obs(1, 10, 10);
        assert_eq!(evaluate(&mut model, &mut cache, &mut stats, &obs), Decision::Release);
    }

    #[test]
    fn empty_slot_list_releases() {
        let mut model = TimetableModel::new();
        model.set_condition_type(1, 1, 100, ConstraintTag::ArrDep).unwrap();
        let mut cache = CacheLayer::new();
        let mut stats = DelayStatistics::new();
        let obs = base_obs(1, 10, 10);
        assert_eq!(evaluate(&mut model, &mut cache, &mut stats, &obs), Decision::Release);
    }

    #[test]
    fn arr_dep_scenario_1_happy_path() {
        let mut model = TimetableModel::new();
        model.set_condition_type(1, 1, 100, ConstraintTag::ArrDep).unwrap();
        model.add_condition(1, 1, 100, Slot::new(10, 0, 10, 30).unwrap()).unwrap();
        model.add_condition(1, 1, 100, Slot::new(25, 0, 25, 30).unwrap()).unwrap();
        let mut cache = CacheLayer::new();
        for e in model.take_events() {
            cache.apply(e);
        }
        let mut stats = DelayStatistics::new();

        let obs = base_obs(1, 10, 10);
        let decision = evaluate(&mut model, &mut cache, &mut stats, &obs);
        assert_eq!(decision, Decision::Hold);
        let entry = model.lines[&1].stations[&1].vehicles_waiting[&1].clone();
        assert_eq!(entry.slot, Some(Slot::new(10, 0, 10, 30).unwrap()));

        let departure_time = entry.departure_time;
        let obs2 = base_obs(1, departure_time, 10);
        let decision2 = evaluate(&mut model, &mut cache, &mut stats, &obs2);
        assert_eq!(decision2, Decision::Release);
        assert!(!model.lines[&1].stations[&1].vehicles_waiting.contains_key(&1));
    }

    #[test]
    fn scenario_3_occupancy_pushes_second_vehicle_to_next_slot() {
        let mut model = TimetableModel::new();
        model.set_condition_type(1, 1, 100, ConstraintTag::ArrDep).unwrap();
        model.add_condition(1, 1, 100, Slot::new(0, 0, 0, 30).unwrap()).unwrap();
        model.add_condition(1, 1, 100, Slot::new(30, 0, 30, 30).unwrap()).unwrap();
        let mut cache = CacheLayer::new();
        for e in model.take_events() {
            cache.apply(e);
        }
        let mut stats = DelayStatistics::new();

        let obs1 = base_obs(1, 0, 0);
        evaluate(&mut model, &mut cache, &mut stats, &obs1);
        assert_eq!(
            model.lines[&1].stations[&1].vehicles_waiting[&1].slot,
            Some(Slot::new(0, 0, 0, 30).unwrap())
        );

        let obs2 = base_obs(2, 10, 10);
        evaluate(&mut model, &mut cache, &mut stats, &obs2);
        assert_eq!(
            model.lines[&1].stations[&1].vehicles_waiting[&2].slot,
            Some(Slot::new(30, 0, 30, 30).unwrap())
        );
    }

    #[test]
    fn unbunch_only_vehicle_releases_immediately() {
        let mut model = TimetableModel::new();
        model.set_condition_type(1, 1, 100, ConstraintTag::Unbunch).unwrap();
        let mut obs = base_obs(1, 0, 0);
        obs.is_only_vehicle_on_line = true;
        assert_eq!(unbunch_path(&mut model, &obs), Decision::Release);
    }

    #[test]
    fn unbunch_holds_when_another_arrived_earlier() {
        let mut model = TimetableModel::new();
        model.set_condition_type(1, 1, 100, ConstraintTag::Unbunch).unwrap();
        let mut obs = base_obs(1, 0, 0);
        obs.someone_arrived_earlier_at_stop = true;
        assert_eq!(unbunch_path(&mut model, &obs), Decision::Hold);
    }
}
