//! The Core API: a single `Engine` value owns the model, cache and delay
//! statistics and is the only thing external collaborators hold a handle to. This
//! resolves the "global mutable state" source pattern — callers
//! construct as many independent engines as they need (e.g. one per test), rather
//! than reaching for a process-wide singleton.

use std::collections::HashMap;

use crate::binding;
use crate::cache::CacheLayer;
use crate::clock::TimePeriod;
use crate::departure::{self, Decision, VehicleObservation};
use crate::error::{CoreError, CoreResult};
use crate::facade::{SimulationFacade, VehicleRuntimeState};
use crate::model::{
    ConstraintTag, LineId, Slot, StationId, StopIndex, TimetableModel, TrainAssignment, VehicleId,
};
use crate::recovery::RecoveryMode;
use crate::skip::{AlternatingPattern, SlotBasedPattern, VehicleBasedPattern, ZoneExpressPattern};
use crate::snapshot;
use crate::stats::{ArrivalPredictionInput, DelayStatistics, EnhancedStatistics};
use crate::validation::ValidationReport;

/// One-slot clipboards backing the two-call `copy_constraints` / `paste_constraints`
/// and `copy_line_timetable` / `paste_line_timetable` pairs. Holding the
/// *source coordinates* rather than a cloned constraint means paste always reads the
/// freshest copy of the source, matching how a UI clipboard behaves when the source
/// keeps changing between copy and paste.
#[derive(Debug, Clone, Copy, Default)]
struct Clipboard {
    station: Option<(LineId, StopIndex)>,
    line: Option<LineId>,
}

pub struct Engine {
    model: TimetableModel,
    cache: CacheLayer,
    stats: DelayStatistics,
    clipboard: Clipboard,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            model: TimetableModel::new(),
            cache: CacheLayer::new(),
            stats: DelayStatistics::new(),
            clipboard: Clipboard::default(),
        }
    }

    fn drain_events(&mut self) {
        for event in self.model.take_events() {
            self.cache.apply(event);
        }
    }

    // ---- model mutators -------------------------------------------------

    pub fn set_condition_type(&mut self, line: LineId, stop: StopIndex, station_id: StationId, tag: ConstraintTag) -> CoreResult<()> {
        let r = self.model.set_condition_type(line, stop, station_id, tag);
        self.drain_events();
        r
    }

    pub fn add_condition(&mut self, line: LineId, stop: StopIndex, station_id: StationId, slot: Slot) -> CoreResult<()> {
        let r = self.model.add_condition(line, stop, station_id, slot);
        self.drain_events();
        r
    }

    pub fn remove_condition(&mut self, line: LineId, stop: StopIndex, tag: ConstraintTag, index: usize) -> CoreResult<()> {
        let r = self.model.remove_condition(line, stop, tag, index);
        self.drain_events();
        r
    }

    pub fn remove_all_conditions(&mut self, line: LineId, stop: StopIndex, tag: ConstraintTag) -> CoreResult<()> {
        let r = self.model.remove_all_conditions(line, stop, tag);
        self.drain_events();
        r
    }

    pub fn update_arr_dep(&mut self, line: LineId, stop: StopIndex, slot_index: usize, field_index: usize, value: u8) -> CoreResult<()> {
        let r = self.model.update_arr_dep(line, stop, slot_index, field_index, value);
        self.drain_events();
        r
    }

    pub fn insert_arr_dep_condition(&mut self, line: LineId, stop: StopIndex, index: usize, slot: Slot) -> CoreResult<()> {
        let r = self.model.insert_arr_dep_condition(line, stop, index, slot);
        self.drain_events();
        r
    }

    pub fn add_time_period(&mut self, line: LineId, stop: StopIndex, period: TimePeriod, slots: Vec<Slot>) -> CoreResult<()> {
        let r = self.model.add_time_period(line, stop, period, slots);
        self.drain_events();
        r
    }

    pub fn update_time_period(&mut self, line: LineId, stop: StopIndex, period_index: usize, period: TimePeriod) -> CoreResult<()> {
        let r = self.model.update_time_period(line, stop, period_index, period);
        self.drain_events();
        r
    }

    pub fn remove_time_period(&mut self, line: LineId, stop: StopIndex, period_index: usize) -> CoreResult<()> {
        let r = self.model.remove_time_period(line, stop, period_index);
        self.drain_events();
        r
    }

    pub fn set_has_timetable(&mut self, line: LineId, enabled: bool) -> CoreResult<()> {
        let r = self.model.set_has_timetable(line, enabled);
        self.drain_events();
        r
    }

    pub fn set_force_departure_enabled(&mut self, line: LineId, enabled: bool) -> CoreResult<()> {
        self.model.set_force_departure_enabled(line, enabled)
    }

    pub fn set_min_wait_enabled(&mut self, line: LineId, enabled: bool) -> CoreResult<()> {
        self.model.set_min_wait_enabled(line, enabled)
    }

    pub fn set_max_wait_enabled(&mut self, line: LineId, enabled: bool) -> CoreResult<()> {
        self.model.set_max_wait_enabled(line, enabled)
    }

    pub fn set_max_delay_tolerance(&mut self, line: LineId, stop: StopIndex, seconds: Option<i64>) -> CoreResult<()> {
        self.model.set_max_delay_tolerance(line, stop, seconds)
    }

    pub fn set_max_delay_tolerance_enabled(&mut self, line: LineId, stop: StopIndex, enabled: bool) -> CoreResult<()> {
        self.model.set_max_delay_tolerance_enabled(line, stop, enabled)
    }

    pub fn set_delay_recovery_mode_line(&mut self, line: LineId, mode: Option<RecoveryMode>) -> CoreResult<()> {
        self.model.set_delay_recovery_mode_line(line, mode)
    }

    pub fn set_delay_recovery_mode_station(&mut self, line: LineId, stop: StopIndex, mode: Option<RecoveryMode>) -> CoreResult<()> {
        self.model.set_delay_recovery_mode_station(line, stop, mode)
    }

    pub fn set_recovery_rate_line(&mut self, line: LineId, rate: Option<f64>) -> CoreResult<()> {
        self.model.set_recovery_rate_line(line, rate)
    }

    pub fn set_recovery_rate_station(&mut self, line: LineId, stop: StopIndex, rate: Option<f64>) -> CoreResult<()> {
        self.model.set_recovery_rate_station(line, stop, rate)
    }

    /// Remembers `(line, stop)` for a subsequent `paste_constraints` call.
    pub fn copy_constraints(&mut self, line: LineId, stop: StopIndex) {
        self.clipboard.station = Some((line, stop));
    }

    pub fn paste_constraints(&mut self, to_line: LineId, to_stop: StopIndex) -> CoreResult<()> {
        let (from_line, from_stop) = self
            .clipboard
            .station
            .ok_or_else(|| CoreError::InvalidArgument("nothing copied".into()))?;
        let r = self.model.copy_paste_constraints(from_line, from_stop, to_line, to_stop);
        self.drain_events();
        r
    }

    pub fn copy_line_timetable(&mut self, line: LineId) {
        self.clipboard.line = Some(line);
    }

    pub fn paste_line_timetable(&mut self, to_line: LineId) -> CoreResult<()> {
        let from_line = self
            .clipboard
            .line
            .ok_or_else(|| CoreError::InvalidArgument("nothing copied".into()))?;
        let r = self.model.copy_paste_line_timetable(from_line, to_line);
        self.drain_events();
        r
    }

    // ---- skip-stop patterns ---------------------------------------------

    pub fn set_skip_slot_pattern(&mut self, line: LineId, stop: StopIndex, station_id: StationId, pattern: Option<SlotBasedPattern>) -> CoreResult<()> {
        self.model.set_skip_slot_pattern(line, stop, station_id, pattern)
    }

    pub fn set_skip_vehicle_pattern(&mut self, line: LineId, stop: StopIndex, station_id: StationId, pattern: Option<VehicleBasedPattern>) -> CoreResult<()> {
        self.model.set_skip_vehicle_pattern(line, stop, station_id, pattern)
    }

    pub fn set_skip_alternating_pattern(&mut self, line: LineId, stop: StopIndex, station_id: StationId, pattern: Option<AlternatingPattern>) -> CoreResult<()> {
        self.model.set_skip_alternating_pattern(line, stop, station_id, pattern)
    }

    pub fn set_skip_zone_express_pattern(&mut self, line: LineId, stop: StopIndex, station_id: StationId, pattern: Option<ZoneExpressPattern>) -> CoreResult<()> {
        self.model.set_skip_zone_express_pattern(line, stop, station_id, pattern)
    }

    // ---- train-slot binding ----------------------------------------------

    /// Per §7, `ConflictResolved` is an informational result, not a failure: the
    /// assignment always takes effect before this returns. `Err(ConflictResolved)`
    /// is the channel for reporting how many competing assignments it evicted;
    /// `Ok(0)` means the slot was unclaimed.
    pub fn assign_train_to_slot(&mut self, line: LineId, stop: StopIndex, vehicle: VehicleId, slot_index: usize) -> CoreResult<usize> {
        let slots = self.cache.active_slots(&self.model, line, stop, 0).to_vec();
        let slot = *slots
            .get(slot_index)
            .ok_or_else(|| CoreError::InvalidArgument(format!("slot index {slot_index} out of bounds")))?;
        let station = self.model.station_mut_checked(line, stop)?;
        let outcome = binding::assign_train_to_slot(station, vehicle, slot_index, slot);
        if outcome.evicted > 0 {
            tracing::info!(line, stop, vehicle, evicted = outcome.evicted, "train assignment evicted competitors");
            return Err(CoreError::ConflictResolved { evicted: outcome.evicted });
        }
        Ok(0)
    }

    pub fn remove_train_assignment(&mut self, line: LineId, stop: StopIndex, vehicle: VehicleId) -> CoreResult<bool> {
        Ok(binding::remove_train_assignment(self.model.station_mut_checked(line, stop)?, vehicle))
    }

    pub fn get_assigned_slot(&self, line: LineId, stop: StopIndex, vehicle: VehicleId) -> Option<Slot> {
        self.model.station(line, stop).and_then(|s| binding::get_assigned_slot(s, vehicle))
    }

    pub fn is_train_assigned(&self, line: LineId, stop: StopIndex, vehicle: VehicleId) -> bool {
        self.model.station(line, stop).map(|s| binding::is_train_assigned(s, vehicle)).unwrap_or(false)
    }

    pub fn get_train_assignment(&self, line: LineId, stop: StopIndex, vehicle: VehicleId) -> Option<TrainAssignment> {
        self.model.station(line, stop).and_then(|s| s.train_assignments.get(&vehicle).cloned())
    }

    pub fn clear_invalid_assignments(&mut self, line: LineId, stop: StopIndex) -> CoreResult<usize> {
        let active = self.cache.active_slots(&self.model, line, stop, 0).to_vec();
        Ok(binding::clear_invalid_assignments(self.model.station_mut_checked(line, stop)?, &active))
    }

    // ---- tick entry ----------------------------------------------------------

    /// The workhorse: evaluates one (vehicle, line, stop) and drives the facade's
    /// command sinks accordingly. Never returns an error — a facade that cannot
    /// resolve the vehicle or line is treated as "release" per the defensive shortcut.
    pub fn update_for_vehicle(&mut self, facade: &dyn SimulationFacade, vehicle: VehicleId) {
        let Some(state) = facade.get_vehicle_state(vehicle) else {
            return;
        };
        if !matches!(state.state, VehicleRuntimeState::AtTerminal) {
            return;
        }
        if !state.doors_open {
            if state.auto_departure_enabled {
                facade.command_stop_auto_departure(vehicle);
            }
            return;
        }

        let line = state.line;
        let stop = state.stop_index + 1;
        let now = facade.get_now();

        let has_timetable = self.model.line(line).map(|l| l.has_timetable).unwrap_or(false);
        if !has_timetable {
            self.release(facade, vehicle, line, state.auto_departure_enabled);
            return;
        }

        let line_info = facade.get_line_info(line);
        let stop_info = line_info.as_ref().and_then(|li| li.stops.get(state.stop_index));
        let is_terminus = line_info
            .as_ref()
            .map(|li| state.stop_index == 0 || state.stop_index + 1 == li.stops.len())
            .unwrap_or(false);

        let vehicles_on_line = facade.list_vehicles_on_line(line);
        let vehicle_index = vehicles_on_line.iter().position(|&v| v == vehicle).map(|i| i + 1);

        let mut is_only_vehicle_on_line = vehicles_on_line.len() == 1;
        let mut someone_arrived_earlier_at_stop = false;
        let mut line_stop_departures = Vec::new();
        for &other in &vehicles_on_line {
            if other == vehicle {
                continue;
            }
            is_only_vehicle_on_line = false;
            let Some(other_state) = facade.get_vehicle_state(other) else {
                continue;
            };
            if other_state.stop_index == state.stop_index && other_state.doors_opened_at < state.doors_opened_at {
                someone_arrived_earlier_at_stop = true;
            }
            if let Some(&d) = other_state.line_stop_departures.get(state.stop_index) {
                line_stop_departures.push(d);
            }
        }
        let previous_departure_across_line =
            departure::previous_departure_across_line(&self.model, line, stop, line_stop_departures.into_iter());

        let obs = VehicleObservation {
            vehicle,
            line,
            stop,
            now,
            doors_opened_at: state.doors_opened_at,
            is_terminus,
            min_waiting_time: stop_info.and_then(|s| s.min_waiting_time),
            max_waiting_time: stop_info.and_then(|s| s.max_waiting_time),
            vehicle_index,
            load_factor: state.load_factor(),
            is_only_vehicle_on_line,
            someone_arrived_earlier_at_stop,
            previous_departure_across_line,
        };

        let decision = departure::evaluate(&mut self.model, &mut self.cache, &mut self.stats, &obs);
        match decision {
            Decision::Release => self.release(facade, vehicle, line, state.auto_departure_enabled),
            Decision::Hold => {
                if state.auto_departure_enabled {
                    facade.command_stop_auto_departure(vehicle);
                }
            }
        }
    }

    fn release(&self, facade: &dyn SimulationFacade, vehicle: VehicleId, line: LineId, auto_departure_enabled: bool) {
        let force = self.model.line(line).map(|l| l.force_departure).unwrap_or(false);
        if force {
            facade.command_force_depart(vehicle);
        } else if !auto_departure_enabled {
            facade.command_restart_auto_departure(vehicle);
        }
    }

    /// Periodic pruning entry point: drops lines the facade no
    /// longer reports, stale stop entries, vehicles that left the line, and
    /// assignments whose slot fell out of the active set.
    pub fn clean_timetable(&mut self, facade: &dyn SimulationFacade) {
        let lines = facade.list_lines();
        self.model.prune(
            &lines,
            |line| facade.get_line_info(line).map(|li| li.stops.len()).unwrap_or(0),
            |line| facade.list_vehicles_on_line(line),
        );
        self.drain_events();

        let stops: Vec<(LineId, StopIndex)> = self
            .model
            .lines
            .iter()
            .flat_map(|(&l, line)| line.stations.keys().map(move |&s| (l, s)))
            .collect();
        for (line, stop) in stops {
            let now = facade.get_now();
            let active = self.cache.active_slots(&self.model, line, stop, now).to_vec();
            if let Ok(station) = self.model.station_mut_checked(line, stop) {
                binding::clear_invalid_assignments(station, &active);
            }
        }
    }

    // ---- query accessors --------------------------------------------------------

    pub fn active_slots(&mut self, line: LineId, stop: StopIndex, now: i64) -> Vec<Slot> {
        self.cache.active_slots(&self.model, line, stop, now).to_vec()
    }

    pub fn get_enhanced_statistics(&self, line: LineId, stop: StopIndex) -> Option<EnhancedStatistics> {
        self.stats.get_enhanced_statistics(line, stop)
    }

    pub fn suggest_buffer_time(&self, line: LineId, stop: StopIndex) -> Option<i64> {
        self.stats.suggest_buffer_time(line, stop)
    }

    pub fn predict_arrival_time(&self, now: i64, input: &ArrivalPredictionInput) -> i64 {
        self.stats.predict_arrival_time(now, input)
    }

    pub fn validate_line(&self, line: LineId, journey_times: &[i64]) -> ValidationReport {
        crate::validation::validate_line(&self.model, line, journey_times, &self.stats)
    }

    pub fn station_constraints(&self, station_id: StationId) -> HashMap<(LineId, StopIndex), ()> {
        self.cache
            .stations_for(station_id)
            .into_iter()
            .map(|k| (k, ()))
            .collect()
    }

    pub fn index_station(&mut self, station_id: StationId, line: LineId, stop: StopIndex) {
        self.cache.index_station(station_id, line, stop);
    }

    pub fn model(&self) -> &TimetableModel {
        &self.model
    }

    // ---- snapshot / restore --------------------------------------------------

    pub fn snapshot(&self) -> CoreResult<(u32, Vec<u8>)> {
        snapshot::snapshot(&self.model)
    }

    pub fn restore(&mut self, version: u32, blob: &[u8]) -> CoreResult<()> {
        self.model = snapshot::restore(version, blob)?;
        self.model.drop_malformed_slots();
        self.drain_events();
        self.cache.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::test_support::FakeFacade;
    use crate::facade::{Carrier, LineInfo, StopInfo, VehicleState};

    fn line_info(stops: usize) -> LineInfo {
        LineInfo {
            stops: (0..stops)
                .map(|_| StopInfo {
                    station_group_id: 1,
                    min_waiting_time: None,
                    max_waiting_time: None,
                })
                .collect(),
            frequency: None,
        }
    }

    #[test]
    fn no_constraint_releases_and_restarts_auto_departure() {
        let mut engine = Engine::new();
        let facade = FakeFacade::default();
        facade.vehicles_on_line.clone();
        let mut facade = facade;
        facade.vehicle_states.insert(
            1,
            VehicleState {
                stop_index: 0,
                line: 1,
                state: VehicleRuntimeState::AtTerminal,
                auto_departure_enabled: false,
                doors_open: true,
                doors_opened_at: 0,
                section_times: vec![],
                line_stop_departures: vec![],
                carrier: Carrier::Train,
                passenger_count: None,
                capacity: None,
            },
        );
        facade.vehicles_on_line.insert(1, vec![1]);
        facade.line_infos.insert(1, line_info(3));
        engine.set_has_timetable(1, true).unwrap();

        engine.update_for_vehicle(&facade, 1);
        assert_eq!(facade.issued_commands.borrow().as_slice(), &[("restart", 1)]);
    }

    #[test]
    fn closed_doors_stops_auto_departure() {
        let mut engine = Engine::new();
        let mut facade = FakeFacade::default();
        facade.vehicle_states.insert(
            1,
            VehicleState {
                stop_index: 0,
                line: 1,
                state: VehicleRuntimeState::AtTerminal,
                auto_departure_enabled: true,
                doors_open: false,
                doors_opened_at: 0,
                section_times: vec![],
                line_stop_departures: vec![],
                carrier: Carrier::Train,
                passenger_count: None,
                capacity: None,
            },
        );
        facade.vehicles_on_line.insert(1, vec![1]);
        engine.update_for_vehicle(&facade, 1);
        assert_eq!(facade.issued_commands.borrow().as_slice(), &[("stop", 1)]);
    }

    #[test]
    fn arr_dep_hold_then_release() {
        let mut engine = Engine::new();
        engine.set_condition_type(1, 1, 100, ConstraintTag::ArrDep).unwrap();
        engine.add_condition(1, 1, 100, Slot::new(10, 0, 10, 30).unwrap()).unwrap();
        engine.set_has_timetable(1, true).unwrap();

        let mut facade = FakeFacade::default();
        facade.vehicles_on_line.insert(1, vec![1]);
        facade.line_infos.insert(1, line_info(2));
        facade.now.set(10);
        facade.vehicle_states.insert(
            1,
            VehicleState {
                stop_index: 0,
                line: 1,
                state: VehicleRuntimeState::AtTerminal,
                auto_departure_enabled: true,
                doors_open: true,
                doors_opened_at: 10,
                section_times: vec![],
                line_stop_departures: vec![],
                carrier: Carrier::Train,
                passenger_count: None,
                capacity: None,
            },
        );

        engine.update_for_vehicle(&facade, 1);
        assert_eq!(facade.issued_commands.borrow().as_slice(), &[("stop", 1)]);

        facade.now.set(700);
        engine.update_for_vehicle(&facade, 1);
        assert!(facade
            .issued_commands
            .borrow()
            .iter()
            .any(|&(cmd, v)| cmd == "restart" && v == 1));
    }

    #[test]
    fn snapshot_restore_round_trip_preserves_model() {
        let mut engine = Engine::new();
        engine.set_condition_type(7, 2, 500, ConstraintTag::ArrDep).unwrap();
        engine.add_condition(7, 2, 500, Slot::new(10, 0, 10, 30).unwrap()).unwrap();
        let (version, blob) = engine.snapshot().unwrap();

        let mut restored = Engine::new();
        restored.restore(version, &blob).unwrap();
        assert_eq!(restored.model().lines[&7].stations[&2].constraint.tag(), ConstraintTag::ArrDep);
    }

    #[test]
    fn clipboard_copy_paste_round_trip() {
        let mut engine = Engine::new();
        engine.set_condition_type(1, 1, 100, ConstraintTag::ArrDep).unwrap();
        engine.add_condition(1, 1, 100, Slot::new(10, 0, 10, 30).unwrap()).unwrap();
        engine.copy_constraints(1, 1);
        engine.paste_constraints(2, 1).unwrap();
        assert_eq!(engine.model().lines[&2].stations[&1].constraint.tag(), ConstraintTag::ArrDep);
    }
}
