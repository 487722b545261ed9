//! Minimal `SimulationFacade` used by the top-level integration scenarios. The
//! engine's own unit tests use a richer `FakeFacade` gated behind `#[cfg(test)]`
//! inside the crate; that type isn't visible to an external integration-test binary,
//! so this is a second, smaller implementation of the same trait.

use std::cell::RefCell;
use std::collections::HashMap;

use transit_timetable::facade::{Carrier, LineInfo, SimulationFacade, StopInfo, VehicleRuntimeState, VehicleState};
use transit_timetable::model::{LineId, VehicleId};

#[derive(Default)]
pub struct ScenarioFacade {
    pub now: RefCell<i64>,
    pub vehicles_on_line: HashMap<LineId, Vec<VehicleId>>,
    pub vehicle_states: RefCell<HashMap<VehicleId, VehicleState>>,
    pub line_infos: HashMap<LineId, LineInfo>,
    pub commands: RefCell<Vec<(&'static str, VehicleId)>>,
}

impl ScenarioFacade {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_now(&self, t: i64) {
        *self.now.borrow_mut() = t;
    }

    pub fn put_vehicle(&mut self, vehicle: VehicleId, line: LineId, state: VehicleState) {
        self.vehicles_on_line.entry(line).or_default().push(vehicle);
        self.vehicle_states.borrow_mut().insert(vehicle, state);
    }

    pub fn put_line(&mut self, line: LineId, stops: usize) {
        self.line_infos.insert(
            line,
            LineInfo {
                stops: (0..stops)
                    .map(|_| StopInfo {
                        station_group_id: 1,
                        min_waiting_time: None,
                        max_waiting_time: None,
                    })
                    .collect(),
                frequency: None,
            },
        );
    }
}

pub fn vehicle_state(line: LineId, stop_index: usize, doors_opened_at: i64) -> VehicleState {
    VehicleState {
        stop_index,
        line,
        state: VehicleRuntimeState::AtTerminal,
        auto_departure_enabled: true,
        doors_open: true,
        doors_opened_at,
        section_times: Vec::new(),
        line_stop_departures: Vec::new(),
        carrier: Carrier::Train,
        passenger_count: None,
        capacity: None,
    }
}

impl SimulationFacade for ScenarioFacade {
    fn get_now(&self) -> i64 {
        *self.now.borrow()
    }

    fn list_lines(&self) -> Vec<LineId> {
        self.vehicles_on_line.keys().copied().collect()
    }

    fn list_vehicles_on_line(&self, line: LineId) -> Vec<VehicleId> {
        self.vehicles_on_line.get(&line).cloned().unwrap_or_default()
    }

    fn get_vehicle_state(&self, vehicle: VehicleId) -> Option<VehicleState> {
        self.vehicle_states.borrow().get(&vehicle).cloned()
    }

    fn get_line_info(&self, line: LineId) -> Option<LineInfo> {
        self.line_infos.get(&line).cloned()
    }

    fn get_station_name(&self, _station_group_id: u64) -> Option<String> {
        None
    }

    fn command_stop_auto_departure(&self, vehicle: VehicleId) {
        self.commands.borrow_mut().push(("stop", vehicle));
        if let Some(state) = self.vehicle_states.borrow_mut().get_mut(&vehicle) {
            state.auto_departure_enabled = false;
        }
    }

    fn command_restart_auto_departure(&self, vehicle: VehicleId) {
        self.commands.borrow_mut().push(("restart", vehicle));
        if let Some(state) = self.vehicle_states.borrow_mut().get_mut(&vehicle) {
            state.auto_departure_enabled = true;
        }
    }

    fn command_force_depart(&self, vehicle: VehicleId) {
        self.commands.borrow_mut().push(("force", vehicle));
        if let Some(state) = self.vehicle_states.borrow_mut().get_mut(&vehicle) {
            state.doors_open = false;
        }
    }
}
