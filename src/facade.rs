//! Simulation Facade: the boundary the core is driven through. The host
//! simulation implements `SimulationFacade`; the engine never reaches past it for
//! vehicle or line state, and every "command" sink is fire-and-forget — failures are
//! logged by the implementor, never propagated back into the core.

use crate::model::{LineId, StopIndex, VehicleId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleRuntimeState {
    AtTerminal,
    InTransit,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Carrier {
    Train,
    Bus,
    Tram,
}

/// Snapshot of one vehicle's runtime state as the host simulation sees it.
#[derive(Debug, Clone)]
pub struct VehicleState {
    pub stop_index: StopIndex,
    pub line: LineId,
    pub state: VehicleRuntimeState,
    pub auto_departure_enabled: bool,
    pub doors_open: bool,
    pub doors_opened_at: i64,
    pub section_times: Vec<i64>,
    pub line_stop_departures: Vec<i64>,
    pub carrier: Carrier,
    pub passenger_count: Option<u32>,
    pub capacity: Option<u32>,
}

impl VehicleState {
    /// `passengerCount / capacity` when both are known and `capacity > 0`, the load
    /// factor 's priority rule reads.
    pub fn load_factor(&self) -> Option<f64> {
        match (self.passenger_count, self.capacity) {
            (Some(p), Some(c)) if c > 0 => Some(p as f64 / c as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StopInfo {
    pub station_group_id: u64,
    pub min_waiting_time: Option<i64>,
    pub max_waiting_time: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct LineInfo {
    pub stops: Vec<StopInfo>,
    pub frequency: Option<i64>,
}

/// Everything the core requires from the host simulation. Every method is total:
/// there is no error-returning path because the engine treats the facade as ambient
/// ground truth, not a fallible dependency ('s "never returns an error" rule
/// extends to the tick's inputs, not only its outputs).
pub trait SimulationFacade {
    fn get_now(&self) -> i64;
    fn list_lines(&self) -> Vec<LineId>;
    fn list_vehicles_on_line(&self, line: LineId) -> Vec<VehicleId>;
    fn get_vehicle_state(&self, vehicle: VehicleId) -> Option<VehicleState>;
    fn get_line_info(&self, line: LineId) -> Option<LineInfo>;
    fn get_station_name(&self, station_group_id: u64) -> Option<String>;

    fn command_stop_auto_departure(&self, vehicle: VehicleId);
    fn command_restart_auto_departure(&self, vehicle: VehicleId);
    fn command_force_depart(&self, vehicle: VehicleId);
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::collections::HashMap;

    /// In-memory `SimulationFacade` used by engine integration tests; records the
    /// commands issued to it instead of acting on them.
    #[derive(Default)]
    pub struct FakeFacade {
        pub now: std::cell::Cell<i64>,
        pub vehicles_on_line: HashMap<LineId, Vec<VehicleId>>,
        pub vehicle_states: HashMap<VehicleId, VehicleState>,
        pub line_infos: HashMap<LineId, LineInfo>,
        pub issued_commands: std::cell::RefCell<Vec<(&'static str, VehicleId)>>,
    }

    impl SimulationFacade for FakeFacade {
        fn get_now(&self) -> i64 {
            self.now.get()
        }

        fn list_lines(&self) -> Vec<LineId> {
            self.vehicles_on_line.keys().copied().collect()
        }

        fn list_vehicles_on_line(&self, line: LineId) -> Vec<VehicleId> {
            self.vehicles_on_line.get(&line).cloned().unwrap_or_default()
        }

        fn get_vehicle_state(&self, vehicle: VehicleId) -> Option<VehicleState> {
            self.vehicle_states.get(&vehicle).cloned()
        }

        fn get_line_info(&self, line: LineId) -> Option<LineInfo> {
            self.line_infos.get(&line).cloned()
        }

        fn get_station_name(&self, _station_group_id: u64) -> Option<String> {
            None
        }

        fn command_stop_auto_departure(&self, vehicle: VehicleId) {
            self.issued_commands.borrow_mut().push(("stop", vehicle));
        }

        fn command_restart_auto_departure(&self, vehicle: VehicleId) {
            self.issued_commands.borrow_mut().push(("restart", vehicle));
        }

        fn command_force_depart(&self, vehicle: VehicleId) {
            self.issued_commands.borrow_mut().push(("force", vehicle));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeFacade;
    use super::*;

    #[test]
    fn load_factor_requires_both_fields() {
        let mut state = sample_state();
        state.passenger_count = None;
        assert_eq!(state.load_factor(), None);
        state.passenger_count = Some(80);
        state.capacity = Some(100);
        assert_eq!(state.load_factor(), Some(0.8));
    }

    #[test]
    fn fake_facade_records_commands() {
        let facade = FakeFacade::default();
        facade.command_force_depart(1);
        assert_eq!(facade.issued_commands.borrow().len(), 1);
    }

    fn sample_state() -> VehicleState {
        VehicleState {
            stop_index: 0,
            line: 1,
            state: VehicleRuntimeState::AtTerminal,
            auto_departure_enabled: true,
            doors_open: true,
            doors_opened_at: 0,
            section_times: vec![],
            line_stop_departures: vec![],
            carrier: Carrier::Train,
            passenger_count: None,
            capacity: None,
        }
    }
}
