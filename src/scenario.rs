//! Loads a fixed timetable scenario (lines, stops, flat slots and time-period slots)
//! out of a SQLite fixture and builds an `Engine` plus a `FixtureFacade` driving it,
//! the same "query tables, build the in-memory model" shape as the aviation
//! scenario loader this crate grew out of.

use std::cell::RefCell;
use std::collections::HashMap;

use rusqlite::Connection;

use crate::clock::TimePeriod;
use crate::engine::Engine;
use crate::facade::{Carrier, LineInfo, SimulationFacade, StopInfo, VehicleRuntimeState, VehicleState};
use crate::model::{ConstraintTag, LineId, Slot, StationId, StopIndex, VehicleId};

pub trait ScenarioLoader<E: std::fmt::Debug> {
    fn load(&self) -> Result<(Engine, FixtureFacade), E>;
}

pub struct SqliteScenarioLoader {
    conn: Connection,
    id: String,
}

#[derive(Debug)]
pub enum ScenarioLoaderError {
    DatabaseError(rusqlite::Error),
    MissingRequiredDataError(&'static str),
}

impl From<rusqlite::Error> for ScenarioLoaderError {
    fn from(value: rusqlite::Error) -> Self {
        Self::DatabaseError(value)
    }
}

impl SqliteScenarioLoader {
    pub fn new(path: &str, scenario_id: String) -> Result<Self, ScenarioLoaderError> {
        Ok(Self {
            conn: Connection::open(path)?,
            id: scenario_id,
        })
    }
}

/// In-memory `SimulationFacade` backed by the vehicle/line rows a scenario loads.
/// Ticking the demo CLI mutates this facade directly (it owns the doors/position
/// state the `Engine` reads), which is what the real host simulation would do too.
#[derive(Default)]
pub struct FixtureFacade {
    pub now: RefCell<i64>,
    pub vehicles_on_line: HashMap<LineId, Vec<VehicleId>>,
    pub vehicle_states: RefCell<HashMap<VehicleId, VehicleState>>,
    pub line_infos: HashMap<LineId, LineInfo>,
    pub station_names: HashMap<u64, String>,
}

impl SimulationFacade for FixtureFacade {
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

    fn get_station_name(&self, station_group_id: u64) -> Option<String> {
        self.station_names.get(&station_group_id).cloned()
    }

    fn command_stop_auto_departure(&self, vehicle: VehicleId) {
        if let Some(state) = self.vehicle_states.borrow_mut().get_mut(&vehicle) {
            state.auto_departure_enabled = false;
        }
    }

    fn command_restart_auto_departure(&self, vehicle: VehicleId) {
        if let Some(state) = self.vehicle_states.borrow_mut().get_mut(&vehicle) {
            state.auto_departure_enabled = true;
        }
    }

    fn command_force_depart(&self, vehicle: VehicleId) {
        if let Some(state) = self.vehicle_states.borrow_mut().get_mut(&vehicle) {
            state.auto_departure_enabled = true;
            state.doors_open = false;
        }
    }
}

impl ScenarioLoader<ScenarioLoaderError> for SqliteScenarioLoader {
    fn load(&self) -> Result<(Engine, FixtureFacade), ScenarioLoaderError> {
        let mut engine = Engine::new();
        let mut facade = FixtureFacade::default();
        self.read_stations(&mut facade)?;
        self.read_lines(&mut engine, &mut facade)?;
        self.read_flat_slots(&mut engine)?;
        self.read_time_periods(&mut engine)?;
        self.read_vehicles(&mut facade)?;
        Ok((engine, facade))
    }
}

impl SqliteScenarioLoader {
    fn read_stations(&self, facade: &mut FixtureFacade) -> Result<(), ScenarioLoaderError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM stations WHERE sid = ?1")?;
        let mut rows = stmt.query([&self.id])?;
        while let Some(row) = rows.next()? {
            let id: u64 = row.get("id")?;
            facade.station_names.insert(id, row.get("name")?);
        }
        Ok(())
    }

    fn read_lines(&self, engine: &mut Engine, facade: &mut FixtureFacade) -> Result<(), ScenarioLoaderError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, has_timetable, force_departure, min_wait_enabled, max_wait_enabled, frequency FROM lines WHERE sid = ?1",
        )?;
        let mut rows = stmt.query([&self.id])?;
        while let Some(row) = rows.next()? {
            let line: LineId = row.get("id")?;
            if row.get::<&str, i64>("has_timetable")? != 0 {
                engine
                    .set_has_timetable(line, true)
                    .map_err(|_| ScenarioLoaderError::MissingRequiredDataError("invalid line id"))?;
            }
            if row.get::<&str, i64>("force_departure")? != 0 {
                engine.set_force_departure_enabled(line, true).ok();
            }
            if row.get::<&str, i64>("min_wait_enabled")? != 0 {
                engine.set_min_wait_enabled(line, true).ok();
            }
            if row.get::<&str, i64>("max_wait_enabled")? != 0 {
                engine.set_max_wait_enabled(line, true).ok();
            }

            let mut stop_stmt = self.conn.prepare(
                "SELECT stop_index, station_id, min_waiting_time, max_waiting_time FROM stops WHERE sid = ?1 AND line = ?2 ORDER BY stop_index",
            )?;
            let mut stop_rows = stop_stmt.query(rusqlite::params![&self.id, line])?;
            let mut stops = Vec::new();
            while let Some(stop_row) = stop_rows.next()? {
                let stop_index: StopIndex = stop_row.get("stop_index")?;
                let station_id: StationId = stop_row.get("station_id")?;
                let min_waiting_time: Option<i64> = stop_row.get("min_waiting_time")?;
                let max_waiting_time: Option<i64> = stop_row.get("max_waiting_time")?;
                engine
                    .set_condition_type(line, stop_index, station_id, ConstraintTag::None)
                    .ok();
                stops.push(StopInfo {
                    station_group_id: station_id,
                    min_waiting_time,
                    max_waiting_time,
                });
            }
            facade.line_infos.insert(
                line,
                LineInfo {
                    stops,
                    frequency: row.get("frequency")?,
                },
            );
        }
        Ok(())
    }

    fn read_flat_slots(&self, engine: &mut Engine) -> Result<(), ScenarioLoaderError> {
        let mut stmt = self.conn.prepare(
            "SELECT line, stop_index, station_id, arr_min, arr_sec, dep_min, dep_sec FROM flat_slots WHERE sid = ?1",
        )?;
        let mut rows = stmt.query([&self.id])?;
        while let Some(row) = rows.next()? {
            let line: LineId = row.get("line")?;
            let stop: StopIndex = row.get("stop_index")?;
            let station_id: StationId = row.get("station_id")?;
            engine.set_condition_type(line, stop, station_id, ConstraintTag::ArrDep).ok();
            if let Ok(slot) = Slot::new(
                row.get("arr_min")?,
                row.get("arr_sec")?,
                row.get("dep_min")?,
                row.get("dep_sec")?,
            ) {
                engine.add_condition(line, stop, station_id, slot).ok();
            }
        }
        Ok(())
    }

    fn read_time_periods(&self, engine: &mut Engine) -> Result<(), ScenarioLoaderError> {
        let mut period_stmt = self
            .conn
            .prepare("SELECT line, stop_index, station_id, period_start, period_end FROM time_periods WHERE sid = ?1")?;
        let mut period_rows = period_stmt.query([&self.id])?;
        while let Some(period_row) = period_rows.next()? {
            let line: LineId = period_row.get("line")?;
            let stop: StopIndex = period_row.get("stop_index")?;
            let station_id: StationId = period_row.get("station_id")?;
            engine.set_condition_type(line, stop, station_id, ConstraintTag::ArrDep).ok();
            let period = TimePeriod::new(period_row.get("period_start")?, period_row.get("period_end")?);

            let mut slot_stmt = self.conn.prepare(
                "SELECT arr_min, arr_sec, dep_min, dep_sec FROM period_slots WHERE sid = ?1 AND line = ?2 AND stop_index = ?3 AND period_start = ?4",
            )?;
            let mut slot_rows = slot_stmt.query(rusqlite::params![
                &self.id,
                line,
                stop,
                period_row.get::<&str, i64>("period_start")?
            ])?;
            let mut slots = Vec::new();
            while let Some(slot_row) = slot_rows.next()? {
                if let Ok(slot) = Slot::new(
                    slot_row.get("arr_min")?,
                    slot_row.get("arr_sec")?,
                    slot_row.get("dep_min")?,
                    slot_row.get("dep_sec")?,
                ) {
                    slots.push(slot);
                }
            }
            engine.add_time_period(line, stop, period, slots).ok();
        }
        Ok(())
    }

    fn read_vehicles(&self, facade: &mut FixtureFacade) -> Result<(), ScenarioLoaderError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, line, stop_index, carrier, capacity, passenger_count FROM vehicles WHERE sid = ?1",
        )?;
        let mut rows = stmt.query([&self.id])?;
        while let Some(row) = rows.next()? {
            let vehicle: VehicleId = row.get("id")?;
            let line: LineId = row.get("line")?;
            let carrier_str: String = row.get("carrier")?;
            let carrier = match carrier_str.as_str() {
                "bus" => Carrier::Bus,
                "tram" => Carrier::Tram,
                _ => Carrier::Train,
            };
            facade.vehicles_on_line.entry(line).or_default().push(vehicle);
            facade.vehicle_states.borrow_mut().insert(
                vehicle,
                VehicleState {
                    stop_index: row.get("stop_index")?,
                    line,
                    state: VehicleRuntimeState::AtTerminal,
                    auto_departure_enabled: true,
                    doors_open: true,
                    doors_opened_at: 0,
                    section_times: Vec::new(),
                    line_stop_departures: Vec::new(),
                    carrier,
                    passenger_count: row.get("passenger_count")?,
                    capacity: row.get("capacity")?,
                },
            );
        }
        Ok(())
    }
}
