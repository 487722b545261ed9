//! Line/Station/Slot/Assignment entities and the mutators that keep their invariants
//! intact. `TimetableModel` is the sole owner of this state; everything else in the
//! crate either reads through it or mutates it through these methods.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cache::CacheEvent;
use crate::clock::TimePeriod;
use crate::error::{CoreError, CoreResult};
use crate::recovery::RecoveryMode;
use crate::skip::SkipPatterns;

pub type LineId = u64;
pub type VehicleId = u64;
pub type StopIndex = usize;
pub type StationId = u64;

/// A scheduled `(arrival, departure)` pair within a 60-minute circular period. Four
/// non-negative integers; equality and hashing use the 4-tuple directly, matching the
/// "identity-based slot comparison" design note rather than a derived string key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub arr_min: u8,
    pub arr_sec: u8,
    pub dep_min: u8,
    pub dep_sec: u8,
}

impl Slot {
    pub fn new(arr_min: u8, arr_sec: u8, dep_min: u8, dep_sec: u8) -> CoreResult<Self> {
        if arr_min >= 60 || dep_min >= 60 || arr_sec >= 60 || dep_sec >= 60 {
            return Err(CoreError::InvalidArgument(format!(
                "slot field out of range: ({arr_min},{arr_sec},{dep_min},{dep_sec})"
            )));
        }
        Ok(Self {
            arr_min,
            arr_sec,
            dep_min,
            dep_sec,
        })
    }

    /// Builds a slot without validating field ranges, used when a malformed slot
    /// must still be representable so invariant-violation recovery can inspect
    /// and drop it rather than panic.
    pub fn new_unchecked(arr_min: u8, arr_sec: u8, dep_min: u8, dep_sec: u8) -> Self {
        Self {
            arr_min,
            arr_sec,
            dep_min,
            dep_sec,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.arr_min < 60 && self.dep_min < 60 && self.arr_sec < 60 && self.dep_sec < 60
    }

    #[inline]
    pub fn arrival_slot(&self) -> i64 {
        self.arr_min as i64 * 60 + self.arr_sec as i64
    }

    #[inline]
    pub fn departure_slot(&self) -> i64 {
        self.dep_min as i64 * 60 + self.dep_sec as i64
    }
}

/// `ArrDep` constraints can be a flat slot list, or refined into one or more
/// time-windowed periods, each with its own slot list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ArrDepForm {
    Slots(Vec<Slot>),
    Periods(Vec<TimePeriodGroup>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimePeriodGroup {
    pub period: TimePeriod,
    pub slots: Vec<Slot>,
}

/// Tagged constraint variant attached to a (line, stop).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConstraintVariant {
    None,
    ArrDep(ArrDepForm),
    Unbunch { minutes: u32, seconds: u32 },
    AutoUnbunch { margin_min: u32, margin_sec: u32 },
}

impl ConstraintVariant {
    pub fn tag(&self) -> ConstraintTag {
        match self {
            ConstraintVariant::None => ConstraintTag::None,
            ConstraintVariant::ArrDep(_) => ConstraintTag::ArrDep,
            ConstraintVariant::Unbunch { .. } => ConstraintTag::Unbunch,
            ConstraintVariant::AutoUnbunch { .. } => ConstraintTag::AutoUnbunch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintTag {
    None,
    ArrDep,
    Unbunch,
    AutoUnbunch,
}

/// Per-vehicle record at a stop: the assigned slot (if one could be found) and the
/// target absolute departure instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitingEntry {
    pub arrival_time: i64,
    pub slot: Option<Slot>,
    pub departure_time: i64,
    /// priority snapshot taken when this entry was created, so a later
    /// contender can judge preemption without re-deriving another vehicle's delay
    /// and load factor.
    pub priority: u32,
}

/// Persistent vehicle↔slot preference that outranks nearest-slot selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainAssignment {
    pub slot_index: usize,
    pub slot: Slot,
}

/// Per-line, per-stop scheduling state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationSlot {
    pub constraint: ConstraintVariant,
    pub vehicles_waiting: HashMap<VehicleId, WaitingEntry>,
    pub train_assignments: HashMap<VehicleId, TrainAssignment>,
    pub skip_patterns: SkipPatterns,
    pub max_delay_tolerance: Option<i64>,
    pub max_delay_tolerance_enabled: bool,
    pub delay_recovery_mode: Option<RecoveryMode>,
    pub recovery_rate: Option<f64>,
    pub station_id: StationId,
}

impl StationSlot {
    pub fn new(station_id: StationId) -> Self {
        Self {
            constraint: ConstraintVariant::None,
            vehicles_waiting: HashMap::new(),
            train_assignments: HashMap::new(),
            skip_patterns: SkipPatterns::default(),
            max_delay_tolerance: None,
            max_delay_tolerance_enabled: false,
            delay_recovery_mode: None,
            recovery_rate: None,
            station_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Line {
    pub has_timetable: bool,
    pub stations: HashMap<StopIndex, StationSlot>,
    pub frequency: Option<i64>,
    pub force_departure: bool,
    pub min_wait_enabled: bool,
    pub max_wait_enabled: bool,
    pub delay_recovery_mode: Option<RecoveryMode>,
    pub recovery_rate: Option<f64>,
}

impl Line {
    pub fn new() -> Self {
        Self {
            has_timetable: false,
            stations: HashMap::new(),
            frequency: None,
            force_departure: false,
            min_wait_enabled: false,
            max_wait_enabled: false,
            delay_recovery_mode: None,
            recovery_rate: None,
        }
    }
}

impl Default for Line {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns all mutable scheduling state. External collaborators never see this
/// directly; they go through `Engine`'s accessors and mutators.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TimetableModel {
    pub lines: HashMap<LineId, Line>,

    /// Cache-invalidation events emitted by the mutators below, drained by the
    /// engine after each call and forwarded to the cache layer. Not serialized: it is pure transient bookkeeping.
    #[serde(skip)]
    pending_events: Vec<CacheEvent>,
}

impl TimetableModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_events(&mut self) -> Vec<CacheEvent> {
        std::mem::take(&mut self.pending_events)
    }

    fn emit(&mut self, event: CacheEvent) {
        self.pending_events.push(event);
    }

    pub fn station(&self, line: LineId, stop: StopIndex) -> Option<&StationSlot> {
        self.lines.get(&line).and_then(|l| l.stations.get(&stop))
    }

    pub fn line(&self, line: LineId) -> Option<&Line> {
        self.lines.get(&line)
    }

    fn line_mut(&mut self, line: LineId) -> CoreResult<&mut Line> {
        self.lines
            .get_mut(&line)
            .ok_or_else(|| CoreError::NotFound(format!("line {line}")))
    }

    pub fn station_mut_checked(&mut self, line: LineId, stop: StopIndex) -> CoreResult<&mut StationSlot> {
        self.station_mut(line, stop)
    }

    fn station_mut(&mut self, line: LineId, stop: StopIndex) -> CoreResult<&mut StationSlot> {
        let l = self
            .lines
            .get_mut(&line)
            .ok_or_else(|| CoreError::NotFound(format!("line {line}")))?;
        l.stations
            .get_mut(&stop)
            .ok_or_else(|| CoreError::NotFound(format!("line {line} stop {stop}")))
    }

    /// Lazily creates the line and station-slot entries a constraint mutation needs.
    fn ensure_station(&mut self, line: LineId, stop: StopIndex, station_id: StationId) -> &mut StationSlot {
        self.lines.entry(line).or_default();
        self.lines
            .get_mut(&line)
            .unwrap()
            .stations
            .entry(stop)
            .or_insert_with(|| StationSlot::new(station_id))
    }

    pub fn set_condition_type(
        &mut self,
        line: LineId,
        stop: StopIndex,
        station_id: StationId,
        tag: ConstraintTag,
    ) -> CoreResult<()> {
        let is_noop = self
            .lines
            .get(&line)
            .and_then(|l| l.stations.get(&stop))
            .map(|s| s.constraint.tag() == tag)
            .unwrap_or(tag == ConstraintTag::None);
        let station = self.ensure_station(line, stop, station_id);
        station.constraint = match tag {
            ConstraintTag::None => ConstraintVariant::None,
            ConstraintTag::ArrDep => ConstraintVariant::ArrDep(ArrDepForm::Slots(Vec::new())),
            ConstraintTag::Unbunch => ConstraintVariant::Unbunch {
                minutes: 0,
                seconds: 0,
            },
            ConstraintTag::AutoUnbunch => ConstraintVariant::AutoUnbunch {
                margin_min: 0,
                margin_sec: 0,
            },
        };
        if !is_noop {
            self.emit(CacheEvent::SlotsChanged(line, stop));
        }
        Ok(())
    }

    /// Appends a slot to the flat `ArrDep` slot list (creating the constraint if
    /// absent). Duplicate 4-tuples are tolerated at runtime (invariant 4) but logged.
    pub fn add_condition(&mut self, line: LineId, stop: StopIndex, station_id: StationId, slot: Slot) -> CoreResult<()> {
        if !slot.is_well_formed() {
            return Err(CoreError::InvalidArgument(format!("{slot:?} has out-of-range fields")));
        }
        let station = self.ensure_station(line, stop, station_id);
        match &mut station.constraint {
            ConstraintVariant::ArrDep(ArrDepForm::Slots(slots)) => {
                if slots.contains(&slot) {
                    tracing::warn!(line, stop, ?slot, "duplicate slot added, tolerated at runtime");
                }
                slots.push(slot);
            }
            ConstraintVariant::None => {
                station.constraint = ConstraintVariant::ArrDep(ArrDepForm::Slots(vec![slot]));
            }
            other => {
                return Err(CoreError::InvalidArgument(format!(
                    "cannot add a raw slot to constraint {:?}",
                    other.tag()
                )))
            }
        }
        self.emit(CacheEvent::SlotsChanged(line, stop));
        Ok(())
    }

    pub fn remove_condition(
        &mut self,
        line: LineId,
        stop: StopIndex,
        tag: ConstraintTag,
        index: usize,
    ) -> CoreResult<()> {
        let station = self.station_mut(line, stop)?;
        if station.constraint.tag() != tag {
            return Err(CoreError::InvalidArgument(format!(
                "station constraint is {:?}, not {:?}",
                station.constraint.tag(),
                tag
            )));
        }
        if let ConstraintVariant::ArrDep(ArrDepForm::Slots(slots)) = &mut station.constraint {
            if index >= slots.len() {
                return Err(CoreError::InvalidArgument(format!(
                    "slot index {index} out of bounds ({})",
                    slots.len()
                )));
            }
            slots.remove(index);
        }
        self.emit(CacheEvent::SlotsChanged(line, stop));
        Ok(())
    }

    pub fn remove_all_conditions(&mut self, line: LineId, stop: StopIndex, tag: ConstraintTag) -> CoreResult<()> {
        let station = self.station_mut(line, stop)?;
        if station.constraint.tag() == tag {
            station.constraint = ConstraintVariant::None;
            station.vehicles_waiting.clear();
        }
        self.emit(CacheEvent::SlotsChanged(line, stop));
        Ok(())
    }

    /// `field_index`: 0=arr_min, 1=arr_sec, 2=dep_min, 3=dep_sec.
    pub fn update_arr_dep(
        &mut self,
        line: LineId,
        stop: StopIndex,
        slot_index: usize,
        field_index: usize,
        value: u8,
    ) -> CoreResult<()> {
        if value >= 60 {
            return Err(CoreError::InvalidArgument(format!("field value {value} out of range")));
        }
        let station = self.station_mut(line, stop)?;
        let ConstraintVariant::ArrDep(ArrDepForm::Slots(slots)) = &mut station.constraint else {
            return Err(CoreError::InvalidArgument("station is not a flat ArrDep constraint".into()));
        };
        let slot = slots
            .get_mut(slot_index)
            .ok_or_else(|| CoreError::InvalidArgument(format!("slot index {slot_index} out of bounds")))?;
        match field_index {
            0 => slot.arr_min = value,
            1 => slot.arr_sec = value,
            2 => slot.dep_min = value,
            3 => slot.dep_sec = value,
            _ => return Err(CoreError::InvalidArgument(format!("field index {field_index} out of bounds"))),
        }
        self.emit(CacheEvent::SlotsChanged(line, stop));
        Ok(())
    }

    pub fn insert_arr_dep_condition(
        &mut self,
        line: LineId,
        stop: StopIndex,
        index: usize,
        slot: Slot,
    ) -> CoreResult<()> {
        if !slot.is_well_formed() {
            return Err(CoreError::InvalidArgument(format!("{slot:?} has out-of-range fields")));
        }
        let station = self.station_mut(line, stop)?;
        let ConstraintVariant::ArrDep(ArrDepForm::Slots(slots)) = &mut station.constraint else {
            return Err(CoreError::InvalidArgument("station is not a flat ArrDep constraint".into()));
        };
        let index = index.min(slots.len());
        slots.insert(index, slot);
        self.emit(CacheEvent::SlotsChanged(line, stop));
        Ok(())
    }

    /// Auto-promotes a flat slot list into a single `[0, 3600)` period the first
    /// time a real period is added.
    pub fn add_time_period(
        &mut self,
        line: LineId,
        stop: StopIndex,
        period: TimePeriod,
        slots: Vec<Slot>,
    ) -> CoreResult<()> {
        let station = self.station_mut(line, stop)?;
        match &mut station.constraint {
            ConstraintVariant::ArrDep(form @ ArrDepForm::Slots(_)) => {
                let existing = if let ArrDepForm::Slots(s) = form {
                    std::mem::take(s)
                } else {
                    unreachable!()
                };
                let groups = vec![
                    TimePeriodGroup {
                        period: TimePeriod::new(0, 0),
                        slots: existing,
                    },
                    TimePeriodGroup { period, slots },
                ];
                *form = ArrDepForm::Periods(groups);
            }
            ConstraintVariant::ArrDep(ArrDepForm::Periods(groups)) => {
                groups.push(TimePeriodGroup { period, slots });
            }
            _ => {
                return Err(CoreError::InvalidArgument("station constraint is not ArrDep".into()));
            }
        }
        self.emit(CacheEvent::SlotsChanged(line, stop));
        Ok(())
    }

    pub fn update_time_period(
        &mut self,
        line: LineId,
        stop: StopIndex,
        period_index: usize,
        period: TimePeriod,
    ) -> CoreResult<()> {
        let station = self.station_mut(line, stop)?;
        let ConstraintVariant::ArrDep(ArrDepForm::Periods(groups)) = &mut station.constraint else {
            return Err(CoreError::InvalidArgument("station has no time periods".into()));
        };
        let group = groups
            .get_mut(period_index)
            .ok_or_else(|| CoreError::InvalidArgument(format!("period index {period_index} out of bounds")))?;
        group.period = period;
        self.emit(CacheEvent::SlotsChanged(line, stop));
        Ok(())
    }

    pub fn remove_time_period(&mut self, line: LineId, stop: StopIndex, period_index: usize) -> CoreResult<()> {
        let station = self.station_mut(line, stop)?;
        let ConstraintVariant::ArrDep(ArrDepForm::Periods(groups)) = &mut station.constraint else {
            return Err(CoreError::InvalidArgument("station has no time periods".into()));
        };
        if period_index >= groups.len() {
            return Err(CoreError::InvalidArgument(format!("period index {period_index} out of bounds")));
        }
        groups.remove(period_index);
        self.emit(CacheEvent::SlotsChanged(line, stop));
        Ok(())
    }

    /// Flips the master switch; disabling clears every station's `vehicles_waiting`
    /// on the line.
    pub fn set_has_timetable(&mut self, line: LineId, enabled: bool) -> CoreResult<()> {
        let l = self.line_mut(line)?;
        l.has_timetable = enabled;
        if !enabled {
            for station in l.stations.values_mut() {
                station.vehicles_waiting.clear();
            }
        }
        self.emit(CacheEvent::LineFlagsChanged(line));
        Ok(())
    }

    pub fn set_force_departure_enabled(&mut self, line: LineId, enabled: bool) -> CoreResult<()> {
        self.line_mut(line)?.force_departure = enabled;
        Ok(())
    }

    pub fn set_min_wait_enabled(&mut self, line: LineId, enabled: bool) -> CoreResult<()> {
        self.line_mut(line)?.min_wait_enabled = enabled;
        Ok(())
    }

    pub fn set_max_wait_enabled(&mut self, line: LineId, enabled: bool) -> CoreResult<()> {
        self.line_mut(line)?.max_wait_enabled = enabled;
        Ok(())
    }

    pub fn set_max_delay_tolerance(&mut self, line: LineId, stop: StopIndex, seconds: Option<i64>) -> CoreResult<()> {
        self.station_mut(line, stop)?.max_delay_tolerance = seconds;
        Ok(())
    }

    pub fn set_max_delay_tolerance_enabled(&mut self, line: LineId, stop: StopIndex, enabled: bool) -> CoreResult<()> {
        self.station_mut(line, stop)?.max_delay_tolerance_enabled = enabled;
        Ok(())
    }

    pub fn set_delay_recovery_mode_line(&mut self, line: LineId, mode: Option<RecoveryMode>) -> CoreResult<()> {
        self.line_mut(line)?.delay_recovery_mode = mode;
        Ok(())
    }

    pub fn set_delay_recovery_mode_station(
        &mut self,
        line: LineId,
        stop: StopIndex,
        mode: Option<RecoveryMode>,
    ) -> CoreResult<()> {
        self.station_mut(line, stop)?.delay_recovery_mode = mode;
        Ok(())
    }

    pub fn set_recovery_rate_line(&mut self, line: LineId, rate: Option<f64>) -> CoreResult<()> {
        self.line_mut(line)?.recovery_rate = rate;
        Ok(())
    }

    pub fn set_recovery_rate_station(&mut self, line: LineId, stop: StopIndex, rate: Option<f64>) -> CoreResult<()> {
        self.station_mut(line, stop)?.recovery_rate = rate;
        Ok(())
    }

    /// Deep-copies constraints plus the delay-tolerance pair (only meaningful when
    /// the target constraint is `ArrDep`) from one (line, stop) to another.
    pub fn copy_paste_constraints(
        &mut self,
        from_line: LineId,
        from_stop: StopIndex,
        to_line: LineId,
        to_stop: StopIndex,
    ) -> CoreResult<()> {
        let source = self.station_mut(from_line, from_stop)?.clone();
        let station_id = self
            .lines
            .get(&to_line)
            .and_then(|l| l.stations.get(&to_stop))
            .map(|s| s.station_id)
            .unwrap_or(source.station_id);
        let target = self.ensure_station(to_line, to_stop, station_id);
        target.constraint = source.constraint.clone();
        if matches!(target.constraint, ConstraintVariant::ArrDep(_)) {
            target.max_delay_tolerance = source.max_delay_tolerance;
            target.max_delay_tolerance_enabled = source.max_delay_tolerance_enabled;
        }
        self.emit(CacheEvent::SlotsChanged(to_line, to_stop));
        Ok(())
    }

    /// Deep-copies every station's constraints on a line to another line, plus the
    /// line-level flags.
    pub fn copy_paste_line_timetable(&mut self, from_line: LineId, to_line: LineId) -> CoreResult<()> {
        let source = self
            .lines
            .get(&from_line)
            .ok_or_else(|| CoreError::NotFound(format!("line {from_line}")))?
            .clone();
        let stops: Vec<StopIndex> = source.stations.keys().copied().collect();
        for stop in stops {
            self.copy_paste_constraints(from_line, stop, to_line, stop)?;
        }
        let target_line = self.line_mut(to_line)?;
        target_line.frequency = source.frequency;
        target_line.force_departure = source.force_departure;
        target_line.min_wait_enabled = source.min_wait_enabled;
        target_line.max_wait_enabled = source.max_wait_enabled;
        target_line.delay_recovery_mode = source.delay_recovery_mode;
        target_line.recovery_rate = source.recovery_rate;
        self.emit(CacheEvent::LineFlagsChanged(to_line));
        Ok(())
    }

    /// Toggles or replaces one of a station's four skip-stop patterns. Each
    /// setter creates the station lazily, matching the constraint mutators above.
    pub fn set_skip_slot_pattern(
        &mut self,
        line: LineId,
        stop: StopIndex,
        station_id: StationId,
        pattern: Option<crate::skip::SlotBasedPattern>,
    ) -> CoreResult<()> {
        self.ensure_station(line, stop, station_id).skip_patterns.slot_based = pattern;
        Ok(())
    }

    pub fn set_skip_vehicle_pattern(
        &mut self,
        line: LineId,
        stop: StopIndex,
        station_id: StationId,
        pattern: Option<crate::skip::VehicleBasedPattern>,
    ) -> CoreResult<()> {
        self.ensure_station(line, stop, station_id).skip_patterns.vehicle_based = pattern;
        Ok(())
    }

    pub fn set_skip_alternating_pattern(
        &mut self,
        line: LineId,
        stop: StopIndex,
        station_id: StationId,
        pattern: Option<crate::skip::AlternatingPattern>,
    ) -> CoreResult<()> {
        self.ensure_station(line, stop, station_id).skip_patterns.alternating = pattern;
        Ok(())
    }

    pub fn set_skip_zone_express_pattern(
        &mut self,
        line: LineId,
        stop: StopIndex,
        station_id: StationId,
        pattern: Option<crate::skip::ZoneExpressPattern>,
    ) -> CoreResult<()> {
        self.ensure_station(line, stop, station_id).skip_patterns.zone_express = pattern;
        Ok(())
    }

    /// Removes lines not in `existing_lines`; removes stop entries whose index
    /// exceeds `stations_per_line(line)`; drops `vehicles_waiting` entries whose
    /// vehicle is not currently on the line, per the vehicle sets given.
    pub fn prune(
        &mut self,
        existing_lines: &[LineId],
        stations_per_line: impl Fn(LineId) -> usize,
        vehicles_on_line: impl Fn(LineId) -> Vec<VehicleId>,
    ) {
        let keep: std::collections::HashSet<LineId> = existing_lines.iter().copied().collect();
        let removed: Vec<LineId> = self
            .lines
            .keys()
            .copied()
            .filter(|l| !keep.contains(l))
            .collect();
        for line in &removed {
            self.lines.remove(line);
            self.emit(CacheEvent::LineRemoved(*line));
        }
        for (&line, l) in self.lines.iter_mut() {
            let stop_count = stations_per_line(line);
            let stale_stops: Vec<StopIndex> = l
                .stations
                .keys()
                .copied()
                .filter(|&s| s > stop_count)
                .collect();
            for stop in stale_stops {
                l.stations.remove(&stop);
            }
            let on_line: std::collections::HashSet<VehicleId> = vehicles_on_line(line).into_iter().collect();
            for station in l.stations.values_mut() {
                station
                    .vehicles_waiting
                    .retain(|vehicle, _| on_line.contains(vehicle));
            }
        }
    }

    /// Invariant 5 recovery: a `Slot` deserialized straight off the wire (via
    /// `#[derive(Deserialize)]`) skips `Slot::new`'s range check, so a restored
    /// snapshot can carry out-of-range minute/second fields. Drops any such entry
    /// from every `ArrDep` slot list, logging each one, and returns the count
    /// removed. Never errors: this is the "recoverable by dropping the offending
    /// entry" path, not a fallible operation.
    pub fn drop_malformed_slots(&mut self) -> usize {
        let mut dropped = 0;
        let lines: Vec<LineId> = self.lines.keys().copied().collect();
        for line in lines {
            let stops: Vec<StopIndex> = self.lines[&line].stations.keys().copied().collect();
            for stop in stops {
                let station = self.lines.get_mut(&line).unwrap().stations.get_mut(&stop).unwrap();
                let removed = match &mut station.constraint {
                    ConstraintVariant::ArrDep(ArrDepForm::Slots(slots)) => retain_well_formed(slots),
                    ConstraintVariant::ArrDep(ArrDepForm::Periods(groups)) => {
                        groups.iter_mut().map(|g| retain_well_formed(&mut g.slots)).sum()
                    }
                    _ => 0,
                };
                if removed > 0 {
                    tracing::warn!(line, stop, removed, "dropped malformed slot(s) found on restore");
                    dropped += removed;
                    self.emit(CacheEvent::SlotsChanged(line, stop));
                }
            }
        }
        dropped
    }
}

fn retain_well_formed(slots: &mut Vec<Slot>) -> usize {
    let before = slots.len();
    slots.retain(Slot::is_well_formed);
    before - slots.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_rejects_out_of_range_fields() {
        assert!(Slot::new(60, 0, 0, 0).is_err());
        assert!(Slot::new(0, 0, 0, 60).is_err());
        assert!(Slot::new(10, 30, 11, 0).is_ok());
    }

    #[test]
    fn set_condition_type_creates_station_lazily() {
        let mut m = TimetableModel::new();
        m.set_condition_type(1, 1, 100, ConstraintTag::ArrDep).unwrap();
        assert!(matches!(
            m.lines[&1].stations[&1].constraint,
            ConstraintVariant::ArrDep(_)
        ));
    }

    #[test]
    fn set_condition_type_same_tag_is_cache_noop() {
        let mut m = TimetableModel::new();
        m.set_condition_type(1, 1, 100, ConstraintTag::ArrDep).unwrap();
        m.take_events();
        m.set_condition_type(1, 1, 100, ConstraintTag::ArrDep).unwrap();
        assert!(m.take_events().is_empty());
    }

    #[test]
    fn add_time_period_promotes_flat_slots() {
        let mut m = TimetableModel::new();
        m.set_condition_type(1, 1, 100, ConstraintTag::ArrDep).unwrap();
        let s = Slot::new(10, 0, 10, 30).unwrap();
        m.add_condition(1, 1, 100, s).unwrap();
        m.add_time_period(1, 1, TimePeriod::new(1800, 3600), vec![Slot::new(45, 0, 45, 30).unwrap()])
            .unwrap();
        let ConstraintVariant::ArrDep(ArrDepForm::Periods(groups)) = &m.lines[&1].stations[&1].constraint else {
            panic!("expected periods form");
        };
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].slots, vec![s]);
    }

    #[test]
    fn drop_malformed_slots_removes_out_of_range_entries_only() {
        let mut m = TimetableModel::new();
        m.set_condition_type(1, 1, 100, ConstraintTag::ArrDep).unwrap();
        let good = Slot::new(10, 0, 10, 30).unwrap();
        m.add_condition(1, 1, 100, good).unwrap();
        if let ConstraintVariant::ArrDep(ArrDepForm::Slots(slots)) =
            &mut m.lines.get_mut(&1).unwrap().stations.get_mut(&1).unwrap().constraint
        {
            slots.push(Slot::new_unchecked(99, 0, 10, 30));
        }
        let removed = m.drop_malformed_slots();
        assert_eq!(removed, 1);
        let ConstraintVariant::ArrDep(ArrDepForm::Slots(slots)) = &m.lines[&1].stations[&1].constraint else {
            panic!("expected slots form");
        };
        assert_eq!(slots, &vec![good]);
    }

    #[test]
    fn prune_removes_unknown_lines_and_stale_stops() {
        let mut m = TimetableModel::new();
        m.set_condition_type(1, 1, 100, ConstraintTag::ArrDep).unwrap();
        m.set_condition_type(1, 5, 100, ConstraintTag::ArrDep).unwrap();
        m.set_condition_type(2, 1, 100, ConstraintTag::ArrDep).unwrap();
        m.prune(&[1], |_| 2, |_| vec![]);
        assert!(!m.lines.contains_key(&2));
        assert!(m.lines[&1].stations.contains_key(&1));
        assert!(!m.lines[&1].stations.contains_key(&5));
    }

    #[test]
    fn copy_paste_constraints_round_trip() {
        let mut m = TimetableModel::new();
        m.set_condition_type(1, 1, 100, ConstraintTag::ArrDep).unwrap();
        m.add_condition(1, 1, 100, Slot::new(10, 0, 10, 30).unwrap()).unwrap();
        m.set_max_delay_tolerance(1, 1, Some(60)).unwrap();
        m.set_max_delay_tolerance_enabled(1, 1, true).unwrap();
        m.copy_paste_constraints(1, 1, 2, 1).unwrap();
        let a = &m.lines[&1].stations[&1];
        let b = &m.lines[&2].stations[&1];
        assert_eq!(b.max_delay_tolerance, a.max_delay_tolerance);
        assert_eq!(b.max_delay_tolerance_enabled, a.max_delay_tolerance_enabled);
        match (&a.constraint, &b.constraint) {
            (ConstraintVariant::ArrDep(ArrDepForm::Slots(sa)), ConstraintVariant::ArrDep(ArrDepForm::Slots(sb))) => {
                assert_eq!(sa, sb)
            }
            _ => panic!("expected matching ArrDep slots"),
        }
    }
}
