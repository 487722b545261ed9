//! Train-slot binding: persistent vehicle↔slot assignments with priority-based
//! conflict resolution. Kept as a standalone policy object rather than folded into
//! slot assignment, so tests can swap in an alternative priority rule without
//! touching the assignment algorithm.

use crate::model::{Slot, StationSlot, VehicleId};

/// Priority score: base 50 + up to 30 for a >120s arrival delay (or up to 15 for
/// >60s) + up to 20 for load factor >0.8 (or up to 10 for >0.5).
pub fn compute_priority(arrival_delay_secs: i64, load_factor: Option<f64>) -> u32 {
    let mut priority: u32 = 50;
    priority += if arrival_delay_secs > 120 {
        30
    } else if arrival_delay_secs > 60 {
        15
    } else {
        0
    };
    if let Some(load) = load_factor {
        priority += if load > 0.8 {
            20
        } else if load > 0.5 {
            10
        } else {
            0
        };
    }
    priority
}

/// The contending vehicle preempts only if its priority is *strictly* greater than
/// every current holder's; ties favor the incumbent.
pub fn preempts(contender_priority: u32, holder_priorities: &[u32]) -> bool {
    holder_priorities.iter().all(|&p| contender_priority > p)
}

/// Result of `assign_train_to_slot`: the number of competing assignments evicted.
pub struct AssignOutcome {
    pub evicted: usize,
}

/// Assigns `vehicle` to `slot_index`/`slot` at this station, evicting any other
/// vehicle currently assigned to the same `slot_index` (the incoming vehicle always
/// wins an explicit assignment call).
pub fn assign_train_to_slot(
    station: &mut StationSlot,
    vehicle: VehicleId,
    slot_index: usize,
    slot: Slot,
) -> AssignOutcome {
    let evicted: Vec<VehicleId> = station
        .train_assignments
        .iter()
        .filter(|(&v, a)| v != vehicle && a.slot_index == slot_index)
        .map(|(&v, _)| v)
        .collect();
    for v in &evicted {
        station.train_assignments.remove(v);
    }
    station
        .train_assignments
        .insert(vehicle, crate::model::TrainAssignment { slot_index, slot });
    AssignOutcome {
        evicted: evicted.len(),
    }
}

pub fn remove_train_assignment(station: &mut StationSlot, vehicle: VehicleId) -> bool {
    station.train_assignments.remove(&vehicle).is_some()
}

pub fn get_assigned_slot(station: &StationSlot, vehicle: VehicleId) -> Option<Slot> {
    station.train_assignments.get(&vehicle).map(|a| a.slot)
}

pub fn is_train_assigned(station: &StationSlot, vehicle: VehicleId) -> bool {
    station.train_assignments.contains_key(&vehicle)
}

/// Drops assignments whose slot is no longer present in the active slot list or is
/// structurally malformed.
pub fn clear_invalid_assignments(station: &mut StationSlot, active_slots: &[Slot]) -> usize {
    let before = station.train_assignments.len();
    station
        .train_assignments
        .retain(|_, a| a.slot.is_well_formed() && active_slots.contains(&a.slot));
    before - station.train_assignments.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StationSlot;

    fn slot() -> Slot {
        Slot::new(15, 0, 15, 30).unwrap()
    }

    #[test]
    fn assign_evicts_competing_vehicle() {
        let mut station = StationSlot::new(1);
        assign_train_to_slot(&mut station, 1, 0, slot());
        let outcome = assign_train_to_slot(&mut station, 2, 0, slot());
        assert_eq!(outcome.evicted, 1);
        assert!(!is_train_assigned(&station, 1));
        assert_eq!(get_assigned_slot(&station, 2), Some(slot()));
    }

    #[test]
    fn clear_invalid_drops_stale_slots() {
        let mut station = StationSlot::new(1);
        assign_train_to_slot(&mut station, 1, 0, slot());
        let removed = clear_invalid_assignments(&mut station, &[]);
        assert_eq!(removed, 1);
        assert!(!is_train_assigned(&station, 1));
    }

    #[test]
    fn preemption_requires_strictly_greater_priority() {
        assert!(preempts(51, &[50]));
        assert!(!preempts(50, &[50]));
        assert!(!preempts(60, &[50, 70]));
    }

    #[test]
    fn compute_priority_caps() {
        assert_eq!(compute_priority(0, None), 50);
        assert_eq!(compute_priority(150, Some(0.9)), 50 + 30 + 20);
        assert_eq!(compute_priority(90, Some(0.6)), 50 + 15 + 10);
    }
}
