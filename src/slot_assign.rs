//! Slot-Assignment Algorithm: given the active slot set `S` for a stop and a
//! vehicle's arrival, picks the slot it should wait at.
//!
//! The binding preference rule is folded in here rather than left to the
//! caller, since it shares the "is this slot held by someone else" lookup with the
//! general candidate walk.

use std::collections::HashMap;

use crate::binding::preempts;
use crate::clock::{circular_diff, wait_time};
use crate::model::{Slot, VehicleId, WaitingEntry};

/// Resolution of a single assignment attempt.
pub struct AssignmentOutcome {
    /// The chosen slot, or `None` if `S` is empty.
    pub slot: Option<Slot>,
    /// Set when a train binding pointed at a slot no longer present in `S`; the
    /// caller should drop the stored `TrainAssignment`.
    pub binding_invalid: bool,
    /// Set when the assignment preempted another vehicle's pre-departure hold on the
    /// chosen slot via priority; the caller should evict that vehicle's waiting
    /// entry.
    pub evicted_waiting_vehicle: Option<VehicleId>,
    /// Post-departure waiting entries passed over during the candidate walk; stale
    /// and safe for the caller to drop.
    pub stale_entries: Vec<VehicleId>,
    /// Set when `|S| == 1`, signalling the single-slot shortcut: the
    /// caller should clear the whole `vehicles_waiting` map for this stop.
    pub clear_all_waiting: bool,
}

/// `slots` must already be sorted by arrival-slot ascending (the cache layer
/// guarantees this). `priority_of` resolves a waiting vehicle's current priority,
/// used only to judge preemption.
pub fn assign_slot(
    slots: &[Slot],
    arrival_time: i64,
    now: i64,
    vehicles_waiting: &HashMap<VehicleId, WaitingEntry>,
    vehicle: VehicleId,
    bound_slot: Option<Slot>,
    contender_priority: u32,
    priority_of: impl Fn(VehicleId) -> u32,
) -> AssignmentOutcome {
    if slots.is_empty() {
        return AssignmentOutcome {
            slot: None,
            binding_invalid: false,
            evicted_waiting_vehicle: None,
            stale_entries: Vec::new(),
            clear_all_waiting: false,
        };
    }

    let mut binding_invalid = false;
    if let Some(bound) = bound_slot {
        match resolve_binding(slots, vehicles_waiting, vehicle, bound, contender_priority, &priority_of) {
            BindingResolution::Win => {
                return AssignmentOutcome {
                    slot: Some(bound),
                    binding_invalid: false,
                    evicted_waiting_vehicle: None,
                    stale_entries: Vec::new(),
                    clear_all_waiting: slots.len() == 1,
                };
            }
            BindingResolution::Preempt(holder) => {
                return AssignmentOutcome {
                    slot: Some(bound),
                    binding_invalid: false,
                    evicted_waiting_vehicle: Some(holder),
                    stale_entries: Vec::new(),
                    clear_all_waiting: slots.len() == 1,
                };
            }
            BindingResolution::Defer => {}
            BindingResolution::Invalid => {
                binding_invalid = true;
            }
        }
    }

    if slots.len() == 1 {
        return AssignmentOutcome {
            slot: Some(slots[0]),
            binding_invalid,
            evicted_waiting_vehicle: None,
            stale_entries: Vec::new(),
            clear_all_waiting: true,
        };
    }

    let walk = candidate_walk(slots, arrival_time, now, vehicles_waiting, vehicle, contender_priority, &priority_of);
    AssignmentOutcome {
        slot: Some(walk.slot),
        binding_invalid,
        evicted_waiting_vehicle: walk.evicted_waiting_vehicle,
        stale_entries: walk.stale_entries,
        clear_all_waiting: false,
    }
}

enum BindingResolution {
    Win,
    Preempt(VehicleId),
    /// The slot is held by a holder of equal-or-greater priority; fall through to the
    /// ordinary candidate walk without touching the persistent assignment.
    Defer,
    /// The bound slot is no longer part of `S`; the assignment itself is stale.
    Invalid,
}

fn resolve_binding(
    slots: &[Slot],
    vehicles_waiting: &HashMap<VehicleId, WaitingEntry>,
    vehicle: VehicleId,
    bound: Slot,
    contender_priority: u32,
    priority_of: &impl Fn(VehicleId) -> u32,
) -> BindingResolution {
    if !slots.contains(&bound) {
        return BindingResolution::Invalid;
    }
    let holder = vehicles_waiting
        .iter()
        .find(|(&v, entry)| v != vehicle && entry.slot == Some(bound))
        .map(|(&v, _)| v);
    match holder {
        None => BindingResolution::Win,
        Some(holder) => {
            if preempts(contender_priority, &[priority_of(holder)]) {
                BindingResolution::Preempt(holder)
            } else {
                BindingResolution::Defer
            }
        }
    }
}

struct CandidateWalk {
    slot: Slot,
    evicted_waiting_vehicle: Option<VehicleId>,
    stale_entries: Vec<VehicleId>,
}

/// Nearest-slot seed, then a circular walk from there looking for the first slot
/// that is (a) not already past its own departure and (b) not held by a
/// higher-or-equal-priority pre-departure waiter. Post-departure waiters are noted
/// as stale but never block a candidate.
fn candidate_walk(
    slots: &[Slot],
    arrival_time: i64,
    now: i64,
    vehicles_waiting: &HashMap<VehicleId, WaitingEntry>,
    vehicle: VehicleId,
    contender_priority: u32,
    priority_of: &impl Fn(VehicleId) -> u32,
) -> CandidateWalk {
    let seed = nearest_slot_index(slots, arrival_time);
    let mut stale_entries = Vec::new();
    let fallback = slots[seed];

    for step in 0..slots.len() {
        let idx = (seed + step) % slots.len();
        let slot = slots[idx];
        if wait_time(&slot, arrival_time) <= 0 {
            continue;
        }
        match holder_of(slot, arrival_time, now, vehicles_waiting, vehicle) {
            None => {
                return CandidateWalk {
                    slot,
                    evicted_waiting_vehicle: None,
                    stale_entries,
                };
            }
            Some((holder, true)) => {
                // pre-departure: contest it via priority.
                if preempts(contender_priority, &[priority_of(holder)]) {
                    return CandidateWalk {
                        slot,
                        evicted_waiting_vehicle: Some(holder),
                        stale_entries,
                    };
                }
            }
            Some((holder, false)) => {
                // post-departure: stale, safe to forget, but still blocks this slot
                // for this tick since the record hasn't been pruned yet.
                stale_entries.push(holder);
            }
        }
    }

    CandidateWalk {
        slot: fallback,
        evicted_waiting_vehicle: None,
        stale_entries,
    }
}

/// Finds the vehicle (if any) currently holding `slot`, and whether its hold is
/// "pre-departure" (its recorded arrival is still before its own departure instant,
/// relative to `now`) or a stale "post-departure" leftover.
fn holder_of(
    slot: Slot,
    _arrival_time: i64,
    now: i64,
    vehicles_waiting: &HashMap<VehicleId, WaitingEntry>,
    vehicle: VehicleId,
) -> Option<(VehicleId, bool)> {
    vehicles_waiting.iter().find_map(|(&v, entry)| {
        if v == vehicle || entry.slot != Some(slot) {
            return None;
        }
        Some((v, now <= entry.departure_time))
    })
}

/// Smallest circular distance from `arrival_time mod 3600` to each slot's arrival
/// slot-time; first index wins ties, matching the stable order of the sorted list.
fn nearest_slot_index(slots: &[Slot], arrival_time: i64) -> usize {
    let mut best = 0;
    let mut best_dist = circular_diff(arrival_time, slots[0].arrival_slot());
    for (i, slot) in slots.iter().enumerate().skip(1) {
        let dist = circular_diff(arrival_time, slot.arrival_slot());
        if dist < best_dist {
            best = i;
            best_dist = dist;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(a_m: u8, a_s: u8, d_m: u8, d_s: u8) -> Slot {
        Slot::new(a_m, a_s, d_m, d_s).unwrap()
    }

    #[test]
    fn empty_slot_set_returns_none() {
        let waiting = HashMap::new();
        let out = assign_slot(&[], 0, 0, &waiting, 1, None, 50, |_| 50);
        assert!(out.slot.is_none());
    }

    #[test]
    fn single_slot_shortcut_clears_waiting_flag() {
        let waiting = HashMap::new();
        let slots = [slot(10, 0, 10, 30)];
        let out = assign_slot(&slots, 0, 0, &waiting, 1, None, 50, |_| 50);
        assert_eq!(out.slot, Some(slots[0]));
        assert!(out.clear_all_waiting);
    }

    #[test]
    fn nearest_slot_picks_closest_arrival() {
        let waiting = HashMap::new();
        let slots = [slot(10, 0, 10, 30), slot(25, 0, 25, 30), slot(40, 0, 40, 30)];
        // arrival slot-time 1490 (24:50) is nearest slots[1] (1500), and still ahead
        // of its departure, so the seed itself is the answer.
        let out = assign_slot(&slots, 1490, 1490, &waiting, 1, None, 50, |_| 50);
        assert_eq!(out.slot, Some(slots[1]));
    }

    #[test]
    fn occupied_nearest_slot_falls_through_to_next_available() {
        let mut waiting = HashMap::new();
        waiting.insert(
            2,
            WaitingEntry {
                arrival_time: 1490,
                slot: Some(slot(25, 0, 25, 30)),
                departure_time: 1530,
                priority: 80,
            },
        );
        let slots = [slot(10, 0, 10, 30), slot(25, 0, 25, 30), slot(40, 0, 40, 30)];
        let out = assign_slot(&slots, 1490, 1520, &waiting, 1, None, 50, |_| 80);
        assert_eq!(out.slot, Some(slots[2]));
        assert!(out.evicted_waiting_vehicle.is_none());
    }

    #[test]
    fn higher_priority_contender_preempts_holder() {
        let mut waiting = HashMap::new();
        waiting.insert(
            2,
            WaitingEntry {
                arrival_time: 1490,
                slot: Some(slot(25, 0, 25, 30)),
                departure_time: 1530,
                priority: 80,
            },
        );
        let slots = [slot(10, 0, 10, 30), slot(25, 0, 25, 30), slot(40, 0, 40, 30)];
        let out = assign_slot(&slots, 1490, 1520, &waiting, 1, None, 90, |_| 50);
        assert_eq!(out.slot, Some(slots[1]));
        assert_eq!(out.evicted_waiting_vehicle, Some(2));
    }

    #[test]
    fn binding_wins_when_unheld() {
        let waiting = HashMap::new();
        let slots = [slot(10, 0, 10, 30), slot(25, 0, 25, 30)];
        let out = assign_slot(&slots, 1550, 1520, &waiting, 1, Some(slots[1]), 50, |_| 50);
        assert_eq!(out.slot, Some(slots[1]));
        assert!(!out.binding_invalid);
    }

    #[test]
    fn binding_absent_from_active_set_is_invalid() {
        let waiting = HashMap::new();
        let slots = [slot(10, 0, 10, 30)];
        let stale_binding = slot(25, 0, 25, 30);
        let out = assign_slot(&slots, 10, 10, &waiting, 1, Some(stale_binding), 50, |_| 50);
        assert!(out.binding_invalid);
        assert_eq!(out.slot, Some(slots[0]));
    }

    #[test]
    fn binding_defers_to_higher_priority_holder() {
        let mut waiting = HashMap::new();
        waiting.insert(
            2,
            WaitingEntry {
                arrival_time: 1490,
                slot: Some(slot(25, 0, 25, 30)),
                departure_time: 1530,
                priority: 80,
            },
        );
        let slots = [slot(5, 0, 5, 30), slot(25, 0, 25, 30), slot(45, 0, 45, 30)];
        let out = assign_slot(&slots, 1490, 1520, &waiting, 1, Some(slots[1]), 40, |_| 90);
        assert!(!out.binding_invalid);
        // falls through to the ordinary walk, which finds slots[2] the only opening.
        assert_eq!(out.slot, Some(slots[2]));
    }

    #[test]
    fn binding_preempts_lower_priority_holder() {
        let mut waiting = HashMap::new();
        waiting.insert(
            2,
            WaitingEntry {
                arrival_time: 1500,
                slot: Some(slot(25, 0, 25, 30)),
                departure_time: 1530,
                priority: 80,
            },
        );
        let slots = [slot(10, 0, 10, 30), slot(25, 0, 25, 30)];
        let out = assign_slot(&slots, 1550, 1520, &waiting, 1, Some(slots[1]), 90, |_| 40);
        assert_eq!(out.slot, Some(slots[1]));
        assert_eq!(out.evicted_waiting_vehicle, Some(2));
    }
}
