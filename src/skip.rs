//! Skip-stop patterns: up to four independent rules a station can carry, each
//! individually toggled. Whenever any pattern matches, the Departure State Machine
//! bypasses constraint evaluation entirely and releases the vehicle.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::model::{Slot, StopIndex, VehicleId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotBasedPattern {
    pub enabled: bool,
    /// `Slot` is a structured key, not a string, so serde_json (which only accepts
    /// string-like map keys) can't serialize this `HashMap` directly; `slot_key_map`
    /// round-trips it through a `Vec` of pairs instead.
    #[serde(with = "slot_key_map")]
    pub skip_stops_by_slot: HashMap<Slot, HashSet<StopIndex>>,
}

mod slot_key_map {
    use std::collections::{HashMap, HashSet};

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::model::{Slot, StopIndex};

    pub fn serialize<S: Serializer>(
        map: &HashMap<Slot, HashSet<StopIndex>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let pairs: Vec<(Slot, HashSet<StopIndex>)> = map.iter().map(|(k, v)| (*k, v.clone())).collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<Slot, HashSet<StopIndex>>, D::Error> {
        let pairs: Vec<(Slot, HashSet<StopIndex>)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleBasedPattern {
    pub enabled: bool,
    pub vehicles: HashSet<VehicleId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlternatingDirection {
    /// Skips even 1-based vehicle-list indices.
    AtoB,
    /// Skips odd 1-based vehicle-list indices.
    BtoA,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlternatingPattern {
    pub enabled: bool,
    pub direction: AlternatingDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub enabled: bool,
    pub skip_stops: HashSet<StopIndex>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ZoneExpressPattern {
    pub zones: Vec<Zone>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SkipPatterns {
    pub slot_based: Option<SlotBasedPattern>,
    pub vehicle_based: Option<VehicleBasedPattern>,
    pub alternating: Option<AlternatingPattern>,
    pub zone_express: Option<ZoneExpressPattern>,
}

impl SkipPatterns {
    /// `vehicle_index` is the vehicle's 1-based position within the line's ordered
    /// vehicle list, needed only by the alternating pattern.
    pub fn is_skipped(
        &self,
        stop: StopIndex,
        vehicle: VehicleId,
        vehicle_index: Option<usize>,
        bound_slot: Option<&Slot>,
    ) -> bool {
        if let Some(p) = &self.slot_based {
            if p.enabled {
                if let Some(slot) = bound_slot {
                    if p.skip_stops_by_slot
                        .get(slot)
                        .map(|stops| stops.contains(&stop))
                        .unwrap_or(false)
                    {
                        return true;
                    }
                }
            }
        }
        if let Some(p) = &self.vehicle_based {
            if p.enabled && p.vehicles.contains(&vehicle) {
                return true;
            }
        }
        if let Some(p) = &self.alternating {
            if p.enabled {
                if let Some(index) = vehicle_index {
                    let is_even = index % 2 == 0;
                    let skip = match p.direction {
                        AlternatingDirection::AtoB => is_even,
                        AlternatingDirection::BtoA => !is_even,
                    };
                    if skip {
                        return true;
                    }
                }
            }
        }
        if let Some(p) = &self.zone_express {
            if p.zones
                .iter()
                .any(|z| z.enabled && z.skip_stops.contains(&stop))
            {
                return true;
            }
        }
        false
    }
}
