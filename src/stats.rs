//! Rolling per-(line, stop) delay samples and the queries built on top of them.
//! Kept deliberately free of any dependency on the engine or model types so
//! validation and slot assignment can take a `&DelayStatistics` as a plain
//! parameter instead of importing this module circularly.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::model::{LineId, StopIndex};

/// Bounded ring of recent samples; oldest is evicted once the cap is hit.
const SAMPLE_CAP: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct SampleRing {
    samples: VecDeque<i64>,
}

impl SampleRing {
    fn push(&mut self, value: i64) {
        if self.samples.len() >= SAMPLE_CAP {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StopStats {
    departure: SampleRing,
    arrival: SampleRing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnhancedStatistics {
    pub avg_delay: f64,
    pub total_count: usize,
    pub on_time_count: usize,
    pub min_delay: i64,
    pub max_delay: i64,
    pub p75_delay: i64,
    pub delay_variance: f64,
}

/// Vehicle-state snapshot `predict_arrival_time` needs: remaining per-leg running
/// times and the vehicle's currently accumulated delay.
pub struct ArrivalPredictionInput<'a> {
    pub section_times: &'a [i64],
    pub current_stop_index: usize,
    pub target_stop_index: usize,
    pub current_delay: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DelayStatistics {
    /// `(LineId, StopIndex)` is a tuple key, which `serde_json` can't use as a map
    /// key directly; `stop_key_map` round-trips it through a `Vec` of pairs.
    #[serde(with = "stop_key_map")]
    stops: HashMap<(LineId, StopIndex), StopStats>,
}

mod stop_key_map {
    use std::collections::HashMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::StopStats;
    use crate::model::{LineId, StopIndex};

    pub fn serialize<S: Serializer>(
        map: &HashMap<(LineId, StopIndex), StopStats>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let pairs: Vec<((LineId, StopIndex), StopStats)> =
            map.iter().map(|(k, v)| (*k, v.clone())).collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<(LineId, StopIndex), StopStats>, D::Error> {
        let pairs: Vec<((LineId, StopIndex), StopStats)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

impl DelayStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_delay(&mut self, line: LineId, stop: StopIndex, delay_seconds: i64) {
        self.stops
            .entry((line, stop))
            .or_default()
            .departure
            .push(delay_seconds);
    }

    pub fn record_arrival_delay(&mut self, line: LineId, stop: StopIndex, delay_seconds: i64) {
        self.stops
            .entry((line, stop))
            .or_default()
            .arrival
            .push(delay_seconds);
    }

    pub fn get_enhanced_statistics(&self, line: LineId, stop: StopIndex) -> Option<EnhancedStatistics> {
        let stats = self.stops.get(&(line, stop))?;
        let samples: Vec<i64> = stats.departure.samples.iter().copied().collect();
        if samples.is_empty() {
            return None;
        }
        Some(enhanced_statistics_of(&samples))
    }

    /// Median of the most recent samples, used by to bias slot selection
    /// toward a vehicle's realistic arrival moment.
    pub fn get_historical_delay(&self, line: LineId, stop: StopIndex) -> Option<i64> {
        let stats = self.stops.get(&(line, stop))?;
        let mut samples: Vec<i64> = stats.departure.samples.iter().copied().collect();
        if samples.is_empty() {
            return None;
        }
        samples.sort_unstable();
        Some(samples[samples.len() / 2])
    }

    /// `now + sum(section_times between current and target) + 0.5 * current_delay`.
    pub fn predict_arrival_time(&self, now: i64, input: &ArrivalPredictionInput) -> i64 {
        let span: i64 = if input.target_stop_index > input.current_stop_index {
            input.section_times[input.current_stop_index..input.target_stop_index]
                .iter()
                .sum()
        } else {
            0
        };
        now + span + (input.current_delay as f64 * 0.5).round() as i64
    }

    /// `ceiling-to-15s` of `p75` or `avg + sqrt(variance)`, clamped to `[30, 300]`;
    /// `None` if fewer than 5 samples.
    pub fn suggest_buffer_time(&self, line: LineId, stop: StopIndex) -> Option<i64> {
        let stats = self.get_enhanced_statistics(line, stop)?;
        if stats.total_count < 5 {
            return None;
        }
        let candidate = stats
            .p75_delay
            .max((stats.avg_delay + stats.delay_variance.sqrt()).round() as i64);
        let rounded = ceil_to(candidate, 15);
        Some(rounded.clamp(30, 300))
    }
}

fn ceil_to(value: i64, step: i64) -> i64 {
    if value <= 0 {
        return 0;
    }
    ((value + step - 1) / step) * step
}

fn enhanced_statistics_of(samples: &[i64]) -> EnhancedStatistics {
    let n = samples.len();
    let sum: i64 = samples.iter().sum();
    let avg = sum as f64 / n as f64;
    let variance = samples.iter().map(|&d| (d as f64 - avg).powi(2)).sum::<f64>() / n as f64;
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let p75_idx = ((n as f64) * 0.75).ceil() as usize;
    let p75 = sorted[p75_idx.saturating_sub(1).min(n - 1)];
    EnhancedStatistics {
        avg_delay: avg,
        total_count: n,
        on_time_count: samples.iter().filter(|&&d| d.abs() <= 30).count(),
        min_delay: *sorted.first().unwrap(),
        max_delay: *sorted.last().unwrap(),
        p75_delay: p75,
        delay_variance: variance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enhanced_statistics_basic() {
        let mut stats = DelayStatistics::new();
        for d in [0, 10, -10, 20, 40, 60, 15, 5, 0, 30, 200] {
            stats.record_delay(1, 1, d);
        }
        let s = stats.get_enhanced_statistics(1, 1).unwrap();
        assert_eq!(s.total_count, 11);
        assert!(s.on_time_count >= 4);
        assert_eq!(s.min_delay, -10);
        assert_eq!(s.max_delay, 200);
    }

    #[test]
    fn suggest_buffer_time_requires_min_samples() {
        let mut stats = DelayStatistics::new();
        for d in [10, 20, 30] {
            stats.record_delay(1, 1, d);
        }
        assert!(stats.suggest_buffer_time(1, 1).is_none());
    }

    #[test]
    fn suggest_buffer_time_is_bounded_and_monotonic_in_mean() {
        let mut low = DelayStatistics::new();
        for d in [10, 12, 11, 9, 10, 11] {
            low.record_delay(1, 1, d);
        }
        let mut high = DelayStatistics::new();
        for d in [90, 92, 91, 89, 90, 91] {
            high.record_delay(1, 1, d);
        }
        let low_buf = low.suggest_buffer_time(1, 1).unwrap();
        let high_buf = high.suggest_buffer_time(1, 1).unwrap();
        assert!((30..=300).contains(&low_buf));
        assert!((30..=300).contains(&high_buf));
        assert!(high_buf >= low_buf);
    }

    #[test]
    fn historical_delay_is_median() {
        let mut stats = DelayStatistics::new();
        for d in [5, 15, 25] {
            stats.record_delay(1, 1, d);
        }
        assert_eq!(stats.get_historical_delay(1, 1), Some(15));
    }

    #[test]
    fn predict_arrival_time_uses_half_current_delay() {
        let stats = DelayStatistics::new();
        let input = ArrivalPredictionInput {
            section_times: &[100, 200, 300],
            current_stop_index: 0,
            target_stop_index: 2,
            current_delay: 40,
        };
        // now(1000) + (100+200) + 0.5*40 = 1320
        assert_eq!(stats.predict_arrival_time(1000, &input), 1320);
    }
}
