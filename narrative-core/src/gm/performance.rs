//! Agent call counts and response times.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Point-in-time view of the tracker, included in every game snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub total_time_ms: f64,
    pub avg_response_time_ms: f64,
    pub responses: usize,
    pub agent_calls: BTreeMap<String, u64>,
}

#[derive(Debug, Clone)]
pub struct PerformanceTracker {
    agent_calls: BTreeMap<String, u64>,
    response_times: Vec<Duration>,
    started: Instant,
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self {
            agent_calls: BTreeMap::new(),
            response_times: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn track_agent_call(&mut self, agent: &str) {
        *self.agent_calls.entry(agent.to_string()).or_insert(0) += 1;
    }

    /// Record the time elapsed since `start` and return it.
    pub fn track_response_time(&mut self, start: Instant) -> Duration {
        let duration = start.elapsed();
        self.response_times.push(duration);
        duration
    }

    pub fn agent_calls(&self, agent: &str) -> u64 {
        self.agent_calls.get(agent).copied().unwrap_or(0)
    }

    pub fn summary(&self) -> PerformanceSummary {
        let avg_response_time_ms = if self.response_times.is_empty() {
            0.0
        } else {
            let total: Duration = self.response_times.iter().sum();
            total.as_secs_f64() * 1000.0 / self.response_times.len() as f64
        };

        PerformanceSummary {
            total_time_ms: self.started.elapsed().as_secs_f64() * 1000.0,
            avg_response_time_ms,
            responses: self.response_times.len(),
            agent_calls: self.agent_calls.clone(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_calls_per_agent() {
        let mut tracker = PerformanceTracker::new();
        tracker.track_agent_call("game-master");
        tracker.track_agent_call("game-master");
        tracker.track_agent_call("surprise-engine");

        assert_eq!(tracker.agent_calls("game-master"), 2);
        assert_eq!(tracker.agent_calls("choice-generator"), 0);
        assert_eq!(tracker.summary().agent_calls.len(), 2);
    }

    #[test]
    fn test_average_response_time() {
        let mut tracker = PerformanceTracker::new();
        assert_eq!(tracker.summary().avg_response_time_ms, 0.0);

        let start = Instant::now();
        tracker.track_response_time(start);
        tracker.track_response_time(start);
        let summary = tracker.summary();
        assert_eq!(summary.responses, 2);
        assert!(summary.avg_response_time_ms >= 0.0);
        assert!(summary.total_time_ms >= 0.0);
    }

    #[test]
    fn test_reset() {
        let mut tracker = PerformanceTracker::new();
        tracker.track_agent_call("game-master");
        tracker.track_response_time(Instant::now());
        tracker.reset();

        let summary = tracker.summary();
        assert!(summary.agent_calls.is_empty());
        assert_eq!(summary.responses, 0);
    }
}
