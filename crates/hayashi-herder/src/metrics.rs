//! Metrics for the pending-envelope pipeline.

use std::time::Duration;

/// Timer aggregating fetch durations (from entering *fetching* to promotion
/// into *ready*).
#[derive(Debug, Clone, Default)]
pub struct FetchTimer {
    count: u64,
    total: Duration,
    max: Duration,
}

impl FetchTimer {
    /// Record one fetch duration sample.
    pub fn update(&mut self, sample: Duration) {
        self.count += 1;
        self.total += sample;
        self.max = self.max.max(sample);
    }

    /// Number of samples recorded.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean fetch duration.
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count as u32
        }
    }

    /// Longest fetch observed.
    pub fn max(&self) -> Duration {
        self.max
    }
}

/// Gauges over the per-slot envelope sets plus the fetch-duration timer.
///
/// The set gauges are recomputed after every pipeline mutation, mirroring
/// how the sets themselves evolve rather than counting events.
#[derive(Debug, Clone, Default)]
pub struct PendingMetrics {
    /// Envelopes sitting in *processed* across all slots.
    pub processed: usize,
    /// Envelopes sitting in *discarded* across all slots.
    pub discarded: usize,
    /// Envelopes sitting in *fetching* across all slots.
    pub fetching: usize,
    /// Envelopes sitting in *ready* across all slots.
    pub ready: usize,
    /// Fetch-duration samples.
    pub fetch_duration: FetchTimer,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_timer_aggregates() {
        let mut timer = FetchTimer::default();
        assert_eq!(timer.mean(), Duration::ZERO);

        timer.update(Duration::from_millis(10));
        timer.update(Duration::from_millis(30));

        assert_eq!(timer.count(), 2);
        assert_eq!(timer.mean(), Duration::from_millis(20));
        assert_eq!(timer.max(), Duration::from_millis(30));
    }
}
