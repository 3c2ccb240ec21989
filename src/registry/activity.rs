use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Events per second over a sliding window of one-second buckets
pub struct ActivityAverage {
    window: u64,
    origin: Instant,
    buckets: Mutex<VecDeque<(u64, u64)>>,
}

impl ActivityAverage {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.as_secs().max(1),
            origin: Instant::now(),
            buckets: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self) {
        let second = self.origin.elapsed().as_secs();
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);

        match buckets.back_mut() {
            Some((s, count)) if *s == second => *count += 1,
            _ => buckets.push_back((second, 1)),
        }
        self.prune(&mut buckets, second);
    }

    /// Mean events per second across the window
    #[must_use]
    pub fn average(&self) -> f64 {
        let second = self.origin.elapsed().as_secs();
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        self.prune(&mut buckets, second);

        let total: u64 = buckets.iter().map(|(_, count)| count).sum();
        total as f64 / self.window as f64
    }

    fn prune(&self, buckets: &mut VecDeque<(u64, u64)>, second: u64) {
        while let Some((s, _)) = buckets.front() {
            if second.saturating_sub(*s) >= self.window {
                buckets.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_over_window() {
        let activity = ActivityAverage::new(Duration::from_secs(10));
        assert!(activity.average().abs() < f64::EPSILON);

        for _ in 0..20 {
            activity.record();
        }
        assert!((activity.average() - 2.0).abs() < f64::EPSILON);
    }
}
