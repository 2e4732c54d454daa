use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Outcome of one call observed by the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    started_at: Instant,
    successes: u32,
    failures: u32,
}

impl Bucket {
    fn new(started_at: Instant) -> Self {
        Self {
            started_at,
            successes: 0,
            failures: 0,
        }
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Success => self.successes = self.successes.saturating_add(1),
            Outcome::Failure => self.failures = self.failures.saturating_add(1),
        }
    }
}

/// Success and failure counts over a recent window, kept as a ring of
/// equal-width buckets so old outcomes fall off as time passes.
#[derive(Debug, Clone)]
pub struct RollingCounts {
    window: Duration,
    bucket_width: Duration,
    buckets: VecDeque<Bucket>,
}

impl RollingCounts {
    pub fn new(window: Duration, bucket_count: u32) -> Self {
        let bucket_count = bucket_count.max(1);
        Self {
            window,
            bucket_width: window / bucket_count,
            buckets: VecDeque::with_capacity(bucket_count as usize),
        }
    }

    pub fn record(&mut self, outcome: Outcome, now: Instant) {
        self.expire(now);

        match self.buckets.back_mut() {
            Some(back) if now.saturating_duration_since(back.started_at) < self.bucket_width => {
                back.record(outcome);
            }
            _ => {
                let mut bucket = Bucket::new(now);
                bucket.record(outcome);
                self.buckets.push_back(bucket);
            }
        }
    }

    /// `(failures, total)` over the buckets still inside the window.
    pub fn totals(&self, now: Instant) -> (u32, u32) {
        self.buckets
            .iter()
            .filter(|b| now.saturating_duration_since(b.started_at) < self.window)
            .fold((0u32, 0u32), |(failures, total), b| {
                (
                    failures.saturating_add(b.failures),
                    total.saturating_add(b.failures).saturating_add(b.successes),
                )
            })
    }

    /// Failure share of the window in percent; zero for an empty window.
    pub fn failure_percentage(&self, now: Instant) -> f64 {
        let (failures, total) = self.totals(now);
        if total == 0 {
            0.0
        } else {
            f64::from(failures) * 100.0 / f64::from(total)
        }
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }

    fn expire(&mut self, now: Instant) {
        while let Some(front) = self.buckets.front() {
            if now.saturating_duration_since(front.started_at) >= self.window {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }
}
