use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

use crate::algorithms::Algorithm;

#[derive(Debug, Clone, Serialize)]
pub struct AdmissionMetrics {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub denied_requests: u64,
    pub last_reset: u64,
}

impl Default for AdmissionMetrics {
    fn default() -> Self {
        Self {
            total_requests: 0,
            allowed_requests: 0,
            denied_requests: 0,
            last_reset: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

/// Admission counters per limiter algorithm.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    per_algorithm: Arc<RwLock<HashMap<Algorithm, AdmissionMetrics>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_decision(&self, algorithm: Algorithm, allowed: bool) {
        let mut metrics = self.per_algorithm.write().await;
        let entry = metrics.entry(algorithm).or_default();

        entry.total_requests += 1;
        if allowed {
            entry.allowed_requests += 1;
        } else {
            entry.denied_requests += 1;
        }
    }

    pub async fn get(&self, algorithm: Algorithm) -> Option<AdmissionMetrics> {
        self.per_algorithm.read().await.get(&algorithm).cloned()
    }

    pub async fn get_all(&self) -> HashMap<Algorithm, AdmissionMetrics> {
        self.per_algorithm.read().await.clone()
    }

    pub async fn get_global(&self) -> AdmissionMetrics {
        let metrics = self.per_algorithm.read().await;
        let mut global = AdmissionMetrics::default();

        for m in metrics.values() {
            global.total_requests += m.total_requests;
            global.allowed_requests += m.allowed_requests;
            global.denied_requests += m.denied_requests;
        }

        global
    }

    pub async fn reset(&self) {
        self.per_algorithm.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_and_aggregate() {
        let metrics = MetricsCollector::new();
        metrics.record_decision(Algorithm::TokenBucket, true).await;
        metrics.record_decision(Algorithm::TokenBucket, false).await;
        metrics.record_decision(Algorithm::SlidingLog, true).await;

        let bucket = metrics.get(Algorithm::TokenBucket).await.unwrap();
        assert_eq!(bucket.total_requests, 2);
        assert_eq!(bucket.denied_requests, 1);

        let global = metrics.get_global().await;
        assert_eq!(global.total_requests, 3);
        assert_eq!(global.allowed_requests, 2);
        assert!(metrics.get(Algorithm::FixedWindow).await.is_none());

        metrics.reset().await;
        assert!(metrics.get_all().await.is_empty());
    }
}
