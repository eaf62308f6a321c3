//! Cache health assessment
//!
//! Health is derived for operators only; nothing in the engine branches on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lookups required before the hit rate is judged at all
const MIN_LOOKUPS: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

/// Inputs sampled from the cache under its lock
#[derive(Debug, Clone, Default)]
pub struct HealthInputs {
    pub size: usize,
    pub max_size: usize,
    pub lookups: u64,
    pub hit_rate: f64,
    /// Per-interval hit rates, oldest first
    pub hit_rate_samples: Vec<f64>,
    /// Records past expiry that are still resident
    pub stale: usize,
}

pub fn assess(inputs: &HealthInputs) -> HealthReport {
    let mut status = HealthStatus::Healthy;
    let mut issues = Vec::new();
    let mut raise = |level: HealthStatus, issue: String| {
        status = status.max(level);
        issues.push(issue);
    };

    if inputs.max_size > 0 {
        let pressure = inputs.size as f64 / inputs.max_size as f64;
        if pressure >= 0.95 {
            raise(
                HealthStatus::Critical,
                format!("cache at {:.0}% of max size {}", pressure * 100.0, inputs.max_size),
            );
        } else if pressure >= 0.8 {
            raise(
                HealthStatus::Warning,
                format!("cache at {:.0}% of max size {}", pressure * 100.0, inputs.max_size),
            );
        }
    }

    if inputs.lookups >= MIN_LOOKUPS {
        if inputs.hit_rate < 0.2 {
            raise(
                HealthStatus::Critical,
                format!("hit rate {:.2} below 0.20", inputs.hit_rate),
            );
        } else if inputs.hit_rate < 0.5 {
            raise(
                HealthStatus::Warning,
                format!("hit rate {:.2} below 0.50", inputs.hit_rate),
            );
        }
    }

    if let (Some(first), Some(last)) = (
        inputs.hit_rate_samples.first(),
        inputs.hit_rate_samples.last(),
    ) {
        if inputs.hit_rate_samples.len() >= 3 && last + 0.2 < *first {
            raise(
                HealthStatus::Warning,
                format!("hit rate declining ({:.2} -> {:.2})", first, last),
            );
        }
    }

    if inputs.stale > 0 && inputs.stale * 10 >= inputs.size.max(1) {
        raise(
            HealthStatus::Warning,
            format!("{} stale records awaiting cleanup", inputs.stale),
        );
    }

    HealthReport {
        status,
        issues,
        checked_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cache_is_healthy() {
        let report = assess(&HealthInputs {
            max_size: 100,
            ..Default::default()
        });
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_size_pressure() {
        let warning = assess(&HealthInputs {
            size: 85,
            max_size: 100,
            ..Default::default()
        });
        assert_eq!(warning.status, HealthStatus::Warning);

        let critical = assess(&HealthInputs {
            size: 100,
            max_size: 100,
            ..Default::default()
        });
        assert_eq!(critical.status, HealthStatus::Critical);
    }

    #[test]
    fn test_hit_rate_needs_enough_lookups() {
        let few = assess(&HealthInputs {
            max_size: 100,
            lookups: 5,
            hit_rate: 0.0,
            ..Default::default()
        });
        assert_eq!(few.status, HealthStatus::Healthy);

        let many = assess(&HealthInputs {
            max_size: 100,
            lookups: 50,
            hit_rate: 0.1,
            ..Default::default()
        });
        assert_eq!(many.status, HealthStatus::Critical);
    }

    #[test]
    fn test_declining_trend_and_staleness() {
        let report = assess(&HealthInputs {
            size: 10,
            max_size: 100,
            hit_rate_samples: vec![0.9, 0.7, 0.5],
            stale: 2,
            ..Default::default()
        });
        assert_eq!(report.status, HealthStatus::Warning);
        assert_eq!(report.issues.len(), 2);
    }
}
