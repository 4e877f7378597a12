//! Append-only file-health snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::project::ProjectId;

/// Component scores feeding the aggregate health number.
///
/// Each component is in [0, 100]; the aggregate is a weighted mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthComponents {
    /// Penalizes open issues per line of code.
    pub issue_density: u8,
    /// Penalizes recent change frequency.
    pub churn: u8,
    /// Penalizes oversized files and long functions.
    pub size: u8,
}

impl HealthComponents {
    /// Aggregate score: issue density dominates, churn and size temper it.
    pub fn aggregate(&self) -> u8 {
        let weighted = 0.5 * self.issue_density as f64
            + 0.25 * self.churn as f64
            + 0.25 * self.size as f64;
        weighted.round().clamp(0.0, 100.0) as u8
    }
}

/// One health observation for a (project, path). Rows are never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHealth {
    pub project_id: ProjectId,
    pub path: String,
    /// Aggregate score in [0, 100]; higher is healthier.
    pub score: u8,
    pub components: HealthComponents,
    pub recorded_at: DateTime<Utc>,
}

impl FileHealth {
    pub fn new(project_id: ProjectId, path: impl Into<String>, components: HealthComponents) -> Self {
        Self {
            project_id,
            path: path.into(),
            score: components.aggregate(),
            components,
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_bounds() {
        let perfect = HealthComponents {
            issue_density: 100,
            churn: 100,
            size: 100,
        };
        assert_eq!(perfect.aggregate(), 100);

        let broken = HealthComponents {
            issue_density: 0,
            churn: 0,
            size: 0,
        };
        assert_eq!(broken.aggregate(), 0);
    }

    #[test]
    fn test_density_weight_balances_other_components() {
        let unhealthy_code = HealthComponents {
            issue_density: 0,
            churn: 100,
            size: 100,
        };
        let noisy_history = HealthComponents {
            issue_density: 100,
            churn: 0,
            size: 0,
        };
        assert!(unhealthy_code.aggregate() == noisy_history.aggregate());
        assert_eq!(unhealthy_code.aggregate(), 50);
    }
}
