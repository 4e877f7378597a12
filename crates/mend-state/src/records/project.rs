//! Tenants and projects: the ownership roots of all other records.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new() -> Self {
        TenantId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub String);

impl ProjectId {
    pub fn new() -> Self {
        ProjectId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Billing tier; influences per-tenant defaults, never correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Free,
    Team,
    Enterprise,
}

/// Top-level isolation unit. Owns projects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub plan: PlanTier,
    /// Secret used to verify incoming webhook signatures.
    pub webhook_secret: String,
    /// Per-tenant override of the auto-apply confidence threshold.
    pub apply_threshold: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(name: impl Into<String>, plan: PlanTier, webhook_secret: impl Into<String>) -> Self {
        Self {
            id: TenantId::new(),
            name: name.into(),
            plan,
            webhook_secret: webhook_secret.into(),
            apply_threshold: None,
            created_at: Utc::now(),
        }
    }
}

/// A code repository under analysis. Owns all downstream records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub tenant_id: TenantId,
    pub name: String,
    pub repo_url: String,
    pub default_branch: String,
    /// Local checkout root the crawler and apply stage operate on.
    pub root_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(
        tenant_id: TenantId,
        name: impl Into<String>,
        repo_url: impl Into<String>,
        root_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: ProjectId::new(),
            tenant_id,
            name: name.into(),
            repo_url: repo_url.into(),
            default_branch: "main".to_string(),
            root_path: root_path.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(TenantId::new(), TenantId::new());
        assert_ne!(ProjectId::new(), ProjectId::new());
    }

    #[test]
    fn test_project_defaults() {
        let tenant = Tenant::new("acme", PlanTier::Team, "secret");
        let project = Project::new(tenant.id.clone(), "api", "https://git.example/acme/api", "/tmp/api");
        assert_eq!(project.default_branch, "main");
        assert_eq!(project.tenant_id, tenant.id);
    }
}
