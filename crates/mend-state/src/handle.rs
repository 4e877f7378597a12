//! SurrealDB connection handle
//!
//! Manages the connection lifecycle for the durable object store:
//! - `in_memory()` for tests and the embedded CLI path
//! - `connect(url, key)` for a deployed endpoint (`OBJECT_STORE_URL`)
//! - schema initialization, idempotent and safe to re-run

use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::storage_traits::StoreResult;

const NAMESPACE: &str = "mend";
const DATABASE: &str = "main";

/// SurrealDB connection handle for the Mend object store.
pub struct SurrealHandle {
    db: Surreal<Any>,
}

impl SurrealHandle {
    /// Connect to an in-memory engine. Used by tests and local runs.
    pub async fn in_memory() -> StoreResult<Self> {
        info!("Connecting to SurrealDB (in-memory)");
        let db = surrealdb::engine::any::connect("mem://")
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Self::finish_connect(db).await
    }

    /// Connect to a deployed endpoint.
    ///
    /// `key`, when present, is `user:password` for root auth; local
    /// `surrealkv://` paths need no credentials.
    pub async fn connect(url: &str, key: Option<&str>) -> StoreResult<Self> {
        info!(url, "Connecting to SurrealDB");
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if let Some(key) = key {
            let (username, password) = key
                .split_once(':')
                .ok_or_else(|| StoreError::Backend("store key must be user:password".into()))?;
            db.signin(Root { username, password })
                .await
                .map_err(|e| StoreError::Backend(format!("auth failed: {e}")))?;
        }

        Self::finish_connect(db).await
    }

    async fn finish_connect(db: Surreal<Any>) -> StoreResult<Self> {
        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let handle = SurrealHandle { db };
        handle.init_schema().await?;
        info!("SurrealDB connected and schema initialized");
        Ok(handle)
    }

    /// Borrow the underlying connection.
    pub fn db(&self) -> &Surreal<Any> {
        &self.db
    }

    /// Initialize tables and indexes. Idempotent.
    ///
    /// Tables are schemaless: record shapes are owned by the `records`
    /// module (stored under a `data` document field) and invariants are
    /// enforced in the store layer, so the database only needs lookup
    /// indexes.
    async fn init_schema(&self) -> StoreResult<()> {
        debug!("Initializing Mend schema");

        let schema = r#"
            DEFINE TABLE IF NOT EXISTS tenant SCHEMALESS;

            DEFINE TABLE IF NOT EXISTS project SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS idx_project_tenant ON project FIELDS data.tenant_id;

            DEFINE TABLE IF NOT EXISTS issue SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS idx_issue_project ON issue FIELDS data.project_id;
            DEFINE INDEX IF NOT EXISTS idx_issue_fingerprint ON issue FIELDS data.project_id, data.fingerprint;
            DEFINE INDEX IF NOT EXISTS idx_issue_status ON issue FIELDS data.project_id, data.status;

            DEFINE TABLE IF NOT EXISTS issue_audit SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS idx_audit_issue ON issue_audit FIELDS data.issue_id;

            DEFINE TABLE IF NOT EXISTS fix_record SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS idx_fix_issue ON fix_record FIELDS data.issue_id;
            DEFINE INDEX IF NOT EXISTS idx_fix_project ON fix_record FIELDS data.project_id;

            DEFINE TABLE IF NOT EXISTS pattern SCHEMALESS;

            DEFINE TABLE IF NOT EXISTS file_snapshot SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS idx_snapshot_key ON file_snapshot FIELDS data.project_id, data.path, data.hash;

            DEFINE TABLE IF NOT EXISTS file_health SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS idx_health_path ON file_health FIELDS data.project_id, data.path;

            DEFINE TABLE IF NOT EXISTS expert_guide SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS idx_guide_project ON expert_guide FIELDS data.project_id, data.superseded;

            DEFINE TABLE IF NOT EXISTS calibration_bucket SCHEMALESS;
        "#;

        self.db
            .query(schema)
            .await
            .map_err(|e| StoreError::Backend(format!("schema setup failed: {e}")))?;

        debug!("Schema initialized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_connection_and_schema() {
        let handle = SurrealHandle::in_memory().await;
        assert!(handle.is_ok(), "connect failed: {:?}", handle.err());
    }

    #[tokio::test]
    async fn test_schema_init_is_idempotent() {
        let handle = SurrealHandle::in_memory().await.unwrap();
        // Re-running the schema must not error.
        handle.init_schema().await.unwrap();
    }
}
