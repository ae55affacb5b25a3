//! Port registry: one automation-server port per device.
//!
//! Leases are handed out from a counter that starts at the configured base
//! port and only ever grows. A lease is never revoked during a run; stopping a
//! device's automation server leaves its port reserved for the next session.

use anyhow::{Context, Result};
use log::debug;
use sqlx::SqlitePool;

use crate::db::Database;

#[derive(Debug, Clone)]
pub struct PortRegistry {
    pool: SqlitePool,
    base_port: u16,
}

impl PortRegistry {
    pub fn new(db: &Database, base_port: u16) -> Self {
        Self {
            pool: db.pool().clone(),
            base_port,
        }
    }

    /// Return the lease for `udid`, allocating the next port if it has none.
    ///
    /// The insert computes the next port and claims it in one statement, so
    /// concurrent callers for the same device converge on a single lease and
    /// distinct devices never share a port.
    pub async fn allocate(&self, udid: &str) -> Result<u16> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO port_leases (udid, port)
            SELECT ?1, COALESCE(MAX(port) + 1, ?2) FROM port_leases
            WHERE true
            ON CONFLICT(udid) DO NOTHING
            "#,
        )
        .bind(udid)
        .bind(i64::from(self.base_port))
        .execute(&self.pool)
        .await
        .with_context(|| format!("allocating port lease for {udid}"))?;

        let port = self
            .lookup(udid)
            .await?
            .with_context(|| format!("port lease for {udid} missing after allocation"))?;

        if inserted.rows_affected() > 0 {
            debug!("Leased port {} to device {}", port, udid);
        }
        Ok(port)
    }

    /// Current lease for `udid`, if any.
    pub async fn lookup(&self, udid: &str) -> Result<Option<u16>> {
        let port: Option<i64> = sqlx::query_scalar("SELECT port FROM port_leases WHERE udid = ?")
            .bind(udid)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("looking up port lease for {udid}"))?;

        port.map(|p| u16::try_from(p).with_context(|| format!("stored port {p} out of range")))
            .transpose()
    }
}
