//! Membership store client for the coordinator's cluster metadata
//!
//! The coordinator owns the membership records; this client only lists,
//! checks, and appends. All calls authenticate with the same credential
//! source, and an unreachable coordinator is surfaced plainly for the
//! controller to retry rather than retried internally.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool, Row};
use tracing::debug;

use crate::config::CoordinatorConfig;
use crate::error::{MembershipError, RegistrationError};
use crate::types::{MembershipRecord, NodeRole};

/// Operations against the coordinator's cluster-membership metadata.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Cheap availability check against the metadata store.
    async fn ping(&self) -> Result<(), MembershipError>;

    /// Read-only snapshot of the current membership.
    async fn list_members(&self) -> Result<Vec<MembershipRecord>, MembershipError>;

    /// Existence check keyed by (node name, port); makes registration
    /// idempotent across controller runs.
    async fn is_registered(&self, node_name: &str, port: u16) -> Result<bool, MembershipError>;

    /// Append a new Worker-role record. Safe to call concurrently for
    /// distinct (node name, port) pairs; the coordinator's own metadata
    /// store serializes conflicting writes.
    async fn add_member(&self, node_name: &str, port: u16) -> Result<(), RegistrationError>;
}

/// Membership store client speaking the Citus metadata protocol over a
/// lazily-established connection pool.
pub struct CoordinatorClient {
    pool: PgPool,
}

impl CoordinatorClient {
    /// Build a client for the given coordinator. Connections are opened
    /// lazily, so construction itself never touches the network.
    pub fn connect(config: &CoordinatorConfig) -> Self {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database)
            .disable_statement_logging();
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect_lazy_with(options);
        Self { pool }
    }
}

/// Build a membership record from raw `pg_dist_node` columns.
///
/// Role criterion: group 0 is the coordinator, every other group is a
/// worker. Counting then keys off role alone.
fn record_from_parts(
    node_name: String,
    node_port: i32,
    group_id: i32,
    is_active: bool,
) -> Result<MembershipRecord, MembershipError> {
    let port = u16::try_from(node_port).map_err(|_| {
        MembershipError::MalformedRecord(format!(
            "node {} has out-of-range port {}",
            node_name, node_port
        ))
    })?;
    let role = if group_id == 0 {
        NodeRole::Coordinator
    } else {
        NodeRole::Worker
    };
    Ok(MembershipRecord {
        node_name,
        port,
        role,
        active: is_active,
    })
}

#[async_trait]
impl MembershipStore for CoordinatorClient {
    async fn ping(&self) -> Result<(), MembershipError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn list_members(&self) -> Result<Vec<MembershipRecord>, MembershipError> {
        let rows =
            sqlx::query("SELECT nodename, nodeport, groupid, isactive FROM pg_dist_node ORDER BY nodeid")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|row| {
                record_from_parts(
                    row.try_get("nodename")?,
                    row.try_get("nodeport")?,
                    row.try_get("groupid")?,
                    row.try_get("isactive")?,
                )
            })
            .collect()
    }

    async fn is_registered(&self, node_name: &str, port: u16) -> Result<bool, MembershipError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM pg_dist_node WHERE nodename = $1 AND nodeport = $2)",
        )
        .bind(node_name)
        .bind(i32::from(port))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get(0)?)
    }

    async fn add_member(&self, node_name: &str, port: u16) -> Result<(), RegistrationError> {
        debug!(node_name, port, "adding node to cluster metadata");
        sqlx::query("SELECT citus_add_node($1, $2)")
            .bind(node_name)
            .bind(i32::from(port))
            .execute(&self.pool)
            .await
            .map_err(|e| RegistrationError::new(node_name, port, e.to_string()))?;
        Ok(())
    }
}
