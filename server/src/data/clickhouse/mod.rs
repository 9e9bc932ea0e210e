//! ClickHouse analytics store
//!
//! Columnar, append-oriented storage for the trace/observation/score/session
//! tables. The client uses LZ4 compression and (optionally) server-side
//! async inserts for high write throughput; reads collapse versioned rows
//! with FINAL.

pub mod repositories;
pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::Client;

use crate::core::config::ClickhouseConfig;
use crate::utils::tsid::Tsid;

use super::error::DataError;
use super::traits::TelemetryStore;
use super::types::{Observation, Score, Session, Trace};

/// ClickHouse-backed [`TelemetryStore`]
pub struct ClickhouseStore {
    client: Client,
}

impl ClickhouseStore {
    /// Connect, configure the client, and run schema migrations.
    pub async fn init(config: &ClickhouseConfig) -> Result<Self, DataError> {
        let mut client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database);

        if let Some(ref user) = config.user {
            client = client.with_user(user);
        }
        if let Some(ref password) = config.password {
            client = client.with_password(password);
        }

        if config.compression {
            client = client.with_compression(clickhouse::Compression::Lz4);
        }

        // Server-side batching: inserts are buffered and flushed periodically
        if config.async_insert {
            client = client.with_option("async_insert", "1");
            let wait_value = if config.wait_for_async_insert { "1" } else { "0" };
            client = client.with_option("wait_for_async_insert", wait_value);
        }

        let store = Self { client };
        store.run_migrations().await?;

        tracing::debug!(
            url = %config.url,
            database = %config.database,
            compression = %config.compression,
            async_insert = %config.async_insert,
            "ClickHouse store initialized"
        );

        Ok(store)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn run_migrations(&self) -> Result<(), DataError> {
        let table_exists: bool = self
            .client
            .query(
                "SELECT count() > 0 FROM system.tables \
                 WHERE database = currentDatabase() AND name = 'schema_version'",
            )
            .fetch_one()
            .await
            .map_err(|e| {
                DataError::backend_unavailable(
                    "clickhouse",
                    format!("failed to check schema_version table: {e}"),
                )
            })?;

        let current_version: Option<i32> = if table_exists {
            self.client
                .query("SELECT version FROM schema_version FINAL WHERE id = 1")
                .fetch_optional()
                .await
                .ok()
                .flatten()
        } else {
            None
        };

        match current_version {
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(DataError::migration_failed(
                    "clickhouse",
                    v,
                    "version_check",
                    &format!(
                        "database schema version {} is newer than application version {}",
                        v,
                        schema::SCHEMA_VERSION
                    ),
                ));
            }
            Some(v) if v == schema::SCHEMA_VERSION => {
                tracing::debug!(version = v, "ClickHouse schema is up to date");
                return Ok(());
            }
            _ => {}
        }

        tracing::debug!(version = schema::SCHEMA_VERSION, "Applying ClickHouse schema");
        for statement in schema::generate_schema() {
            self.client.query(statement).execute().await.map_err(|e| {
                DataError::migration_failed(
                    "clickhouse",
                    schema::SCHEMA_VERSION,
                    "initial_schema",
                    &e.to_string(),
                )
            })?;
        }

        self.client
            .query("INSERT INTO schema_version (id, version, applied_at) VALUES (1, ?, ?)")
            .bind(schema::SCHEMA_VERSION)
            .bind(Utc::now().timestamp())
            .execute()
            .await
            .map_err(|e| {
                DataError::migration_failed(
                    "clickhouse",
                    schema::SCHEMA_VERSION,
                    "record_version",
                    &e.to_string(),
                )
            })?;

        Ok(())
    }
}

#[async_trait]
impl TelemetryStore for ClickhouseStore {
    // ==================== Trace operations ====================

    async fn insert_trace(&self, trace: Trace) -> Result<(), DataError> {
        repositories::trace::insert(&self.client, &trace).await
    }

    async fn get_trace(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<Option<Trace>, DataError> {
        repositories::trace::get(&self.client, project_id, trace_id).await
    }

    async fn update_trace(&self, trace: Trace) -> Result<(), DataError> {
        repositories::trace::update(&self.client, &trace).await
    }

    async fn soft_delete_trace(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<(), DataError> {
        repositories::trace::soft_delete(&self.client, project_id, trace_id).await
    }

    async fn list_traces(
        &self,
        project_id: Tsid,
        from_ts: Option<DateTime<Utc>>,
        to_ts: Option<DateTime<Utc>>,
        limit: u64,
    ) -> Result<Vec<Trace>, DataError> {
        repositories::trace::list(&self.client, project_id, from_ts, to_ts, limit).await
    }

    async fn count_traces(&self, project_id: Tsid) -> Result<u64, DataError> {
        repositories::trace::count(&self.client, project_id).await
    }

    // ==================== Observation operations ====================

    async fn insert_observation(&self, observation: Observation) -> Result<(), DataError> {
        repositories::observation::insert(&self.client, &observation).await
    }

    async fn get_observation(
        &self,
        project_id: Tsid,
        observation_id: &str,
    ) -> Result<Option<Observation>, DataError> {
        repositories::observation::get(&self.client, project_id, observation_id).await
    }

    async fn update_observation(&self, observation: Observation) -> Result<(), DataError> {
        repositories::observation::update(&self.client, &observation).await
    }

    async fn soft_delete_observation(
        &self,
        project_id: Tsid,
        observation_id: &str,
    ) -> Result<(), DataError> {
        repositories::observation::soft_delete(&self.client, project_id, observation_id).await
    }

    async fn get_observations_for_trace(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<Vec<Observation>, DataError> {
        repositories::observation::get_for_trace(&self.client, project_id, trace_id).await
    }

    async fn count_observations(&self, project_id: Tsid) -> Result<u64, DataError> {
        repositories::observation::count(&self.client, project_id).await
    }

    // ==================== Score operations ====================

    async fn insert_score(&self, score: Score) -> Result<(), DataError> {
        repositories::score::insert(&self.client, &score).await
    }

    async fn get_score(
        &self,
        project_id: Tsid,
        score_id: Tsid,
    ) -> Result<Option<Score>, DataError> {
        repositories::score::get(&self.client, project_id, score_id).await
    }

    async fn get_scores_for_trace(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<Vec<Score>, DataError> {
        repositories::score::get_for_trace(&self.client, project_id, trace_id).await
    }

    async fn count_scores(&self, project_id: Tsid) -> Result<u64, DataError> {
        repositories::score::count(&self.client, project_id).await
    }

    // ==================== Session operations ====================

    async fn upsert_session(&self, session: Session) -> Result<(), DataError> {
        repositories::session::upsert(&self.client, &session).await
    }

    async fn get_session(
        &self,
        project_id: Tsid,
        session_id: &str,
    ) -> Result<Option<Session>, DataError> {
        repositories::session::get(&self.client, project_id, session_id).await
    }

    // ==================== Health ====================

    async fn health_check(&self) -> Result<(), DataError> {
        self.client
            .query("SELECT 1")
            .execute()
            .await
            .map_err(DataError::from)
    }

    fn backend_name(&self) -> &'static str {
        "clickhouse"
    }
}
