//! In-memory analytics store
//!
//! Mirrors the columnar backend's replace-by-version semantics over plain
//! maps. Used for tests and single-process deployments without ClickHouse.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::utils::tsid::Tsid;

use super::error::DataError;
use super::traits::TelemetryStore;
use super::types::{Observation, Score, Session, Trace};

type Key = (String, String); // (project_id, entity_id)

#[derive(Default)]
struct Tables {
    traces: HashMap<Key, Trace>,
    observations: HashMap<Key, Observation>,
    scores: HashMap<Key, Score>,
    sessions: HashMap<Key, Session>,
}

/// In-memory analytics store
#[derive(Default)]
pub struct MemoryTelemetryStore {
    tables: RwLock<Tables>,
}

impl MemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(project_id: Tsid, entity_id: &str) -> Key {
        (project_id.to_string(), entity_id.to_string())
    }

    /// Keep the row with the highest version (replace-by-version).
    fn replace_if_newer<T>(map: &mut HashMap<Key, T>, key: Key, incoming: T, version: u64)
    where
        T: VersionedRow,
    {
        match map.get(&key) {
            Some(existing) if existing.version() > version => {}
            _ => {
                map.insert(key, incoming);
            }
        }
    }
}

trait VersionedRow {
    fn version(&self) -> u64;
}

impl VersionedRow for Trace {
    fn version(&self) -> u64 {
        self.version
    }
}
impl VersionedRow for Observation {
    fn version(&self) -> u64 {
        self.version
    }
}
impl VersionedRow for Score {
    fn version(&self) -> u64 {
        self.version
    }
}
impl VersionedRow for Session {
    fn version(&self) -> u64 {
        self.version
    }
}

#[async_trait]
impl TelemetryStore for MemoryTelemetryStore {
    // ==================== Trace operations ====================

    async fn insert_trace(&self, mut trace: Trace) -> Result<(), DataError> {
        trace.version = 1;
        trace.event_ts = Utc::now();
        let mut tables = self.tables.write();
        let key = Self::key(trace.project_id, &trace.id);
        Self::replace_if_newer(&mut tables.traces, key, trace, 1);
        Ok(())
    }

    async fn get_trace(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<Option<Trace>, DataError> {
        let tables = self.tables.read();
        Ok(tables
            .traces
            .get(&Self::key(project_id, trace_id))
            .filter(|t| !t.is_deleted)
            .cloned())
    }

    async fn update_trace(&self, mut trace: Trace) -> Result<(), DataError> {
        trace.version += 1;
        trace.event_ts = Utc::now();
        let version = trace.version;
        let mut tables = self.tables.write();
        let key = Self::key(trace.project_id, &trace.id);
        Self::replace_if_newer(&mut tables.traces, key, trace, version);
        Ok(())
    }

    async fn soft_delete_trace(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<(), DataError> {
        let mut tables = self.tables.write();
        if let Some(trace) = tables.traces.get_mut(&Self::key(project_id, trace_id)) {
            trace.is_deleted = true;
            trace.version += 1;
            trace.event_ts = Utc::now();
        }
        Ok(())
    }

    async fn list_traces(
        &self,
        project_id: Tsid,
        from_ts: Option<DateTime<Utc>>,
        to_ts: Option<DateTime<Utc>>,
        limit: u64,
    ) -> Result<Vec<Trace>, DataError> {
        let tables = self.tables.read();
        let project = project_id.to_string();
        let mut traces: Vec<Trace> = tables
            .traces
            .values()
            .filter(|t| {
                t.project_id.to_string() == project
                    && !t.is_deleted
                    && from_ts.is_none_or(|from| t.event_ts >= from)
                    && to_ts.is_none_or(|to| t.event_ts <= to)
            })
            .cloned()
            .collect();
        traces.sort_by(|a, b| b.event_ts.cmp(&a.event_ts));
        traces.truncate(limit as usize);
        Ok(traces)
    }

    async fn count_traces(&self, project_id: Tsid) -> Result<u64, DataError> {
        let tables = self.tables.read();
        let project = project_id.to_string();
        Ok(tables
            .traces
            .values()
            .filter(|t| t.project_id.to_string() == project && !t.is_deleted)
            .count() as u64)
    }

    // ==================== Observation operations ====================

    async fn insert_observation(&self, mut observation: Observation) -> Result<(), DataError> {
        observation.version = 1;
        observation.event_ts = Utc::now();
        let mut tables = self.tables.write();
        let key = Self::key(observation.project_id, &observation.id);
        Self::replace_if_newer(&mut tables.observations, key, observation, 1);
        Ok(())
    }

    async fn get_observation(
        &self,
        project_id: Tsid,
        observation_id: &str,
    ) -> Result<Option<Observation>, DataError> {
        let tables = self.tables.read();
        Ok(tables
            .observations
            .get(&Self::key(project_id, observation_id))
            .filter(|o| !o.is_deleted)
            .cloned())
    }

    async fn update_observation(&self, mut observation: Observation) -> Result<(), DataError> {
        observation.version += 1;
        observation.event_ts = Utc::now();
        let version = observation.version;
        let mut tables = self.tables.write();
        let key = Self::key(observation.project_id, &observation.id);
        Self::replace_if_newer(&mut tables.observations, key, observation, version);
        Ok(())
    }

    async fn soft_delete_observation(
        &self,
        project_id: Tsid,
        observation_id: &str,
    ) -> Result<(), DataError> {
        let mut tables = self.tables.write();
        if let Some(obs) = tables
            .observations
            .get_mut(&Self::key(project_id, observation_id))
        {
            obs.is_deleted = true;
            obs.version += 1;
            obs.event_ts = Utc::now();
        }
        Ok(())
    }

    async fn get_observations_for_trace(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<Vec<Observation>, DataError> {
        let tables = self.tables.read();
        let project = project_id.to_string();
        let mut observations: Vec<Observation> = tables
            .observations
            .values()
            .filter(|o| {
                o.project_id.to_string() == project && o.trace_id == trace_id && !o.is_deleted
            })
            .cloned()
            .collect();
        observations.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(observations)
    }

    async fn count_observations(&self, project_id: Tsid) -> Result<u64, DataError> {
        let tables = self.tables.read();
        let project = project_id.to_string();
        Ok(tables
            .observations
            .values()
            .filter(|o| o.project_id.to_string() == project && !o.is_deleted)
            .count() as u64)
    }

    // ==================== Score operations ====================

    async fn insert_score(&self, mut score: Score) -> Result<(), DataError> {
        score.version = 1;
        score.event_ts = Utc::now();
        let mut tables = self.tables.write();
        let key = Self::key(score.project_id, &score.id.to_string());
        Self::replace_if_newer(&mut tables.scores, key, score, 1);
        Ok(())
    }

    async fn get_score(
        &self,
        project_id: Tsid,
        score_id: Tsid,
    ) -> Result<Option<Score>, DataError> {
        let tables = self.tables.read();
        Ok(tables
            .scores
            .get(&Self::key(project_id, &score_id.to_string()))
            .filter(|s| !s.is_deleted)
            .cloned())
    }

    async fn get_scores_for_trace(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<Vec<Score>, DataError> {
        let tables = self.tables.read();
        let project = project_id.to_string();
        let mut scores: Vec<Score> = tables
            .scores
            .values()
            .filter(|s| {
                s.project_id.to_string() == project
                    && s.trace_id.as_deref() == Some(trace_id)
                    && !s.is_deleted
            })
            .cloned()
            .collect();
        scores.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(scores)
    }

    async fn count_scores(&self, project_id: Tsid) -> Result<u64, DataError> {
        let tables = self.tables.read();
        let project = project_id.to_string();
        Ok(tables
            .scores
            .values()
            .filter(|s| s.project_id.to_string() == project && !s.is_deleted)
            .count() as u64)
    }

    // ==================== Session operations ====================

    async fn upsert_session(&self, mut session: Session) -> Result<(), DataError> {
        session.version += 1;
        let version = session.version;
        let mut tables = self.tables.write();
        let key = Self::key(session.project_id, &session.id);
        Self::replace_if_newer(&mut tables.sessions, key, session, version);
        Ok(())
    }

    async fn get_session(
        &self,
        project_id: Tsid,
        session_id: &str,
    ) -> Result<Option<Session>, DataError> {
        let tables = self.tables.read();
        Ok(tables
            .sessions
            .get(&Self::key(project_id, session_id))
            .filter(|s| !s.is_deleted)
            .cloned())
    }

    // ==================== Health ====================

    async fn health_check(&self) -> Result<(), DataError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::StatusCode;

    fn trace(project_id: Tsid, id: &str) -> Trace {
        Trace {
            id: id.to_string(),
            project_id,
            name: "t".to_string(),
            user_id: None,
            session_id: None,
            input: None,
            output: None,
            metadata: HashMap::new(),
            tags: vec![],
            environment: "production".to_string(),
            release: None,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            status_code: StatusCode::Unset,
            status_message: None,
            attributes: serde_json::json!({}),
            service_name: None,
            service_version: None,
            total_cost: 0.0,
            total_tokens: 0,
            observation_count: 0,
            bookmarked: false,
            public: false,
            is_deleted: false,
            version: 0,
            event_ts: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let store = MemoryTelemetryStore::new();
        let project = Tsid::generate();
        let t = trace(project, "0af7651916cd43dd8448eb211c80319c");

        store.insert_trace(t.clone()).await.unwrap();
        store.insert_trace(t).await.unwrap();

        let row = store
            .get_trace(project, "0af7651916cd43dd8448eb211c80319c")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.version, 1);
        assert_eq!(store.count_traces(project).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let store = MemoryTelemetryStore::new();
        let project = Tsid::generate();
        let id = "0af7651916cd43dd8448eb211c80319c";
        store.insert_trace(trace(project, id)).await.unwrap();

        let mut current = store.get_trace(project, id).await.unwrap().unwrap();
        current.name = "renamed".to_string();
        store.update_trace(current).await.unwrap();

        let row = store.get_trace(project, id).await.unwrap().unwrap();
        assert_eq!(row.version, 2);
        assert_eq!(row.name, "renamed");
    }

    #[tokio::test]
    async fn test_stale_write_does_not_regress() {
        let store = MemoryTelemetryStore::new();
        let project = Tsid::generate();
        let id = "0af7651916cd43dd8448eb211c80319c";
        store.insert_trace(trace(project, id)).await.unwrap();

        let current = store.get_trace(project, id).await.unwrap().unwrap();
        store.update_trace(current.clone()).await.unwrap(); // v2

        // Replay of the version-1 read loses to the version-2 row
        store.insert_trace(trace(project, id)).await.unwrap();
        let row = store.get_trace(project, id).await.unwrap().unwrap();
        assert_eq!(row.version, 2);
    }

    #[tokio::test]
    async fn test_soft_delete_hides_row() {
        let store = MemoryTelemetryStore::new();
        let project = Tsid::generate();
        let id = "0af7651916cd43dd8448eb211c80319c";
        store.insert_trace(trace(project, id)).await.unwrap();

        store.soft_delete_trace(project, id).await.unwrap();
        assert!(store.get_trace(project, id).await.unwrap().is_none());
        assert_eq!(store.count_traces(project).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_project_isolation() {
        let store = MemoryTelemetryStore::new();
        let id = "0af7651916cd43dd8448eb211c80319c";
        let project_a = Tsid::generate();
        let project_b = Tsid::generate();
        store.insert_trace(trace(project_a, id)).await.unwrap();

        assert!(store.get_trace(project_b, id).await.unwrap().is_none());
        assert_eq!(store.count_traces(project_b).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_traces_ordered_and_limited() {
        let store = MemoryTelemetryStore::new();
        let project = Tsid::generate();
        for i in 0..5 {
            store
                .insert_trace(trace(project, &format!("{i:032x}")))
                .await
                .unwrap();
        }
        let listed = store.list_traces(project, None, None, 3).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed[0].event_ts >= listed[1].event_ts);
    }
}
