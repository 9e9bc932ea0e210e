//! Session service
//!
//! Sessions are virtual groupings of traces sharing a session id. They are
//! materialized on the first trace that references them and support partial
//! updates with explicit preserve/overwrite semantics.

use std::sync::Arc;

use chrono::Utc;

use crate::data::TelemetryStore;
use crate::data::types::{Session, SessionUpdate};
use crate::utils::tsid::Tsid;

use super::DomainError;

pub struct SessionService {
    store: Arc<dyn TelemetryStore>,
}

impl SessionService {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self { store }
    }

    /// Materialize a session on first reference; a no-op when it exists.
    pub async fn ensure(
        &self,
        project_id: Tsid,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<(), DomainError> {
        if session_id.is_empty() {
            return Err(DomainError::Validation("session id is required".into()));
        }
        if self.store.get_session(project_id, session_id).await?.is_some() {
            return Ok(());
        }

        let now = Utc::now();
        self.store
            .upsert_session(Session {
                id: session_id.to_string(),
                project_id,
                user_id: user_id.map(str::to_string),
                metadata: Default::default(),
                bookmarked: false,
                public: false,
                created_at: now,
                updated_at: now,
                is_deleted: false,
                version: 0,
            })
            .await?;
        Ok(())
    }

    /// Partial update: `None` fields preserve the existing value, `Some`
    /// overwrites (booleans included); an empty metadata map clears it.
    pub async fn update(
        &self,
        project_id: Tsid,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<(), DomainError> {
        let mut session = self
            .store
            .get_session(project_id, session_id)
            .await?
            .ok_or_else(|| DomainError::not_found("session", session_id))?;

        session.apply(&update);
        self.store.upsert_session(session).await?;
        Ok(())
    }

    pub async fn get(&self, project_id: Tsid, session_id: &str) -> Result<Session, DomainError> {
        self.store
            .get_session(project_id, session_id)
            .await?
            .ok_or_else(|| DomainError::not_found("session", session_id))
    }
}
