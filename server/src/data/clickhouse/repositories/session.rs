//! ClickHouse session repository

use std::collections::HashMap;

use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};

use crate::data::error::DataError;
use crate::data::types::Session;
use crate::utils::time::{chrono_to_time, time_to_chrono};
use crate::utils::tsid::Tsid;

/// Row layout of the `sessions` table.
#[derive(Row, Serialize, Deserialize)]
pub struct SessionRow {
    project_id: String,
    id: String,
    user_id: Option<String>,
    metadata: String,
    bookmarked: bool,
    public: bool,
    #[serde(with = "clickhouse::serde::time::datetime64::micros")]
    created_at: time::OffsetDateTime,
    #[serde(with = "clickhouse::serde::time::datetime64::micros")]
    updated_at: time::OffsetDateTime,
    is_deleted: bool,
    version: u64,
}

fn to_row(session: &Session, version: u64) -> Result<SessionRow, DataError> {
    Ok(SessionRow {
        project_id: session.project_id.to_string(),
        id: session.id.clone(),
        user_id: session.user_id.clone(),
        metadata: serde_json::to_string(&session.metadata)?,
        bookmarked: session.bookmarked,
        public: session.public,
        created_at: chrono_to_time(session.created_at),
        updated_at: chrono_to_time(session.updated_at),
        is_deleted: session.is_deleted,
        version,
    })
}

fn from_row(row: SessionRow) -> Result<Session, DataError> {
    let metadata: HashMap<String, String> = serde_json::from_str(&row.metadata)?;
    Ok(Session {
        id: row.id,
        project_id: row
            .project_id
            .parse::<Tsid>()
            .map_err(|e| DataError::Serialization(e.to_string()))?,
        user_id: row.user_id,
        metadata,
        bookmarked: row.bookmarked,
        public: row.public,
        created_at: time_to_chrono(row.created_at),
        updated_at: time_to_chrono(row.updated_at),
        is_deleted: row.is_deleted,
        version: row.version,
    })
}

pub async fn upsert(client: &Client, session: &Session) -> Result<(), DataError> {
    let mut insert: clickhouse::insert::Insert<SessionRow> = client.insert("sessions").await?;
    insert.write(&to_row(session, session.version + 1)?).await?;
    insert.end().await?;
    Ok(())
}

pub async fn get(
    client: &Client,
    project_id: Tsid,
    session_id: &str,
) -> Result<Option<Session>, DataError> {
    let row = client
        .query(
            "SELECT ?fields FROM sessions FINAL \
             WHERE project_id = ? AND id = ? AND is_deleted = false",
        )
        .bind(project_id.to_string())
        .bind(session_id)
        .fetch_optional::<SessionRow>()
        .await?;
    row.map(from_row).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_row_roundtrip() {
        let session = Session {
            id: "sess-1".to_string(),
            project_id: Tsid::generate(),
            user_id: Some("u".to_string()),
            metadata: HashMap::from([("k".to_string(), "v".to_string())]),
            bookmarked: true,
            public: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            is_deleted: false,
            version: 3,
        };

        let back = from_row(to_row(&session, session.version).unwrap()).unwrap();
        assert_eq!(back.id, "sess-1");
        assert_eq!(back.metadata.get("k").map(String::as_str), Some("v"));
        assert!(back.bookmarked);
        assert_eq!(back.version, 3);
    }
}
