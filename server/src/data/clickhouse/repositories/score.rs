//! ClickHouse score repository

use chrono::Utc;
use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};

use crate::data::error::DataError;
use crate::data::types::{Score, ScoreDataType, ScoreSource};
use crate::utils::time::{chrono_to_time, time_to_chrono};
use crate::utils::tsid::Tsid;

/// Row layout of the `scores` table.
#[derive(Row, Serialize, Deserialize)]
pub struct ScoreRow {
    project_id: String,
    id: String,
    trace_id: Option<String>,
    observation_id: Option<String>,
    session_id: Option<String>,
    name: String,
    data_type: String,
    numeric_value: Option<f64>,
    string_value: Option<String>,
    source: String,
    evaluator_name: Option<String>,
    evaluator_version: Option<String>,
    evaluator_config: String,
    author_id: Option<String>,
    comment: Option<String>,
    #[serde(with = "clickhouse::serde::time::datetime64::micros")]
    timestamp: time::OffsetDateTime,
    is_deleted: bool,
    version: u64,
    #[serde(with = "clickhouse::serde::time::datetime64::micros")]
    event_ts: time::OffsetDateTime,
}

fn to_row(score: &Score, version: u64, is_deleted: bool) -> ScoreRow {
    ScoreRow {
        project_id: score.project_id.to_string(),
        id: score.id.to_string(),
        trace_id: score.trace_id.clone(),
        observation_id: score.observation_id.clone(),
        session_id: score.session_id.clone(),
        name: score.name.clone(),
        data_type: score.data_type.as_str().to_string(),
        numeric_value: score.numeric_value,
        string_value: score.string_value.clone(),
        source: score.source.as_str().to_string(),
        evaluator_name: score.evaluator_name.clone(),
        evaluator_version: score.evaluator_version.clone(),
        evaluator_config: score.evaluator_config.to_string(),
        author_id: score.author_id.clone(),
        comment: score.comment.clone(),
        timestamp: chrono_to_time(score.timestamp),
        is_deleted,
        version,
        event_ts: chrono_to_time(Utc::now()),
    }
}

fn from_row(row: ScoreRow) -> Result<Score, DataError> {
    let data_type = ScoreDataType::parse(&row.data_type)
        .ok_or_else(|| DataError::Serialization(format!("bad data_type: {}", row.data_type)))?;
    Ok(Score {
        id: row
            .id
            .parse::<Tsid>()
            .map_err(|e| DataError::Serialization(e.to_string()))?,
        project_id: row
            .project_id
            .parse::<Tsid>()
            .map_err(|e| DataError::Serialization(e.to_string()))?,
        trace_id: row.trace_id,
        observation_id: row.observation_id,
        session_id: row.session_id,
        name: row.name,
        data_type,
        numeric_value: row.numeric_value,
        string_value: row.string_value,
        source: ScoreSource::parse(&row.source),
        evaluator_name: row.evaluator_name,
        evaluator_version: row.evaluator_version,
        evaluator_config: serde_json::from_str(&row.evaluator_config)?,
        author_id: row.author_id,
        comment: row.comment,
        timestamp: time_to_chrono(row.timestamp),
        is_deleted: row.is_deleted,
        version: row.version,
        event_ts: time_to_chrono(row.event_ts),
    })
}

async fn write_row(client: &Client, row: &ScoreRow) -> Result<(), DataError> {
    let mut insert: clickhouse::insert::Insert<ScoreRow> = client.insert("scores").await?;
    insert.write(row).await?;
    insert.end().await?;
    Ok(())
}

pub async fn insert(client: &Client, score: &Score) -> Result<(), DataError> {
    write_row(client, &to_row(score, 1, false)).await
}

pub async fn get(
    client: &Client,
    project_id: Tsid,
    score_id: Tsid,
) -> Result<Option<Score>, DataError> {
    let row = client
        .query(
            "SELECT ?fields FROM scores FINAL \
             WHERE project_id = ? AND id = ? AND is_deleted = false",
        )
        .bind(project_id.to_string())
        .bind(score_id.to_string())
        .fetch_optional::<ScoreRow>()
        .await?;
    row.map(from_row).transpose()
}

pub async fn get_for_trace(
    client: &Client,
    project_id: Tsid,
    trace_id: &str,
) -> Result<Vec<Score>, DataError> {
    let rows = client
        .query(
            "SELECT ?fields FROM scores FINAL \
             WHERE project_id = ? AND trace_id = ? AND is_deleted = false \
             ORDER BY timestamp ASC",
        )
        .bind(project_id.to_string())
        .bind(trace_id)
        .fetch_all::<ScoreRow>()
        .await?;
    rows.into_iter().map(from_row).collect()
}

pub async fn count(client: &Client, project_id: Tsid) -> Result<u64, DataError> {
    let count = client
        .query(
            "SELECT count() FROM scores FINAL \
             WHERE project_id = ? AND is_deleted = false",
        )
        .bind(project_id.to_string())
        .fetch_one::<u64>()
        .await?;
    Ok(count)
}
