//! ClickHouse trace repository

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};

use crate::data::error::DataError;
use crate::data::types::{StatusCode, Trace};
use crate::utils::time::{chrono_to_time, time_to_chrono};
use crate::utils::tsid::Tsid;

/// Row layout of the `traces` table.
#[derive(Row, Serialize, Deserialize)]
pub struct TraceRow {
    project_id: String,
    id: String,
    name: String,
    user_id: Option<String>,
    session_id: Option<String>,
    input: Option<String>,
    output: Option<String>,
    metadata: String,
    tags: Vec<String>,
    environment: String,
    release: Option<String>,
    #[serde(with = "clickhouse::serde::time::datetime64::micros")]
    start_time: time::OffsetDateTime,
    #[serde(with = "clickhouse::serde::time::datetime64::micros::option")]
    end_time: Option<time::OffsetDateTime>,
    duration_ms: Option<i64>,
    status_code: String,
    status_message: Option<String>,
    attributes: String,
    service_name: Option<String>,
    service_version: Option<String>,
    total_cost: f64,
    total_tokens: u64,
    observation_count: u64,
    bookmarked: bool,
    public: bool,
    is_deleted: bool,
    version: u64,
    #[serde(with = "clickhouse::serde::time::datetime64::micros")]
    event_ts: time::OffsetDateTime,
}

fn to_row(trace: &Trace, version: u64, is_deleted: bool) -> Result<TraceRow, DataError> {
    Ok(TraceRow {
        project_id: trace.project_id.to_string(),
        id: trace.id.clone(),
        name: trace.name.clone(),
        user_id: trace.user_id.clone(),
        session_id: trace.session_id.clone(),
        input: trace.input.clone(),
        output: trace.output.clone(),
        metadata: serde_json::to_string(&trace.metadata)?,
        tags: trace.tags.clone(),
        environment: trace.environment.clone(),
        release: trace.release.clone(),
        start_time: chrono_to_time(trace.start_time),
        end_time: trace.end_time.map(chrono_to_time),
        duration_ms: trace.duration_ms,
        status_code: trace.status_code.as_str().to_string(),
        status_message: trace.status_message.clone(),
        attributes: trace.attributes.to_string(),
        service_name: trace.service_name.clone(),
        service_version: trace.service_version.clone(),
        total_cost: trace.total_cost,
        total_tokens: trace.total_tokens,
        observation_count: trace.observation_count,
        bookmarked: trace.bookmarked,
        public: trace.public,
        is_deleted,
        version,
        event_ts: chrono_to_time(Utc::now()),
    })
}

fn from_row(row: TraceRow) -> Result<Trace, DataError> {
    let metadata: HashMap<String, String> = serde_json::from_str(&row.metadata)?;
    let attributes = serde_json::from_str(&row.attributes)?;
    Ok(Trace {
        id: row.id,
        project_id: row
            .project_id
            .parse::<Tsid>()
            .map_err(|e| DataError::Serialization(e.to_string()))?,
        name: row.name,
        user_id: row.user_id,
        session_id: row.session_id,
        input: row.input,
        output: row.output,
        metadata,
        tags: row.tags,
        environment: row.environment,
        release: row.release,
        start_time: time_to_chrono(row.start_time),
        end_time: row.end_time.map(time_to_chrono),
        duration_ms: row.duration_ms,
        status_code: StatusCode::parse(&row.status_code),
        status_message: row.status_message,
        attributes,
        service_name: row.service_name,
        service_version: row.service_version,
        total_cost: row.total_cost,
        total_tokens: row.total_tokens,
        observation_count: row.observation_count,
        bookmarked: row.bookmarked,
        public: row.public,
        is_deleted: row.is_deleted,
        version: row.version,
        event_ts: time_to_chrono(row.event_ts),
    })
}

async fn write_row(client: &Client, row: &TraceRow) -> Result<(), DataError> {
    let mut insert: clickhouse::insert::Insert<TraceRow> = client.insert("traces").await?;
    insert.write(row).await?;
    insert.end().await?;
    Ok(())
}

pub async fn insert(client: &Client, trace: &Trace) -> Result<(), DataError> {
    write_row(client, &to_row(trace, 1, false)?).await
}

pub async fn update(client: &Client, trace: &Trace) -> Result<(), DataError> {
    write_row(client, &to_row(trace, trace.version + 1, false)?).await
}

pub async fn get(
    client: &Client,
    project_id: Tsid,
    trace_id: &str,
) -> Result<Option<Trace>, DataError> {
    let row = client
        .query(
            "SELECT ?fields FROM traces FINAL \
             WHERE project_id = ? AND id = ? AND is_deleted = false",
        )
        .bind(project_id.to_string())
        .bind(trace_id)
        .fetch_optional::<TraceRow>()
        .await?;
    row.map(from_row).transpose()
}

pub async fn soft_delete(
    client: &Client,
    project_id: Tsid,
    trace_id: &str,
) -> Result<(), DataError> {
    if let Some(trace) = get(client, project_id, trace_id).await? {
        write_row(client, &to_row(&trace, trace.version + 1, true)?).await?;
    }
    Ok(())
}

pub async fn list(
    client: &Client,
    project_id: Tsid,
    from_ts: Option<DateTime<Utc>>,
    to_ts: Option<DateTime<Utc>>,
    limit: u64,
) -> Result<Vec<Trace>, DataError> {
    let mut sql = String::from(
        "SELECT ?fields FROM traces FINAL WHERE project_id = ? AND is_deleted = false",
    );
    if from_ts.is_some() {
        sql.push_str(" AND event_ts >= fromUnixTimestamp64Micro(?)");
    }
    if to_ts.is_some() {
        sql.push_str(" AND event_ts <= fromUnixTimestamp64Micro(?)");
    }
    sql.push_str(" ORDER BY event_ts DESC LIMIT ?");

    let mut query = client.query(&sql).bind(project_id.to_string());
    if let Some(from) = from_ts {
        query = query.bind(from.timestamp_micros());
    }
    if let Some(to) = to_ts {
        query = query.bind(to.timestamp_micros());
    }
    let rows = query.bind(limit).fetch_all::<TraceRow>().await?;
    rows.into_iter().map(from_row).collect()
}

pub async fn count(client: &Client, project_id: Tsid) -> Result<u64, DataError> {
    let count = client
        .query(
            "SELECT count() FROM traces FINAL \
             WHERE project_id = ? AND is_deleted = false",
        )
        .bind(project_id.to_string())
        .fetch_one::<u64>()
        .await?;
    Ok(count)
}
