//! ClickHouse observation repository

use std::collections::HashMap;

use chrono::Utc;
use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};

use crate::data::error::DataError;
use crate::data::types::{Observation, ObservationType, StatusCode};
use crate::utils::time::{chrono_to_time, time_to_chrono};
use crate::utils::tsid::Tsid;

/// Row layout of the `observations` table.
#[derive(Row, Serialize, Deserialize)]
pub struct ObservationRow {
    project_id: String,
    id: String,
    trace_id: String,
    parent_observation_id: Option<String>,
    name: String,
    span_kind: Option<String>,
    observation_type: String,
    #[serde(with = "clickhouse::serde::time::datetime64::micros")]
    start_time: time::OffsetDateTime,
    #[serde(with = "clickhouse::serde::time::datetime64::micros::option")]
    end_time: Option<time::OffsetDateTime>,
    duration_ms: Option<i64>,
    status_code: String,
    status_message: Option<String>,
    level: Option<String>,
    attributes: String,
    input: Option<String>,
    output: Option<String>,
    input_preview: String,
    output_preview: String,
    input_blob_id: Option<String>,
    output_blob_id: Option<String>,
    model_name: Option<String>,
    model_provider: Option<String>,
    internal_model_id: Option<String>,
    model_parameters: String,
    provided_usage_details: String,
    usage_details: String,
    provided_cost_details: String,
    cost_details: String,
    prompt_id: Option<String>,
    prompt_name: Option<String>,
    prompt_version: Option<String>,
    time_to_first_token_ms: Option<i64>,
    retry_count: u32,
    error_message: Option<String>,
    is_deleted: bool,
    version: u64,
    #[serde(with = "clickhouse::serde::time::datetime64::micros")]
    event_ts: time::OffsetDateTime,
}

fn to_row(
    observation: &Observation,
    version: u64,
    is_deleted: bool,
) -> Result<ObservationRow, DataError> {
    Ok(ObservationRow {
        project_id: observation.project_id.to_string(),
        id: observation.id.clone(),
        trace_id: observation.trace_id.clone(),
        parent_observation_id: observation.parent_observation_id.clone(),
        name: observation.name.clone(),
        span_kind: observation.span_kind.clone(),
        observation_type: observation.observation_type.as_str().to_string(),
        start_time: chrono_to_time(observation.start_time),
        end_time: observation.end_time.map(chrono_to_time),
        duration_ms: observation.duration_ms,
        status_code: observation.status_code.as_str().to_string(),
        status_message: observation.status_message.clone(),
        level: observation.level.clone(),
        attributes: observation.attributes.to_string(),
        input: observation.input.clone(),
        output: observation.output.clone(),
        input_preview: observation.input_preview.clone(),
        output_preview: observation.output_preview.clone(),
        input_blob_id: observation.input_blob_id.clone(),
        output_blob_id: observation.output_blob_id.clone(),
        model_name: observation.model_name.clone(),
        model_provider: observation.model_provider.clone(),
        internal_model_id: observation.internal_model_id.clone(),
        model_parameters: observation.model_parameters.to_string(),
        provided_usage_details: serde_json::to_string(&observation.provided_usage_details)?,
        usage_details: serde_json::to_string(&observation.usage_details)?,
        provided_cost_details: serde_json::to_string(&observation.provided_cost_details)?,
        cost_details: serde_json::to_string(&observation.cost_details)?,
        prompt_id: observation.prompt_id.clone(),
        prompt_name: observation.prompt_name.clone(),
        prompt_version: observation.prompt_version.clone(),
        time_to_first_token_ms: observation.time_to_first_token_ms,
        retry_count: observation.retry_count,
        error_message: observation.error_message.clone(),
        is_deleted,
        version,
        event_ts: chrono_to_time(Utc::now()),
    })
}

fn from_row(row: ObservationRow) -> Result<Observation, DataError> {
    let provided_usage_details: HashMap<String, u64> =
        serde_json::from_str(&row.provided_usage_details)?;
    let usage_details: HashMap<String, u64> = serde_json::from_str(&row.usage_details)?;
    let provided_cost_details: HashMap<String, f64> =
        serde_json::from_str(&row.provided_cost_details)?;
    let cost_details: HashMap<String, f64> = serde_json::from_str(&row.cost_details)?;

    Ok(Observation {
        id: row.id,
        trace_id: row.trace_id,
        parent_observation_id: row.parent_observation_id,
        project_id: row
            .project_id
            .parse::<Tsid>()
            .map_err(|e| DataError::Serialization(e.to_string()))?,
        name: row.name,
        span_kind: row.span_kind,
        observation_type: ObservationType::parse(&row.observation_type),
        start_time: time_to_chrono(row.start_time),
        end_time: row.end_time.map(time_to_chrono),
        duration_ms: row.duration_ms,
        status_code: StatusCode::parse(&row.status_code),
        status_message: row.status_message,
        level: row.level,
        attributes: serde_json::from_str(&row.attributes)?,
        input: row.input,
        output: row.output,
        input_preview: row.input_preview,
        output_preview: row.output_preview,
        input_blob_id: row.input_blob_id,
        output_blob_id: row.output_blob_id,
        model_name: row.model_name,
        model_provider: row.model_provider,
        internal_model_id: row.internal_model_id,
        model_parameters: serde_json::from_str(&row.model_parameters)?,
        provided_usage_details,
        usage_details,
        provided_cost_details,
        cost_details,
        prompt_id: row.prompt_id,
        prompt_name: row.prompt_name,
        prompt_version: row.prompt_version,
        time_to_first_token_ms: row.time_to_first_token_ms,
        retry_count: row.retry_count,
        error_message: row.error_message,
        is_deleted: row.is_deleted,
        version: row.version,
        event_ts: time_to_chrono(row.event_ts),
    })
}

async fn write_row(client: &Client, row: &ObservationRow) -> Result<(), DataError> {
    let mut insert: clickhouse::insert::Insert<ObservationRow> =
        client.insert("observations").await?;
    insert.write(row).await?;
    insert.end().await?;
    Ok(())
}

pub async fn insert(client: &Client, observation: &Observation) -> Result<(), DataError> {
    write_row(client, &to_row(observation, 1, false)?).await
}

pub async fn update(client: &Client, observation: &Observation) -> Result<(), DataError> {
    write_row(client, &to_row(observation, observation.version + 1, false)?).await
}

pub async fn get(
    client: &Client,
    project_id: Tsid,
    observation_id: &str,
) -> Result<Option<Observation>, DataError> {
    let row = client
        .query(
            "SELECT ?fields FROM observations FINAL \
             WHERE project_id = ? AND id = ? AND is_deleted = false",
        )
        .bind(project_id.to_string())
        .bind(observation_id)
        .fetch_optional::<ObservationRow>()
        .await?;
    row.map(from_row).transpose()
}

pub async fn soft_delete(
    client: &Client,
    project_id: Tsid,
    observation_id: &str,
) -> Result<(), DataError> {
    if let Some(observation) = get(client, project_id, observation_id).await? {
        write_row(client, &to_row(&observation, observation.version + 1, true)?).await?;
    }
    Ok(())
}

pub async fn get_for_trace(
    client: &Client,
    project_id: Tsid,
    trace_id: &str,
) -> Result<Vec<Observation>, DataError> {
    let rows = client
        .query(
            "SELECT ?fields FROM observations FINAL \
             WHERE project_id = ? AND trace_id = ? AND is_deleted = false \
             ORDER BY start_time ASC",
        )
        .bind(project_id.to_string())
        .bind(trace_id)
        .fetch_all::<ObservationRow>()
        .await?;
    rows.into_iter().map(from_row).collect()
}

pub async fn count(client: &Client, project_id: Tsid) -> Result<u64, DataError> {
    let count = client
        .query(
            "SELECT count() FROM observations FINAL \
             WHERE project_id = ? AND is_deleted = false",
        )
        .bind(project_id.to_string())
        .fetch_one::<u64>()
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_roundtrip_preserves_details_maps() {
        let observation = Observation {
            id: "b7ad6b7169203331".to_string(),
            trace_id: "0af7651916cd43dd8448eb211c80319c".to_string(),
            parent_observation_id: None,
            project_id: Tsid::generate(),
            name: "llm".to_string(),
            span_kind: Some("CLIENT".to_string()),
            observation_type: ObservationType::Generation,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            status_code: StatusCode::Unset,
            status_message: None,
            level: None,
            attributes: serde_json::json!({}),
            input: Some("prompt".to_string()),
            output: None,
            input_preview: "prompt".to_string(),
            output_preview: String::new(),
            input_blob_id: None,
            output_blob_id: Some("blob-1".to_string()),
            model_name: Some("gpt-4o".to_string()),
            model_provider: Some("openai".to_string()),
            internal_model_id: None,
            model_parameters: serde_json::json!({"temperature": 0.2}),
            provided_usage_details: HashMap::from([("input_tokens".to_string(), 10)]),
            usage_details: HashMap::from([
                ("input_tokens".to_string(), 10),
                ("output_tokens".to_string(), 20),
                ("total_tokens".to_string(), 30),
            ]),
            provided_cost_details: HashMap::new(),
            cost_details: HashMap::from([("total".to_string(), 0.003)]),
            prompt_id: None,
            prompt_name: None,
            prompt_version: None,
            time_to_first_token_ms: Some(120),
            retry_count: 1,
            error_message: None,
            is_deleted: false,
            version: 2,
            event_ts: Utc::now(),
        };

        let row = to_row(&observation, observation.version, false).unwrap();
        let back = from_row(row).unwrap();

        assert_eq!(back.observation_type, ObservationType::Generation);
        assert_eq!(back.usage_details.get("total_tokens"), Some(&30));
        assert_eq!(back.cost_details.get("total"), Some(&0.003));
        assert_eq!(back.output_blob_id.as_deref(), Some("blob-1"));
        assert_eq!(back.model_parameters["temperature"], 0.2);
        assert_eq!(back.version, 2);
    }
}
