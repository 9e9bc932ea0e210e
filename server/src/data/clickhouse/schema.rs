//! ClickHouse schema definitions
//!
//! All four tables are ReplacingMergeTree keyed `(project_id, id)` with a
//! `version` column: updates are appended rows that collapse to the highest
//! version at merge (and under FINAL at read). `event_ts` carries a minmax
//! index for time-range pruning. Every read filters `is_deleted = false`.

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

pub fn schema_version_table() -> &'static str {
    r#"
CREATE TABLE IF NOT EXISTS schema_version (
    id UInt8,
    version Int32,
    applied_at Int64,
    description Nullable(String)
) ENGINE = ReplacingMergeTree()
ORDER BY id
"#
}

fn traces_table() -> &'static str {
    r#"
CREATE TABLE IF NOT EXISTS traces (
    -- IDENTITY
    project_id          LowCardinality(String),
    id                  String,

    -- DESCRIPTION
    name                String,
    user_id             Nullable(String),
    session_id          Nullable(String),
    input               Nullable(String),
    output              Nullable(String),
    metadata            String DEFAULT '{}',
    tags                Array(String),
    environment         LowCardinality(String),
    release             Nullable(String),

    -- TIMING
    start_time          DateTime64(6, 'UTC'),
    end_time            Nullable(DateTime64(6, 'UTC')),
    duration_ms         Nullable(Int64),

    -- STATUS
    status_code         LowCardinality(String),
    status_message      Nullable(String),
    attributes          String DEFAULT '{}',
    service_name        Nullable(String),
    service_version     Nullable(String),

    -- AGGREGATES
    total_cost          Float64 DEFAULT 0,
    total_tokens        UInt64 DEFAULT 0,
    observation_count   UInt64 DEFAULT 0,

    -- FLAGS
    bookmarked          Bool DEFAULT false,
    public              Bool DEFAULT false,
    is_deleted          Bool DEFAULT false,

    -- VERSIONING
    version             UInt64,
    event_ts            DateTime64(6, 'UTC'),

    INDEX idx_event_ts event_ts TYPE minmax GRANULARITY 4,
    INDEX idx_session session_id TYPE bloom_filter GRANULARITY 4
) ENGINE = ReplacingMergeTree(version)
ORDER BY (project_id, id)
"#
}

fn observations_table() -> &'static str {
    r#"
CREATE TABLE IF NOT EXISTS observations (
    -- IDENTITY
    project_id              LowCardinality(String),
    id                      String,
    trace_id                String,
    parent_observation_id   Nullable(String),

    -- DESCRIPTION
    name                    String,
    span_kind               LowCardinality(Nullable(String)),
    observation_type        LowCardinality(String),

    -- TIMING
    start_time              DateTime64(6, 'UTC'),
    end_time                Nullable(DateTime64(6, 'UTC')),
    duration_ms             Nullable(Int64),

    -- STATUS
    status_code             LowCardinality(String),
    status_message          Nullable(String),
    level                   LowCardinality(Nullable(String)),
    attributes              String DEFAULT '{}',

    -- PAYLOADS
    input                   Nullable(String),
    output                  Nullable(String),
    input_preview           String DEFAULT '',
    output_preview          String DEFAULT '',
    input_blob_id           Nullable(String),
    output_blob_id          Nullable(String),

    -- MODEL
    model_name              LowCardinality(Nullable(String)),
    model_provider          LowCardinality(Nullable(String)),
    internal_model_id       Nullable(String),
    model_parameters        String DEFAULT '{}',

    -- USAGE & COST (JSON maps)
    provided_usage_details  String DEFAULT '{}',
    usage_details           String DEFAULT '{}',
    provided_cost_details   String DEFAULT '{}',
    cost_details            String DEFAULT '{}',

    -- PROMPT
    prompt_id               Nullable(String),
    prompt_name             Nullable(String),
    prompt_version          Nullable(String),

    -- PERFORMANCE
    time_to_first_token_ms  Nullable(Int64),
    retry_count             UInt32 DEFAULT 0,
    error_message           Nullable(String),

    -- FLAGS / VERSIONING
    is_deleted              Bool DEFAULT false,
    version                 UInt64,
    event_ts                DateTime64(6, 'UTC'),

    INDEX idx_event_ts event_ts TYPE minmax GRANULARITY 4,
    INDEX idx_trace trace_id TYPE bloom_filter GRANULARITY 4
) ENGINE = ReplacingMergeTree(version)
ORDER BY (project_id, id)
"#
}

fn scores_table() -> &'static str {
    r#"
CREATE TABLE IF NOT EXISTS scores (
    -- IDENTITY
    project_id          LowCardinality(String),
    id                  String,

    -- TARGET (exactly one set)
    trace_id            Nullable(String),
    observation_id      Nullable(String),
    session_id          Nullable(String),

    -- VALUE
    name                LowCardinality(String),
    data_type           LowCardinality(String),
    numeric_value       Nullable(Float64),
    string_value        Nullable(String),

    -- PROVENANCE
    source              LowCardinality(String),
    evaluator_name      Nullable(String),
    evaluator_version   Nullable(String),
    evaluator_config    String DEFAULT '{}',
    author_id           Nullable(String),
    comment             Nullable(String),
    timestamp           DateTime64(6, 'UTC'),

    -- FLAGS / VERSIONING
    is_deleted          Bool DEFAULT false,
    version             UInt64,
    event_ts            DateTime64(6, 'UTC'),

    INDEX idx_event_ts event_ts TYPE minmax GRANULARITY 4,
    INDEX idx_trace trace_id TYPE bloom_filter GRANULARITY 4
) ENGINE = ReplacingMergeTree(version)
ORDER BY (project_id, id)
"#
}

fn sessions_table() -> &'static str {
    r#"
CREATE TABLE IF NOT EXISTS sessions (
    project_id          LowCardinality(String),
    id                  String,
    user_id             Nullable(String),
    metadata            String DEFAULT '{}',
    bookmarked          Bool DEFAULT false,
    public              Bool DEFAULT false,
    created_at          DateTime64(6, 'UTC'),
    updated_at          DateTime64(6, 'UTC'),
    is_deleted          Bool DEFAULT false,
    version             UInt64
) ENGINE = ReplacingMergeTree(version)
ORDER BY (project_id, id)
"#
}

/// All CREATE TABLE statements in application order.
pub fn generate_schema() -> Vec<&'static str> {
    vec![
        schema_version_table(),
        traces_table(),
        observations_table(),
        scores_table(),
        sessions_table(),
    ]
}
