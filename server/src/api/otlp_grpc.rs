//! gRPC OTLP ingress
//!
//! Standard OTLP `TraceService/Export`. Spans are converted to internal
//! events and routed through the same ingest pipeline as SDK batches, so
//! they get the same dedup and durability guarantees. The project id comes
//! from request metadata.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tonic::transport::Server as TonicServer;
use tonic::{Request, Response, Status};

use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
    trace_service_server::{TraceService, TraceServiceServer},
};

use crate::core::constants::{MAX_BATCH_EVENTS, OTLP_BODY_LIMIT};
use crate::domain::otlp::convert_export_request;
use crate::domain::DomainError;
use crate::ingest::{IngestService, TelemetryBatchRequest};
use crate::utils::tsid::Tsid;

const PROJECT_ID_HEADER: &str = "x-spandrel-project-id";

pub struct OtlpGrpcServer {
    addr: SocketAddr,
    ingest: Arc<IngestService>,
}

impl OtlpGrpcServer {
    pub fn new(host: &str, port: u16, ingest: Arc<IngestService>) -> Result<Self> {
        let addr = SocketAddr::new(host.parse()?, port);
        Ok(Self { addr, ingest })
    }

    pub async fn start(self, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        let addr = self.addr;
        tracing::info!(%addr, "OTLP gRPC server listening");

        TonicServer::builder()
            .add_service(
                TraceServiceServer::new(OtlpTraceService {
                    ingest: self.ingest,
                })
                .max_decoding_message_size(OTLP_BODY_LIMIT)
                .max_encoding_message_size(OTLP_BODY_LIMIT),
            )
            .serve_with_shutdown(addr, async move {
                let _ = shutdown_rx.wait_for(|&v| v).await;
                tracing::debug!("OTLP gRPC server shutting down");
            })
            .await?;

        Ok(())
    }
}

/// Extract and parse the project id from gRPC metadata.
fn extract_project_id<T>(request: &Request<T>) -> Result<Tsid, Status> {
    let raw = request
        .metadata()
        .get(PROJECT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            Status::invalid_argument(format!("missing {PROJECT_ID_HEADER} metadata"))
        })?;

    raw.parse::<Tsid>()
        .map_err(|_| Status::invalid_argument(format!("invalid {PROJECT_ID_HEADER}: {raw}")))
}

fn domain_error_to_status(e: DomainError) -> Status {
    match &e {
        DomainError::Validation(_) => Status::invalid_argument(e.to_string()),
        DomainError::DedupUnavailable(_) | DomainError::PublishFailed(_) => {
            Status::unavailable(e.to_string())
        }
        _ => Status::internal(e.to_string()),
    }
}

struct OtlpTraceService {
    ingest: Arc<IngestService>,
}

#[tonic::async_trait]
impl TraceService for OtlpTraceService {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        let project_id = extract_project_id(&request)?;
        let export = request.into_inner();

        let events =
            convert_export_request(project_id, &export).map_err(domain_error_to_status)?;

        if events.is_empty() {
            return Ok(Response::new(ExportTraceServiceResponse {
                partial_success: None,
            }));
        }

        // One OTLP export can exceed the batch cap; split it
        for chunk in events.chunks(MAX_BATCH_EVENTS) {
            let batch = TelemetryBatchRequest {
                project_id,
                events: chunk.to_vec(),
                metadata: std::collections::HashMap::from([(
                    "source".to_string(),
                    "otlp-grpc".to_string(),
                )]),
            };
            self.ingest
                .process_batch(batch)
                .await
                .map_err(domain_error_to_status)?;
        }

        Ok(Response::new(ExportTraceServiceResponse {
            partial_success: None,
        }))
    }
}
