//! HTTP and gRPC surfaces

pub mod error;
pub mod otlp_grpc;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use otlp_grpc::OtlpGrpcServer;
pub use server::{ApiServer, AppState};
