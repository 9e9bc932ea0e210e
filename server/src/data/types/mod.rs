//! Shared data types for the telemetry hierarchy
//!
//! Entities (`Trace`, `Observation`, `Score`, `Session`), classification
//! enums, and the wire envelopes that travel over the stream transport.

pub mod enums;
pub mod events;
pub mod observation;
pub mod score;
pub mod session;
pub mod trace;

pub use enums::{EventType, ObservationType, ScoreDataType, ScoreSource, StatusCode};
pub use events::{BatchEnvelope, DeadLetterEnvelope, EnvelopeEvent, TelemetryEvent};
pub use observation::{Observation, ObservationUpdate};
pub use score::Score;
pub use session::{Session, SessionUpdate};
pub use trace::{Trace, TraceUpdate};
