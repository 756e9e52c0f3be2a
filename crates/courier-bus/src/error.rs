//! # Bus Errors
//!
//! Registration errors fail fast at setup time. Dispatch-time participant
//! failures are captured as `ErrorInformation` in responses and only surface
//! here when a caller asks for a single value (`request_wait`).

use crate::config::ConfigError;
use crate::workers::WorkerId;
use courier_types::ErrorInformation;
use std::time::Duration;
use thiserror::Error;

/// Errors from bus operations.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// An operation that is never valid, e.g. registering under a wildcard topic.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A builder was registered in an incomplete or contradictory state.
    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    /// Something is already registered under this key.
    #[error("Duplicate registration: {kind} '{key}'")]
    DuplicateRegistration { kind: &'static str, key: String },

    /// No dedicated worker with this id exists.
    #[error("Unknown worker: {0}")]
    UnknownWorker(WorkerId),

    /// The worker was stopped before the job could be queued.
    #[error("Worker {0} is no longer accepting work")]
    WorkerUnavailable(WorkerId),

    /// The worker's bounded queue is full.
    #[error("Worker {0} queue is full")]
    QueueFull(WorkerId),

    /// A thread or pool could not be started.
    #[error("Failed to start worker: {0}")]
    WorkerStart(String),

    /// No responder is registered for a request.
    #[error("No responder for topic '{topic}'")]
    NoResponder { topic: String },

    /// The response did not arrive in time.
    #[error("Timed out after {waited:?}")]
    Timeout { waited: Duration },

    /// The responder was skipped (circuit open or invocation cap reached).
    #[error("Responder on topic '{topic}' was not invoked")]
    EmptyResponse { topic: String },

    /// The responder ran and failed.
    #[error("Participant failed: {0}")]
    Participant(ErrorInformation),

    /// A composed topology failed validation. One message per problem.
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// The bus has been disposed.
    #[error("Message bus disposed")]
    Disposed,

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
