//! # Error Types
//!
//! Captured participant failures. A failure inside a subscriber, responder or
//! participant never unwinds into the caller; it is recorded here instead.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use thiserror::Error;

/// A failure captured at the participant boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInformation {
    /// Top-level error message.
    pub message: String,
    /// Underlying causes, outermost first.
    pub causes: Vec<String>,
    /// True if the participant panicked rather than returning an error.
    pub panicked: bool,
    /// Name of the participant, if it was registered with one.
    pub participant: Option<String>,
}

impl ErrorInformation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            causes: Vec::new(),
            panicked: false,
            participant: None,
        }
    }

    /// Capture an error returned by a participant, including its cause chain.
    pub fn from_error(error: &anyhow::Error) -> Self {
        Self {
            message: error.to_string(),
            causes: error.chain().skip(1).map(ToString::to_string).collect(),
            panicked: false,
            participant: None,
        }
    }

    /// Capture a panic payload from `catch_unwind`.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "participant panicked".to_string()
        };
        Self {
            message,
            causes: Vec::new(),
            panicked: true,
            participant: None,
        }
    }

    #[must_use]
    pub fn with_participant(mut self, participant: Option<String>) -> Self {
        self.participant = participant;
        self
    }
}

impl fmt::Display for ErrorInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.participant {
            write!(f, "[{name}] ")?;
        }
        if self.panicked {
            write!(f, "panicked: ")?;
        }
        write!(f, "{}", self.message)?;
        for cause in &self.causes {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorInformation {}

/// Every failure collected from one scatter/gather round.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} participant(s) failed: {}", .errors.len(), join_messages(.errors))]
pub struct AggregateError {
    pub errors: Vec<ErrorInformation>,
}

fn join_messages(errors: &[ErrorInformation]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
