//! # Responses
//!
//! One participant's answer to a request or scatter. A response is exactly one
//! of: a value, a captured failure, or empty (the participant was not invoked,
//! e.g. because its circuit breaker was open or its invocation cap was spent).

use crate::errors::ErrorInformation;

#[derive(Debug, Clone, PartialEq)]
enum Outcome<T> {
    Success(T),
    Failure(ErrorInformation),
    Empty,
}

/// A single participant's response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response<T> {
    name: Option<String>,
    outcome: Outcome<T>,
}

impl<T> Response<T> {
    pub fn success(name: Option<String>, value: T) -> Self {
        Self {
            name,
            outcome: Outcome::Success(value),
        }
    }

    pub fn failure(name: Option<String>, error: ErrorInformation) -> Self {
        Self {
            name,
            outcome: Outcome::Failure(error),
        }
    }

    pub fn empty(name: Option<String>) -> Self {
        Self {
            name,
            outcome: Outcome::Empty,
        }
    }

    /// True if no invocation occurred.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self.outcome, Outcome::Empty)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match &self.outcome {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }

    /// The captured failure. Present iff the participant ran and failed.
    #[must_use]
    pub fn error_information(&self) -> Option<&ErrorInformation> {
        match &self.outcome {
            Outcome::Failure(error) => Some(error),
            _ => None,
        }
    }

    /// Participant name, if it was registered with one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Convert into a `Result`, surfacing a captured failure as `Err`.
    ///
    /// Empty responses become `Ok(None)`.
    pub fn into_result(self) -> Result<Option<T>, ErrorInformation> {
        match self.outcome {
            Outcome::Success(value) => Ok(Some(value)),
            Outcome::Empty => Ok(None),
            Outcome::Failure(error) => Err(error),
        }
    }
}
