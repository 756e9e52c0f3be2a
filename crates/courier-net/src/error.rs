use courier_bus::BusError;
use thiserror::Error;

/// Errors from building or attaching a net.
#[derive(Debug, Clone, Error)]
pub enum NetError {
    /// The topology is invalid. Every problem found is listed.
    #[error("Net validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// The bus rejected a generated registration.
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl From<NetError> for BusError {
    fn from(error: NetError) -> Self {
        match error {
            NetError::Validation(problems) => BusError::Validation(problems),
            NetError::Bus(error) => error,
        }
    }
}
