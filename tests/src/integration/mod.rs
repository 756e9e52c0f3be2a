//! Cross-crate integration scenarios.

pub mod lifecycle;
pub mod pubsub;
pub mod request_response;
