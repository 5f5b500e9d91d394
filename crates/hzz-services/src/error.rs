//! Pipeline error taxonomy.
//!
//! Component-level errors (`BrokerError`, `SourceError`, `TransformError`,
//! `WireError`, `ExportError`) fold into [`PipelineError`] at role
//! boundaries.

use hzz_core::wire::WireError;

use crate::aggregation::AggregationError;
use crate::broker::BrokerError;
use crate::histogram::ExportError;
use crate::source::SourceError;
use crate::transform::TransformError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("broker connection failed: {0}")]
    ConnectionFailure(String),

    #[error(transparent)]
    SourceUnavailable(#[from] SourceError),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("no normalization for variant {0:?}")]
    MissingNormalization(String),

    #[error("broker error: {0}")]
    Broker(BrokerError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),
}

impl From<BrokerError> for PipelineError {
    fn from(e: BrokerError) -> Self {
        if e.is_connection() {
            PipelineError::ConnectionFailure(e.to_string())
        } else {
            PipelineError::Broker(e)
        }
    }
}

impl From<WireError> for PipelineError {
    fn from(e: WireError) -> Self {
        PipelineError::MalformedPayload(e.to_string())
    }
}

impl From<TransformError> for PipelineError {
    fn from(e: TransformError) -> Self {
        PipelineError::MalformedPayload(e.to_string())
    }
}

impl PipelineError {
    /// Failures confined to one message: the message is dead-lettered and
    /// the consumer carries on.
    pub fn is_per_message(&self) -> bool {
        matches!(
            self,
            PipelineError::MalformedPayload(_) | PipelineError::MissingNormalization(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lost_broker_is_a_connection_failure() {
        let e = PipelineError::from(BrokerError::Closed);
        assert!(matches!(e, PipelineError::ConnectionFailure(_)));
        let e = PipelineError::from(BrokerError::UnknownChannel(3));
        assert!(matches!(e, PipelineError::Broker(_)));
    }

    #[test]
    fn payload_errors_are_per_message() {
        let e = PipelineError::from(WireError::MissingVariant("ZZ".into()));
        assert!(e.is_per_message());
        assert!(!PipelineError::ConnectionFailure("gone".into()).is_per_message());
    }
}
