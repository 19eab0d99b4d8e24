use thiserror::Error;

/// Errors surfaced by the risk core's public operations.
///
/// Sizing and position admission are fail-closed: any of these returned from
/// those paths means no state was mutated.
#[derive(Debug, Clone, Error)]
pub enum RiskError {
    /// A configuration bound was violated on construction or update.
    #[error("invalid config: {field} = {value} (allowed: {allowed})")]
    InvalidConfig {
        field: &'static str,
        value: String,
        allowed: String,
    },

    /// The kill switch disallowed the requested operation.
    #[error("operation blocked: {operation} ({reason})")]
    OperationBlocked { operation: String, reason: String },

    /// Accepting the proposal would cross a portfolio limit.
    #[error("{limit} limit exceeded: {current:.2} > {threshold:.2}")]
    LimitExceeded {
        limit: &'static str,
        current: f64,
        threshold: f64,
    },

    /// Unknown position id.
    #[error("position not found: {0}")]
    NotFound(String),

    /// Malformed caller input (non-finite number, empty symbol, bad price).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl RiskError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        RiskError::InvalidInput(msg.into())
    }

    pub fn blocked(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        RiskError::OperationBlocked {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RiskError>;
