//! Kernel error type shared by the domain enums

use thiserror::Error;
use crate::money::MoneyError;
use crate::temporal::TemporalError;

/// Errors raised by kernel types and the status enums built on them
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Money error: {0}")]
    Money(#[from] MoneyError),

    #[error("Temporal error: {0}")]
    Temporal(#[from] TemporalError),

    /// A stored or submitted value that no enum variant accepts
    #[error("Unknown {kind} '{value}'")]
    UnknownValue { kind: &'static str, value: String },

    /// A status change the state machine does not allow
    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },
}

impl CoreError {
    pub fn unknown(kind: &'static str, value: impl Into<String>) -> Self {
        CoreError::UnknownValue {
            kind,
            value: value.into(),
        }
    }

    pub fn transition(
        entity: &'static str,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        CoreError::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// True when the error came from parsing a persisted value
    pub fn is_unknown_value(&self) -> bool {
        matches!(self, CoreError::UnknownValue { .. })
    }
}
