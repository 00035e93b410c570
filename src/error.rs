use thiserror::Error;

use crate::types::FlowKind;

/// Why a submitted answer was rejected. Recoverable: the caller re-prompts
/// with the same step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationReason {
    OutOfRange { min: i64, max: i64 },
    NotANumber,
    NotAnOption { input: String },
    EmptyAnswer,
    TooFewSelections { min: usize },
    RejectedByValidator { hint: String },
}

impl std::fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationReason::OutOfRange { min, max } => {
                write!(f, "please pick a number between {} and {}", min, max)
            }
            ValidationReason::NotANumber => write!(f, "please reply with a number"),
            ValidationReason::NotAnOption { input } => {
                write!(f, "\"{}\" isn't one of the options", input)
            }
            ValidationReason::EmptyAnswer => write!(f, "please type an answer"),
            ValidationReason::TooFewSelections { min } => {
                write!(f, "please pick at least {}", min)
            }
            ValidationReason::RejectedByValidator { hint } => f.write_str(hint),
        }
    }
}

/// Error taxonomy for the core engines.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad user input to a flow step. Recoverable: re-prompt.
    #[error("invalid answer: {0}")]
    Validation(ValidationReason),

    /// The session aged out. Recoverable: restart the flow.
    #[error("flow session expired")]
    FlowExpired,

    /// A flow of this kind is already active and the caller asked not to
    /// override it.
    #[error("a {0} flow is already active")]
    FlowAlreadyActive(FlowKind),

    /// One context source was slow or unreachable. Recovered locally by
    /// omitting its section; never surfaced to the user.
    #[error("context source '{0}' timed out")]
    SourceTimeout(&'static str),

    /// The mandatory profile source is unreachable. The caller must fall
    /// back to a context-free model call.
    #[error("profile source unreachable")]
    ContextUnavailable,

    /// Persistence layer down. Fatal for the current operation.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The model call failed or timed out. The caller substitutes a fixed,
    /// non-technical fallback string.
    #[error("model call failed: {0}")]
    ModelUnavailable(String),
}

impl CoreError {
    pub fn validation(reason: ValidationReason) -> Self {
        CoreError::Validation(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_reason_is_user_presentable() {
        // No identifiers, status tokens, or stack-trace-like text.
        let msg = ValidationReason::OutOfRange { min: 1, max: 10 }.to_string();
        assert_eq!(msg, "please pick a number between 1 and 10");
    }
}
