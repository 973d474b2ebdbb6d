use thiserror::Error;

/// Failure of a request-facing operation, tagged with the stage that produced it.
#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PriceError {
    stage: &'static str,
    message: String,
    kind: PriceErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceErrorKind {
    InvalidInput,
    Unavailable,
    Internal,
}

impl PriceError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PriceErrorKind::InvalidInput,
        }
    }

    pub fn unavailable(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PriceErrorKind::Unavailable,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PriceErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PriceErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}
