use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HalError {
    /// Programmer misuse; retrying will not help.
    #[error("usage error: {0}")]
    Usage(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("out of memory: requested {requested} bytes")]
    OutOfMemory { requested: u64 },

    #[error("device lost: {0}")]
    DeviceLost(String),

    #[error("driver error: code={code}, message={message}")]
    Driver { code: i32, message: String },
}

impl HalError {
    pub fn usage(message: impl Into<String>) -> Self {
        HalError::Usage(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        HalError::Unsupported(message.into())
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, HalError::Usage(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, HalError::Unsupported(_))
    }
}

pub type HalResult<T> = Result<T, HalError>;
