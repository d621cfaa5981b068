use thiserror::Error;

/// Failure taxonomy for the permutation validation core.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("invalid data: {0}")]
    Data(String),

    #[error("observer callback failed: {0}")]
    Observer(String),

    #[error("executor failed: {0}")]
    Executor(String),
}

pub type ValidationResult<T> = Result<T, ValidationError>;
