use thiserror::Error;

/// The error conditions reported by the crate.
#[derive(Debug, Error)]
pub enum RdError {
    /// The model stream could not be read or parsed.
    #[error("model error: {0}")]
    ModelIo(String),
    /// The model parsed but violates a domain invariant.
    #[error("invalid model: {0}")]
    InvalidModel(String),
    /// A sampler or engine was constructed with an illegal parameter.
    #[error("parameter out of range: {0}")]
    InvalidParam(String),
    /// A sampling procedure failed to produce a result.
    #[error("sampling failure: {0}")]
    SamplingFailure(String),
}

impl From<std::io::Error> for RdError {
    fn from(err: std::io::Error) -> RdError {
        RdError::ModelIo(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RdError>;
