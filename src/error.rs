use thiserror::Error;

/// Errors that abort a decode call. No partial output is returned.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid generation config: {0}")]
    InvalidConfig(String),

    #[error("model step failed: {0:#}")]
    Model(anyhow::Error),

    #[error("tokenizer failed: {0:#}")]
    Tokenizer(anyhow::Error),

    #[error("degenerate distribution: {0}")]
    DegenerateDistribution(String),
}
