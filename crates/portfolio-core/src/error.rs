use thiserror::Error;

/// The error taxonomy shared by every crate in the workspace.
///
/// Variants are grouped by who can act on them: `TransientIo` is worth
/// retrying, `TemporalViolation` and `DataIntegrity` are never retryable and
/// indicate a caller or data-source bug, `InfeasibleOptimization` is a
/// legitimate runtime outcome the caller must handle explicitly.
#[derive(Error, Debug)]
pub enum PortfolioError {
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("temporal violation: {0}")]
    TemporalViolation(String),

    #[error("universe too sparse: {0}")]
    UniverseTooSparse(String),

    #[error("infeasible optimization: {0}")]
    InfeasibleOptimization(String),

    #[error("invalid configuration: {0}")]
    ConfigError(String),

    /// Sample covariance is still not positive definite after full
    /// shrinkage toward the constant-correlation target (e.g. an all-zero
    /// or rank-deficient return matrix). Never retryable.
    #[error("singular covariance: {0}")]
    SingularCovariance(String),

    /// Operational, not semantic: a cancellation token was observed
    /// mid-rebalance (§5). Never retried and never counted as a skipped
    /// rebalance — the caller discards the partial work outright.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl PortfolioError {
    /// Whether a caller retrying the operation that produced this error has
    /// any chance of success. Only transient I/O qualifies.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PortfolioError::TransientIo(_))
    }
}

pub type Result<T> = std::result::Result<T, PortfolioError>;
