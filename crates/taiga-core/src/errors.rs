use thiserror::Error;

/// Error type for invalid engine operations.
///
/// The taxonomy follows the failure contract of the compute kernel:
/// configuration problems are fatal at initialization, dimension and domain
/// problems are fatal at the call boundary that discovered them. There are
/// no retry semantics; spinup convergence shortfalls are reported through
/// per-stand flags rather than errors.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Pool/flux definitions reference unknown pools, duplicate ids, or
    /// unresolvable parameter associations.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Per-stand vector lengths disagree between pools, flux, state or an
    /// operation's matrix index.
    #[error("dimension mismatch: {0}")]
    Dimension(String),
    /// Non-finite or negative coefficients, duplicate matrix coordinates,
    /// or more than 100 % of a source pool routed out.
    #[error("domain error: {0}")]
    Domain(String),
}

/// Convenience type for `Result<T, CoreError>`.
pub type CoreResult<T> = Result<T, CoreError>;
