/// Reasons a single curve fit could not be produced. Local to one chamber
/// visit; the fitter turns these into an invalid [`FitResult`](super::FitResult).
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("x and y have different lengths: {len_x} vs {len_y}")]
    LengthMismatch { len_x: usize, len_y: usize },
    #[error("not enough points: got {len}, need at least {needed}")]
    NotEnoughPoints { len: usize, needed: usize },
    #[error("degenerate x: no variance in x")]
    DegenerateX,
    #[error("nonlinear fit did not converge after {iterations} iterations")]
    NonConvergence { iterations: usize },
    #[error("statistical error: {0}")]
    StatError(&'static str),
}

pub type FitOutcome<T> = Result<T, FitError>;
