use thiserror::Error;

/// Failures surfaced by the grading core.
///
/// Propagation policy: only `Bootstrap` ever escapes `pre_check`/`grade`.
/// Faults, timeouts and injection ambiguity inside a test-case run are
/// captured in the returned result structures instead.
#[derive(Debug, Error)]
pub enum GradeError {
    /// The execution session or a required extension failed to initialize.
    /// Fatal to the in-flight call; retryable by re-acquiring.
    #[error("execution session bootstrap failed: {0}")]
    Bootstrap(String),

    /// A submit raced against a record that is already submitted. The
    /// stored result is unchanged; the caller must re-fetch.
    #[error("submission already finalized")]
    Conflict,

    /// Draft saves and pre-checks are rejected once the record is terminal.
    #[error("submission is locked")]
    Locked,

    #[error("assignment {0} not found")]
    UnknownAssignment(String),

    #[error("question {0} not found")]
    UnknownQuestion(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
