use thiserror::Error;

/// Errors produced by the scheduler. `Stop` is a sentinel for a controlled
/// shutdown rather than a failure; callers that match on this enum should
/// treat it differently from every other variant.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Controlled shutdown requested — not a failure, just an exit signal.
    #[error("scheduler stop requested: {0}")]
    Stop(String),

    /// Controlled but abnormal stop (auto-shutdown-on-task-failure, a fatal
    /// config reload, or the shutdown sequence itself erroring).
    #[error("scheduler error: {0}")]
    Abnormal(String),

    /// A command was rejected for input reasons (bad mode, unknown task
    /// id, conflicting arguments). Returned to the client, never fatal to
    /// the loop.
    #[error("command failed: {0}")]
    CommandFailure(String),

    /// Auto-restart host selection failed and no fallback host exists.
    #[error("auto-restart host selection failed: {0}")]
    RestartHostSelection(String),

    #[error("data store error: {0}")]
    Store(#[from] flow_store::StoreError),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
