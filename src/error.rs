use thiserror::Error;

/// Hard errors reported synchronously when a session start is malformed.
/// Everything else in the engine is absorbed and retried on the next tick.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("session duration must be greater than zero")]
    InvalidDuration,

    #[error("a focus session is already active")]
    SessionAlreadyActive,

    #[error("failed to persist session start: {0}")]
    Storage(anyhow::Error),
}
