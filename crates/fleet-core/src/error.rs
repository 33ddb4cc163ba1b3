use thiserror::Error;

/// Errors returned by [`crate::Fleet::command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("invalid machine index {index} (fleet has {len} machines)")]
    InvalidIndex { index: usize, len: usize },
}

/// Error returned when parsing an unknown command action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown machine action: {0}")]
pub struct UnknownAction(pub String);
