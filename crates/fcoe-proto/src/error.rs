/// FIP protocol error types.
///
/// Nothing here is fatal: every variant is a drop/ignore decision that
/// the controller state machine already expects. Errors never cross the
/// subsystem boundary as failures, only as silently discarded frames.

/// Reasons a frame or request is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FipError {
    #[error("frame truncated")]
    Truncated,
    #[error("unsupported FIP version")]
    Version,
    #[error("descriptor length out of bounds")]
    DescBounds,
    #[error("descriptor length wrong for its type")]
    DescLength,
    #[error("unexpected critical descriptor type")]
    UnexpectedDesc,
    #[error("required descriptor missing")]
    MissingDesc,
    #[error("invalid MAC address")]
    InvalidMac,
    #[error("invalid FC-MAP")]
    InvalidFcMap,
    #[error("missing or invalid name descriptor")]
    InvalidName,
    #[error("controller state does not permit this operation")]
    WrongState,
}

/// Result type alias for FIP operations.
pub type FipResult<T> = Result<T, FipError>;
