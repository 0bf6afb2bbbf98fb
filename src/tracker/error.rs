use thiserror::Error;

/// Reasons a tracker operation was refused. Rejections carry a human readable reason and never
/// leave partial state behind.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Activity title can't be empty")]
    EmptyTitle,

    #[error("Activity {0} already exists")]
    DuplicateActivity(String),

    #[error("Hours must be a non-negative number, got {0}")]
    InvalidHours(f64),

    #[error("Another save is still in progress, try again")]
    SyncInProgress,

    #[error("User name can't be empty")]
    EmptyUserName,

    #[error("User {0} already exists")]
    UserExists(String),

    #[error("Backend error: {0:#}")]
    Backend(#[from] anyhow::Error),
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;
