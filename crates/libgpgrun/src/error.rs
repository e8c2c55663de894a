use thiserror::Error;

#[derive(Error, Debug)]
pub enum GpgError {
    #[error("gpg executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("failed to spawn gpg: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to set up channels: {0}")]
    ChannelSetup(#[source] std::io::Error),

    #[error("session already started")]
    AlreadyStarted,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
