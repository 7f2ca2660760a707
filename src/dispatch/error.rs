use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("a session is already running")]
    AlreadyRunning,

    #[error("no session loaded")]
    NoSession,
}

pub type Result<T> = std::result::Result<T, DispatchError>;
