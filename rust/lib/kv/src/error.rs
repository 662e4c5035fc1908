use thiserror::Error;

#[derive(Error, Debug)]
pub enum KVError {
    #[error("open failed: {0}")]
    OpenFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("close failed: {0}")]
    CloseFailed(String),

    #[error("store is closed")]
    Closed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
