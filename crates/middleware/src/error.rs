use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
    #[error("ack failed: {0}")]
    AckFailed(String),
    #[error("timeout")]
    Timeout,
    #[error("closed: {0}")]
    Closed(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("read failed: {0}")]
    ReadFailed(String),
    #[error("conflict on {key}: expected etag {expected:?}, found {actual:?}")]
    Conflict {
        key: String,
        expected: Option<String>,
        actual: Option<String>,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("unsupported content encoding: {0}")]
    UnsupportedEncoding(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
