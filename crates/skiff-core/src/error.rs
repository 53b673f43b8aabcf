//! Error types for skiff-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SkiffError {
    #[error("driver error: {0}")]
    Driver(String),

    #[error("failed to create container from {image}: {reason}")]
    Create { image: String, reason: String },

    #[error("initialization error: {0}")]
    Init(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("garbage collection is disabled")]
    GcDisabled,

    #[error("unknown container: {0}")]
    UnknownContainer(String),

    #[error("timeout after {0} seconds")]
    Timeout(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
