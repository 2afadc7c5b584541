use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Failed to create checkpoint directory '{0}'")]
    DirCreation(PathBuf, #[source] std::io::Error),

    #[error("Failed to read checkpoint '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to write checkpoint '{0}'")]
    Write(PathBuf, #[source] std::io::Error),

    #[error("Failed to remove checkpoint '{0}'")]
    Remove(PathBuf, #[source] std::io::Error),

    #[error("Failed to decode checkpoint '{0}'")]
    Decode(PathBuf, #[source] Box<bincode::error::DecodeError>),

    #[error("Failed to encode checkpoint")]
    Encode(#[source] Box<bincode::error::EncodeError>),
}
