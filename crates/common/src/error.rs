// Error types for SSH Connector

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid local port {0}: must be between 1 and 65535")]
    InvalidLocalPort(u32),

    #[error("Invalid remote port {port}: must be between {min} and {max}")]
    InvalidRemotePort { port: u32, min: u16, max: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

pub type Result<T> = std::result::Result<T, Error>;
