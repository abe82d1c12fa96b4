use crate::models::ConnectionStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error ({field}): {message}")]
    Validation { field: String, message: String },

    #[error("Connection error ({ip}): {message}")]
    Connection {
        ip: String,
        status: ConnectionStatus,
        message: String,
    },

    #[error("Vault error: {0}")]
    Vault(String),

    #[error("Command error: {0}")]
    Command(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Role configuration error: {0}")]
    Role(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Remote error: {0}")]
    Remote(#[from] hadrc::Error),
}

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
