use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuthError>;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Cache load failed: {0}")]
    CacheLoad(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Group already exists: {0}")]
    GroupExists(String),

    #[error("The system group '{0}' cannot be modified or deleted")]
    SystemGroup(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),
}
