use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwitchdError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SwitchdError {
    /// Short error code string for logs and API replies.
    pub fn code(&self) -> &'static str {
        match self {
            SwitchdError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SwitchdError>;
