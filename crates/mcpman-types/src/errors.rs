//! Error types and conversions

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error("Server '{0}' not found")]
    ServerNotConnected(String),

    #[error("Tool '{tool}' not found on server '{server}'. Available tools: {available}")]
    ToolNotFound {
        server: String,
        tool: String,
        available: String,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Authentication failed for '{0}': run the authorization flow and retry")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<AppError> for String {
    fn from(err: AppError) -> String {
        err.to_string()
    }
}

impl AppError {
    /// True for failures that mean "the operator must re-run the auth flow".
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, AppError::Unauthorized(_))
    }
}
