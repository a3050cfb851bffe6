/// Error type for deploy_notify operations that end the invocation
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Missing required input: {field}")]
    MissingContext { field: &'static str },

    #[error("Webhook rejected the message with status {status}: {body}")]
    Delivery { status: u16, body: String },

    #[error("Webhook request failed: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

impl NotifyError {
    /// Process exit code reported to the CI runner for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            NotifyError::Delivery { .. } | NotifyError::Transport(_) => 1,
            NotifyError::MissingContext { .. }
            | NotifyError::ConfigError(_)
            | NotifyError::TomlParseError(_) => 2,
        }
    }
}

/// Helper type for Results that use NotifyError
pub type Result<T> = std::result::Result<T, NotifyError>;
