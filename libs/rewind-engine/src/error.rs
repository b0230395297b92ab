use rewind_api::LogError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("event log: {0}")]
    Log(#[from] LogError),

    #[error("malformed message: {0}")]
    Malformed(String),
}

impl EngineError {
    /// Prepend context to message-carrying variants.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}
