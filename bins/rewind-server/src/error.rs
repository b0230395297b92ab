use rewind_engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("{0}")]
    Config(#[from] EngineError),

    #[error("api server: {0}")]
    Serve(String),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
