/// Errors surfaced by an [`EventLog`](crate::log::EventLog) backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    #[error("record not found: {0}")]
    RecordNotFound(String),
}
