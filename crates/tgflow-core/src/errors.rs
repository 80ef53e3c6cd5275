/// Core error type.
///
/// Adapter crates map their specific errors into this type so the dispatch
/// loop can handle failures consistently (polite chat reply + full log).
/// Pipeline-stop is deliberately *not* an error; see [`crate::handler::Flow`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),

    /// The collaborator does not implement this operation.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("invalid handler {name}: {reason}")]
    InvalidHandler { name: String, reason: String },

    #[error("invalid field {key}: {reason}")]
    InvalidField { key: String, reason: String },

    #[error("store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, Error>;
