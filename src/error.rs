use thiserror::Error;

#[derive(Error, Debug)]
pub enum FinsightError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Classification error: {0}")]
    Classification(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Semantic search error: {0}")]
    Semantic(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

pub type Result<T> = std::result::Result<T, FinsightError>;
