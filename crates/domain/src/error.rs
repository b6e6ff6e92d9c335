/// Shared error type used across all widget crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("metadata fetch: {0}")]
    MetadataFetch(String),

    #[error("transport send: {0}")]
    TransportSend(String),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
