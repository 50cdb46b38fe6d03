use thiserror::Error;

#[derive(Error, Debug)]
pub enum KiokuError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Transcode error: {0}")]
    Transcode(String),

    #[error("Persist error: {0}")]
    Persist(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, KiokuError>;
