use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    /// Broker unreachable, send rejected or offset commit refused.
    #[error("Transport error: {0}")]
    Transport(String),
    /// Inbound payload is not a valid scan request.
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    /// The OCR engine could not process the image.
    #[error("OCR failed: {0}")]
    Engine(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl ScanError {
    /// Short label used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::Transport(_) => "transport",
            ScanError::Deserialization(_) => "deserialization",
            ScanError::Engine(_) => "engine",
            ScanError::Io(_) => "io",
            ScanError::InvalidRequest(_) => "invalid_request",
            ScanError::Serialization(_) => "serialization",
            ScanError::Config(_) => "config",
        }
    }
}
