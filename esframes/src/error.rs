//! Error types for query building and response decoding

/// esframes errors
#[derive(Debug, thiserror::Error)]
pub enum EsFramesError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid raw DSL query: {0}")]
    InvalidRawDsl(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("{0}")]
    Downstream(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EsFramesError {
    /// Whether the error was caused by Elasticsearch or the transport
    /// rather than by the query itself.
    pub fn is_downstream(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Downstream(_) | Self::Io(_))
    }

    /// Short machine-readable classification, as used in logs.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidQuery(_) | Self::MissingField(_) => "invalid_query",
            Self::InvalidRawDsl(_) => "invalid_raw_dsl",
            Self::Decode(_) => "decode_error",
            Self::Downstream(_) => "downstream_error",
            Self::Config(_) => "config_error",
            Self::Json(_) => "json_error",
            Self::Io(_) => "io_error",
        }
    }
}

impl Clone for EsFramesError {
    // serde_json and io errors are not Clone; they are carried by message.
    fn clone(&self) -> Self {
        match self {
            Self::InvalidQuery(s) => Self::InvalidQuery(s.clone()),
            Self::MissingField(s) => Self::MissingField(s.clone()),
            Self::InvalidRawDsl(s) => Self::InvalidRawDsl(s.clone()),
            Self::Decode(s) => Self::Decode(s.clone()),
            Self::Downstream(s) => Self::Downstream(s.clone()),
            Self::Config(s) => Self::Config(s.clone()),
            Self::Json(e) => Self::Decode(e.to_string()),
            Self::Io(e) => Self::Downstream(e.to_string()),
        }
    }
}
