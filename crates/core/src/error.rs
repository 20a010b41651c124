use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("field at position {0} has an empty name")]
    EmptyFieldName(usize),

    #[error("field '{0}' has an empty label")]
    EmptyFieldLabel(String),

    #[error("duplicate field name '{0}'")]
    DuplicateField(String),

    #[error("configuration '{0}' declares no fields")]
    NoFields(String),

    #[error("configuration '{0}' has an empty default config")]
    EmptyDefaults(String),

    #[error("field '{field}' depends on unknown field '{depends_on}'")]
    UnknownDependency { field: String, depends_on: String },

    #[error("dependency cycle through field '{0}'")]
    CyclicDependency(String),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("invalid group order for '{config}': {reason}")]
    InvalidGroupOrder { config: String, reason: String },

    #[error("load configuration '{0}' declares no file extensions")]
    NoExtensions(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndexError {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("collection already exists: {0}")]
    CollectionExists(String),

    #[error("chunk count {chunks} does not match embedding count {embeddings}")]
    LengthMismatch { chunks: usize, embeddings: usize },

    #[error("vector dimension {actual} != {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid response from {backend}: {details}")]
    Backend { backend: String, details: String },
}

impl IndexError {
    /// Maps an index failure onto the pipeline taxonomy for the stage that hit it.
    pub fn into_pipeline(self, stage: &'static str) -> PipelineError {
        match self {
            IndexError::CollectionNotFound(_) => PipelineError::PreconditionFailed {
                stage,
                missing: "store",
            },
            IndexError::LengthMismatch { .. } | IndexError::DimensionMismatch { .. } => {
                PipelineError::Validation(self.to_string())
            }
            IndexError::CollectionExists(_) | IndexError::Backend { .. } => {
                PipelineError::Upstream {
                    stage,
                    details: self.to_string(),
                }
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{stage} requires a {missing} result first")]
    PreconditionFailed {
        stage: &'static str,
        missing: &'static str,
    },

    #[error("{stage} processor failed: {details}")]
    Upstream { stage: &'static str, details: String },

    #[error("configuration error: {0}")]
    Configuration(#[from] SchemaError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    ValidationError,
    PreconditionFailed,
    UpstreamFailure,
    ConfigurationError,
    Internal,
}

impl PipelineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn upstream(stage: &'static str, details: impl Into<String>) -> Self {
        Self::Upstream {
            stage,
            details: details.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            PipelineError::NotFound { .. } => ErrorCode::NotFound,
            PipelineError::Validation(_) => ErrorCode::ValidationError,
            PipelineError::PreconditionFailed { .. } => ErrorCode::PreconditionFailed,
            PipelineError::Upstream { .. } => ErrorCode::UpstreamFailure,
            PipelineError::Configuration(_) => ErrorCode::ConfigurationError,
            PipelineError::Io(_) | PipelineError::Regex(_) | PipelineError::Serialization(_) => {
                ErrorCode::Internal
            }
        }
    }

    /// HTTP-equivalent status for transports that bind this surface.
    pub fn status_code(&self) -> u16 {
        match self.code() {
            ErrorCode::NotFound => 404,
            ErrorCode::ValidationError | ErrorCode::PreconditionFailed => 400,
            ErrorCode::UpstreamFailure | ErrorCode::ConfigurationError | ErrorCode::Internal => {
                500
            }
        }
    }

    pub fn is_upstream(&self) -> bool {
        matches!(self, PipelineError::Upstream { .. })
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
