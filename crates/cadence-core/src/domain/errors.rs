//! Errors - エラー型と分類
//!
//! - `ErrorKind`: 運用分類（ログレベルとリトライ判断に使う）
//! - `ProviderError`: datastore 側のエラー
//! - `HandlerError`: domain handler が返すエラー

use thiserror::Error;

/// Operational classification of a failure.
///
/// - Transient: 一時的なエラー（次の iteration で回復しうる）
/// - Permanent: 恒久的なエラー（データ不整合など）
/// - Infrastructure: インフラエラー（datastore や外部 API の障害）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Infrastructure => "infrastructure",
        };
        f.write_str(name)
    }
}

/// Failure of a persistence provider operation.
///
/// "Nothing is due" is never an error: providers return `Ok(None)` for it.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Datastore connectivity or query failure.
    #[error("persistence unavailable: {0}")]
    Unavailable(String),

    #[error("failed to decode document '{id}' in '{collection}': {reason}")]
    Decode {
        collection: String,
        id: String,
        reason: String,
    },

    #[error("failed to encode entity: {0}")]
    Encode(String),

    #[error("invalid collection name '{0}'")]
    InvalidCollection(String),

    #[error("invalid field path '{0}'")]
    InvalidField(String),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Unavailable(_) => ErrorKind::Infrastructure,
            ProviderError::Decode { .. }
            | ProviderError::Encode(_)
            | ProviderError::InvalidCollection(_)
            | ProviderError::InvalidField(_) => ErrorKind::Permanent,
        }
    }
}

impl From<sqlx::Error> for ProviderError {
    fn from(err: sqlx::Error) -> Self {
        ProviderError::Unavailable(err.to_string())
    }
}

/// Error returned by a domain handler.
#[derive(Debug)]
pub struct HandlerError {
    kind: ErrorKind,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Infrastructure, message)
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handler failed ({}): {}", self.kind, self.message)
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn std::error::Error + 'static))
    }
}

impl From<ProviderError> for HandlerError {
    fn from(err: ProviderError) -> Self {
        let kind = err.kind();
        HandlerError::new(kind, err.to_string()).with_source(err)
    }
}
