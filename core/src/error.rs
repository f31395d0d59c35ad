use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Statement {statement_id} changed underneath settlement of payment {payment_id}")]
    LedgerConflict {
        payment_id: String,
        statement_id: String,
    },

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Stable wire code exposed to callers of the API facade.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Caller errors are rejected before any mutation and are safe to retry
    /// with corrected input. Everything else is an internal failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound { .. } | Self::Forbidden(_)
        )
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
