//! Error types for ironorm

use thiserror::Error;

/// Result type alias for ironorm operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for database operations
#[derive(Debug, Error)]
pub enum OrmError {
    /// Invalid, missing, or conflicting connection configuration.
    #[error("config error: {0}")]
    Config(String),

    /// The driver refused to connect.
    #[error("connect error: {0}")]
    Connect(String),

    /// Database connection error
    #[error("connection error: {0}")]
    Connection(String),

    /// Query execution error
    #[error("query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// A query error whose driver signature matches a lost-connection pattern.
    #[error("lost connection: {0}")]
    LostConnection(String),

    /// Commit or rollback failed.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// A migration threw during `up`/`down`.
    #[error("migration error: {0}")]
    Migration(String),

    /// A relation name was referenced that the model never declared.
    #[error("relation not found: {0}")]
    RelationNotFound(String),

    /// A declared relation was accessed before it was loaded.
    #[error("relation not loaded: {0}")]
    RelationNotLoaded(String),

    /// Attempted to mass-assign a guarded attribute.
    #[error("mass assignment error: attribute `{0}` is guarded")]
    MassAssignment(String),

    /// `sole()`/`firstOrFail()` found no matching row.
    #[error("no records found")]
    RecordsNotFound,

    /// `sole()` found more than one matching row.
    #[error("multiple records found, expected exactly one")]
    MultipleRecordsFound,

    /// Row not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique constraint violation
    #[error("unique constraint violation: {0}")]
    UniqueViolation(String),

    /// Foreign key constraint violation
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Check constraint violation
    #[error("check constraint violation: {0}")]
    CheckViolation(String),

    /// Row decode/mapping error
    #[error("decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Validation error, including grammar-level compile validation failures
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Pool error
    #[cfg(feature = "pool")]
    #[error("pool error: {0}")]
    Pool(String),

    /// Query timeout error
    #[error("query timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl OrmError {
    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Check if this is a unique violation error
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Check if this is a lost-connection error: either tagged directly, or
    /// a driver error whose transport state matches the pattern.
    pub fn is_lost_connection(&self) -> bool {
        match self {
            Self::LostConnection(_) => true,
            Self::Query(e) => e.is_closed(),
            _ => false,
        }
    }

    /// Parse a tokio_postgres error into a more specific OrmError
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            return Self::LostConnection(err.to_string());
        }
        if let Some(db_err) = err.as_db_error() {
            let constraint = db_err.constraint().unwrap_or("unknown");
            let message = db_err.message();

            match db_err.code().code() {
                "23505" => return Self::UniqueViolation(format!("{}: {}", constraint, message)),
                "23503" => {
                    return Self::ForeignKeyViolation(format!("{}: {}", constraint, message));
                }
                "23514" => return Self::CheckViolation(format!("{}: {}", constraint, message)),
                _ => {}
            }
        }
        Self::Query(err)
    }
}

#[cfg(feature = "pool")]
impl From<deadpool_postgres::PoolError> for OrmError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}
