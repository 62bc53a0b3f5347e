use thiserror::Error;

#[derive(Error, Debug)]
pub enum EdiError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cannot open database: {0}")]
    Open(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Bad schema: {0}")]
    BadSchema(String),

    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Database is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl EdiError {
    pub(crate) fn table_not_found(table: &str) -> Self {
        EdiError::NotFound(format!("table '{table}'"))
    }

    pub(crate) fn column_not_found(table: &str, column: &str) -> Self {
        EdiError::NotFound(format!("column '{table}.{column}'"))
    }

    pub(crate) fn row_not_found(table: &str, key: &str) -> Self {
        EdiError::NotFound(format!("row '{key}' in table '{table}'"))
    }

    /// True for the `NotFound` variant, which the convenience layer narrows to defaults.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EdiError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, EdiError>;
