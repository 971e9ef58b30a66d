use thiserror::Error;

/// Result type used throughout the engine.
pub type Result<T> = std::result::Result<T, DbError>;

/// Error taxonomy. Every statement failure maps onto one of these kinds;
/// the executor converts them into a non-zero `ExecutionResult` code after
/// draining its undo list.
#[derive(Error, Debug)]
pub enum DbError {
    /// Parser rejected the input. Carries the source position.
    #[error("syntax error: {msg} at line {line} column {column}")]
    Syntax { msg: String, line: u32, column: u32 },

    /// Value could not be coerced to the column's declared type.
    #[error("type error: {0}")]
    Type(String),

    /// NOT NULL / UNIQUE / CHECK / FOREIGN KEY violation.
    #[error("constraint '{name}' violated: {msg}")]
    Constraint { name: String, msg: String },

    /// Named table, column, constraint or sequence does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// CREATE TABLE with a colliding name or name hash.
    #[error("duplicate name: {0}")]
    DuplicateName(String),

    /// B-tree insert collided with an existing key.
    #[error("duplicate key in index of {0}")]
    DuplicateKey(String),

    /// Foreign-key action recursion exceeded the configured depth.
    #[error("cascade cycle: {0}")]
    CascadeCycle(String),

    /// Underlying file I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Magic number or length mismatch on disk. Marks the database read-only.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// The configured file size limit was reached.
    #[error("out of space: {0}")]
    OutOfSpace(String),

    /// Database was marked read-only after corruption was detected.
    #[error("database is read-only")]
    ReadOnly,
}

impl DbError {
    /// Numeric code reported in `ExecutionResult`.
    pub fn code(&self) -> i32 {
        match self {
            DbError::Syntax { .. } => 1,
            DbError::Type(_) => 2,
            DbError::Constraint { .. } => 3,
            DbError::NotFound(_) => 4,
            DbError::DuplicateName(_) => 5,
            DbError::DuplicateKey(_) => 6,
            DbError::CascadeCycle(_) => 7,
            DbError::Io(_) => 8,
            DbError::Corruption(_) => 9,
            DbError::OutOfSpace(_) => 10,
            DbError::ReadOnly => 11,
        }
    }

    /// Constraint violations are reported with the offending constraint name.
    pub fn constraint(name: &str, msg: impl Into<String>) -> DbError {
        DbError::Constraint {
            name: name.to_string(),
            msg: msg.into(),
        }
    }
}
