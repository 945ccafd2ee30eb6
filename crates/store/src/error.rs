use thiserror::Error;

use chomp_core::ChompError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store timeout: {0}")]
    Timeout(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serde(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => StoreError::NotFound(e.to_string()),
            sqlx::Error::PoolTimedOut => StoreError::Timeout(e.to_string()),
            sqlx::Error::PoolClosed => StoreError::Unavailable(e.to_string()),
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) => StoreError::Connection(e.to_string()),
            sqlx::Error::Database(db) => {
                // 23505: unique_violation
                if db.code().as_deref() == Some("23505") {
                    StoreError::Duplicate(e.to_string())
                } else if db.code().as_deref() == Some("40001") {
                    // serialization_failure from a competing writer
                    StoreError::Conflict(e.to_string())
                } else {
                    StoreError::Query(e.to_string())
                }
            }
            _ => StoreError::Query(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serde(e.to_string())
    }
}

impl From<StoreError> for ChompError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => ChompError::NotFound(msg),
            StoreError::Duplicate(msg) | StoreError::Conflict(msg) => ChompError::Conflict(msg),
            StoreError::Unavailable(msg) => ChompError::DependencyUnavailable(msg),
            StoreError::Timeout(msg) | StoreError::Connection(msg) => ChompError::Transient(msg),
            StoreError::Query(msg) | StoreError::Serde(msg) => ChompError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_classifies_transient() {
        let chomp: ChompError = StoreError::Timeout("pool".into()).into();
        assert!(chomp.is_retryable());
    }

    #[test]
    fn duplicate_classifies_conflict() {
        let chomp: ChompError = StoreError::Duplicate("uq".into()).into();
        assert_eq!(chomp.code(), "conflict");
        assert!(!chomp.is_retryable());
    }

    #[test]
    fn unavailable_is_dependency_unavailable() {
        let chomp: ChompError = StoreError::Unavailable("down".into()).into();
        assert_eq!(chomp.code(), "dependency_unavailable");
    }
}
