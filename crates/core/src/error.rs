use thiserror::Error;

/// Engine-wide error taxonomy. Every error crossing a crate boundary is
/// one of these kinds so the Gateway can map it to an HTTP status and the
/// retry policy can classify it.
#[derive(Error, Debug)]
pub enum ChompError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("transient: {0}")]
    Transient(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl ChompError {
    /// Stable machine-readable code used in wire responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            ChompError::Validation(_) => "validation",
            ChompError::Unauthenticated(_) => "unauthenticated",
            ChompError::Forbidden(_) => "forbidden",
            ChompError::NotFound(_) => "not_found",
            ChompError::Conflict(_) => "conflict",
            ChompError::DeadlineExceeded(_) => "deadline_exceeded",
            ChompError::DependencyUnavailable(_) => "dependency_unavailable",
            ChompError::Transient(_) => "transient",
            ChompError::Internal(_) => "internal",
        }
    }

    /// Only transient errors are eligible for the Gateway retry policy
    /// (network reset, timeout, DNS failure, HTTP 5xx, HTTP 429).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChompError::Transient(_))
    }

    /// HTTP status the Gateway maps this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            ChompError::Validation(_) => 400,
            ChompError::Unauthenticated(_) => 401,
            ChompError::Forbidden(_) => 403,
            ChompError::NotFound(_) => 404,
            ChompError::Conflict(_) => 409,
            ChompError::DeadlineExceeded(_) => 504,
            ChompError::DependencyUnavailable(_) => 503,
            ChompError::Transient(_) => 503,
            ChompError::Internal(_) => 500,
        }
    }
}

pub type ChompResult<T> = Result<T, ChompError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(ChompError::Transient("reset".into()).is_retryable());
        assert!(!ChompError::Conflict("busy".into()).is_retryable());
        assert!(!ChompError::DependencyUnavailable("pg down".into()).is_retryable());
        assert!(!ChompError::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ChompError::Validation("x".into()).http_status(), 400);
        assert_eq!(ChompError::Unauthenticated("x".into()).http_status(), 401);
        assert_eq!(ChompError::Forbidden("x".into()).http_status(), 403);
        assert_eq!(ChompError::NotFound("x".into()).http_status(), 404);
        assert_eq!(ChompError::Conflict("x".into()).http_status(), 409);
        assert_eq!(ChompError::DependencyUnavailable("x".into()).http_status(), 503);
    }
}
