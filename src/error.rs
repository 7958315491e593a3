use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Internal error: {0}")]
    Internal(#[source] StoreError),
}

pub type GraphResult<T> = Result<T, GraphError>;

impl GraphError {
    /// HTTP-equivalent status for an API layer sitting on top of the engine
    pub fn status(&self) -> u16 {
        match self {
            GraphError::NotFound(_) => 404,
            GraphError::Unauthorized(_) => 403,
            GraphError::Validation(_) => 400,
            GraphError::Internal(_) => 500,
        }
    }
}

impl From<StoreError> for GraphError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => GraphError::NotFound(what),
            other => GraphError::Internal(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_stays_user_presentable() {
        let err: GraphError = StoreError::NotFound("Post abc".to_string()).into();
        assert!(matches!(err, GraphError::NotFound(ref what) if what == "Post abc"));
        assert_eq!(err.status(), 404);
    }

    #[test]
    fn test_database_errors_become_internal() {
        let err: GraphError = StoreError::Database(rusqlite::Error::InvalidQuery).into();
        assert!(matches!(err, GraphError::Internal(_)));
        assert_eq!(err.status(), 500);
    }
}
