use crate::db::models::{EntityKind, EntityRef};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(EntityRef),

    #[error("Dangling reference: {referenced_by} points at missing {kind} {id}")]
    DanglingReference {
        kind: EntityKind,
        id: i64,
        referenced_by: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn dangling(kind: EntityKind, id: i64, referenced_by: impl Into<String>) -> Self {
        AppError::DanglingReference {
            kind,
            id,
            referenced_by: referenced_by.into(),
        }
    }

    /// Message safe to show to whoever initiated the operation.
    /// Internal detail is logged, never surfaced.
    pub fn public_message(&self) -> String {
        match self {
            AppError::NotFound(entity) => format!("{} not found", entity.kind),
            AppError::DanglingReference { .. } => {
                tracing::error!("Aborted transaction: {}", self);
                "The operation could not be completed".to_string()
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Internal server error".to_string()
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                "Internal server error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_the_kind() {
        let err = AppError::NotFound(EntityRef::post(7));
        assert_eq!(err.public_message(), "post not found");
        assert_eq!(err.to_string(), "Not found: post 7");
    }

    #[test]
    fn dangling_reference_is_generic_to_callers() {
        let err = AppError::dangling(EntityKind::Post, 3, "comment 12");
        assert_eq!(err.public_message(), "The operation could not be completed");
        assert!(err.to_string().contains("missing post 3"));
        assert!(err.to_string().contains("comment 12"));
    }

    #[test]
    fn database_errors_are_hidden() {
        let err = AppError::Database(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn internal_errors_are_hidden() {
        let err = AppError::Internal("boom".into());
        assert_eq!(err.public_message(), "Internal server error");
    }
}
