//! Store error types.

use thiserror::Error;

/// Errors from a store or one of its cursors.
///
/// The display text is what a remote caller sees, so `NotFound` keeps the
/// `NotFound` prefix that clients match on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("NotFound: key not found in database")]
    NotFound,

    #[error("database is not open")]
    NotOpen,

    #[error("cursor has already ended")]
    CursorEnded,

    #[error("store failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display_prefix() {
        assert!(StoreError::NotFound.to_string().starts_with("NotFound"));
        assert!(StoreError::NotFound.is_not_found());
        assert!(!StoreError::NotOpen.is_not_found());
    }

    #[test]
    fn test_backend_display() {
        let err = StoreError::Backend("disk full".to_string());
        assert!(err.to_string().contains("disk full"));
    }
}
