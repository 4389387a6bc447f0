//! Domain error taxonomy shared by handlers, repositories and the dispatcher.
//!
//! Every variant except `Internal` is an "expected" failure: it is rendered as
//! a `{"status":"fail","error":{...}}` envelope on the issuing session and the
//! connection stays open. `Internal` escaping a command handler is the one
//! case that closes the socket (1011).

use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("Not found {0}")]
    NotFound(String),

    #[error("Not unique {0}")]
    NotUnique(String),

    #[error("{0}")]
    Internal(String),
}

impl DomainError {
    /// Numeric error codes are part of the wire contract; clients key on them.
    pub fn code(&self) -> u16 {
        match self {
            DomainError::Validation(_) => 1,
            DomainError::Unauthorized => 2,
            DomainError::Forbidden(_) => 3,
            DomainError::NotFound(_) => 4,
            DomainError::NotUnique(_) => 5,
            DomainError::Internal(_) => 500,
        }
    }

    /// Render the fail envelope sent back on the issuing session.
    pub fn fail_body(&self) -> Value {
        json!({
            "status": "fail",
            "error": {
                "message": self.to_string(),
                "code": self.code(),
            }
        })
    }

    /// True only for errors that must terminate the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DomainError::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_body_carries_code_and_message() {
        let err = DomainError::Validation("members_id: Missing".to_string());
        let body = err.fail_body();
        assert_eq!(body["status"], "fail");
        assert_eq!(body["error"]["code"], 1);
        assert_eq!(body["error"]["message"], "members_id: Missing");
    }

    #[test]
    fn only_internal_is_fatal() {
        assert!(DomainError::Internal("boom".into()).is_fatal());
        assert!(!DomainError::Unauthorized.is_fatal());
        assert!(!DomainError::NotFound("Room".into()).is_fatal());
    }
}
