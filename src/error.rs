use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanoraError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Validation(String),
}

pub use crate::Result;

impl From<diesel::result::Error> for PlanoraError {
    fn from(err: diesel::result::Error) -> Self {
        PlanoraError::Runtime(err.to_string())
    }
}

impl From<serde_json::Error> for PlanoraError {
    fn from(err: serde_json::Error) -> Self {
        PlanoraError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_keeps_prefix_for_internal_variants() {
        let err = PlanoraError::Config("x".to_string());
        assert!(format!("{err}").contains("configuration error"));
        let err = PlanoraError::NotFound("Plan not found".to_string());
        assert_eq!(format!("{err}"), "Plan not found");
    }

    #[test]
    fn serde_errors_convert_to_serialization() {
        let err: PlanoraError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, PlanoraError::Serialization(_)));
    }
}
