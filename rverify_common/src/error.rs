use thiserror::Error;

/// Numeric diagnostic codes carried by configuration and comparison errors.
pub mod codes {
    pub const BAD_REQUEST: u32 = 400;
    pub const NOT_FOUND: u32 = 404;

    pub const REGEXP_SYNTAX: u32 = 4001;
    pub const REPLACE_COUNT_MISMATCH: u32 = 4002;
    pub const REGEXP_FLAG: u32 = 4003;
    pub const RESULT_REMAP: u32 = 4010;
    pub const PRIMARY_KEY: u32 = 4020;
    pub const SCHEMA_SYNTAX: u32 = 4030;

    pub const INTERNAL: u32 = 5000;
    pub const MALFORMED_CONTENT: u32 = 5001;
    pub const INSTANTIATION: u32 = 5002;
    pub const SESSION: u32 = 5003;
    pub const TIMEOUT: u32 = 5004;
    pub const IO: u32 = 5005;
    pub const SERIALIZATION: u32 = 5006;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerifyError {
    #[error("Invalid configuration [{code}]: {message}")]
    Config { code: u32, message: String },

    #[error("No comparator registered for content type {0}")]
    ComparatorNotFound(String),

    #[error("Comparator for {content_type} could not be constructed: {message}")]
    Instantiation {
        content_type: String,
        message: String,
    },

    #[error("Comparison error [{code}]: {message}")]
    Comparison { code: u32, message: String },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Timed out after {0} ms")]
    Timeout(u128),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl VerifyError {
    pub fn config(code: u32, message: impl Into<String>) -> Self {
        Self::Config {
            code,
            message: message.into(),
        }
    }

    pub fn comparison(code: u32, message: impl Into<String>) -> Self {
        Self::Comparison {
            code,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::comparison(codes::MALFORMED_CONTENT, message)
    }

    /// Status code reported in error envelopes.
    pub fn code(&self) -> u32 {
        match self {
            Self::Config { code, .. } | Self::Comparison { code, .. } => *code,
            Self::ComparatorNotFound(_) => codes::NOT_FOUND,
            Self::Instantiation { .. } => codes::INSTANTIATION,
            Self::BadRequest(_) => codes::BAD_REQUEST,
            Self::Session(_) => codes::SESSION,
            Self::Timeout(_) => codes::TIMEOUT,
            Self::Io(_) => codes::IO,
            Self::Serialization(_) => codes::SERIALIZATION,
        }
    }
}

// io::Error is neither Clone nor PartialEq; sessions hand errors back by value.
impl From<std::io::Error> for VerifyError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VerifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct_per_kind() {
        let not_found = VerifyError::ComparatorNotFound("XSD".to_string());
        let instantiation = VerifyError::Instantiation {
            content_type: "XSD".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(not_found.code(), codes::NOT_FOUND);
        assert_eq!(instantiation.code(), codes::INSTANTIATION);
        assert_ne!(not_found.code(), instantiation.code());
    }

    #[test]
    fn test_config_error_carries_code() {
        let err = VerifyError::config(codes::REGEXP_SYNTAX, "unclosed group");
        assert_eq!(err.code(), 4001);
        assert!(err.to_string().contains("unclosed group"));
    }
}
