use thiserror::Error;

/// Startup configuration failures. Always fatal, raised before any extraction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing DB_URL and POSTGRES_URL/POSTGRES_USER/POSTGRES_PASSWORD in env")]
    MissingCredentials,

    #[error("invalid JDBC url '{value}': {reason}")]
    InvalidJdbcUrl { value: String, reason: String },

    #[error("{name} must be a plain SQL identifier, got '{value}'")]
    InvalidIdentifier { name: &'static str, value: String },

    #[error("invalid source '{value}', expected one of sdmx, worldbank, who")]
    InvalidSource { value: String },

    #[error("source priority lists '{value}' more than once")]
    DuplicateSource { value: String },

    #[error("failed to read country dictionary '{path}': {reason}")]
    CountryDictionary { path: String, reason: String },
}
