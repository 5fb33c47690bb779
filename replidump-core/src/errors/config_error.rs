//! Configuration errors.

/// Errors raised while loading and validating the settings file.
///
/// All of these are fatal before any backup work starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("settings file not found: {path}")]
    FileNotFound { path: String },

    #[error("settings parse error in {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("missing required option [{section}] {option}")]
    MissingOption { section: String, option: String },

    #[error("invalid value for [{section}] {option}: {message}")]
    InvalidValue {
        section: String,
        option: String,
        message: String,
    },
}
