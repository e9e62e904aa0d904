use crate::types::StateId;

/// Top-level hintgen error type.
///
/// All fallible operations in `hintgen-core` return [`Result<T, HintgenError>`](Result).
#[derive(thiserror::Error, Debug)]
pub enum HintgenError {
    /// Error from the state store (`SQLite` operations, serialization).
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Error in configuration or exercise definition.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Error raised while computing a hint.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Error from the language front-end.
    #[error("Language error: {0}")]
    Lang(#[from] hintgen_lang::LangError),
}

/// Errors from the SQLite-backed state store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Underlying `SQLite` operation failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A referenced record was not found in the store.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// JSON serialization of trees or exercise definitions failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors in hintgen configuration and exercise definitions.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist at the expected path.
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Values are present but semantically invalid.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// File syntax could not be parsed (TOML error).
    #[error("Parse error: {0}")]
    Parse(String),

    /// Filesystem I/O error reading or writing configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the hint engine.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// No exercise with this name has been set up.
    #[error("Unknown exercise: {0}")]
    UnknownExercise(String),

    /// The instructor solution does not pass the exercise's tests.
    #[error("Solution for {exercise} does not pass its tests: {feedback}")]
    SolutionFails { exercise: String, feedback: String },

    /// A change vector could not be applied to the tree it was computed on.
    #[error("Edit cannot be applied: {0}")]
    InvalidEdit(String),

    /// A stored state has no recoverable tree.
    #[error("State {0} has no tree")]
    MissingTree(StateId),
}

/// Convenience alias for `Result<T, HintgenError>`.
pub type Result<T> = std::result::Result<T, HintgenError>;
