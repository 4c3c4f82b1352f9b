use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("File operation failed: {0}")]
    FileOperation(String),

    #[error("Import finished with {failed} failed record(s)")]
    PartialImport { failed: usize },

    #[error("Panel error: {0}")]
    SyncError(#[from] panel_sync::SyncError),

    #[error("{0}")]
    CommonError(#[from] panel_types::CommonError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Dialog error: {0}")]
    DialogError(#[from] dialoguer::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
