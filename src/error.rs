use std::path::PathBuf;

use thiserror::Error;

use crate::task_id::{TaskId, TaskIdGenerationError};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("configuration file '{}' does not exist", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("configuration file '{}' is invalid: {}", .0.display(), .1)]
    ConfigInvalid(PathBuf, String),

    #[error("metadata rule '{key}': invalid regex '{pattern}': {source}")]
    InvalidRegex {
        key: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("directory '{}' does not exist or is not a directory", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("task {id} ({kind}) failed: {message}")]
    TaskFailed {
        id: TaskId,
        kind: String,
        message: String,
    },

    #[error("metadata line '{line}' not found in '{}'", .file.display())]
    MetadataLineNotFound { file: PathBuf, line: String },

    #[error("no metadata line with key '{key}' in '{}'", .file.display())]
    AnchorNotFound { file: PathBuf, key: String },

    #[error("cleanup target '{}' does not exist", .0.display())]
    CleanupTargetMissing(PathBuf),

    #[error("path '{}' not found", .0.display())]
    PathNotFound(PathBuf),

    #[error("destination '{}' already exists", .0.display())]
    DestinationExists(PathBuf),

    #[error("task id allocation failed: {0}")]
    IdAllocation(#[from] TaskIdGenerationError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ImportError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigNotFound(_) => "config_not_found",
            Self::ConfigInvalid(_, _) => "config_invalid",
            Self::InvalidRegex { .. } => "invalid_regex",
            Self::DirectoryNotFound(_) => "directory_not_found",
            Self::TaskFailed { .. } => "task_failed",
            Self::MetadataLineNotFound { .. } => "metadata_line_not_found",
            Self::AnchorNotFound { .. } => "anchor_not_found",
            Self::CleanupTargetMissing(_) => "cleanup_target_missing",
            Self::PathNotFound(_) => "path_not_found",
            Self::DestinationExists(_) => "destination_exists",
            Self::IdAllocation(_) => "id_allocation",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Yaml(_) => "yaml_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;
