//! Error types shared by every component.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::migration::MigrationSummary;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Unresolvable connection parameters, bad settings, or an invalid database list.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A consistency-capture sub-query failed. Never fatal to a capture.
    #[error("capture error: {0}")]
    Capture(String),

    /// A single database inside a batch failed.
    #[error("migration of `{database}` failed: {message}")]
    MigrationItem { database: String, message: String },

    /// One or more items of a batch failed; the summary is attached.
    #[error("{} of {} databases failed to migrate", .0.error_count, .0.databases.len())]
    BatchFailed(Box<MigrationSummary>),

    /// The data directory holds a newer version than the one about to start.
    #[error(
        "data directory {} was written by {existing} and cannot be opened by {target}",
        .data_dir.display()
    )]
    SafetyConflict {
        data_dir: PathBuf,
        existing: String,
        target: String,
    },

    #[error(transparent)]
    ExternalTool(#[from] ExternalToolError),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid toml: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }
}

/// Failure of an external program (dump, restore, service manager, initializer).
#[derive(Debug, Error)]
pub enum ExternalToolError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {}: {stderr}", exit_label(.code))]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{program}` did not finish within {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("i/o with `{program}` failed: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

impl ExternalToolError {
    pub fn program(&self) -> &str {
        match self {
            ExternalToolError::Spawn { program, .. }
            | ExternalToolError::Exit { program, .. }
            | ExternalToolError::Timeout { program, .. }
            | ExternalToolError::Io { program, .. } => program,
        }
    }
}
