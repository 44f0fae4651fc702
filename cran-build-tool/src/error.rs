// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {cran_packaging::error::CranPackagingError, thiserror::Error};

/// Primary tool error type.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    CranPackaging(#[from] CranPackagingError),

    #[error("SQLite error: {0:?}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0:?}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL error: {0:?}")]
    Url(#[from] url::ParseError),

    #[error("YAML error: {0:?}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("package {0} is not available upstream")]
    PackageNotAvailable(String),

    #[error("epoch ledger is inconsistent after write: expected base epoch {expected}, read {actual}")]
    EpochLedgerInconsistent { expected: u32, actual: u32 },

    #[error("unexpected database user_version {0}; database likely corrupted")]
    DatabaseCorrupt(usize),

    #[error("repository rejected {0}: {1}")]
    RepositoryRejected(String, String),

    #[error("expected exactly one source control file under {0}")]
    SourceControlFileAmbiguous(String),

    #[error("expected exactly one extracted source directory under {0}")]
    SourceDirectoryAmbiguous(String),

    #[error("command {0} exited with {1}")]
    CommandFailed(String, String),

    #[error("{0} package build(s) failed")]
    BuildsFailed(usize),

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),
}

/// Result wrapper for this tool.
pub type Result<T> = std::result::Result<T, ToolError>;
