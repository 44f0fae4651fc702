// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use thiserror::Error;

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum CranPackagingError {
    #[error("error parsing string to integer: {0}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("not a valid R package version: {0}")]
    UpstreamVersionInvalid(String),

    #[error("R package version does not translate into a valid Debian version: {0}")]
    UpstreamVersionNotDebian(String),

    #[error("the epoch component has non-digit characters: {0}")]
    EpochNonNumeric(String),

    #[error("cannot isolate packaging revision suffix in version: {0}")]
    RevisionSuffixInvalid(String),

    #[error("malformed package reference: {0}")]
    PackageRefInvalid(String),

    #[error("version constraints are not allowed in a package reference: {0}")]
    PackageRefConstraint(String),

    #[error("package index parse error on line {0}: {1}")]
    IndexParse(usize, String),

    #[error("package index entry lacks required field: {0}")]
    IndexRequiredFieldMissing(&'static str),

    #[error("R dependency does not appear to be well-formed: {0}")]
    DependencyParse(String),

    #[error("unknown package repository: {0}")]
    UnknownRepository(String),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, CranPackagingError>;
