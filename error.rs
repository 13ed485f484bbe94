/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The error taxonomy described in SPEC_FULL.md §7, plus an internal
//! `Storage` variant for driver-level failures the IndexedDB spec itself
//! has no name for.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// `open()` requested a version lower than the one already stored.
    Version { requested: u64, existing: u64 },
    /// Use of a closed/deleted handle, or a structural mutation attempted
    /// outside (or after) a version-change transaction.
    InvalidState(String),
    /// A data operation was attempted while the owning transaction was not
    /// `active`.
    TransactionInactive,
    /// A mutation was attempted inside a read-only transaction.
    ReadOnly,
    /// Duplicate primary key on `add`, duplicate unique-index key, or a
    /// name clash on create/rename.
    Constraint(String),
    /// An invalid key, invalid query, or a cursor direction violation.
    Data(String),
    /// A value could not be cloned/serialized.
    DataClone(String),
    /// An unknown object store or index name was referenced.
    NotFound(String),
    /// `autoIncrement` with an array/empty key path, multi-entry with an
    /// array key path, or a `continuePrimaryKey` misuse.
    InvalidAccess(String),
    /// The owning transaction was aborted.
    Abort,
    /// A key path failed to parse.
    Syntax(String),
    /// Driver-level failure with no IndexedDB-specified name (corrupt
    /// catalog row, I/O failure, …).
    Storage(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The DOM-exception-like name used to distinguish error kinds, per
    /// SPEC_FULL.md §7.
    pub fn name(&self) -> &'static str {
        match self {
            Error::Version { .. } => "VersionError",
            Error::InvalidState(_) => "InvalidStateError",
            Error::TransactionInactive => "TransactionInactiveError",
            Error::ReadOnly => "ReadOnlyError",
            Error::Constraint(_) => "ConstraintError",
            Error::Data(_) => "DataError",
            Error::DataClone(_) => "DataCloneError",
            Error::NotFound(_) => "NotFoundError",
            Error::InvalidAccess(_) => "InvalidAccessError",
            Error::Abort => "AbortError",
            Error::Syntax(_) => "SyntaxError",
            Error::Storage(_) => "Storage",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Version { requested, existing } => write!(
                f,
                "requested version {requested} is less than existing version {existing}"
            ),
            Error::InvalidState(msg) => write!(f, "{}: {}", self.name(), msg),
            Error::TransactionInactive => write!(f, "transaction is not active"),
            Error::ReadOnly => write!(f, "transaction is read-only"),
            Error::Constraint(msg) => write!(f, "{}: {}", self.name(), msg),
            Error::Data(msg) => write!(f, "{}: {}", self.name(), msg),
            Error::DataClone(msg) => write!(f, "{}: {}", self.name(), msg),
            Error::NotFound(msg) => write!(f, "{}: {}", self.name(), msg),
            Error::InvalidAccess(msg) => write!(f, "{}: {}", self.name(), msg),
            Error::Abort => write!(f, "transaction was aborted"),
            Error::Syntax(msg) => write!(f, "{}: {}", self.name(), msg),
            Error::Storage(msg) => write!(f, "storage driver error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        log::error!("sqlite driver error: {err}");
        Error::Storage(err.to_string())
    }
}

impl From<sea_query::error::Error> for Error {
    fn from(err: sea_query::error::Error) -> Self {
        log::error!("sea-query build error: {err}");
        Error::Storage(err.to_string())
    }
}
