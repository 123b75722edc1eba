// Copyright © Parallax Contributors
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one entry of the ledger state as a `(table, row)` pair.
///
/// Equality and hashing cover the whole pair; ordering is lexicographic on
/// table first, row second, which is what the ordered storage index relies
/// on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey {
    table: String,
    row: String,
}

impl StateKey {
    pub fn new(table: impl Into<String>, row: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            row: row.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn row(&self) -> &str {
        &self.row
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.row)
    }
}

/// Liveness tag of a stored value. `Deleted` entries are tombstones: they
/// shadow entries of lower storage layers so that a logically removed key
/// does not resurface through read fallthrough.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueStatus {
    Normal,
    Deleted,
}

/// An opaque byte payload plus its liveness status.
///
/// The payload is `Bytes` so that copies taken by concurrent readers are
/// reference-counted rather than deep.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateValue {
    data: Bytes,
    status: ValueStatus,
}

impl StateValue {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            status: ValueStatus::Normal,
        }
    }

    /// A tombstone carrying no payload.
    pub fn deleted() -> Self {
        Self {
            data: Bytes::new(),
            status: ValueStatus::Deleted,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.status == ValueStatus::Deleted
    }

    pub fn status(&self) -> ValueStatus {
        self.status
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    pub fn set_data(&mut self, data: impl Into<Bytes>) {
        self.data = data.into();
        self.status = ValueStatus::Normal;
    }
}

impl From<Vec<u8>> for StateValue {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&str> for StateValue {
    fn from(data: &str) -> Self {
        Self::new(data.as_bytes().to_vec())
    }
}
