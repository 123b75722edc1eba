// Copyright © Parallax Contributors
// SPDX-License-Identifier: Apache-2.0

//! Plain data types shared across the Parallax execution core: state keys and
//! values for the layered storage, plus the ledger-level parameters handed
//! through to the transaction executor.

mod ledger;
mod state;

pub use ledger::{BlockHeader, LedgerConfig};
pub use state::{StateKey, StateValue, ValueStatus};
