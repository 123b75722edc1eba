// Copyright © Parallax Contributors
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// Header of the block being executed. The execution core treats it as an
/// opaque parameter of the executor capability; only the executor interprets
/// the fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    pub timestamp: u64,
    pub gas_limit: u64,
}

/// Ledger-level execution parameters, fixed for the duration of a block and
/// handed through to every execute context.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub block_gas_limit: u64,
    pub block_tx_count_limit: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            block_gas_limit: 3_000_000_000,
            block_tx_count_limit: 1_000,
        }
    }
}
