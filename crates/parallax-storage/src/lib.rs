// Copyright © Parallax Contributors
// SPDX-License-Identifier: Apache-2.0

//! Layered in-memory state storage for the Parallax execution core.
//!
//! The building blocks, bottom up:
//!
//! - [`MemoryStorage`]: a single key/value layer over a lock-striped bucket
//!   map, optionally ordered and optionally using logical-deletion
//!   tombstones.
//! - [`MultiLayerStorage`]: a stack of frozen layers above a pluggable
//!   backend, presenting one logical view of state.
//! - [`StorageView`]: a forked handle over the stack, the workspace of one
//!   speculative execution, with an optional private mutable layer on top.
//! - [`ReadWriteSetStorage`]: a tracing wrapper that records every key an
//!   execution touches, classified as read or write, for conflict detection.

mod error;
mod memory_storage;
mod multi_layer;
mod read_write_set;
mod traits;
mod view;

pub use error::{Result, StorageError};
pub use memory_storage::{BackendStorage, MemoryStorage, MutableStorage};
pub use multi_layer::MultiLayerStorage;
pub use read_write_set::{ReadWriteSet, ReadWriteSetStorage};
pub use traits::{Storage, StorageRead, StorageWrite};
pub use view::StorageView;
