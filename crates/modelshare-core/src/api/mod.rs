//! API implementation submodules.
//!
//! Each submodule contains `impl ModelShareApi` blocks; the struct itself
//! lives in `lib.rs`.

mod builder;
mod models;
mod state;
mod storage;

pub use builder::ModelShareApiBuilder;
pub(crate) use state::ApiState;
pub use storage::{RuntimePaths, StorageOperationResult, StoragePaths};
