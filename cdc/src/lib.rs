pub mod checkpoint;
pub mod classifier;
mod codec;
pub mod concurrency;
pub mod destination;
pub mod error;
pub mod filter;
pub mod macros;
pub mod registry;
pub mod replicator;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
