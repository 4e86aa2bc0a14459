pub mod audit;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod keys;
pub mod macros;
pub mod provider;
pub mod stats;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
