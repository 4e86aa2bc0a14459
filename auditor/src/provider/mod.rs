//! Provider seam for the change-stream and key-value APIs.
//!
//! The engine is written against the traits in [`base`]; the [`aws`] module
//! adapts them onto the DynamoDB and DynamoDB Streams SDK clients. Tests use
//! the scripted in-memory provider from `test_utils`.

pub mod aws;
pub mod base;

pub use base::{StreamApi, TableApi};
