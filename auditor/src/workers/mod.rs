//! Background workers of the audit engine.
//!
//! The [`subscriber`] coordinates shard discovery and dispatches the bounded
//! pool of [`reader`] tasks; the [`validator`] consumes the record channel
//! and drives sampled point-lookup validation. All workers observe the shared
//! shutdown signal and drain cooperatively.

pub mod base;
pub mod reader;
pub mod subscriber;
pub mod validator;
