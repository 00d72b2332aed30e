//! Persistent configuration: the key vocabulary, schema migrations and the
//! atomically-rewritten `KEY=VALUE` store.

pub mod keys;
pub mod migrate;
mod store;

pub use store::{parse, render, validate_key, validate_value, ConfigStore};
