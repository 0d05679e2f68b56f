//! Configuration for the proxy
//!
//! Layering, lowest to highest: built-in defaults, the TOML config file,
//! environment variables and command-line flags (see [`crate::cli`]).

mod loader;
mod schema;

pub use loader::ConfigLoader;
pub use schema::*;
