//! tokenator: issues snap store, Launchpad and bot credentials and
//! distributes them to GitHub environment secrets.
//!
//! Re-exports modules needed by the binary and by integration tests in `tests/`.

pub mod cli;
pub mod config;
pub mod errors;
pub mod github;
pub mod http;
pub mod manager;
pub mod pat;
pub mod rotation;
pub mod store;
pub mod vault;
