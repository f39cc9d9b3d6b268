//! # CLI Module
//!
//! Operator commands for the `enforcer` binary.
//!
//! ## Commands
//!
//! ### `check-config`
//!
//! Load a YAML configuration, apply `ENFORCER_*` overrides, validate it, and
//! build the engine once so trust material and the backend generator are
//! exercised:
//!
//! ```bash
//! enforcer check-config /etc/enforcer/enforcer.yaml
//! ```
//!
//! ### `inspect`
//!
//! Decode a credential without verifying it and print its classification,
//! token id, header, and claims:
//!
//! ```bash
//! enforcer inspect eyJhbGciOi...
//! ```
//!
//! ## Usage from Code
//!
//! ```rust,ignore
//! use enforcer::cli::run_cli;
//!
//! run_cli()?;
//! ```

mod commands;


pub use commands::{inspect_token, run_cli, Cli, Commands, TokenReport};
