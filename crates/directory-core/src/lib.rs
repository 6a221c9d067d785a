//! # directory-core
//!
//! Core types shared by the directory protocol client crates.
//!
//! ## Modules
//!
//! - [`error`] - Error taxonomy for connection, bind, protocol and usage failures
//! - [`config`] - Configuration snapshot describing how to reach a directory server

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{DirectoryConfig, EncryptionMode};
pub use error::{Error, Result};
