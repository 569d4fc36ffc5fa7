//! # Bruteguard Core
//!
//! Domain types, errors and configuration shared by every Bruteguard crate.

pub mod config;
pub mod error;
pub mod repository;
pub mod types;

pub use config::*;
pub use error::{GuardError, Result};
pub use repository::SubnetRepository;
pub use types::*;
