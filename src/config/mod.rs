// src/config/mod.rs

//! Configuration loading and validation for vvexec.
//!
//! - `model.rs` defines the TOML-backed data model.
//! - `loader.rs` reads a config file from disk.
//! - `validate.rs` checks parent links, budgets and batch settings.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{
    BatchSection, BatchTimeoutsSection, ConfigFile, ConfigSection, DefaultSection, FileSpec,
    RawConfigFile, TestConfig,
};
