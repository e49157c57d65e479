//! # LSI Common Library
//!
//! Shared code for the learning-style inventory services including:
//! - Error and result types
//! - TOML bootstrap configuration (logging, scoring settings)
//! - Database initialization and row models

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
