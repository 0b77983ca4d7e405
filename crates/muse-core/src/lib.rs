//! Core types, config, and errors for Muse.

pub mod config;
pub mod error;
pub mod types;
