//! Common utilities for spyglass
//!
//! This crate provides the shared error type used across all spyglass modules.

pub mod error;

pub use error::{Result, SpyglassError};
